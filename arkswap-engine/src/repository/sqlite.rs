use super::OrderBy;
use super::OrderDirection;
use super::SwapFilter;
use super::SwapRepository;
use crate::model::SwapRecord;
use arkswap_core::Error;
use async_trait::async_trait;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::sqlite::SqliteRow;
use sqlx::Pool;
use sqlx::QueryBuilder;
use sqlx::Row;
use sqlx::Sqlite;
use std::path::Path;

/// SQLite-backed implementation of [`SwapRepository`].
///
/// One row per swap: `(id, swap_type, status, created_at, data)` with the
/// full record as JSON in `data` and indexed columns for the filterable
/// fields.
#[derive(Clone)]
pub struct SqliteSwapRepository {
    pool: Pool<Sqlite>,
}

impl SqliteSwapRepository {
    /// Open (and migrate) the database at `db_path`, creating the file and
    /// parent directories as needed.
    pub async fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, Error> {
        let db_path = db_path.as_ref();

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::storage(format!("failed to create database directory: {e}")))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| Error::storage(format!("failed to connect to database: {e}")))?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| Error::storage(format!("failed to run migrations: {e}")))?;

        Ok(Self { pool })
    }

    fn row_to_record(row: &SqliteRow) -> Result<SwapRecord, Error> {
        let data: String = row.get("data");
        serde_json::from_str(&data)
            .map_err(|e| Error::storage(format!("failed to deserialize swap record: {e}")))
    }
}

#[async_trait]
impl SwapRepository for SqliteSwapRepository {
    async fn save(&self, record: &SwapRecord) -> Result<(), Error> {
        let data = serde_json::to_string(record)
            .map_err(|e| Error::storage(format!("failed to serialize swap record: {e}")))?;

        sqlx::query(
            "INSERT INTO swaps (id, swap_type, status, created_at, data) \
             VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET \
             swap_type = excluded.swap_type, \
             status = excluded.status, \
             created_at = excluded.created_at, \
             data = excluded.data",
        )
        .bind(record.id())
        .bind(record.kind().to_string())
        .bind(record.status().to_string())
        .bind(record.created_at() as i64)
        .bind(&data)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::storage(format!("failed to save swap: {e}")))?;

        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<SwapRecord>, Error> {
        let row: Option<SqliteRow> = sqlx::query("SELECT data FROM swaps WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::storage(format!("failed to query swap: {e}")))?;

        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn delete(&self, id: &str) -> Result<Option<SwapRecord>, Error> {
        let record = self.get(id).await?;

        if record.is_some() {
            sqlx::query("DELETE FROM swaps WHERE id = ?")
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(|e| Error::storage(format!("failed to delete swap: {e}")))?;
        }

        Ok(record)
    }

    async fn get_all(&self, filter: Option<&SwapFilter>) -> Result<Vec<SwapRecord>, Error> {
        let mut query = QueryBuilder::<Sqlite>::new("SELECT data FROM swaps");

        if let Some(filter) = filter {
            let mut first = true;
            let mut push_clause = |query: &mut QueryBuilder<Sqlite>| {
                if first {
                    query.push(" WHERE ");
                    first = false;
                } else {
                    query.push(" AND ");
                }
            };

            if let Some(ids) = &filter.ids {
                push_clause(&mut query);
                if ids.is_empty() {
                    query.push("0");
                } else {
                    query.push("id IN (");
                    let mut separated = query.separated(", ");
                    for id in ids {
                        separated.push_bind(id);
                    }
                    query.push(")");
                }
            }

            if let Some(statuses) = &filter.statuses {
                push_clause(&mut query);
                if statuses.is_empty() {
                    query.push("0");
                } else {
                    query.push("status IN (");
                    let mut separated = query.separated(", ");
                    for status in statuses {
                        separated.push_bind(status.to_string());
                    }
                    query.push(")");
                }
            }

            if let Some(kinds) = &filter.kinds {
                push_clause(&mut query);
                if kinds.is_empty() {
                    query.push("0");
                } else {
                    query.push("swap_type IN (");
                    let mut separated = query.separated(", ");
                    for kind in kinds {
                        separated.push_bind(kind.to_string());
                    }
                    query.push(")");
                }
            }

            if let Some(OrderBy::CreatedAt) = filter.order_by {
                match filter.order_direction.unwrap_or(OrderDirection::Asc) {
                    OrderDirection::Asc => query.push(" ORDER BY created_at ASC"),
                    OrderDirection::Desc => query.push(" ORDER BY created_at DESC"),
                };
            }
        }

        let rows: Vec<SqliteRow> = query
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::storage(format!("failed to list swaps: {e}")))?;

        rows.iter().map(Self::row_to_record).collect()
    }

    async fn clear(&self) -> Result<(), Error> {
        sqlx::query("DELETE FROM swaps")
            .execute(&self.pool)
            .await
            .map_err(|e| Error::storage(format!("failed to clear swaps: {e}")))?;

        Ok(())
    }

    async fn close(&self) -> Result<(), Error> {
        self.pool.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_fixtures::reverse_swap;
    use crate::model::test_fixtures::submarine_swap;
    use crate::model::SwapKind;
    use arkswap_provider::SwapStatus;
    use tempfile::TempDir;

    async fn test_repo() -> (TempDir, SqliteSwapRepository) {
        let dir = TempDir::new().expect("temp dir");
        let repo = SqliteSwapRepository::new(dir.path().join("swaps.db"))
            .await
            .expect("opens");
        (dir, repo)
    }

    #[tokio::test]
    async fn save_get_round_trip() {
        let (_dir, repo) = test_repo().await;
        let swap = reverse_swap("r1", SwapStatus::Created, Some([0xaa; 32]));

        repo.save(&swap).await.expect("saves");

        let restored = repo.get("r1").await.expect("queries").expect("exists");
        assert_eq!(restored.id(), "r1");
        assert_eq!(restored.status(), &SwapStatus::Created);
        assert!(repo.get("missing").await.expect("queries").is_none());
    }

    #[tokio::test]
    async fn save_is_upsert() {
        let (_dir, repo) = test_repo().await;

        repo.save(&reverse_swap("r1", SwapStatus::Created, None))
            .await
            .expect("saves");
        repo.save(&reverse_swap("r1", SwapStatus::TransactionConfirmed, None))
            .await
            .expect("saves");

        let all = repo.get_all(None).await.expect("queries");
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].status(), &SwapStatus::TransactionConfirmed);
    }

    #[tokio::test]
    async fn filters_compile_to_sql() {
        let (_dir, repo) = test_repo().await;

        repo.save(&reverse_swap("r1", SwapStatus::Created, None))
            .await
            .expect("saves");
        repo.save(&reverse_swap("r2", SwapStatus::TransactionMempool, None))
            .await
            .expect("saves");
        repo.save(&submarine_swap("s1", SwapStatus::Created))
            .await
            .expect("saves");

        let filter = SwapFilter {
            statuses: Some(vec![SwapStatus::Created]),
            kinds: Some(vec![SwapKind::Reverse]),
            ..Default::default()
        };
        let result = repo.get_all(Some(&filter)).await.expect("queries");
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].id(), "r1");

        let empty = SwapFilter {
            ids: Some(vec![]),
            ..Default::default()
        };
        assert!(repo.get_all(Some(&empty)).await.expect("queries").is_empty());
    }

    #[tokio::test]
    async fn delete_and_clear() {
        let (_dir, repo) = test_repo().await;

        repo.save(&reverse_swap("r1", SwapStatus::Created, None))
            .await
            .expect("saves");

        assert!(repo.delete("r1").await.expect("deletes").is_some());
        assert!(repo.delete("r1").await.expect("deletes").is_none());

        repo.save(&reverse_swap("r2", SwapStatus::Created, None))
            .await
            .expect("saves");
        repo.clear().await.expect("clears");
        assert!(repo.get_all(None).await.expect("queries").is_empty());
    }
}
