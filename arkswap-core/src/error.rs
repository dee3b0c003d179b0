use std::fmt;

/// Error returned by every fallible operation in the workspace.
///
/// Errors carry a [`ErrorKind`] so that callers can decide between retrying,
/// surfacing to observers, or aborting a swap for good, without matching on
/// message strings.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: String,
    context: Vec<String>,
}

/// The failure classes of the swap engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed caller input: bad key length, zero amount, unparsable invoice.
    InvalidInput,
    /// The counterparty served data that does not match what we derive
    /// locally. Never retryable.
    Adversary,
    /// The protocol state is inconsistent: wrong checkpoint count, missing
    /// response fields, unknown status transition.
    Protocol,
    /// The expected lockup VTXO is missing or already spent.
    NoVtxo,
    /// Transport failure talking to the provider or the Ark server.
    Network,
    /// Repository backend failure.
    Storage,
    /// The counterparty declared the swap failed for good.
    Terminal,
    /// A swap was not found, or an action was requested in a status that does
    /// not allow it.
    State,
    /// Signature or key computation failure.
    Crypto,
    /// Transaction construction failure.
    Transaction,
}

impl Error {
    fn new(kind: ErrorKind, message: impl fmt::Display) -> Self {
        Self {
            kind,
            message: message.to_string(),
            context: Vec::new(),
        }
    }

    pub fn invalid_input(message: impl fmt::Display) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }

    pub fn adversary(message: impl fmt::Display) -> Self {
        Self::new(ErrorKind::Adversary, message)
    }

    pub fn protocol(message: impl fmt::Display) -> Self {
        Self::new(ErrorKind::Protocol, message)
    }

    pub fn no_vtxo(message: impl fmt::Display) -> Self {
        Self::new(ErrorKind::NoVtxo, message)
    }

    pub fn network(message: impl fmt::Display) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    pub fn storage(message: impl fmt::Display) -> Self {
        Self::new(ErrorKind::Storage, message)
    }

    pub fn terminal(message: impl fmt::Display) -> Self {
        Self::new(ErrorKind::Terminal, message)
    }

    pub fn state(message: impl fmt::Display) -> Self {
        Self::new(ErrorKind::State, message)
    }

    pub fn crypto(message: impl fmt::Display) -> Self {
        Self::new(ErrorKind::Crypto, message)
    }

    pub fn transaction(message: impl fmt::Display) -> Self {
        Self::new(ErrorKind::Transaction, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Whether a later status update or resume cycle may succeed where this
    /// attempt failed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::Network | ErrorKind::Storage | ErrorKind::NoVtxo
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        for ctx in self.context.iter().rev() {
            write!(f, ": {ctx}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

/// Extension trait to attach context to an [`Error`] as it propagates.
pub trait ErrorContext<T> {
    fn context(self, ctx: impl fmt::Display) -> Result<T, Error>;
    fn with_context<F, D>(self, f: F) -> Result<T, Error>
    where
        F: FnOnce() -> D,
        D: fmt::Display;
}

impl<T> ErrorContext<T> for Result<T, Error> {
    fn context(self, ctx: impl fmt::Display) -> Result<T, Error> {
        self.map_err(|mut e| {
            e.context.push(ctx.to_string());
            e
        })
    }

    fn with_context<F, D>(self, f: F) -> Result<T, Error>
    where
        F: FnOnce() -> D,
        D: fmt::Display,
    {
        self.map_err(|mut e| {
            e.context.push(f().to_string());
            e
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_is_appended_outermost_first() {
        let err: Result<(), Error> = Err(Error::protocol("missing field"));
        let err = err
            .context("parsing response")
            .context("creating swap")
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "missing field: creating swap: parsing response"
        );
        assert_eq!(err.kind(), ErrorKind::Protocol);
    }

    #[test]
    fn retryability_follows_kind() {
        assert!(Error::network("timeout").is_retryable());
        assert!(Error::storage("disk full").is_retryable());
        assert!(!Error::adversary("address mismatch").is_retryable());
        assert!(!Error::protocol("two checkpoints").is_retryable());
        assert!(!Error::state("not actionable").is_retryable());
    }
}
