//! WebSocket frame types of the counterparty's real-time stream.

use crate::model::SwapStatus;
use serde::Deserialize;
use serde::Serialize;

/// Frames sent to the counterparty.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum WsRequest {
    /// Subscribe to updates for the given swap ids.
    Subscribe { channel: String, args: Vec<String> },
    /// Stop receiving updates for the given swap ids.
    Unsubscribe { channel: String, args: Vec<String> },
    /// Keep-alive.
    Ping,
}

impl WsRequest {
    pub fn subscribe_swaps(ids: Vec<String>) -> Self {
        WsRequest::Subscribe {
            channel: "swap.update".to_string(),
            args: ids,
        }
    }

    pub fn unsubscribe_swaps(ids: Vec<String>) -> Self {
        WsRequest::Unsubscribe {
            channel: "swap.update".to_string(),
            args: ids,
        }
    }
}

/// Frames received from the counterparty.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum WsResponse {
    /// Subscription acknowledgement.
    Subscribe { channel: String, args: Vec<String> },
    /// Unsubscription acknowledgement.
    Unsubscribe { channel: String, args: Vec<String> },
    /// One or more swap status updates.
    Update {
        channel: String,
        args: Vec<SwapStatusUpdate>,
    },
    /// Server-reported error on the channel.
    Error { channel: String, reason: String },
    Pong,
}

/// A single swap update as delivered over the stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapStatusUpdate {
    pub id: String,
    pub status: SwapStatus,
    /// Present when the counterparty attaches an error to this swap.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_frame_format() {
        let frame = WsRequest::subscribe_swaps(vec!["swap123".to_string()]);
        let json = serde_json::to_string(&frame).expect("serializes");

        assert_eq!(
            json,
            r#"{"op":"subscribe","channel":"swap.update","args":["swap123"]}"#
        );
    }

    #[test]
    fn update_frame_round_trip() {
        let json = r#"{"event":"update","channel":"swap.update","args":[{"id":"r1","status":"transaction.confirmed"}]}"#;

        let frame: WsResponse = serde_json::from_str(json).expect("deserializes");
        match frame {
            WsResponse::Update { args, .. } => {
                assert_eq!(args.len(), 1);
                assert_eq!(args[0].id, "r1");
                assert_eq!(args[0].status, SwapStatus::TransactionConfirmed);
                assert!(args[0].error.is_none());
            }
            WsResponse::Subscribe { .. }
            | WsResponse::Unsubscribe { .. }
            | WsResponse::Error { .. }
            | WsResponse::Pong => panic!("expected update frame"),
        }
    }

    #[test]
    fn error_field_is_surfaced() {
        let json = r#"{"event":"update","channel":"swap.update","args":[{"id":"r1","status":"swap.expired","error":"invoice could not be paid"}]}"#;

        let frame: WsResponse = serde_json::from_str(json).expect("deserializes");
        match frame {
            WsResponse::Update { args, .. } => {
                assert_eq!(args[0].error.as_deref(), Some("invoice could not be paid"));
            }
            WsResponse::Subscribe { .. }
            | WsResponse::Unsubscribe { .. }
            | WsResponse::Error { .. }
            | WsResponse::Pong => panic!("expected update frame"),
        }
    }
}
