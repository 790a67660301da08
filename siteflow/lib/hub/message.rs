use serde::{Deserialize, Serialize};

use crate::models::{GraphResponse, SitesResponse};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Topics clients can opt into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Topic {
    /// `sites.update` envelopes.
    Sites,
    /// `graph.update` envelopes.
    Graph,
}

/// Phase of a streamed action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionPhase {
    /// The action was accepted and is running.
    Started,
    /// The action finished successfully.
    Completed,
    /// The action failed.
    Failed,
}

/// Payload of an `action.output` envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionOutput {
    /// Target container.
    pub container: String,
    /// Requested action.
    pub action: String,
    /// Phase of the action.
    pub status: ActionPhase,
    /// Captured output, for `started`/`completed`.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub output: Option<String>,
    /// Error string, for `failed`.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
    /// Wall-clock duration, for terminal phases.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub duration_ms: Option<f64>,
}

/// Envelopes sent from clients.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum ClientMessage {
    /// Opt into a topic.
    #[serde(rename = "subscribe")]
    Subscribe {
        /// The topic to receive.
        topic: Topic,
    },
    /// Opt out of a topic.
    #[serde(rename = "unsubscribe")]
    Unsubscribe {
        /// The topic to stop receiving.
        topic: Topic,
    },
    /// Start a container action with streamed output.
    #[serde(rename = "action.start")]
    ActionStart {
        /// Target container.
        container: String,
        /// Action name (`start`, `stop`, `restart`, `logs`).
        action: String,
    },
    /// Heartbeat; answered with `pong`.
    #[serde(rename = "ping")]
    Ping,
}

/// Envelopes pushed to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ServerMessage {
    /// A fresh sites snapshot.
    #[serde(rename = "sites.update")]
    SitesUpdate(SitesResponse),
    /// A fresh topology graph.
    #[serde(rename = "graph.update")]
    GraphUpdate(GraphResponse),
    /// Streamed action progress.
    #[serde(rename = "action.output")]
    ActionOutput(ActionOutput),
    /// Subscription acknowledged.
    #[serde(rename = "subscribed")]
    Subscribed {
        /// The topic subscribed.
        topic: Topic,
    },
    /// Unsubscription acknowledged.
    #[serde(rename = "unsubscribed")]
    Unsubscribed {
        /// The topic unsubscribed.
        topic: Topic,
    },
    /// Protocol or handler error.
    #[serde(rename = "error")]
    Error {
        /// Human-readable message.
        message: String,
    },
    /// Heartbeat reply.
    #[serde(rename = "pong")]
    Pong,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Topic {
    /// Every routable topic.
    pub const ALL: [Topic; 2] = [Topic::Sites, Topic::Graph];
}

impl ServerMessage {
    /// The topic an envelope routes under, when it is topical.
    pub fn topic(&self) -> Option<Topic> {
        match self {
            ServerMessage::SitesUpdate(_) => Some(Topic::Sites),
            ServerMessage::GraphUpdate(_) => Some(Topic::Graph),
            _ => None,
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_parsing() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"subscribe","data":{"topic":"sites"}}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Subscribe { topic: Topic::Sites }));

        let msg: ClientMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Ping));

        let msg: ClientMessage = serde_json::from_str(
            r#"{"type":"action.start","data":{"container":"blog","action":"restart"}}"#,
        )
        .unwrap();
        match msg {
            ClientMessage::ActionStart { container, action } => {
                assert_eq!(container, "blog");
                assert_eq!(action, "restart");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"nope"}"#).is_err());
    }

    #[test]
    fn test_server_message_wire_shape() {
        let msg = ServerMessage::ActionOutput(ActionOutput {
            container: "blog".to_string(),
            action: "stop".to_string(),
            status: ActionPhase::Completed,
            output: Some("done".to_string()),
            error: None,
            duration_ms: Some(120.5),
        });
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "action.output");
        assert_eq!(value["data"]["status"], "completed");
        assert_eq!(value["data"]["container"], "blog");
        assert!(value["data"].get("error").is_none());

        let pong = serde_json::to_value(ServerMessage::Pong).unwrap();
        assert_eq!(pong["type"], "pong");
    }

    #[test]
    fn test_topic_routing() {
        let graph = ServerMessage::GraphUpdate(GraphResponse {
            nodes: vec![],
            edges: vec![],
        });
        assert_eq!(graph.topic(), Some(Topic::Graph));
        assert_eq!(ServerMessage::Pong.topic(), None);
    }
}
