//! Messages exchanged with WebSocket clients.

use serde::{Deserialize, Serialize};
use zipcore_node::subscriptions::ADDRESS_TXID_EVENT;
use zipcore_node::{Subscriber, Topic, ZipService};

/// A request from a client.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ClientMessage {
    Subscribe {
        event: String,
        #[serde(default)]
        addresses: Option<Vec<String>>,
    },
    Unsubscribe {
        event: String,
        #[serde(default)]
        addresses: Option<Vec<String>>,
    },
    Ping,
}

/// A reply to a client request. Published events go out as
/// `{"event": name, "data": payload}` instead.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    Ack { action: String, event: String },
    Error { message: String },
    Pong,
}

impl ServerMessage {
    fn ack(action: &str, event: &str) -> Self {
        ServerMessage::Ack {
            action: action.to_string(),
            event: event.to_string(),
        }
    }

    fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }
}

/// Apply one client request to the service registry on behalf of
/// `subscriber`.
pub fn apply(service: &ZipService, subscriber: &Subscriber, message: ClientMessage) -> ServerMessage {
    match message {
        ClientMessage::Subscribe { event, addresses } => {
            if event == ADDRESS_TXID_EVENT {
                let Some(addresses) = addresses else {
                    return ServerMessage::error("\"addresses\" is required for zipd/addresstxid");
                };
                service.subscribe_address(subscriber, &addresses);
            } else {
                let Some(topic) = Topic::from_event_name(&event) else {
                    return ServerMessage::error(format!("Unknown event: {event}"));
                };
                service.subscribe(topic, subscriber.clone());
            }
            ServerMessage::ack("subscribe", &event)
        }
        ClientMessage::Unsubscribe { event, addresses } => {
            if event == ADDRESS_TXID_EVENT {
                service.unsubscribe_address(subscriber, addresses.as_deref());
            } else {
                let Some(topic) = Topic::from_event_name(&event) else {
                    return ServerMessage::error(format!("Unknown event: {event}"));
                };
                service.unsubscribe(topic, subscriber);
            }
            ServerMessage::ack("unsubscribe", &event)
        }
        ClientMessage::Ping => ServerMessage::Pong,
    }
}
