//! Ports the UI sends to the bridge.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{QueueItem, TagsContext};

/// A command received from the UI.
///
/// Serialized as `{"port": "<name>", "data": <payload>}`, where `data` is
/// absent for ports without a payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "port", content = "data", rename_all = "camelCase")]
pub enum Command {
    /// Start the identity provider's sign-in flow.
    Authenticate,

    /// The "now playing" item changed, or playback stopped when `None`.
    ActiveQueueItemChanged(Option<QueueItem>),

    RequestPlay,
    RequestPause,

    /// Jump to a fraction of the active item's duration, in `[0, 1]`.
    RequestSeek(f64),

    /// Retrieve the tags of a batch of items.
    RequestTags(TagsContext),

    /// Persist the user's sources remotely.
    StoreSources(Value),

    /// Persist the user's tracks remotely.
    StoreTracks(Value),

    /// Persist the queue settings locally.
    StoreQueueSettings(Value),
}

impl Command {
    /// Name of the port, for logging.
    #[must_use]
    pub fn port(&self) -> &'static str {
        match self {
            Self::Authenticate => "authenticate",
            Self::ActiveQueueItemChanged(_) => "activeQueueItemChanged",
            Self::RequestPlay => "requestPlay",
            Self::RequestPause => "requestPause",
            Self::RequestSeek(_) => "requestSeek",
            Self::RequestTags(_) => "requestTags",
            Self::StoreSources(_) => "storeSources",
            Self::StoreTracks(_) => "storeTracks",
            Self::StoreQueueSettings(_) => "storeQueueSettings",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ports_without_payload() {
        let command: Command = serde_json::from_str(r#"{"port":"requestPlay"}"#).unwrap();
        assert_eq!(command, Command::RequestPlay);

        let command: Command = serde_json::from_str(r#"{"port":"authenticate"}"#).unwrap();
        assert_eq!(command, Command::Authenticate);
    }

    #[test]
    fn parses_active_item_and_null() {
        let command: Command = serde_json::from_str(
            r#"{"port":"activeQueueItemChanged","data":{"id":"1","url":"a.flac"}}"#,
        )
        .unwrap();
        match command {
            Command::ActiveQueueItemChanged(Some(item)) => assert_eq!(item.url, "a.flac"),
            other => panic!("unexpected command: {other:?}"),
        }

        let command: Command =
            serde_json::from_str(r#"{"port":"activeQueueItemChanged","data":null}"#).unwrap();
        assert_eq!(command, Command::ActiveQueueItemChanged(None));
    }

    #[test]
    fn parses_seek_fraction() {
        let command: Command =
            serde_json::from_str(r#"{"port":"requestSeek","data":0.25}"#).unwrap();
        assert_eq!(command, Command::RequestSeek(0.25));
        assert_eq!(command.port(), "requestSeek");
    }

    #[test]
    fn rejects_unknown_ports() {
        assert!(serde_json::from_str::<Command>(r#"{"port":"selfDestruct"}"#).is_err());
    }
}
