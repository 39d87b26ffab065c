//! Wire types exchanged with the UI.
//!
//! The UI talks to the bridge through named *ports*. Every message is a JSON
//! object on a line of its own:
//!
//! ```text
//! {"port":"activeQueueItemChanged","data":{"id":"7","url":"https://example.com/a.mp3"}}
//! {"port":"setIsPlaying","data":true}
//! ```
//!
//! # Submodules
//!
//! * [`command`] - Ports the UI sends to the bridge
//! * [`tags`] - Tag requests and results carried by `requestTags` and
//!   `receiveTags`
//!
//! Outbound ports are defined in [`crate::events`].

pub mod command;
pub mod tags;

use std::fmt::{self, Debug};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{error::Result, user::User};

pub use command::Command;
pub use tags::{TagRequest, TagResult, Tags, TagsContext};

/// An item of the UI's play queue.
///
/// The bridge only looks at the identity and the locator. All other fields
/// are kept as-is so that they survive a round trip through the logs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    /// Identity of the item within the queue.
    pub id: String,

    /// Where to find the audio: an `http(s)` URL, a `file` URL or a path.
    pub url: String,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl fmt::Display for QueueItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.url)
    }
}

/// Settings persisted locally on behalf of the UI.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SettingsFlags {
    /// Queue settings, like repeat and shuffle.
    pub queue: Value,
}

/// Initial state handed to the UI once bootstrap completes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Flags {
    pub settings: SettingsFlags,
    pub sources: Option<Value>,
    pub tracks: Option<Value>,
    pub user: Option<User>,
}

/// Parses and logs JSON received from the UI or a remote host.
///
/// # Errors
///
/// Returns error if `body` is not valid JSON or does not match `T`.
///
/// # Logging
///
/// * Success: Logs parsed structure at TRACE level
/// * Parse Error: Logs raw JSON at TRACE level if valid JSON
/// * Invalid JSON: Logs error and raw text at ERROR level
pub fn json<T>(body: &str, origin: &str) -> Result<T>
where
    T: for<'de> Deserialize<'de> + Debug,
{
    match serde_json::from_str(body) {
        Ok(result) => {
            trace!("{origin}: {result:?}");
            Ok(result)
        }
        Err(e) => {
            if let Ok(json) = serde_json::from_str::<Value>(body) {
                trace!("{origin}: {json:#?}");
            } else {
                error!("{origin}: failed parsing ({e})");
                trace!("{body}");
            }
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_item_keeps_unknown_fields() {
        let item: QueueItem = serde_json::from_str(
            r#"{"id":"3","url":"https://example.com/a.mp3","manualEntry":true}"#,
        )
        .unwrap();
        assert_eq!(item.id, "3");
        assert_eq!(item.extra["manualEntry"], Value::Bool(true));

        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["manualEntry"], Value::Bool(true));
    }

    #[test]
    fn json_rejects_mismatched_shapes() {
        assert!(json::<QueueItem>(r#"{"id":"3"}"#, "test").is_err());
        assert!(json::<QueueItem>("not json", "test").is_err());
    }
}
