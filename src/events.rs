//! Events sent from the bridge to the UI.
//!
//! Each event is written as one JSON line to standard output, in the same
//! `{"port": ..., "data": ...}` shape as the commands in
//! [`protocol::command`](crate::protocol::command).
//!
//! # Example
//!
//! ```rust
//! use ongaku::events::Event;
//!
//! let line = serde_json::to_string(&Event::SetIsPlaying(true))?;
//! assert_eq!(line, r#"{"port":"setIsPlaying","data":true}"#);
//! ```

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::protocol::{Flags, TagsContext};

/// Events that can be emitted to the UI.
///
/// Playback events fall under the staleness rules of the
/// [`player`](crate::player) module: only the active session produces them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "port", content = "data", rename_all = "camelCase")]
pub enum Event {
    /// Bootstrap has completed. Always the first event.
    Init(Flags),

    /// Playback started or stopped.
    SetIsPlaying(bool),

    /// Playback position as a fraction of the duration, in `[0, 1]`.
    SetProgress(f64),

    /// The active item played until its end.
    ActiveQueueItemEnded,

    /// Tags for a `requestTags` call, with its context echoed back.
    ReceiveTags(TagsContext),
}

/// Sending half of the channel that feeds the UI.
pub type Sender = mpsc::UnboundedSender<Event>;

/// Receiving half of the channel that feeds the UI.
pub type Receiver = mpsc::UnboundedReceiver<Event>;

/// Sends `event`, logging instead of failing when the UI writer is gone.
pub(crate) fn emit(tx: &Sender, event: Event) {
    trace!("emitting {event:?}");
    if tx.send(event).is_err() {
        debug!("event dropped: UI channel closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_ports_with_payload() {
        let line = serde_json::to_string(&Event::SetProgress(0.5)).unwrap();
        assert_eq!(line, r#"{"port":"setProgress","data":0.5}"#);
    }

    #[test]
    fn serializes_ports_without_payload() {
        let line = serde_json::to_string(&Event::ActiveQueueItemEnded).unwrap();
        assert_eq!(line, r#"{"port":"activeQueueItemEnded"}"#);
    }
}
