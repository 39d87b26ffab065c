//! Tag requests and results.
//!
//! A `requestTags` call carries a context object. Its `urlsForTags` field
//! lists one [`TagRequest`] per item; every other field belongs to the UI and
//! is echoed back verbatim in `receiveTags`, next to a `receivedTags` array
//! holding one [`TagResult`] per request, in request order.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// URLs to retrieve the tags of one item.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagRequest {
    /// URL of the full resource, read for its tags.
    pub get_url: String,

    /// URL to probe for existence before reading, when it differs from
    /// [`get_url`](Self::get_url). Signed URLs often need a distinct
    /// signature per HTTP method.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub head_url: Option<String>,
}

impl TagRequest {
    /// The URL to probe with a HEAD request.
    #[must_use]
    pub fn probe_url(&self) -> &str {
        self.head_url.as_deref().unwrap_or(&self.get_url)
    }
}

/// Metadata of one playable item.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct Tags {
    /// Disc number, 1 when unknown.
    pub disc: u32,

    /// Track number, 1 when unknown.
    pub nr: u32,

    pub album: Option<String>,
    pub artist: Option<String>,
    pub title: Option<String>,
    pub genre: Option<String>,
    pub year: Option<u32>,
}

impl Default for Tags {
    fn default() -> Self {
        Self {
            disc: 1,
            nr: 1,
            album: None,
            artist: None,
            title: None,
            genre: None,
            year: None,
        }
    }
}

/// Outcome of retrieving the tags of one item.
///
/// Serializes as the tags object, or as `null` when unavailable.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagResult {
    Found(Tags),
    Unavailable,
}

impl TagResult {
    #[must_use]
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Found(_))
    }
}

/// Context of a `requestTags` call, returned with `receiveTags`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagsContext {
    pub urls_for_tags: Vec<TagRequest>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub received_tags: Option<Vec<TagResult>>,

    /// Fields owned by the UI.
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

impl TagsContext {
    /// Returns the context with `receivedTags` attached.
    #[must_use]
    pub fn with_results(mut self, results: Vec<TagResult>) -> Self {
        self.received_tags = Some(results);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_url_falls_back_to_get_url() {
        let request: TagRequest = serde_json::from_str(r#"{"getUrl":"ok1"}"#).unwrap();
        assert_eq!(request.probe_url(), "ok1");

        let request: TagRequest =
            serde_json::from_str(r#"{"getUrl":"get","headUrl":"head"}"#).unwrap();
        assert_eq!(request.probe_url(), "head");
    }

    #[test]
    fn unavailable_serializes_as_null() {
        let results = vec![
            TagResult::Found(Tags {
                title: Some("Intro".to_string()),
                ..Tags::default()
            }),
            TagResult::Unavailable,
        ];
        let json = serde_json::to_value(&results).unwrap();
        assert_eq!(json[0]["title"], "Intro");
        assert_eq!(json[0]["nr"], 1);
        assert!(json[1].is_null());
    }

    #[test]
    fn context_echoes_opaque_fields() {
        let context: TagsContext = serde_json::from_str(
            r#"{"urlsForTags":[{"getUrl":"a"}],"filePaths":["a.mp3"],"sourceId":"s1"}"#,
        )
        .unwrap();
        let context = context.with_results(vec![TagResult::Unavailable]);

        let json = serde_json::to_value(&context).unwrap();
        assert_eq!(json["sourceId"], "s1");
        assert_eq!(json["filePaths"][0], "a.mp3");
        assert_eq!(json["urlsForTags"][0]["getUrl"], "a");
        assert_eq!(json["receivedTags"], serde_json::json!([null]));
    }
}
