//! Remote persistence of user data.
//!
//! The remote store is treated as a tree of JSON values keyed by user. The
//! bridge needs exactly two operations on it:
//! * read one subtree of a user, like `sources` or `tracks`
//! * merge a set of subtrees into a user's tree
//!
//! [`Database`] implements them against the REST interface of a Firebase
//! Realtime Database:
//!
//! ```text
//! GET   <root>/users/<uid>/<key>.json?auth=<token>
//! PATCH <root>/users/<uid>.json?auth=<token>
//! ```

use async_trait::async_trait;
use serde_json::{Map, Value};
use url::Url;

use crate::{
    config::Config,
    error::{Error, Result},
    http::Client as HttpClient,
    protocol,
};

/// Remote key-value store holding per-user data.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Reads the subtree `key` of user `uid`, or `None` if it doesn't exist.
    async fn read(&self, uid: &str, key: &str) -> Result<Option<Value>>;

    /// Merges `entries` into the tree of user `uid`, replacing each named
    /// subtree as a whole and leaving the others alone.
    async fn merge(&self, uid: &str, entries: Map<String, Value>) -> Result<()>;
}

/// Firebase Realtime Database client.
pub struct Database {
    http_client: HttpClient,
    root: Url,
    token: Option<String>,
}

impl Database {
    /// Creates a client for the database at `root`, authenticating with
    /// `token` when given.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built.
    pub fn new(config: &Config, root: Url, token: Option<String>) -> Result<Self> {
        Ok(Self {
            http_client: HttpClient::new(config)?,
            root,
            token,
        })
    }

    /// Builds the URL of `segments` below the database root.
    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.root.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|()| Error::invalid_argument(format!("{} cannot be a base", self.root)))?;
            path.pop_if_empty();
            if let Some((last, init)) = segments.split_last() {
                path.extend(init);
                path.push(&format!("{last}.json"));
            }
        }

        if let Some(ref token) = self.token {
            url.query_pairs_mut().append_pair("auth", token);
        }

        Ok(url)
    }
}

#[async_trait]
impl RemoteStore for Database {
    async fn read(&self, uid: &str, key: &str) -> Result<Option<Value>> {
        let url = self.url(&["users", uid, key])?;
        let request = self.http_client.get(url, None);
        let response = self.http_client.execute(request).await?.error_for_status()?;
        let body = response.text().await?;

        // Absent paths read as `null`.
        let value: Value = protocol::json(&body, key)?;
        Ok(Some(value).filter(|value| !value.is_null()))
    }

    async fn merge(&self, uid: &str, entries: Map<String, Value>) -> Result<()> {
        let keys: Vec<_> = entries.keys().cloned().collect();
        let url = self.url(&["users", uid])?;
        let body = serde_json::to_vec(&entries)?;

        let request = self.http_client.patch(url, body);
        self.http_client
            .execute(request)
            .await?
            .error_for_status()?;
        debug!("stored {} for user {uid}", keys.join(", "));

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn database(root: &str, token: Option<&str>) -> Database {
        Database::new(
            &Config::new(),
            Url::parse(root).unwrap(),
            token.map(str::to_owned),
        )
        .unwrap()
    }

    #[test]
    fn subtree_url_ends_in_json() {
        let db = database("https://music.example.com", None);
        let url = db.url(&["users", "u1", "tracks"]).unwrap();
        assert_eq!(url.as_str(), "https://music.example.com/users/u1/tracks.json");
    }

    #[test]
    fn url_keeps_root_path_and_appends_token() {
        let db = database("https://example.com/db/", Some("t0k"));
        let url = db.url(&["users", "u1"]).unwrap();
        assert_eq!(url.as_str(), "https://example.com/db/users/u1.json?auth=t0k");
    }

    #[test]
    fn segments_are_escaped() {
        let db = database("https://example.com", None);
        let url = db.url(&["users", "a/b", "sources"]).unwrap();
        assert_eq!(url.path(), "/users/a%2Fb/sources.json");
    }
}
