//! Signed-in user, loaded from the secrets file.
//!
//! There is no browser to run an identity provider's redirect flow, so the
//! user signs in out of band and stores the result in a TOML file:
//!
//! ```toml
//! [user]
//! uid = "f3Xa9..."
//! display_name = "Ongaku"
//! email = "listener@example.com"
//! photo_url = "https://example.com/me.png"
//! refresh_token = "AEu4..."
//! database_token = "eyJh..."
//! ```
//!
//! A missing file means the user is signed out.

use std::{fs, io, path::Path};

use serde::{Deserialize, Serialize};
use veil::Redact;

use crate::error::{Error, Result};

/// The identity-provider properties handed to the UI.
#[derive(Redact, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub uid: String,

    #[serde(default)]
    pub display_name: Option<String>,

    #[serde(default)]
    pub email: Option<String>,

    #[serde(default, rename = "photoURL")]
    pub photo_url: Option<String>,

    #[redact]
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Contents of the secrets file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
struct Secrets {
    user: UserSecrets,
}

#[derive(Redact, Clone, PartialEq, Eq, Deserialize)]
struct UserSecrets {
    uid: String,
    display_name: Option<String>,
    email: Option<String>,
    photo_url: Option<String>,

    #[redact]
    refresh_token: Option<String>,

    #[redact]
    database_token: Option<String>,
}

/// A signed-in user together with the credential for the remote store.
#[derive(Redact, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: User,

    /// Token sent as `auth` parameter to the remote database.
    #[redact]
    pub database_token: Option<String>,
}

impl Credentials {
    /// Maximum size of the secrets file.
    const MAX_FILE_SIZE: u64 = 16 * 1024;

    /// Loads credentials from a secrets file.
    ///
    /// Returns `Ok(None)` when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns error if the file is too large, cannot be read, is not valid
    /// TOML, or has an empty user id.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Option<Self>> {
        let path = path.as_ref();

        // Prevent out-of-memory condition: secrets file should be small.
        let attributes = match fs::metadata(path) {
            Ok(attributes) => attributes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if attributes.len() > Self::MAX_FILE_SIZE {
            return Err(Error::out_of_range(format!(
                "{} is too large",
                path.display()
            )));
        }

        let contents = fs::read_to_string(path)?;
        contents.parse().map(Some)
    }
}

impl std::str::FromStr for Credentials {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let secrets: Secrets = toml::from_str(s)?;
        let secrets = secrets.user;
        if secrets.uid.trim().is_empty() {
            return Err(Error::invalid_argument("user id is empty"));
        }

        Ok(Self {
            user: User {
                uid: secrets.uid,
                display_name: secrets.display_name,
                email: secrets.email,
                photo_url: secrets.photo_url,
                refresh_token: secrets.refresh_token,
            },
            database_token: secrets.database_token,
        })
    }
}
