//! Runtime configuration.
//!
//! Collects the settings that shape the bridge's behavior: the identity it
//! presents to remote hosts, how long retired playback sessions linger, and
//! where data is persisted. Values come from the command line; everything
//! has a default suitable for a desktop session.

use std::{path::PathBuf, time::Duration};

use url::Url;

/// Configuration shared by all components of the bridge.
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Config {
    /// Application name, taken from the crate manifest.
    pub app_name: String,

    /// Application version, taken from the crate manifest.
    pub app_version: String,

    /// `User-Agent` sent along with tag and database requests.
    pub user_agent: String,

    /// Delay between a playback session losing its active status and its
    /// audio resource being released.
    pub grace_period: Duration,

    /// Upper bound on a single tag request, or `None` to wait indefinitely.
    pub fetch_timeout: Option<Duration>,

    /// File that persists UI settings between runs.
    pub settings_file: PathBuf,

    /// Root of the remote database holding user data, if any.
    pub database_url: Option<Url>,
}

impl Config {
    /// Grace period applied when none is configured.
    ///
    /// Long enough for a pause to take effect on the output device before
    /// its sink is torn down, short enough that switching tracks rapidly
    /// does not pile up open streams.
    pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_millis(500);

    /// Default name of the settings file.
    pub const DEFAULT_SETTINGS_FILE: &'static str = "settings.json";

    /// Creates a configuration with default values.
    ///
    /// # Panics
    ///
    /// Panics when the application name or version, or the operating system
    /// name or version, contain characters that cannot go into a
    /// `User-Agent` header.
    #[must_use]
    pub fn new() -> Self {
        let app_name = env!("CARGO_PKG_NAME").to_owned();
        let app_version = env!("CARGO_PKG_VERSION").to_owned();

        // Additional `User-Agent` string checks on top of `reqwest::HeaderValue`.
        let illegal_chars = |chr| chr == '/' || chr == ';';
        if app_name.is_empty()
            || app_name.contains(illegal_chars)
            || app_version.is_empty()
            || app_version.contains(illegal_chars)
        {
            panic!("application name and/or version invalid (\"{app_name}\"; \"{app_version}\")");
        }

        let os_name = match std::env::consts::OS {
            "macos" => "osx",
            other => other,
        };
        let os_version = sysinfo::System::os_version().unwrap_or_else(|| String::from("0"));
        if os_name.is_empty()
            || os_name.contains(illegal_chars)
            || os_version.is_empty()
            || os_version.contains(illegal_chars)
        {
            panic!("os name and/or version invalid (\"{os_name}\"; \"{os_version}\")");
        }

        let user_agent = format!("{app_name}/{app_version} (Rust; {os_name}/{os_version})");
        trace!("user agent: {user_agent}");

        Self {
            app_name,
            app_version,
            user_agent,

            grace_period: Self::DEFAULT_GRACE_PERIOD,
            fetch_timeout: None,

            settings_file: PathBuf::from(Self::DEFAULT_SETTINGS_FILE),
            database_url: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_have_no_timeout_and_half_second_grace() {
        let config = Config::new();
        assert_eq!(config.grace_period, Duration::from_millis(500));
        assert_eq!(config.fetch_timeout, None);
        assert!(config.database_url.is_none());
    }

    #[test]
    fn user_agent_starts_with_app_identity() {
        let config = Config::new();
        let prefix = format!("{}/{} (Rust; ", config.app_name, config.app_version);
        assert!(config.user_agent.starts_with(&prefix));
    }
}
