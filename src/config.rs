//! Configuration loading with figment.
//!
//! Sources, later ones overriding earlier ones:
//! 1. Defaults
//! 2. TOML file (`ecolibrium.toml` in the working directory, or an explicit path)
//! 3. Environment variables prefixed with `ECOLIBRIUM_`, nested with `__`
//!    (e.g. `ECOLIBRIUM_FIREBASE__API_KEY`)

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const CONFIG_FILE_NAME: &str = "ecolibrium.toml";

pub const DEFAULT_IDENTITY_BASE_URL: &str = "https://identitytoolkit.googleapis.com/v1";
pub const DEFAULT_SECURE_TOKEN_BASE_URL: &str = "https://securetoken.googleapis.com/v1";
pub const DEFAULT_FIRESTORE_BASE_URL: &str = "https://firestore.googleapis.com/v1";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub firebase: FirebaseConfig,
    pub verification: VerificationConfig,
}

/// Which Firebase project to talk to, and where.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FirebaseConfig {
    /// Public web API key of the project.
    pub api_key: String,
    pub project_id: String,
    /// Firestore database id.
    pub database: String,
    /// Point these at the Firebase emulators for local testing.
    pub identity_base_url: String,
    pub secure_token_base_url: String,
    pub firestore_base_url: String,
}

/// Email verification polling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationConfig {
    /// Delay between account reloads while waiting for verification.
    pub poll_interval_ms: u64,
    /// Minimum gap between two verification emails.
    pub resend_cooldown_secs: u64,
    /// Give up waiting after this long.
    pub timeout_secs: u64,
}

impl Default for FirebaseConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            project_id: String::new(),
            database: "(default)".to_string(),
            identity_base_url: DEFAULT_IDENTITY_BASE_URL.to_string(),
            secure_token_base_url: DEFAULT_SECURE_TOKEN_BASE_URL.to_string(),
            firestore_base_url: DEFAULT_FIRESTORE_BASE_URL.to_string(),
        }
    }
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            resend_cooldown_secs: 60,
            timeout_secs: 600,
        }
    }
}

impl VerificationConfig {
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[must_use]
    pub fn resend_cooldown(&self) -> Duration {
        Duration::from_secs(self.resend_cooldown_secs)
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Config {
    /// Config for a project with every other setting at its default.
    #[must_use]
    pub fn for_project(api_key: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            firebase: FirebaseConfig {
                api_key: api_key.into(),
                project_id: project_id.into(),
                ..FirebaseConfig::default()
            },
            verification: VerificationConfig::default(),
        }
    }

    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or the result is invalid.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or the result is invalid.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));

        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(Env::prefixed("ECOLIBRIUM_").split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigValidation`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.firebase.api_key.trim().is_empty() {
            return Err(Error::config("firebase.api_key is empty"));
        }
        if self.firebase.project_id.trim().is_empty() {
            return Err(Error::config("firebase.project_id is empty"));
        }
        if self.firebase.database.trim().is_empty() {
            return Err(Error::config("firebase.database is empty"));
        }
        if self.verification.poll_interval_ms == 0 {
            return Err(Error::config(
                "verification.poll_interval_ms must be greater than 0",
            ));
        }
        Ok(())
    }

    /// Base URL for document paths, e.g.
    /// `https://firestore.googleapis.com/v1/projects/p/databases/(default)/documents`.
    #[must_use]
    pub fn documents_base(&self) -> String {
        format!(
            "{}/projects/{}/databases/{}/documents",
            self.firebase.firestore_base_url.trim_end_matches('/'),
            self.firebase.project_id,
            self.firebase.database
        )
    }
}
