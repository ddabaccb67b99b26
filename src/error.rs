//! Error types for the Ecolibrium client.
//!
//! Every fallible operation returns [`Error`] so callers can decide how to
//! present a failure instead of the library deciding for them.

use thiserror::Error;

/// The main error type for Ecolibrium operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Validation ===
    /// Flight hours were negative or not a finite number.
    #[error("flight hours must be a non-negative number, got {hours}")]
    InvalidHours {
        /// The rejected value.
        hours: f64,
    },

    /// Registration password and confirmation differ.
    #[error("passwords do not match")]
    PasswordMismatch,

    // === Lookup ===
    /// No user record has the given email.
    #[error("user not found: {email}")]
    UserNotFound {
        /// The lookup key that matched nothing.
        email: String,
    },

    // === Session ===
    /// The operation needs a signed-in session.
    #[error("not signed in")]
    NotSignedIn,

    /// The account's email was not verified before the deadline.
    #[error("email {email} was not verified within {waited_secs}s")]
    VerificationTimeout {
        /// The account email.
        email: String,
        /// How long we polled.
        waited_secs: u64,
    },

    /// A verification email was sent too recently.
    #[error("verification email already sent, retry in {remaining_secs}s")]
    ResendCooldown {
        /// Seconds until another email may be sent.
        remaining_secs: u64,
    },

    // === Remote services ===
    /// A Firebase endpoint answered with a non-success status.
    #[error("{operation} failed: {status} - {body}")]
    Api {
        /// What we were doing, e.g. `GET users/abc`.
        operation: String,
        /// HTTP status code.
        status: u16,
        /// Response body as returned by the service.
        body: String,
    },

    /// The request never got a response.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A payload could not be (de)serialized.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A document store backend rejected an operation.
    #[error("store error: {0}")]
    Store(String),

    // === Configuration ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },
}

/// A specialized Result type for Ecolibrium operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create an error for a non-success HTTP response.
    #[must_use]
    pub fn api(operation: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        Self::Api {
            operation: operation.into(),
            status,
            body: body.into(),
        }
    }

    /// Create a store backend error.
    #[must_use]
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }

    /// Create a configuration validation error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            message: message.into(),
        }
    }

    /// Check if this error means a user or document does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::UserNotFound { .. } => true,
            Self::Api { status, .. } => *status == 404,
            _ => false,
        }
    }

    /// Check if retrying the same call later might succeed.
    ///
    /// Nothing in this crate retries on its own; this only lets callers tell
    /// network trouble apart from permanent failures.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(_) => true,
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}
