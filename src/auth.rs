use std::sync::Arc;

use reqwest::{Client, Response};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::FirebaseConfig;
use crate::error::{Error, Result};

#[derive(Debug, Deserialize)]
struct RefreshTokenResponse {
    id_token: String,
    refresh_token: String,
    expires_in: String,
}

#[derive(Debug, Clone)]
struct CachedToken {
    id_token: String,
    expires_at: chrono::DateTime<chrono::Utc>,
}

/// Response shape shared by `signInWithPassword` and `signUp`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignInResponse {
    id_token: String,
    refresh_token: String,
    expires_in: String,
    local_id: String,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    #[serde(default)]
    users: Vec<AccountInfo>,
}

/// The signed-in account as reported by `accounts:lookup`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountInfo {
    pub local_id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub email_verified: bool,
}

/// Result of a successful sign-in or sign-up.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthSession {
    pub local_id: String,
    pub email: String,
}

/// Email and password as typed into the login or registration form.
#[derive(Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    #[must_use]
    pub fn login(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }

    /// Registration credentials; the password must be typed twice.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PasswordMismatch`] if the two passwords differ.
    pub fn register(
        email: impl Into<String>,
        password: impl Into<String>,
        confirm_password: &str,
    ) -> Result<Self> {
        let password = password.into();
        if password != confirm_password {
            return Err(Error::PasswordMismatch);
        }
        Ok(Self {
            email: email.into(),
            password,
        })
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Firebase Identity Toolkit client.
///
/// Clones share the same session, so the Firestore client and the session
/// client see the same tokens.
#[derive(Clone)]
pub struct FirebaseAuth {
    client: Client,
    api_key: String,
    identity_base_url: String,
    secure_token_base_url: String,
    refresh_token: Arc<Mutex<Option<String>>>,
    cached_token: Arc<Mutex<Option<CachedToken>>>,
}

/// Turn a non-success response into [`Error::Api`].
pub(crate) async fn ensure_success(resp: Response, operation: &str) -> Result<Response> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    Err(Error::api(operation, status, body))
}

fn expiry(expires_in: &str) -> chrono::DateTime<chrono::Utc> {
    let expires_in: i64 = expires_in.parse().unwrap_or(3600);
    chrono::Utc::now() + chrono::Duration::seconds(expires_in)
}

impl FirebaseAuth {
    /// A signed-out handle for the configured project.
    pub fn new(config: &FirebaseConfig) -> Self {
        Self::build(config, None)
    }

    /// Resume a session from a stored refresh token.
    pub fn with_refresh_token(config: &FirebaseConfig, refresh_token: String) -> Self {
        Self::build(config, Some(refresh_token))
    }

    fn build(config: &FirebaseConfig, refresh_token: Option<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: config.api_key.clone(),
            identity_base_url: config.identity_base_url.trim_end_matches('/').to_string(),
            secure_token_base_url: config
                .secure_token_base_url
                .trim_end_matches('/')
                .to_string(),
            refresh_token: Arc::new(Mutex::new(refresh_token)),
            cached_token: Arc::new(Mutex::new(None)),
        }
    }

    fn identity_url(&self, method: &str) -> String {
        format!(
            "{}/accounts:{}?key={}",
            self.identity_base_url, method, self.api_key
        )
    }

    async fn start_session(&self, resp: SignInResponse, fallback_email: &str) -> AuthSession {
        let expires_at = expiry(&resp.expires_in);
        *self.refresh_token.lock().await = Some(resp.refresh_token);
        *self.cached_token.lock().await = Some(CachedToken {
            id_token: resp.id_token,
            expires_at,
        });
        AuthSession {
            local_id: resp.local_id,
            email: resp.email.unwrap_or_else(|| fallback_email.to_string()),
        }
    }

    /// Sign in with email and password.
    pub async fn sign_in_with_email(&self, credentials: &Credentials) -> Result<AuthSession> {
        let resp = self
            .client
            .post(self.identity_url("signInWithPassword"))
            .json(&serde_json::json!({
                "email": credentials.email,
                "password": credentials.password,
                "returnSecureToken": true
            }))
            .send()
            .await?;
        let resp = ensure_success(resp, "Sign-in").await?;

        let sign_in: SignInResponse = resp.json().await?;
        let session = self.start_session(sign_in, &credentials.email).await;
        info!(uid = %session.local_id, "signed in");
        Ok(session)
    }

    /// Create a new email/password account and sign into it.
    pub async fn sign_up_with_email(&self, credentials: &Credentials) -> Result<AuthSession> {
        let resp = self
            .client
            .post(self.identity_url("signUp"))
            .json(&serde_json::json!({
                "email": credentials.email,
                "password": credentials.password,
                "returnSecureToken": true
            }))
            .send()
            .await?;
        let resp = ensure_success(resp, "Sign-up").await?;

        let sign_up: SignInResponse = resp.json().await?;
        let session = self.start_session(sign_up, &credentials.email).await;
        info!(uid = %session.local_id, "account created");
        Ok(session)
    }

    /// Drop the tokens held by this handle and all its clones.
    pub async fn sign_out(&self) {
        *self.refresh_token.lock().await = None;
        *self.cached_token.lock().await = None;
    }

    pub async fn is_signed_in(&self) -> bool {
        self.refresh_token.lock().await.is_some()
    }

    pub async fn get_id_token(&self) -> Result<String> {
        // Reuse the cached token unless it expires within 60s
        {
            let cached = self.cached_token.lock().await;
            if let Some(ref token) = *cached {
                if token.expires_at > chrono::Utc::now() + chrono::Duration::seconds(60) {
                    return Ok(token.id_token.clone());
                }
            }
        }

        self.refresh_id_token().await
    }

    async fn refresh_id_token(&self) -> Result<String> {
        let refresh_token = self
            .refresh_token
            .lock()
            .await
            .clone()
            .ok_or(Error::NotSignedIn)?;

        let url = format!("{}/token?key={}", self.secure_token_base_url, self.api_key);
        debug!("refreshing ID token");

        let resp = self
            .client
            .post(&url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", &refresh_token),
            ])
            .send()
            .await?;
        let resp = ensure_success(resp, "Token refresh").await?;

        let token_resp: RefreshTokenResponse = resp.json().await?;
        let expires_at = expiry(&token_resp.expires_in);

        // The service may rotate the refresh token
        *self.refresh_token.lock().await = Some(token_resp.refresh_token);

        let id_token = token_resp.id_token.clone();
        *self.cached_token.lock().await = Some(CachedToken {
            id_token: token_resp.id_token,
            expires_at,
        });

        Ok(id_token)
    }

    /// Reload the signed-in account, e.g. to see whether its email was verified.
    pub async fn lookup_account(&self) -> Result<AccountInfo> {
        let token = self.get_id_token().await?;
        let resp = self
            .client
            .post(self.identity_url("lookup"))
            .json(&serde_json::json!({ "idToken": token }))
            .send()
            .await?;
        let resp = ensure_success(resp, "Account lookup").await?;

        let lookup: LookupResponse = resp.json().await?;
        lookup.users.into_iter().next().ok_or(Error::NotSignedIn)
    }

    /// Ask the identity service to email a verification link to the account.
    pub async fn send_email_verification(&self) -> Result<()> {
        let token = self.get_id_token().await?;
        let resp = self
            .client
            .post(self.identity_url("sendOobCode"))
            .json(&serde_json::json!({
                "requestType": "VERIFY_EMAIL",
                "idToken": token
            }))
            .send()
            .await?;
        ensure_success(resp, "Send verification email").await?;
        info!("verification email sent");
        Ok(())
    }
}
