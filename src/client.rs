use chrono::Local;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use crate::auth::{AccountInfo, Credentials, FirebaseAuth};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::firestore::FirestoreClient;
use crate::footprint::{FlightClass, FlightDetails};
use crate::models::MonthlyTotal;
use crate::recorder::{FlightReceipt, Recorder};

/// A signed-in Ecolibrium session.
///
/// Holds the email the user signed in with; that email is the lookup key for
/// their `users` record when recording consumption.
pub struct EcolibriumClient {
    pub auth: FirebaseAuth,
    pub recorder: Recorder<FirestoreClient>,
    config: Config,
    email: Option<String>,
    last_verification_sent: Option<Instant>,
}

impl EcolibriumClient {
    /// A signed-out client.
    pub fn new(config: Config) -> Self {
        let auth = FirebaseAuth::new(&config.firebase);
        let firestore = FirestoreClient::new(&config, auth.clone());
        Self {
            auth,
            recorder: Recorder::new(firestore),
            config,
            email: None,
            last_verification_sent: None,
        }
    }

    /// Sign in with email and password.
    pub async fn login(config: Config, credentials: &Credentials) -> Result<Self> {
        let mut client = Self::new(config);
        let session = client.auth.sign_in_with_email(credentials).await?;
        client.email = Some(session.email);
        Ok(client)
    }

    /// Create an account and its `users` record, then send the verification
    /// email.
    ///
    /// The `users` record is written before the email goes out, so a failed
    /// send still leaves an account that can record consumption; retry with
    /// [`resend_verification_email`](Self::resend_verification_email) after
    /// signing in. Call
    /// [`wait_for_email_verification`](Self::wait_for_email_verification) to
    /// block until the user clicks the link.
    pub async fn register(config: Config, credentials: &Credentials) -> Result<Self> {
        let mut client = Self::new(config);
        let session = client.auth.sign_up_with_email(credentials).await?;
        client.recorder.create_user(&session.email).await?;
        client.email = Some(session.email);
        client.auth.send_email_verification().await?;
        client.last_verification_sent = Some(Instant::now());
        Ok(client)
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn session_email(&self) -> Result<&str> {
        self.email.as_deref().ok_or(Error::NotSignedIn)
    }

    pub async fn logout(&mut self) {
        self.auth.sign_out().await;
        self.email = None;
        self.last_verification_sent = None;
    }

    /// Reload the account and report whether its email is verified.
    pub async fn is_email_verified(&self) -> Result<bool> {
        let account: AccountInfo = self.auth.lookup_account().await?;
        Ok(account.email_verified)
    }

    /// Poll the account until its email is verified.
    ///
    /// Polls every `verification.poll_interval_ms` and gives up with
    /// [`Error::VerificationTimeout`] after `verification.timeout_secs`.
    pub async fn wait_for_email_verification(&self) -> Result<()> {
        let email = self.session_email()?.to_string();
        let settings = &self.config.verification;
        let started = Instant::now();

        loop {
            if self.is_email_verified().await? {
                info!(%email, "email verified");
                return Ok(());
            }
            if started.elapsed() >= settings.timeout() {
                return Err(Error::VerificationTimeout {
                    email,
                    waited_secs: started.elapsed().as_secs(),
                });
            }
            debug!(%email, "email not verified yet");
            sleep(settings.poll_interval()).await;
        }
    }

    /// Send the verification email again, at most once per cooldown period.
    pub async fn resend_verification_email(&mut self) -> Result<()> {
        self.session_email()?;
        let cooldown = self.config.verification.resend_cooldown();
        if let Some(remaining) = remaining_cooldown(self.last_verification_sent, cooldown) {
            return Err(Error::ResendCooldown {
                remaining_secs: remaining.as_secs().max(1),
            });
        }

        self.auth.send_email_verification().await?;
        self.last_verification_sent = Some(Instant::now());
        Ok(())
    }

    /// Record this month's flights for the signed-in user.
    ///
    /// `flight_class` is the form value (`economy`, `business` or `first`);
    /// anything else is stored as given with a zero footprint.
    pub async fn record_flight(&self, flight_class: &str, hours: f64) -> Result<FlightReceipt> {
        let details = FlightDetails::new(FlightClass::parse(flight_class), hours)?;
        let email = self.session_email()?;
        self.recorder
            .record_flight(email, &details, &Local::now())
            .await
    }

    /// The signed-in user's Total for a month label such as `March 2024`.
    pub async fn monthly_total(&self, month: &str) -> Result<Option<MonthlyTotal>> {
        let email = self.session_email()?;
        self.recorder.monthly_total(email, month).await
    }
}

/// Time left before another verification email may be sent.
fn remaining_cooldown(
    last_sent: Option<Instant>,
    cooldown: std::time::Duration,
) -> Option<std::time::Duration> {
    let elapsed = last_sent?.elapsed();
    cooldown.checked_sub(elapsed).filter(|d| !d.is_zero())
}
