//! Monthly consumption recorder.
//!
//! A submission writes one category record into the user's month bucket and
//! then rebuilds that month's Total record from every record in the bucket:
//!
//! ```text
//! users/{id}/{Month Year}/consumptionFlight   <- category record
//! users/{id}/Total/{Month Year}               <- recomputed aggregate
//! ```
//!
//! The steps are separate store calls, not a transaction. Submissions through
//! one [`Recorder`] are serialized; writers in other processes can still
//! interleave, in which case the last write wins and the Total is corrected
//! by the next submission.

use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::error::{Error, Result};
use crate::footprint::FlightDetails;
use crate::models::{month_label, ConsumptionRecord, FlightConsumption, MonthlyTotal, UserRecord};
use crate::store::{join_path, DocumentStore};

pub const USERS_COLLECTION: &str = "users";
pub const TOTAL_COLLECTION: &str = "Total";
const EMAIL_FIELD: &str = "email";

/// What a successful submission wrote.
#[derive(Debug, Clone, PartialEq)]
pub struct Receipt<R> {
    pub user_id: String,
    /// Month bucket label, e.g. `March 2024`.
    pub month: String,
    pub record: R,
    pub total: MonthlyTotal,
}

pub type FlightReceipt = Receipt<FlightConsumption>;

pub struct Recorder<S> {
    store: S,
    write_lock: Mutex<()>,
}

impl<S: DocumentStore> Recorder<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Resolve the user record whose `email` equals `email`.
    ///
    /// Emails are not unique in the store; the first match is used.
    pub async fn find_user(&self, email: &str) -> Result<UserRecord> {
        let matches = self
            .store
            .find_by_field(USERS_COLLECTION, EMAIL_FIELD, email)
            .await?;

        if matches.len() > 1 {
            warn!(email, count = matches.len(), "several user records share an email");
        }

        let doc = matches.into_iter().next().ok_or_else(|| Error::UserNotFound {
            email: email.to_string(),
        })?;
        Ok(UserRecord {
            id: doc.id,
            email: email.to_string(),
        })
    }

    /// Create the `users` record for a newly registered account.
    pub async fn create_user(&self, email: &str) -> Result<UserRecord> {
        let mut user = UserRecord {
            id: String::new(),
            email: email.to_string(),
        };
        user.id = self
            .store
            .add(USERS_COLLECTION, serde_json::to_value(&user)?)
            .await?;
        info!(user_id = %user.id, "user record created");
        Ok(user)
    }

    /// Store this month's flight record and recompute the month's Total.
    ///
    /// `now` picks the month bucket (in its own time zone) and stamps both
    /// records.
    #[instrument(skip(self, details, now), fields(class = %details.class(), hours = details.hours()))]
    pub async fn record_flight<Tz>(
        &self,
        email: &str,
        details: &FlightDetails,
        now: &DateTime<Tz>,
    ) -> Result<FlightReceipt>
    where
        Tz: TimeZone,
        Tz::Offset: fmt::Display,
    {
        let record = FlightConsumption::new(details, now.with_timezone(&Utc));
        self.record_category(email, record, now).await
    }

    /// Overwrite `R`'s category record for the month of `now`, then
    /// recompute the Total.
    ///
    /// If the category write fails the Total is left untouched. If the
    /// recomputation fails the category record stays written.
    pub async fn record_category<R, Tz>(
        &self,
        email: &str,
        record: R,
        now: &DateTime<Tz>,
    ) -> Result<Receipt<R>>
    where
        R: ConsumptionRecord,
        Tz: TimeZone,
        Tz::Offset: fmt::Display,
    {
        let month = month_label(now);
        let timestamp = now.with_timezone(&Utc);
        let data = serde_json::to_value(&record)?;

        let _guard = self.write_lock.lock().await;

        let user = self.find_user(email).await?;
        let path = join_path(&[
            USERS_COLLECTION,
            &user.id,
            &month,
            R::CATEGORY.document_id(),
        ]);

        self.store.set(&path, data).await.inspect_err(|e| {
            warn!(%path, error = %e, "category write failed, total not recomputed");
        })?;
        info!(
            user_id = %user.id,
            %month,
            category = %R::CATEGORY,
            footprint = record.footprint(),
            "category record stored"
        );

        let total = self.write_total(&user.id, &month, timestamp).await?;

        Ok(Receipt {
            user_id: user.id,
            month,
            record,
            total,
        })
    }

    /// Rebuild the Total record of one month bucket from its category records.
    pub async fn recompute_total(
        &self,
        user_id: &str,
        month: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<MonthlyTotal> {
        let _guard = self.write_lock.lock().await;
        self.write_total(user_id, month, timestamp).await
    }

    async fn write_total(
        &self,
        user_id: &str,
        month: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<MonthlyTotal> {
        let bucket = join_path(&[USERS_COLLECTION, user_id, month]);
        let records = self.store.list(&bucket).await?;
        let total = MonthlyTotal::from_records(records.iter().map(|doc| &doc.data), timestamp);

        let path = total_path(user_id, month);
        self.store.set(&path, serde_json::to_value(&total)?).await?;
        info!(
            user_id,
            month,
            records = records.len(),
            grand_total = total.total_carbon_footprint,
            "monthly total recomputed"
        );
        Ok(total)
    }

    /// The stored Total for `month`, `None` if nothing was recorded that month.
    pub async fn monthly_total(&self, email: &str, month: &str) -> Result<Option<MonthlyTotal>> {
        let user = self.find_user(email).await?;
        match self.store.get(&total_path(&user.id, month)).await? {
            Some(doc) => Ok(Some(serde_json::from_value(doc.data)?)),
            None => Ok(None),
        }
    }
}

fn total_path(user_id: &str, month: &str) -> String {
    join_path(&[USERS_COLLECTION, user_id, TOTAL_COLLECTION, month])
}
