use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use ecolibrium_api::error::{Error, Result};
use ecolibrium_api::footprint::{FlightClass, FlightDetails};
use ecolibrium_api::logging::init_test_logging;
use ecolibrium_api::models::{Category, ConsumptionRecord, MonthlyTotal};
use ecolibrium_api::recorder::Recorder;
use ecolibrium_api::store::{DocumentStore, MemoryStore, StoredDocument};
use serde::Serialize;
use serde_json::{json, Value};

/// Wraps a [`MemoryStore`], counts Total writes and can reject writes or
/// yield to other tasks mid-recomputation.
#[derive(Default)]
struct FlakyStore {
    inner: MemoryStore,
    fail_category_writes: bool,
    fail_total_writes: bool,
    yield_on_list: bool,
    total_writes: AtomicUsize,
}

impl FlakyStore {
    fn failing_category_writes() -> Self {
        Self {
            fail_category_writes: true,
            ..Self::default()
        }
    }

    fn failing_total_writes() -> Self {
        Self {
            fail_total_writes: true,
            ..Self::default()
        }
    }

    fn yielding_on_list() -> Self {
        Self {
            yield_on_list: true,
            ..Self::default()
        }
    }

    fn total_writes(&self) -> usize {
        self.total_writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentStore for FlakyStore {
    async fn find_by_field(
        &self,
        collection: &str,
        field: &str,
        value: &str,
    ) -> Result<Vec<StoredDocument>> {
        self.inner.find_by_field(collection, field, value).await
    }

    async fn get(&self, path: &str) -> Result<Option<StoredDocument>> {
        self.inner.get(path).await
    }

    async fn list(&self, collection: &str) -> Result<Vec<StoredDocument>> {
        if self.yield_on_list {
            tokio::task::yield_now().await;
        }
        self.inner.list(collection).await
    }

    async fn set(&self, path: &str, data: Value) -> Result<()> {
        if path.contains("/Total/") {
            self.total_writes.fetch_add(1, Ordering::SeqCst);
            if self.fail_total_writes {
                return Err(Error::api(format!("PATCH {path}"), 500, "INTERNAL"));
            }
        } else if self.fail_category_writes && path.contains("/consumption") {
            return Err(Error::api(format!("PATCH {path}"), 503, "UNAVAILABLE"));
        }
        self.inner.set(path, data).await
    }

    async fn add(&self, collection: &str, data: Value) -> Result<String> {
        self.inner.add(collection, data).await
    }
}

/// A Home record, as the home consumption form would store it.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HomeConsumption {
    home_carbon_footprint: f64,
}

impl ConsumptionRecord for HomeConsumption {
    const CATEGORY: Category = Category::Home;

    fn footprint(&self) -> f64 {
        self.home_carbon_footprint
    }
}

fn march() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap()
}

async fn recorder_with_user(store: FlakyStore) -> (Recorder<FlakyStore>, String) {
    init_test_logging();
    let recorder = Recorder::new(store);
    let user = recorder.create_user("a@x.com").await.unwrap();
    (recorder, user.id)
}

async fn stored(recorder: &Recorder<FlakyStore>, path: &str) -> Option<Value> {
    recorder.store().get(path).await.unwrap().map(|d| d.data)
}

#[tokio::test]
async fn business_flight_end_to_end() {
    let (recorder, id) = recorder_with_user(FlakyStore::default()).await;
    let details = FlightDetails::new(FlightClass::parse("business"), 2.0).unwrap();

    let receipt = recorder
        .record_flight("a@x.com", &details, &march())
        .await
        .unwrap();

    assert_eq!(receipt.user_id, id);
    assert_eq!(receipt.month, "March 2024");
    assert_eq!(format!("{:.3}", receipt.record.flight_carbon_footprint), "540.000");

    let flight = stored(&recorder, &format!("users/{id}/March 2024/consumptionFlight"))
        .await
        .expect("flight record stored");
    assert_eq!(flight["flightHours"], json!(2.0));
    assert_eq!(flight["flightClass"], json!("business"));
    assert_eq!(flight["flightCarbonFootprint"], json!(540.0));
    assert!(flight["timestamp"].as_str().unwrap().starts_with("2024-03-15T12:00:00"));

    let total = stored(&recorder, &format!("users/{id}/Total/March 2024"))
        .await
        .expect("total stored");
    let total: MonthlyTotal = serde_json::from_value(total).unwrap();
    assert_eq!(total.total_flight, 540.0);
    assert_eq!(total.total_home, 0.0);
    assert_eq!(total.total_food, 0.0);
    assert_eq!(total.total_vehicle, 0.0);
    assert_eq!(total.total_public_vehicle, 0.0);
    assert_eq!(total.total_expenditure, 0.0);
    assert_eq!(total.total_carbon_footprint, 540.0);
    assert_eq!(total, receipt.total);
}

#[tokio::test]
async fn second_submission_replaces_first() {
    let (recorder, id) = recorder_with_user(FlakyStore::default()).await;

    let first = FlightDetails::new(FlightClass::First, 3.0).unwrap();
    recorder
        .record_flight("a@x.com", &first, &march())
        .await
        .unwrap();

    let second = FlightDetails::new(FlightClass::Economy, 1.0).unwrap();
    let receipt = recorder
        .record_flight("a@x.com", &second, &march())
        .await
        .unwrap();

    let flight = stored(&recorder, &format!("users/{id}/March 2024/consumptionFlight"))
        .await
        .unwrap();
    assert_eq!(flight["flightClass"], json!("economy"));
    assert_eq!(flight["flightHours"], json!(1.0));
    assert_eq!(flight["flightCarbonFootprint"], json!(90.0));

    // No accumulation across submissions
    assert_eq!(receipt.total.total_flight, 90.0);
    assert_eq!(receipt.total.total_carbon_footprint, 90.0);
    assert_eq!(recorder.store().total_writes(), 2);
}

#[tokio::test]
async fn total_includes_other_categories_in_bucket() {
    let (recorder, id) = recorder_with_user(FlakyStore::default()).await;
    recorder
        .store()
        .set(
            &format!("users/{id}/March 2024/consumptionHome"),
            json!({"homeCarbonFootprint": 50.0}),
        )
        .await
        .unwrap();

    let details = FlightDetails::new(FlightClass::Economy, 100.0 / 90.0).unwrap();
    let receipt = recorder
        .record_flight("a@x.com", &details, &march())
        .await
        .unwrap();

    assert!((receipt.total.total_flight - 100.0).abs() < 1e-9);
    assert_eq!(receipt.total.total_home, 50.0);
    assert!((receipt.total.total_carbon_footprint - 150.0).abs() < 1e-9);
}

#[tokio::test]
async fn months_are_separate_buckets() {
    let (recorder, id) = recorder_with_user(FlakyStore::default()).await;
    let details = FlightDetails::new(FlightClass::Economy, 1.0).unwrap();
    let april = Utc.with_ymd_and_hms(2024, 4, 2, 9, 0, 0).unwrap();

    recorder
        .record_flight("a@x.com", &details, &march())
        .await
        .unwrap();
    let receipt = recorder
        .record_flight("a@x.com", &details, &april)
        .await
        .unwrap();

    assert_eq!(receipt.month, "April 2024");
    assert_eq!(receipt.total.total_flight, 90.0);
    assert!(stored(&recorder, &format!("users/{id}/Total/March 2024"))
        .await
        .is_some());
    assert!(stored(&recorder, &format!("users/{id}/Total/April 2024"))
        .await
        .is_some());
}

#[tokio::test]
async fn unknown_user_skips_total() {
    let (recorder, _) = recorder_with_user(FlakyStore::default()).await;
    let details = FlightDetails::new(FlightClass::Business, 2.0).unwrap();

    let err = recorder
        .record_flight("nobody@x.com", &details, &march())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::UserNotFound { ref email } if email == "nobody@x.com"));
    assert!(err.is_not_found());
    assert_eq!(recorder.store().total_writes(), 0);
}

#[tokio::test]
async fn failed_category_write_skips_total() {
    let (recorder, id) = recorder_with_user(FlakyStore::failing_category_writes()).await;
    let details = FlightDetails::new(FlightClass::Business, 2.0).unwrap();

    let err = recorder
        .record_flight("a@x.com", &details, &march())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Api { status: 503, .. }));
    assert!(err.is_transient());
    assert_eq!(recorder.store().total_writes(), 0);
    assert!(stored(&recorder, &format!("users/{id}/Total/March 2024"))
        .await
        .is_none());
}

#[tokio::test]
async fn unknown_class_records_zero() {
    let (recorder, id) = recorder_with_user(FlakyStore::default()).await;
    let details = FlightDetails::new(FlightClass::parse("premium"), 4.0).unwrap();

    let receipt = recorder
        .record_flight("a@x.com", &details, &march())
        .await
        .unwrap();
    assert_eq!(receipt.record.flight_carbon_footprint, 0.0);

    let flight = stored(&recorder, &format!("users/{id}/March 2024/consumptionFlight"))
        .await
        .unwrap();
    assert_eq!(flight["flightClass"], json!("premium"));
    assert_eq!(receipt.total.total_carbon_footprint, 0.0);
}

#[tokio::test]
async fn monthly_total_reads_what_was_written() {
    let (recorder, _) = recorder_with_user(FlakyStore::default()).await;
    let details = FlightDetails::new(FlightClass::Business, 2.0).unwrap();
    let receipt = recorder
        .record_flight("a@x.com", &details, &march())
        .await
        .unwrap();

    let total = recorder
        .monthly_total("a@x.com", "March 2024")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(total, receipt.total);

    assert!(recorder
        .monthly_total("a@x.com", "February 2024")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn failed_total_write_keeps_category_record() {
    let (recorder, id) = recorder_with_user(FlakyStore::failing_total_writes()).await;
    let details = FlightDetails::new(FlightClass::Business, 2.0).unwrap();

    let err = recorder
        .record_flight("a@x.com", &details, &march())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Api { status: 500, .. }));
    assert_eq!(recorder.store().total_writes(), 1);

    // No rollback of the category record
    let flight = stored(&recorder, &format!("users/{id}/March 2024/consumptionFlight"))
        .await
        .expect("flight record kept");
    assert_eq!(flight["flightCarbonFootprint"], json!(540.0));
    assert!(stored(&recorder, &format!("users/{id}/Total/March 2024"))
        .await
        .is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_submissions_both_reach_total() {
    for _ in 0..20 {
        let (recorder, id) = recorder_with_user(FlakyStore::yielding_on_list()).await;
        let recorder = Arc::new(recorder);

        let flight = {
            let recorder = Arc::clone(&recorder);
            tokio::spawn(async move {
                let details = FlightDetails::new(FlightClass::Economy, 1.0).unwrap();
                recorder.record_flight("a@x.com", &details, &march()).await
            })
        };
        let home = {
            let recorder = Arc::clone(&recorder);
            tokio::spawn(async move {
                let record = HomeConsumption {
                    home_carbon_footprint: 50.0,
                };
                recorder.record_category("a@x.com", record, &march()).await
            })
        };
        flight.await.unwrap().unwrap();
        home.await.unwrap().unwrap();

        let total = stored(&recorder, &format!("users/{id}/Total/March 2024"))
            .await
            .expect("total stored");
        let total: MonthlyTotal = serde_json::from_value(total).unwrap();
        assert_eq!(total.total_flight, 90.0);
        assert_eq!(total.total_home, 50.0);
        assert_eq!(total.total_carbon_footprint, 140.0);
    }
}
