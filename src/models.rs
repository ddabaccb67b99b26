use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::footprint::{FlightClass, FlightDetails};

/// Consumption categories tracked per month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Home,
    Food,
    Vehicle,
    Flight,
    PublicVehicle,
    Expenditure,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::Home,
        Category::Food,
        Category::Vehicle,
        Category::Flight,
        Category::PublicVehicle,
        Category::Expenditure,
    ];

    /// Fixed document id of this category inside a month bucket.
    #[must_use]
    pub fn document_id(&self) -> &'static str {
        match self {
            Self::Home => "consumptionHome",
            Self::Food => "consumptionFood",
            Self::Vehicle => "consumptionVehicle",
            Self::Flight => "consumptionFlight",
            Self::PublicVehicle => "consumptionPublicVehicle",
            Self::Expenditure => "consumptionExpenditure",
        }
    }

    /// Field holding the footprint (kg CO2e) in this category's record.
    ///
    /// The public vehicle and expenditure names are capitalised in stored data.
    #[must_use]
    pub fn footprint_field(&self) -> &'static str {
        match self {
            Self::Home => "homeCarbonFootprint",
            Self::Food => "foodCarbonFootprint",
            Self::Vehicle => "vehicleCarbonFootprint",
            Self::Flight => "flightCarbonFootprint",
            Self::PublicVehicle => "PublicVehicleCarbonFootprint",
            Self::Expenditure => "ExpenditureCarbonFootprint",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Home => "home",
            Self::Food => "food",
            Self::Vehicle => "vehicle",
            Self::Flight => "flight",
            Self::PublicVehicle => "public vehicle",
            Self::Expenditure => "expenditure",
        };
        f.write_str(name)
    }
}

/// A record that can be stored as one category of a month bucket.
pub trait ConsumptionRecord: Serialize {
    const CATEGORY: Category;

    /// Footprint in kg CO2e.
    fn footprint(&self) -> f64;
}

/// Stored flight category record (`consumptionFlight`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlightConsumption {
    pub flight_class: FlightClass,
    pub flight_hours: f64,
    pub flight_carbon_footprint: f64,
    pub timestamp: DateTime<Utc>,
}

impl FlightConsumption {
    #[must_use]
    pub fn new(details: &FlightDetails, timestamp: DateTime<Utc>) -> Self {
        Self {
            flight_class: details.class().clone(),
            flight_hours: details.hours(),
            flight_carbon_footprint: details.footprint(),
            timestamp,
        }
    }
}

impl ConsumptionRecord for FlightConsumption {
    const CATEGORY: Category = Category::Flight;

    fn footprint(&self) -> f64 {
        self.flight_carbon_footprint
    }
}

/// Per-month aggregate stored under `Total/{month}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyTotal {
    #[serde(default)]
    pub total_home: f64,
    #[serde(default)]
    pub total_food: f64,
    #[serde(default)]
    pub total_vehicle: f64,
    #[serde(default)]
    pub total_flight: f64,
    #[serde(default)]
    pub total_public_vehicle: f64,
    #[serde(default)]
    pub total_expenditure: f64,
    /// Grand total of the six sums.
    #[serde(default)]
    pub total_carbon_footprint: f64,
    pub timestamp: DateTime<Utc>,
}

impl MonthlyTotal {
    /// Sum every category's footprint field across the records of one month.
    ///
    /// Missing or non-numeric fields count as zero, so a record only
    /// contributes to the categories it carries.
    #[must_use]
    pub fn from_records<'a, I>(records: I, timestamp: DateTime<Utc>) -> Self
    where
        I: IntoIterator<Item = &'a Value>,
    {
        let mut sums = [0.0_f64; 6];
        for record in records {
            for (sum, category) in sums.iter_mut().zip(Category::ALL) {
                *sum += record
                    .get(category.footprint_field())
                    .and_then(Value::as_f64)
                    .unwrap_or(0.0);
            }
        }

        let [home, food, vehicle, flight, public_vehicle, expenditure] = sums;
        Self {
            total_home: home,
            total_food: food,
            total_vehicle: vehicle,
            total_flight: flight,
            total_public_vehicle: public_vehicle,
            total_expenditure: expenditure,
            total_carbon_footprint: sums.iter().sum(),
            timestamp,
        }
    }

    /// The sum for one category.
    #[must_use]
    pub fn total_for(&self, category: Category) -> f64 {
        match category {
            Category::Home => self.total_home,
            Category::Food => self.total_food,
            Category::Vehicle => self.total_vehicle,
            Category::Flight => self.total_flight,
            Category::PublicVehicle => self.total_public_vehicle,
            Category::Expenditure => self.total_expenditure,
        }
    }
}

/// Top-level `users/{id}` record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Document id; not stored as a field.
    #[serde(skip)]
    pub id: String,
    pub email: String,
}

/// Month bucket label, e.g. `March 2024`.
///
/// Always the English month name, whatever the system locale.
#[must_use]
pub fn month_label<Tz>(now: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: fmt::Display,
{
    now.format("%B %Y").to_string()
}
