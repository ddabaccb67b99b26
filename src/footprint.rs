//! Flight emissions calculator.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// kg CO2e per flight hour in economy.
pub const ECONOMY_RATE: f64 = 90.0;
/// kg CO2e per flight hour in business.
pub const BUSINESS_RATE: f64 = 270.0;
/// kg CO2e per flight hour in first class.
pub const FIRST_RATE: f64 = 810.0;

/// Cabin class of a flight.
///
/// Anything other than the three known names is kept verbatim in `Other`
/// and contributes a zero footprint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FlightClass {
    #[default]
    Economy,
    Business,
    First,
    Other(String),
}

impl FlightClass {
    #[must_use]
    pub fn parse(name: &str) -> Self {
        match name {
            "economy" => Self::Economy,
            "business" => Self::Business,
            "first" => Self::First,
            other => Self::Other(other.to_string()),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Economy => "economy",
            Self::Business => "business",
            Self::First => "first",
            Self::Other(name) => name,
        }
    }

    /// Emission rate in kg CO2e per hour. Unknown classes are rated 0.
    #[must_use]
    pub fn rate_per_hour(&self) -> f64 {
        match self {
            Self::Economy => ECONOMY_RATE,
            Self::Business => BUSINESS_RATE,
            Self::First => FIRST_RATE,
            Self::Other(_) => 0.0,
        }
    }
}

impl From<String> for FlightClass {
    fn from(name: String) -> Self {
        Self::parse(&name)
    }
}

impl From<FlightClass> for String {
    fn from(class: FlightClass) -> Self {
        class.as_str().to_string()
    }
}

impl fmt::Display for FlightClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Footprint in kg CO2e for `hours` spent flying in `class`.
///
/// No validation happens here; see [`FlightDetails::new`].
#[must_use]
pub fn flight_footprint(class: &FlightClass, hours: f64) -> f64 {
    class.rate_per_hour() * hours
}

/// Validated flight form input.
#[derive(Debug, Clone, PartialEq)]
pub struct FlightDetails {
    class: FlightClass,
    hours: f64,
}

impl FlightDetails {
    /// # Errors
    ///
    /// Returns [`Error::InvalidHours`] for negative or non-finite hours.
    pub fn new(class: FlightClass, hours: f64) -> Result<Self> {
        if !hours.is_finite() || hours < 0.0 {
            return Err(Error::InvalidHours { hours });
        }
        Ok(Self { class, hours })
    }

    #[must_use]
    pub fn class(&self) -> &FlightClass {
        &self.class
    }

    #[must_use]
    pub fn hours(&self) -> f64 {
        self.hours
    }

    #[must_use]
    pub fn footprint(&self) -> f64 {
        flight_footprint(&self.class, self.hours)
    }
}
