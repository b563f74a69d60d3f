//! # Flight Assist Library
//!
//! Scrapes flight offers out of a rendered search-results page and fills a
//! booking form with locally stored passenger data. The browser itself is
//! reached through the traits in [`page`]; everything else is plain,
//! testable logic driven by an injected [`retry::Clock`].

pub mod autofill;
pub mod booking;
pub mod config;
pub mod events;
pub mod extract;
pub mod page;
pub mod profile;
pub mod results;
pub mod retry;
pub mod search;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// Re-export main types for convenience
pub use autofill::{AutofillEngine, AutofillReport, ClaimedInputs, FieldOutcome, MatchMode};
pub use booking::{BookingParams, BookingSession};
pub use config::Settings;
pub use events::{decode_message, EventSink, StatusEvent};
pub use extract::{ExtractionEngine, ExtractionParser};
pub use page::{BookingPage, HttpPageSource, PageSource, SnapshotSequence, SyntheticPage};
pub use profile::ProfileStore;
pub use results::{ResultsParams, ResultsSession, ResultsState};
pub use retry::{Clock, Poller, TokioClock};
pub use search::{SearchForm, SourceSite};

/// Error types for the flight assist library
#[derive(Error, Debug)]
pub enum AssistError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("JSON encoding failed: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("I/O failed: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid selector: {0}")]
    SelectorError(String),

    #[error("Invalid pattern: {0}")]
    PatternError(#[from] regex::Error),

    #[error("Invalid search query: {0}")]
    InvalidQuery(String),

    #[error("Invalid navigation parameters: {0}")]
    InvalidParams(String),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Page unavailable: {0}")]
    PageError(String),
}

pub type Result<T> = std::result::Result<T, AssistError>;

/// Source site a flight record was scraped from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Qunar,
    Ctrip,
    Fliggy,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Qunar => "qunar",
            Platform::Ctrip => "ctrip",
            Platform::Fliggy => "fliggy",
        }
    }

    /// Display name shown next to per-source progress
    pub fn display_name(&self) -> &'static str {
        match self {
            Platform::Qunar => "去哪儿",
            Platform::Ctrip => "携程",
            Platform::Fliggy => "飞猪",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = AssistError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "qunar" => Ok(Platform::Qunar),
            "ctrip" => Ok(Platform::Ctrip),
            "fliggy" => Ok(Platform::Fliggy),
            _ => Err(AssistError::InvalidParams(format!("Unknown platform: {}", s))),
        }
    }
}

/// What the user wants the package picker to favour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchPreference {
    #[default]
    Cheapest,
    Fastest,
    Direct,
}

impl SearchPreference {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchPreference::Cheapest => "cheapest",
            SearchPreference::Fastest => "fastest",
            SearchPreference::Direct => "direct",
        }
    }
}

impl fmt::Display for SearchPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchPreference {
    type Err = AssistError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cheapest" => Ok(SearchPreference::Cheapest),
            "fastest" => Ok(SearchPreference::Fastest),
            "direct" => Ok(SearchPreference::Direct),
            _ => Err(AssistError::InvalidParams(format!("Invalid preference: {}", s))),
        }
    }
}

/// Passenger data used to fill booking forms
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PassengerProfile {
    pub name: String,
    pub id_number: String,
    pub phone: String,
}

impl PassengerProfile {
    pub fn new(name: impl Into<String>, id_number: impl Into<String>, phone: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id_number: id_number.into(),
            phone: phone.into(),
        }
    }

    /// Autofill is only attempted when all three fields are present
    pub fn is_complete(&self) -> bool {
        !self.name.trim().is_empty() && !self.id_number.trim().is_empty() && !self.phone.trim().is_empty()
    }

    pub fn value(&self, field: FieldKind) -> &str {
        match field {
            FieldKind::Name => &self.name,
            FieldKind::IdNumber => &self.id_number,
            FieldKind::Phone => &self.phone,
        }
    }

    /// Value as shown in status lines, truncated to the field's visible prefix
    pub fn masked(&self, field: FieldKind) -> String {
        mask(self.value(field), field.visible_chars())
    }
}

fn mask(value: &str, keep: usize) -> String {
    if value.chars().count() > keep {
        let prefix: String = value.chars().take(keep).collect();
        format!("{}...", prefix)
    } else {
        value.to_string()
    }
}

/// The three booking-form fields, in the order they are filled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldKind {
    Name,
    IdNumber,
    Phone,
}

impl FieldKind {
    pub const FILL_ORDER: [FieldKind; 3] = [FieldKind::Name, FieldKind::IdNumber, FieldKind::Phone];

    pub fn label(&self) -> &'static str {
        match self {
            FieldKind::Name => "姓名",
            FieldKind::IdNumber => "身份证",
            FieldKind::Phone => "手机",
        }
    }

    fn visible_chars(&self) -> usize {
        match self {
            FieldKind::Name => 2,
            FieldKind::IdNumber => 4,
            FieldKind::Phone => 3,
        }
    }
}

/// A one-way search, passed from the search screen to the results screen
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub origin: String,
    pub destination: String,
    pub date: chrono::NaiveDate,
}

impl SearchQuery {
    pub fn new(origin: &str, destination: &str, date: &str) -> Result<Self> {
        let origin = origin.trim();
        let destination = destination.trim();
        if origin.is_empty() || destination.is_empty() {
            return Err(AssistError::InvalidQuery("origin and destination are required".to_string()));
        }
        let date = chrono::NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
            .map_err(|_| AssistError::InvalidQuery(format!("Invalid date format: {}", date)))?;

        Ok(Self {
            origin: origin.to_string(),
            destination: destination.to_string(),
            date,
        })
    }

    /// ISO form used in URLs and navigation parameters
    pub fn date_str(&self) -> String {
        self.date.format("%Y-%m-%d").to_string()
    }
}

/// One flight offer scraped from a results page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlightRecord {
    pub platform: Platform,
    pub price: u32,
    #[serde(rename = "flightNo", default, skip_serializing_if = "Option::is_none")]
    pub flight_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub airline: Option<String>,
    #[serde(rename = "depTime")]
    pub departure_time: String,
    #[serde(rename = "arrTime")]
    pub arrival_time: String,
    #[serde(rename = "stops", default)]
    pub stop_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
}

impl FlightRecord {
    /// Identity used for de-duplication
    pub fn dedup_key(&self) -> (u32, &str, &str) {
        (self.price, &self.departure_time, &self.arrival_time)
    }

    pub fn is_direct(&self) -> bool {
        self.stop_count == 0
    }
}
