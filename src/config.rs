//! Runtime settings for the polling engines and host retries

use crate::autofill::MatchMode;
use crate::{AssistError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Environment variable naming a settings file
pub const CONFIG_ENV: &str = "FLIGHT_ASSIST_CONFIG";

pub const MOBILE_USER_AGENT: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_2 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Mobile/15E148 Safari/604.1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub extraction: ExtractionSettings,
    pub autofill: AutofillSettings,
    pub results: ResultsSettings,
    pub user_agent: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            extraction: ExtractionSettings::default(),
            autofill: AutofillSettings::default(),
            results: ResultsSettings::default(),
            user_agent: MOBILE_USER_AGENT.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionSettings {
    pub interval_ms: u64,
    pub max_attempts: u32,
    /// Containers whose text is shorter than this are skipped
    pub min_text_len: usize,
    pub max_text_len: usize,
    /// Plausibility window for unlabeled numbers taken as prices
    pub min_price: u32,
    pub max_price: u32,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            interval_ms: 2000,
            max_attempts: 10,
            min_text_len: 20,
            max_text_len: 500,
            min_price: 100,
            max_price: 10000,
        }
    }
}

impl ExtractionSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutofillSettings {
    pub interval_ms: u64,
    pub max_attempts: u32,
    /// Delay before the aggregate "fields filled" status
    pub settle_ms: u64,
    pub add_passenger_delay_ms: u64,
    pub package_delay_ms: u64,
    pub match_mode: MatchMode,
}

impl Default for AutofillSettings {
    fn default() -> Self {
        Self {
            interval_ms: 2000,
            max_attempts: 20,
            settle_ms: 500,
            add_passenger_delay_ms: 1500,
            package_delay_ms: 3000,
            match_mode: MatchMode::Lenient,
        }
    }
}

impl AutofillSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn add_passenger_delay(&self) -> Duration {
        Duration::from_millis(self.add_passenger_delay_ms)
    }

    pub fn package_delay(&self) -> Duration {
        Duration::from_millis(self.package_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultsSettings {
    pub max_host_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for ResultsSettings {
    fn default() -> Self {
        Self {
            max_host_retries: 2,
            retry_delay_ms: 2000,
        }
    }
}

impl Settings {
    /// Load settings from a JSON file. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "No settings file, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        let settings: Settings = serde_json::from_str(&raw)
            .map_err(|e| AssistError::ConfigError(format!("{}: {}", path.display(), e)))?;
        settings.validate()?;
        info!(path = %path.display(), "Loaded settings");
        Ok(settings)
    }

    /// Resolve the settings file from an explicit path or the environment
    pub fn resolve(explicit: Option<PathBuf>) -> Result<Self> {
        match explicit.or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from)) {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.extraction.min_text_len > self.extraction.max_text_len {
            return Err(AssistError::ConfigError(format!(
                "extraction.min_text_len ({}) exceeds max_text_len ({})",
                self.extraction.min_text_len, self.extraction.max_text_len
            )));
        }
        if self.extraction.min_price > self.extraction.max_price {
            return Err(AssistError::ConfigError(format!(
                "extraction.min_price ({}) exceeds max_price ({})",
                self.extraction.min_price, self.extraction.max_price
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.autofill.max_attempts, 20);
        assert_eq!(settings.autofill.interval(), Duration::from_secs(2));
        assert_eq!(settings.results.max_host_retries, 2);
        assert_eq!(settings.extraction.min_text_len, 20);
        assert_eq!(settings.extraction.max_text_len, 500);
        assert_eq!(settings.autofill.match_mode, MatchMode::Lenient);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"autofill": {{"max_attempts": 5, "match_mode": "exact"}}}}"#).unwrap();

        let settings = Settings::load(file.path()).unwrap();
        assert_eq!(settings.autofill.max_attempts, 5);
        assert_eq!(settings.autofill.match_mode, MatchMode::Exact);
        assert_eq!(settings.autofill.settle_ms, 500);
        assert_eq!(settings.extraction, ExtractionSettings::default());
    }

    #[test]
    fn test_missing_file_is_default() {
        let settings = Settings::load(Path::new("/nonexistent/flight-assist.json")).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_invalid_window_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"extraction": {{"min_text_len": 600}}}}"#).unwrap();
        assert!(matches!(Settings::load(file.path()), Err(AssistError::ConfigError(_))));
    }
}
