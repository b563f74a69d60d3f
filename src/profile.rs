//! On-device passenger profile store
//!
//! A flat JSON object of string keys, the same four keys the app has always
//! written: `name`, `idNumber`, `phone`, `preference`.

use crate::{PassengerProfile, Result, SearchPreference};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredValues {
    #[serde(default)]
    name: String,
    #[serde(default)]
    id_number: String,
    #[serde(default)]
    phone: String,
    #[serde(default)]
    preference: String,
}

/// Profile plus preference as read from the store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredProfile {
    pub passenger: PassengerProfile,
    pub preference: SearchPreference,
}

pub struct ProfileStore {
    path: PathBuf,
}

impl ProfileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store under the platform's local data directory
    pub fn open_default() -> Self {
        let base = dirs::data_local_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."));
        Self::new(base.join("flight-assist").join("profile.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the profile. A missing file is an empty profile.
    pub fn load(&self) -> Result<StoredProfile> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "No stored profile");
            return Ok(StoredProfile::default());
        }

        let raw = std::fs::read_to_string(&self.path)?;
        let values: StoredValues = serde_json::from_str(&raw)?;
        let preference = if values.preference.is_empty() {
            SearchPreference::default()
        } else {
            values.preference.parse().unwrap_or_else(|_| {
                warn!(preference = %values.preference, "Unknown stored preference, using default");
                SearchPreference::default()
            })
        };

        Ok(StoredProfile {
            passenger: PassengerProfile {
                name: values.name,
                id_number: values.id_number,
                phone: values.phone,
            },
            preference,
        })
    }

    /// Overwrite the stored profile
    pub fn save(&self, profile: &PassengerProfile, preference: SearchPreference) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let values = StoredValues {
            name: profile.name.clone(),
            id_number: profile.id_number.clone(),
            phone: profile.phone.clone(),
            preference: preference.as_str().to_string(),
        };
        std::fs::write(&self.path, serde_json::to_string_pretty(&values)?)?;
        info!(path = %self.path.display(), complete = profile.is_complete(), "Saved passenger profile");
        Ok(())
    }
}
