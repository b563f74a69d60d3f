//! Search screen: source sites, form defaults and submission

use crate::profile::{ProfileStore, StoredProfile};
use crate::results::ResultsParams;
use crate::{AssistError, PassengerProfile, Platform, Result, SearchPreference, SearchQuery};
use chrono::{Datelike, Duration, NaiveDate};
use reqwest::Url;
use tracing::{info, instrument, warn};

/// A travel site results can be scraped from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceSite {
    Qunar,
    Ctrip,
    Fliggy,
}

impl SourceSite {
    pub const ALL: [SourceSite; 3] = [SourceSite::Qunar, SourceSite::Ctrip, SourceSite::Fliggy];

    pub fn platform(&self) -> Platform {
        match self {
            SourceSite::Qunar => Platform::Qunar,
            SourceSite::Ctrip => Platform::Ctrip,
            SourceSite::Fliggy => Platform::Fliggy,
        }
    }

    pub fn for_platform(platform: Platform) -> Self {
        match platform {
            Platform::Qunar => SourceSite::Qunar,
            Platform::Ctrip => SourceSite::Ctrip,
            Platform::Fliggy => SourceSite::Fliggy,
        }
    }

    /// Only Qunar's mobile markup is wired up; the others are kept for
    /// their URL templates and stay disabled.
    pub fn is_enabled(&self) -> bool {
        matches!(self, SourceSite::Qunar)
    }

    pub fn enabled() -> Vec<SourceSite> {
        Self::ALL.into_iter().filter(SourceSite::is_enabled).collect()
    }

    /// Mobile search-results page for a query
    pub fn search_url(&self, query: &SearchQuery) -> Result<String> {
        let date = query.date_str();
        let (base, params) = match self {
            SourceSite::Qunar => (
                "https://m.flight.qunar.com/ncs/page/flightlist",
                [("depCity", query.origin.as_str()), ("arrCity", query.destination.as_str()), ("goDate", date.as_str())],
            ),
            SourceSite::Ctrip => (
                "https://m.ctrip.com/html5/flight/swift/domestic",
                [("dcityName", query.origin.as_str()), ("acityName", query.destination.as_str()), ("ddate", date.as_str())],
            ),
            SourceSite::Fliggy => (
                "https://h5.m.taobao.com/trip/flight/searchlist/index.html",
                [("depCityName", query.origin.as_str()), ("arrCityName", query.destination.as_str()), ("depDate", date.as_str())],
            ),
        };
        let url = Url::parse_with_params(base, &params)
            .map_err(|e| AssistError::InvalidQuery(format!("Cannot build URL for {}: {}", self.platform(), e)))?;
        Ok(url.to_string())
    }
}

/// A selectable departure day
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateOption {
    pub label: String,
    pub weekday: String,
    pub value: NaiveDate,
}

/// Seven days from `today`: 今天/明天/后天, then `M/D`
pub fn date_options(today: NaiveDate) -> Vec<DateOption> {
    const RELATIVE: [&str; 3] = ["今天", "明天", "后天"];
    const WEEKDAYS: [&str; 7] = ["日", "一", "二", "三", "四", "五", "六"];

    (0..7)
        .map(|offset| {
            let day = today + Duration::days(offset);
            let label = match RELATIVE.get(offset as usize) {
                Some(relative) => relative.to_string(),
                None => format!("{}/{}", day.month(), day.day()),
            };
            DateOption {
                label,
                weekday: format!("周{}", WEEKDAYS[day.weekday().num_days_from_sunday() as usize]),
                value: day,
            }
        })
        .collect()
}

/// Outcome of validating the search form
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validation {
    Ready,
    /// Searching works but autofill will be skipped; ask before continuing
    NeedsConfirmation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchForm {
    pub origin: String,
    pub destination: String,
    pub date: NaiveDate,
    pub passenger: PassengerProfile,
    pub preference: SearchPreference,
}

impl SearchForm {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            origin: "昆明".to_string(),
            destination: "北京".to_string(),
            date: today + Duration::days(1),
            passenger: PassengerProfile::default(),
            preference: SearchPreference::default(),
        }
    }

    /// Prefill passenger fields from the store
    pub fn with_stored(mut self, stored: StoredProfile) -> Self {
        self.passenger = stored.passenger;
        self.preference = stored.preference;
        self
    }

    pub fn swap(&mut self) {
        std::mem::swap(&mut self.origin, &mut self.destination);
    }

    pub fn validate(&self) -> Result<Validation> {
        if self.origin.trim().is_empty() || self.destination.trim().is_empty() {
            return Err(AssistError::InvalidQuery("请输入出发和到达城市".to_string()));
        }
        if self.passenger.is_complete() {
            Ok(Validation::Ready)
        } else {
            Ok(Validation::NeedsConfirmation)
        }
    }

    pub fn query(&self) -> Result<SearchQuery> {
        SearchQuery::new(&self.origin, &self.destination, &self.date.format("%Y-%m-%d").to_string())
    }

    /// Persist the passenger profile and produce the results-screen parameters.
    /// Call after the user confirmed a [`Validation::NeedsConfirmation`].
    #[instrument(level = "info", skip_all, fields(origin = %self.origin, destination = %self.destination))]
    pub fn submit(&self, store: &ProfileStore) -> Result<ResultsParams> {
        if self.validate()? == Validation::NeedsConfirmation {
            warn!("Submitting with an incomplete passenger profile");
        }
        let query = self.query()?;
        store.save(&self.passenger, self.preference)?;
        info!(date = %query.date_str(), preference = %self.preference, "Search submitted");
        Ok(ResultsParams::new(&query, self.preference))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 15).unwrap()
    }

    #[test]
    fn test_form_defaults() {
        let form = SearchForm::new(today());
        assert_eq!(form.origin, "昆明");
        assert_eq!(form.destination, "北京");
        assert_eq!(form.date, NaiveDate::from_ymd_opt(2026, 10, 16).unwrap());
    }

    #[test]
    fn test_swap() {
        let mut form = SearchForm::new(today());
        form.swap();
        assert_eq!(form.origin, "北京");
        assert_eq!(form.destination, "昆明");
    }

    #[test]
    fn test_validation() {
        let mut form = SearchForm::new(today());
        assert_eq!(form.validate().unwrap(), Validation::NeedsConfirmation);

        form.passenger = PassengerProfile::new("张三", "110101199001011234", "13800138000");
        assert_eq!(form.validate().unwrap(), Validation::Ready);

        form.destination = "  ".to_string();
        assert!(matches!(form.validate(), Err(AssistError::InvalidQuery(_))));
    }

    #[test]
    fn test_date_options() {
        let options = date_options(today());
        assert_eq!(options.len(), 7);
        assert_eq!(options[0].label, "今天");
        assert_eq!(options[0].weekday, "周四");
        assert_eq!(options[2].label, "后天");
        assert_eq!(options[3].label, "10/18");
        assert_eq!(options[3].weekday, "周日");
        assert_eq!(options[6].value, NaiveDate::from_ymd_opt(2026, 10, 21).unwrap());
    }

    #[test]
    fn test_qunar_url() {
        let query = SearchQuery::new("昆明", "北京", "2026-10-16").unwrap();
        let url = SourceSite::Qunar.search_url(&query).unwrap();
        assert_eq!(
            url,
            "https://m.flight.qunar.com/ncs/page/flightlist?depCity=%E6%98%86%E6%98%8E&arrCity=%E5%8C%97%E4%BA%AC&goDate=2026-10-16"
        );
    }

    #[test]
    fn test_only_qunar_enabled() {
        assert_eq!(SourceSite::enabled(), vec![SourceSite::Qunar]);
        assert!(!SourceSite::Ctrip.is_enabled());
        assert_eq!(SourceSite::for_platform(Platform::Fliggy), SourceSite::Fliggy);
    }

    #[test]
    fn test_submit_persists_profile() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::new(dir.path().join("profile.json"));
        let mut form = SearchForm::new(today());
        form.passenger = PassengerProfile::new("张三", "110101199001011234", "13800138000");
        form.preference = SearchPreference::Direct;

        let params = form.submit(&store).unwrap();
        assert_eq!(params.from, "昆明");
        assert_eq!(params.date, "2026-10-16");
        assert_eq!(params.preference, SearchPreference::Direct);

        let stored = store.load().unwrap();
        assert_eq!(stored.passenger.name, "张三");
        assert_eq!(stored.preference, SearchPreference::Direct);
    }
}
