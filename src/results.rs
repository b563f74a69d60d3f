//! Results screen: aggregates extracted flights and drives host-side retries

use crate::booking::BookingParams;
use crate::config::ResultsSettings;
use crate::events::{decode_message, StatusEvent};
use crate::extract::sort_by_price;
use crate::search::SourceSite;
use crate::{AssistError, FlightRecord, Platform, Result, SearchPreference, SearchQuery};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Navigation parameters from the search screen
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultsParams {
    pub from: String,
    pub to: String,
    pub date: String,
    pub preference: SearchPreference,
}

impl ResultsParams {
    pub fn new(query: &SearchQuery, preference: SearchPreference) -> Self {
        Self {
            from: query.origin.clone(),
            to: query.destination.clone(),
            date: query.date_str(),
            preference,
        }
    }

    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("from", self.from.clone()),
            ("to", self.to.clone()),
            ("date", self.date.clone()),
            ("preference", self.preference.to_string()),
        ]
    }

    pub fn from_pairs(pairs: &HashMap<String, String>) -> Result<Self> {
        let get = |key: &str| {
            pairs
                .get(key)
                .cloned()
                .ok_or_else(|| AssistError::InvalidParams(format!("missing '{}'", key)))
        };
        let preference = match pairs.get("preference") {
            Some(value) if !value.is_empty() => value.parse()?,
            _ => SearchPreference::default(),
        };
        Ok(Self {
            from: get("from")?,
            to: get("to")?,
            date: get("date")?,
            preference,
        })
    }

    pub fn query(&self) -> Result<SearchQuery> {
        SearchQuery::new(&self.from, &self.to, &self.date)
    }
}

/// Live progress of one source site's extraction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceProgress {
    pub attempt: u32,
    pub max: u32,
    pub done: bool,
    pub found: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultsState {
    Loading,
    Loaded,
    /// Automation gave up; offer the source site directly
    Failed { message: String, fallback_url: String },
}

/// What the host should do after handling a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultsAction {
    None,
    /// Re-show the hidden browser and reload its page after the delay
    Reload { after: Duration },
}

pub struct ResultsSession {
    params: ResultsParams,
    settings: ResultsSettings,
    urls: BTreeMap<Platform, String>,
    flights: Vec<FlightRecord>,
    progress: BTreeMap<Platform, SourceProgress>,
    state: ResultsState,
    retry_count: u32,
}

impl ResultsSession {
    pub fn new(params: ResultsParams, settings: ResultsSettings) -> Result<Self> {
        let query = params.query()?;
        let mut urls = BTreeMap::new();
        for site in SourceSite::enabled() {
            urls.insert(site.platform(), site.search_url(&query)?);
        }
        let progress = urls.keys().map(|p| (*p, SourceProgress::default())).collect();
        info!(from = %params.from, to = %params.to, date = %params.date, sources = urls.len(), "Results session started");

        Ok(Self {
            params,
            settings,
            urls,
            flights: Vec::new(),
            progress,
            state: ResultsState::Loading,
            retry_count: 0,
        })
    }

    /// Pages the hidden browsers should load, one per enabled source
    pub fn request_urls(&self) -> impl Iterator<Item = (Platform, &str)> {
        self.urls.iter().map(|(p, url)| (*p, url.as_str()))
    }

    /// Deep link offered when automation fails
    pub fn fallback_url(&self) -> &str {
        self.urls
            .get(&Platform::Qunar)
            .or_else(|| self.urls.values().next())
            .map(String::as_str)
            .unwrap_or_default()
    }

    pub fn state(&self) -> &ResultsState {
        &self.state
    }

    /// Flights sorted by ascending price
    pub fn flights(&self) -> &[FlightRecord] {
        &self.flights
    }

    pub fn progress(&self, platform: Platform) -> Option<SourceProgress> {
        self.progress.get(&platform).copied()
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn cheapest_price(&self) -> Option<u32> {
        self.flights.first().map(|f| f.price)
    }

    pub fn is_cheapest(&self, flight: &FlightRecord) -> bool {
        self.cheapest_price() == Some(flight.price)
    }

    /// Loading line shown under the spinner
    pub fn status_line(&self) -> String {
        let sources: Vec<String> = self
            .progress
            .iter()
            .map(|(platform, p)| {
                if p.done {
                    format!("{} ✓ {}个", platform.display_name(), p.found)
                } else {
                    format!("{} {}/{}", platform.display_name(), p.attempt, p.max)
                }
            })
            .collect();
        let mut line = format!("正在搜索航班... {}", sources.join(" · "));
        if self.retry_count > 0 {
            line.push_str(&format!(" 重试中 ({}/{})", self.retry_count, self.settings.max_host_retries));
        }
        line
    }

    /// Decode and apply one raw browser message; malformed ones are ignored
    pub fn handle_raw(&mut self, raw: &str) -> ResultsAction {
        match decode_message(raw) {
            Some(event) => self.handle_event(event),
            None => ResultsAction::None,
        }
    }

    pub fn handle_event(&mut self, event: StatusEvent) -> ResultsAction {
        match event {
            StatusEvent::Progress { platform, attempt, max } => {
                if let Some(progress) = self.progress.get_mut(&platform) {
                    progress.attempt = attempt;
                    progress.max = max;
                }
                ResultsAction::None
            }
            StatusEvent::Flights { platform, data } if data.is_empty() => {
                self.source_failed(platform, "未找到航班，请重试")
            }
            StatusEvent::Flights { platform, data } => {
                self.merge(platform, data);
                ResultsAction::None
            }
            StatusEvent::NotFound { platform } => self.source_failed(platform, "未找到航班数据"),
            StatusEvent::Error { platform: Some(platform), message } => self.source_failed(platform, &message),
            StatusEvent::Error { platform: None, message } => {
                warn!(message = %message, "Browser reported an error without a source");
                ResultsAction::None
            }
            other => {
                debug!(event = ?other, "Ignoring message on results screen");
                ResultsAction::None
            }
        }
    }

    fn merge(&mut self, platform: Platform, data: Vec<FlightRecord>) {
        let mut seen: HashSet<(u32, String, String)> = self
            .flights
            .iter()
            .map(|f| (f.price, f.departure_time.clone(), f.arrival_time.clone()))
            .collect();
        let before = self.flights.len();
        for flight in data {
            if seen.insert((flight.price, flight.departure_time.clone(), flight.arrival_time.clone())) {
                self.flights.push(flight);
            }
        }
        sort_by_price(&mut self.flights);

        if let Some(progress) = self.progress.get_mut(&platform) {
            progress.done = true;
            progress.found += self.flights.len() - before;
        }
        info!(platform = %platform, total = self.flights.len(), "Merged flights");

        if !self.flights.is_empty() {
            self.state = ResultsState::Loaded;
        }
    }

    fn source_failed(&mut self, platform: Platform, message: &str) -> ResultsAction {
        if let Some(progress) = self.progress.get_mut(&platform) {
            progress.done = true;
        }
        let all_done = self.progress.values().all(|p| p.done);
        if !all_done || !self.flights.is_empty() {
            return ResultsAction::None;
        }

        if self.retry_count < self.settings.max_host_retries {
            self.retry_count += 1;
            for progress in self.progress.values_mut() {
                *progress = SourceProgress::default();
            }
            self.state = ResultsState::Loading;
            info!(retry = self.retry_count, max = self.settings.max_host_retries, "Retrying extraction");
            return ResultsAction::Reload {
                after: Duration::from_millis(self.settings.retry_delay_ms),
            };
        }

        warn!(message = %message, "Extraction failed after host retries");
        self.state = ResultsState::Failed {
            message: message.to_string(),
            fallback_url: self.fallback_url().to_string(),
        };
        ResultsAction::None
    }

    /// Booking-screen parameters for a chosen flight
    pub fn book(&self, flight: &FlightRecord) -> BookingParams {
        let url = self
            .urls
            .get(&flight.platform)
            .map(String::as_str)
            .unwrap_or_else(|| self.fallback_url());
        BookingParams {
            url: url.to_string(),
            platform: flight.platform,
            flight_no: flight.flight_number.clone().unwrap_or_default(),
            preference: self.params.preference,
            target_price: Some(flight.price),
        }
    }

    /// Booking-screen parameters for browsing the source site by hand
    pub fn open_source_site(&self) -> BookingParams {
        BookingParams {
            url: self.fallback_url().to_string(),
            platform: Platform::Qunar,
            flight_no: String::new(),
            preference: self.params.preference,
            target_price: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ResultsParams {
        ResultsParams {
            from: "昆明".into(),
            to: "北京".into(),
            date: "2026-10-16".into(),
            preference: SearchPreference::Cheapest,
        }
    }

    fn flight(price: u32, dep: &str, arr: &str) -> FlightRecord {
        FlightRecord {
            platform: Platform::Qunar,
            price,
            flight_number: Some("MU5712".into()),
            airline: None,
            departure_time: dep.into(),
            arrival_time: arr.into(),
            stop_count: 0,
            duration: None,
        }
    }

    fn session() -> ResultsSession {
        ResultsSession::new(params(), ResultsSettings::default()).unwrap()
    }

    #[test]
    fn test_params_round_trip_through_pairs() {
        let pairs: HashMap<String, String> = params()
            .to_pairs()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        assert_eq!(ResultsParams::from_pairs(&pairs).unwrap(), params());

        let mut missing = pairs.clone();
        missing.remove("date");
        assert!(ResultsParams::from_pairs(&missing).is_err());
    }

    #[test]
    fn test_merge_sorts_and_dedups() {
        let mut session = session();
        session.handle_event(StatusEvent::Flights {
            platform: Platform::Qunar,
            data: vec![flight(900, "09:00", "12:00"), flight(650, "07:00", "10:00")],
        });
        session.handle_event(StatusEvent::Flights {
            platform: Platform::Qunar,
            data: vec![flight(650, "07:00", "10:00"), flight(720, "13:00", "16:00")],
        });

        let prices: Vec<_> = session.flights().iter().map(|f| f.price).collect();
        assert_eq!(prices, vec![650, 720, 900]);
        assert_eq!(session.state(), &ResultsState::Loaded);
        assert!(session.is_cheapest(&session.flights()[0]));
        assert!(!session.is_cheapest(&session.flights()[2]));
    }

    #[test]
    fn test_not_found_retries_then_fails() {
        let mut session = session();
        let not_found = || StatusEvent::NotFound { platform: Platform::Qunar };

        assert_eq!(
            session.handle_event(not_found()),
            ResultsAction::Reload { after: Duration::from_millis(2000) }
        );
        assert_eq!(session.retry_count(), 1);
        assert_eq!(session.state(), &ResultsState::Loading);

        assert!(matches!(session.handle_event(not_found()), ResultsAction::Reload { .. }));
        assert_eq!(session.handle_event(not_found()), ResultsAction::None);

        match session.state() {
            ResultsState::Failed { message, fallback_url } => {
                assert_eq!(message, "未找到航班数据");
                assert!(fallback_url.starts_with("https://m.flight.qunar.com/"));
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_flights_message_counts_as_failure() {
        let mut session = session();
        let empty = r#"{"type":"flights","platform":"qunar","data":[]}"#;

        assert!(matches!(session.handle_raw(empty), ResultsAction::Reload { .. }));
        assert!(matches!(session.handle_raw(empty), ResultsAction::Reload { .. }));
        assert_eq!(session.handle_raw(empty), ResultsAction::None);

        match session.state() {
            ResultsState::Failed { message, .. } => assert_eq!(message, "未找到航班，请重试"),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_messages_ignored() {
        let mut session = session();
        assert_eq!(session.handle_raw("{broken"), ResultsAction::None);
        assert_eq!(session.handle_raw(r#"{"type":"flights"}"#), ResultsAction::None);
        assert_eq!(session.state(), &ResultsState::Loading);
    }

    #[test]
    fn test_progress_in_status_line() {
        let mut session = session();
        session.handle_raw(r#"{"type":"progress","platform":"qunar","attempt":3,"max":10}"#);
        assert_eq!(session.progress(Platform::Qunar).map(|p| p.attempt), Some(3));
        assert!(session.status_line().contains("去哪儿 3/10"));
    }

    #[test]
    fn test_book_builds_booking_params() {
        let session = session();
        let params = session.book(&flight(650, "07:00", "10:00"));
        assert_eq!(params.platform, Platform::Qunar);
        assert_eq!(params.flight_no, "MU5712");
        assert_eq!(params.target_price, Some(650));
        assert!(params.url.contains("goDate=2026-10-16"));

        let manual = session.open_source_site();
        assert!(manual.flight_no.is_empty());
        assert_eq!(manual.target_price, None);
    }
}
