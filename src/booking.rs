//! Booking screen: decides when autofill runs and relays its messages

use crate::autofill::AutofillEngine;
use crate::config::Settings;
use crate::events::{decode_message, StatusEvent};
use crate::profile::StoredProfile;
use crate::{AssistError, Platform, Result, SearchPreference};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Oldest log lines are dropped past this
pub const LOG_CAPACITY: usize = 100;

/// Wait after navigating onto an order page before filling
pub const NAVIGATION_FILL_DELAY: Duration = Duration::from_secs(2);

const ORDER_URL_MARKERS: [&str; 4] = ["order", "booking", "book", "fill"];

/// Navigation parameters from the results screen
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingParams {
    pub url: String,
    pub platform: Platform,
    pub flight_no: String,
    pub preference: SearchPreference,
    pub target_price: Option<u32>,
}

impl BookingParams {
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("url", self.url.clone()),
            ("platform", self.platform.to_string()),
            ("flightNo", self.flight_no.clone()),
            ("preference", self.preference.to_string()),
        ];
        if let Some(price) = self.target_price {
            pairs.push(("targetPrice", price.to_string()));
        }
        pairs
    }

    pub fn from_pairs(pairs: &HashMap<String, String>) -> Result<Self> {
        let url = pairs
            .get("url")
            .filter(|url| !url.is_empty())
            .cloned()
            .ok_or_else(|| AssistError::InvalidParams("missing 'url'".to_string()))?;
        let platform = match pairs.get("platform") {
            Some(value) if !value.is_empty() => value.parse()?,
            _ => Platform::Qunar,
        };
        let preference = match pairs.get("preference") {
            Some(value) if !value.is_empty() => value.parse()?,
            _ => SearchPreference::default(),
        };
        let target_price = match pairs.get("targetPrice") {
            Some(value) if !value.is_empty() => Some(
                value
                    .parse()
                    .map_err(|_| AssistError::InvalidParams(format!("Invalid targetPrice: {}", value)))?,
            ),
            _ => None,
        };

        Ok(Self {
            url,
            platform,
            flight_no: pairs.get("flightNo").cloned().unwrap_or_default(),
            preference,
            target_price,
        })
    }
}

/// URL heuristic for a booking-flow page
pub fn is_order_page(url: &str) -> bool {
    let url = url.to_lowercase();
    ORDER_URL_MARKERS.iter().any(|marker| url.contains(marker))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub time: String,
    pub message: String,
}

pub struct BookingSession {
    params: BookingParams,
    stored: StoredProfile,
    status: String,
    log: VecDeque<LogLine>,
}

impl BookingSession {
    pub fn new(params: BookingParams, stored: StoredProfile) -> Self {
        let status = if stored.passenger.is_complete() {
            "正在打开页面...".to_string()
        } else {
            warn!("Booking screen opened without a complete passenger profile");
            "⚠️ 乘客信息不完整，请返回填写".to_string()
        };
        info!(url = %params.url, platform = %params.platform, flight_no = %params.flight_no, "Booking session started");

        Self {
            params,
            stored,
            status,
            log: VecDeque::new(),
        }
    }

    pub fn params(&self) -> &BookingParams {
        &self.params
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn log(&self) -> impl Iterator<Item = &LogLine> {
        self.log.iter()
    }

    pub fn can_fill(&self) -> bool {
        self.stored.passenger.is_complete()
    }

    /// Page finished loading. Returns true when autofill should start now.
    pub fn on_load_end(&mut self, url: &str) -> bool {
        if !self.can_fill() {
            self.status = "未保存乘客信息，请返回填写".to_string();
            return false;
        }
        if is_order_page(url) {
            debug!(url, "Order page loaded");
            true
        } else {
            self.status = "请在页面中选择航班，进入订票页后自动填表".to_string();
            false
        }
    }

    /// Page navigated. Returns the delay before autofill when it lands on an order page.
    pub fn on_navigation(&mut self, url: &str) -> Option<Duration> {
        if self.can_fill() && is_order_page(url) {
            info!(url, "Navigated to order page");
            Some(NAVIGATION_FILL_DELAY)
        } else {
            None
        }
    }

    /// The user pressed the fill button
    pub fn manual_fill(&mut self) -> bool {
        if !self.can_fill() {
            self.status = "未保存乘客信息，请返回填写".to_string();
            return false;
        }
        self.status = "正在尝试填表...".to_string();
        true
    }

    /// Engine for one autofill run, or None without a complete profile
    pub fn engine(&self, settings: &Settings) -> Result<Option<AutofillEngine>> {
        if !self.can_fill() {
            return Ok(None);
        }
        let engine = AutofillEngine::new(
            self.stored.passenger.clone(),
            self.params.preference,
            settings.autofill.clone(),
        )?;
        Ok(Some(engine))
    }

    pub fn handle_raw(&mut self, raw: &str) {
        if let Some(event) = decode_message(raw) {
            self.handle_event(event);
        }
    }

    pub fn handle_event(&mut self, event: StatusEvent) {
        match event {
            StatusEvent::Status { message } => self.status = message,
            StatusEvent::Log { message } => self.push_log(message),
            StatusEvent::Debug { message } => debug!(message = %message, "Browser debug"),
            StatusEvent::DomInfo { inputs, url, .. } => {
                debug!(url = %url, inputs = inputs.len(), "Booking page inputs");
            }
            StatusEvent::Error { message, .. } => {
                warn!(message = %message, "Booking page error");
                self.push_log(format!("错误: {}", message));
            }
            other => debug!(event = ?other, "Ignoring message on booking screen"),
        }
    }

    fn push_log(&mut self, message: String) {
        if self.log.len() == LOG_CAPACITY {
            self.log.pop_front();
        }
        self.log.push_back(LogLine {
            time: chrono::Local::now().format("%H:%M:%S").to_string(),
            message,
        });
    }
}
