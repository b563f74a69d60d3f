//! Heuristic flight extraction from a rendered search-results page

use crate::config::ExtractionSettings;
use crate::events::{EventSink, StatusEvent};
use crate::page::PageSource;
use crate::retry::{Clock, Poller};
use crate::{AssistError, FlightRecord, Platform, Result};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, instrument, warn};

/// Airline names searched for in each container, longest forms first
const AIRLINES: &[&str] = &[
    "中国国际航空", "东方航空", "南方航空", "海南航空", "四川航空", "厦门航空",
    "深圳航空", "山东航空", "昆明航空", "祥鹏航空", "吉祥航空", "春秋航空",
    "首都航空", "西部航空", "天津航空", "华夏航空", "长龙航空", "成都航空",
    "国航", "东航", "南航", "海航", "川航", "厦航", "深航", "山航", "昆航",
    "祥鹏", "吉祥", "春秋", "首都", "西部",
];

/// A price, optionally with thousands separators
const AMOUNT: &str = r"[0-9]{1,3}(?:,[0-9]{3})+|[0-9]{2,6}";

const TRANSFER_WORDS: &[&str] = &["中转", "经停", "转机", "转乘"];

/// Characters that make an adjacent digit run part of something else
/// (flight numbers, dates, times, decimals)
fn is_number_glue(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, ':' | '.' | '-' | '/' | ',')
}

fn parse_amount(digits: &str) -> Option<u32> {
    digits.replace(',', "").parse().ok()
}

/// Parses flight records out of arbitrary results-page markup
pub struct ExtractionParser {
    platform: Platform,
    settings: ExtractionSettings,
    container_selector: Selector,
    currency_price: Regex,
    labeled_price: Regex,
    lone_number: Regex,
    time: Regex,
    flight_number: Regex,
    transfer_count: Regex,
    duration: Regex,
}

type FlightKey = (u32, String, String);

fn flight_key(record: &FlightRecord) -> FlightKey {
    (
        record.price,
        record.departure_time.clone(),
        record.arrival_time.clone(),
    )
}

struct Candidate {
    record: FlightRecord,
    text_len: usize,
}

impl ExtractionParser {
    pub fn new(platform: Platform, settings: ExtractionSettings) -> Result<Self> {
        debug!(platform = %platform, "Initializing extraction parser");
        Ok(Self {
            platform,
            settings,
            container_selector: Selector::parse("div, li, section, article, a, tr")
                .map_err(|e| AssistError::SelectorError(format!("Invalid container selector: {:?}", e)))?,
            currency_price: Regex::new(&format!(r"[¥￥]\s*({AMOUNT})"))?,
            labeled_price: Regex::new(&format!(r"(?i)(?:价格|票价|price)\s*[:：]?\s*({AMOUNT})|({AMOUNT})\s*元"))?,
            lone_number: Regex::new(r"[0-9]{1,3}(?:,[0-9]{3})+|[0-9]{3,5}")?,
            time: Regex::new(r"([0-9]{1,2}):([0-9]{2})")?,
            flight_number: Regex::new(r"(?:[A-Z]{2}|[A-Z][0-9]|[0-9][A-Z])[0-9]{3,4}")?,
            transfer_count: Regex::new(r"([1-9])\s*次\s*(?:中转|经停)")?,
            duration: Regex::new(r"([0-9]{1,2})\s*(?:h|小时)\s*(?:([0-9]{1,2})\s*(?:m|分))?")?,
        })
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Scan every container in the page and return de-duplicated records
    /// sorted by ascending price. Pure: the same markup always yields the
    /// same list.
    pub fn parse_page(&self, html: &str) -> Vec<FlightRecord> {
        let document = Html::parse_document(html);
        let mut parsed = Vec::new();
        let mut scanned = 0usize;

        for container in document.select(&self.container_selector) {
            let text = container_text(&container);
            let text_len = text.chars().count();
            if text_len < self.settings.min_text_len || text_len > self.settings.max_text_len {
                continue;
            }
            scanned += 1;

            if let Some(record) = self.parse_container(&text) {
                parsed.push((container, record, text_len));
            }
        }

        let keys: HashMap<_, FlightKey> = parsed
            .iter()
            .map(|(container, record, _)| (container.id(), flight_key(record)))
            .collect();
        let mut best: HashMap<FlightKey, Candidate> = HashMap::new();

        for (container, record, text_len) in parsed {
            // A wrapper around several flight cards mixes their fields
            let nested: HashSet<&FlightKey> = container
                .descendants()
                .skip(1)
                .filter_map(|node| keys.get(&node.id()))
                .collect();
            if nested.len() > 1 {
                continue;
            }

            let key = flight_key(&record);
            // The most specific container describing a flight wins
            let replace = best
                .get(&key)
                .map_or(true, |existing| text_len < existing.text_len);
            if replace {
                best.insert(key, Candidate { record, text_len });
            }
        }

        let mut flights: Vec<FlightRecord> = best.into_values().map(|c| c.record).collect();
        sort_by_price(&mut flights);

        debug!(
            platform = %self.platform,
            containers_scanned = scanned,
            flights_extracted = flights.len(),
            "Page scan completed"
        );
        flights
    }

    /// A container yields a record when it has a price and at least two times
    pub fn parse_container(&self, text: &str) -> Option<FlightRecord> {
        let price = self.extract_price(text)?;
        let times = self.extract_times(text);
        if times.len() < 2 {
            return None;
        }

        Some(FlightRecord {
            platform: self.platform,
            price,
            flight_number: self.extract_flight_number(text),
            airline: AIRLINES.iter().find(|name| text.contains(*name)).map(|name| name.to_string()),
            departure_time: times[0].clone(),
            arrival_time: times[1].clone(),
            stop_count: self.extract_stop_count(text),
            duration: self.extract_duration(text),
        })
    }

    fn extract_price(&self, text: &str) -> Option<u32> {
        if let Some(price) = self
            .currency_price
            .captures(text)
            .and_then(|c| c.get(1))
            .and_then(|m| parse_amount(m.as_str()))
        {
            return Some(price);
        }

        if let Some(price) = self
            .labeled_price
            .captures(text)
            .and_then(|c| c.get(1).or_else(|| c.get(2)))
            .and_then(|m| parse_amount(m.as_str()))
        {
            return Some(price);
        }

        self.lone_number
            .find_iter(text)
            .filter(|m| standalone(text, m.start(), m.end()))
            .filter_map(|m| parse_amount(m.as_str()))
            .find(|p| (self.settings.min_price..=self.settings.max_price).contains(p))
    }

    /// Valid `HH:MM` times in order of appearance, zero-padded
    fn extract_times(&self, text: &str) -> Vec<String> {
        self.time
            .captures_iter(text)
            .filter_map(|c| {
                let whole = c.get(0)?;
                let before = text[..whole.start()].chars().next_back();
                let after = text[whole.end()..].chars().next();
                if before.is_some_and(|ch| ch.is_ascii_digit()) || after.is_some_and(|ch| ch.is_ascii_digit()) {
                    return None;
                }
                let hour: u32 = c.get(1)?.as_str().parse().ok()?;
                let minute: u32 = c.get(2)?.as_str().parse().ok()?;
                (hour < 24 && minute < 60).then(|| format!("{:02}:{:02}", hour, minute))
            })
            .collect()
    }

    fn extract_flight_number(&self, text: &str) -> Option<String> {
        self.flight_number
            .find_iter(text)
            .find(|m| {
                let before = text[..m.start()].chars().next_back();
                let after = text[m.end()..].chars().next();
                !before.is_some_and(|c| c.is_ascii_alphanumeric()) && !after.is_some_and(|c| c.is_ascii_digit())
            })
            .map(|m| m.as_str().to_string())
    }

    fn extract_stop_count(&self, text: &str) -> u32 {
        if let Some(count) = self
            .transfer_count
            .captures(text)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok())
        {
            return count;
        }
        u32::from(TRANSFER_WORDS.iter().any(|word| text.contains(word)))
    }

    fn extract_duration(&self, text: &str) -> Option<String> {
        let captures = self.duration.captures(text)?;
        let hours: u32 = captures.get(1)?.as_str().parse().ok()?;
        let minutes: u32 = captures
            .get(2)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(0);
        Some(format!("{}h{:02}m", hours, minutes))
    }
}

fn standalone(text: &str, start: usize, end: usize) -> bool {
    let before = text[..start].chars().next_back();
    let after = text[end..].chars().next();
    !before.is_some_and(is_number_glue) && !after.is_some_and(is_number_glue)
}

/// Whitespace-normalized text with element boundaries kept as spaces
fn container_text(element: &ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Ascending by price, then departure and arrival for a stable order
pub fn sort_by_price(flights: &mut [FlightRecord]) {
    flights.sort_by(|a, b| {
        a.price
            .cmp(&b.price)
            .then_with(|| a.departure_time.cmp(&b.departure_time))
            .then_with(|| a.arrival_time.cmp(&b.arrival_time))
    });
}

/// How an extraction run ended
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractionOutcome {
    Found { attempts: u32, flights: Vec<FlightRecord> },
    NotFound { attempts: u32 },
}

impl ExtractionOutcome {
    pub fn flights(&self) -> &[FlightRecord] {
        match self {
            ExtractionOutcome::Found { flights, .. } => flights,
            ExtractionOutcome::NotFound { .. } => &[],
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            ExtractionOutcome::Found { attempts, .. } | ExtractionOutcome::NotFound { attempts } => *attempts,
        }
    }
}

/// Polls a results page until flights appear or the attempt budget runs out
pub struct ExtractionEngine {
    parser: ExtractionParser,
    settings: ExtractionSettings,
}

impl ExtractionEngine {
    pub fn new(platform: Platform, settings: ExtractionSettings) -> Result<Self> {
        Ok(Self {
            parser: ExtractionParser::new(platform, settings.clone())?,
            settings,
        })
    }

    pub fn parser(&self) -> &ExtractionParser {
        &self.parser
    }

    #[instrument(level = "info", skip_all, fields(platform = %self.parser.platform()))]
    pub async fn run<S, C>(&self, source: &mut S, clock: &C, sink: &EventSink) -> ExtractionOutcome
    where
        S: PageSource,
        C: Clock,
    {
        let platform = self.parser.platform();
        let mut poller = Poller::new(self.settings.interval(), self.settings.max_attempts);
        info!(max_attempts = poller.max_attempts(), "Starting flight extraction");

        while let Some(attempt) = poller.next() {
            clock.sleep(poller.interval()).await;
            sink.emit(StatusEvent::Progress {
                platform,
                attempt: attempt.index,
                max: attempt.max,
            });

            let html = match source.snapshot().await {
                Ok(html) => html,
                Err(e) => {
                    warn!(attempt = attempt.index, error = %e, "Page snapshot failed");
                    sink.emit(StatusEvent::debug(format!("页面读取失败: {}", e)));
                    continue;
                }
            };

            let flights = self.parser.parse_page(&html);
            if !flights.is_empty() {
                info!(
                    attempt = attempt.index,
                    flights_found = flights.len(),
                    "Flights extracted"
                );
                sink.emit(StatusEvent::Flights {
                    platform,
                    data: flights.clone(),
                });
                return ExtractionOutcome::Found {
                    attempts: attempt.index,
                    flights,
                };
            }
            debug!(attempt = attempt.index, "No flights on page yet");
        }

        warn!(attempts = poller.attempts_made(), "Attempt budget exhausted without flights");
        sink.emit(StatusEvent::NotFound { platform });
        ExtractionOutcome::NotFound {
            attempts: poller.attempts_made(),
        }
    }
}
