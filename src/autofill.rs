//! Booking-form autofill
//!
//! Each attempt walks three steps: pick a fare package if the page is still
//! a package list, open the "add passenger" form if one is offered, then
//! fill name, ID number and phone in that order. Attempts repeat on a fixed
//! interval until one fills at least one field or the budget runs out.

use crate::config::AutofillSettings;
use crate::events::{EventSink, StatusEvent};
use crate::page::{BookingPage, Clickable, DomEvent, InputHandle};
use crate::retry::{Clock, Poller};
use crate::{FieldKind, PassengerProfile, Result, SearchPreference};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info, instrument, warn};

const NAME_SELECTORS: &[&str] = &[
    r#"input[placeholder*="乘机人"]"#,
    r#"input[placeholder*="旅客"]"#,
    r#"input[placeholder*="姓名"]"#,
    r#"input[name*="name" i]"#,
    r#"input[id*="name" i]"#,
    r#"input[placeholder*="乘客"]"#,
];

const ID_NUMBER_SELECTORS: &[&str] = &[
    r#"input[placeholder*="证件号码"]"#,
    r#"input[placeholder*="证件"]"#,
    r#"input[placeholder*="身份证"]"#,
    r#"input[name*="card" i]"#,
    r#"input[name*="idno" i]"#,
    r#"input[name*="credential" i]"#,
];

const PHONE_SELECTORS: &[&str] = &[
    r#"input[placeholder*="联系手机"]"#,
    r#"input[placeholder*="手机"]"#,
    r#"input[placeholder*="电话"]"#,
    r#"input[type="tel"]"#,
    r#"input[name*="phone" i]"#,
    r#"input[name*="mobile" i]"#,
];

const PACKAGE_WORDS: &[&str] = &["预订", "订票", "立即", "选择"];

/// Never clicked while looking for a package
const PACKAGE_EXCLUDED_WORDS: &[&str] = &["支付", "付款", "提交"];

const ADD_PASSENGER_WORDS: &[&str] = &[
    "添加乘机人", "新增乘机人", "添加乘客", "新增乘客", "添加旅客", "新增旅客", "+乘机人",
];

/// Selector patterns for a field, highest priority first
pub fn selectors_for(field: FieldKind) -> &'static [&'static str] {
    match field {
        FieldKind::Name => NAME_SELECTORS,
        FieldKind::IdNumber => ID_NUMBER_SELECTORS,
        FieldKind::Phone => PHONE_SELECTORS,
    }
}

/// How a re-read value is compared with the value that was written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    Exact,
    /// Also accepts values the page decorated, e.g. a phone split by spaces
    #[default]
    Lenient,
}

impl MatchMode {
    pub fn accepts(&self, actual: &str, intended: &str) -> bool {
        if actual == intended {
            return true;
        }
        match self {
            MatchMode::Exact => false,
            MatchMode::Lenient => {
                actual.contains(intended) || squash(actual).contains(&squash(intended))
            }
        }
    }
}

fn squash(value: &str) -> String {
    value.chars().filter(|c| !c.is_whitespace() && *c != '-').collect()
}

/// Inputs already holding a field's value during one attempt
#[derive(Debug, Clone, Default)]
pub struct ClaimedInputs {
    claimed: HashSet<InputHandle>,
}

impl ClaimedInputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, input: InputHandle) -> bool {
        self.claimed.contains(&input)
    }

    pub fn claim(&mut self, input: InputHandle) -> bool {
        self.claimed.insert(input)
    }

    pub fn len(&self) -> usize {
        self.claimed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claimed.is_empty()
    }
}

/// Result of filling one field
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldOutcome {
    pub field: FieldKind,
    pub selector: Option<String>,
    pub input: Option<InputHandle>,
    pub filled: bool,
}

impl FieldOutcome {
    fn missing(field: FieldKind) -> Self {
        Self {
            field,
            selector: None,
            input: None,
            filled: false,
        }
    }
}

/// Write a value the way live typing would, so page listeners notice it
fn type_value<P: BookingPage>(page: &mut P, input: InputHandle, value: &str) {
    page.dispatch(input, DomEvent::Focus);
    page.dispatch(input, DomEvent::Click);
    page.assign_value(input, value);
    page.dispatch(input, DomEvent::Input);
    page.dispatch(input, DomEvent::Change);
    for key in value.chars() {
        page.dispatch(input, DomEvent::KeyDown(key));
        page.dispatch(input, DomEvent::KeyPress(key));
        page.dispatch(input, DomEvent::KeyUp(key));
    }
    page.dispatch(input, DomEvent::Blur);
}

/// Find the first usable input for `field`, write `value` and keep it only
/// if the page reads back what was written. Rejected inputs are cleared.
pub fn fill_field<P: BookingPage>(
    page: &mut P,
    field: FieldKind,
    value: &str,
    claimed: &mut ClaimedInputs,
    mode: MatchMode,
) -> FieldOutcome {
    if value.is_empty() {
        return FieldOutcome::missing(field);
    }

    for selector in selectors_for(field) {
        for input in page.query_inputs(selector) {
            if claimed.contains(input) || !page.is_interactable(input) {
                continue;
            }

            type_value(page, input, value);
            let actual = page.read_value(input);
            if mode.accepts(&actual, value) {
                claimed.claim(input);
                debug!(field = ?field, selector = %selector, input = input.0, "Field filled");
                return FieldOutcome {
                    field,
                    selector: Some(selector.to_string()),
                    input: Some(input),
                    filled: true,
                };
            }

            debug!(
                field = ?field,
                selector = %selector,
                input = input.0,
                "Read-back mismatch, clearing candidate"
            );
            page.assign_value(input, "");
            page.dispatch(input, DomEvent::Input);
        }
    }

    FieldOutcome::missing(field)
}

/// Ranks package buttons by the text they show
pub struct PackageRanker {
    price: Regex,
    duration: Regex,
}

impl PackageRanker {
    pub fn new() -> Result<Self> {
        Ok(Self {
            price: Regex::new(r"[¥￥]\s*([0-9]{2,6})")?,
            duration: Regex::new(r"([0-9]{1,2})\s*(?:h|小时)\s*(?:([0-9]{1,2})\s*(?:m|分))?")?,
        })
    }

    fn price_of(&self, text: &str) -> Option<u32> {
        self.price
            .captures(text)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok())
    }

    fn minutes_of(&self, text: &str) -> Option<u32> {
        let captures = self.duration.captures(text)?;
        let hours: u32 = captures.get(1)?.as_str().parse().ok()?;
        let minutes: u32 = captures.get(2).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
        Some(hours * 60 + minutes)
    }

    /// Rank candidates by preference; without a usable signal the first wins
    pub fn choose<'a>(&self, candidates: &[&'a Clickable], preference: SearchPreference) -> Option<&'a Clickable> {
        let ranked = match preference {
            SearchPreference::Cheapest => candidates
                .iter()
                .filter_map(|c| self.price_of(&c.text).map(|p| (p, *c)))
                .min_by_key(|(p, _)| *p)
                .map(|(_, c)| c),
            SearchPreference::Fastest => candidates
                .iter()
                .filter_map(|c| self.minutes_of(&c.text).map(|m| (m, *c)))
                .min_by_key(|(m, _)| *m)
                .map(|(_, c)| c),
            SearchPreference::Direct => candidates.iter().find(|c| c.text.contains("直飞")).copied(),
        };
        ranked.or_else(|| candidates.first().copied())
    }
}

/// Package buttons on the page, in document order
pub fn package_candidates(clickables: &[Clickable]) -> Vec<&Clickable> {
    clickables
        .iter()
        .filter(|c| PACKAGE_WORDS.iter().any(|w| c.text.contains(w)))
        .filter(|c| !PACKAGE_EXCLUDED_WORDS.iter().any(|w| c.text.contains(w)))
        .filter(|c| !ADD_PASSENGER_WORDS.iter().any(|w| c.text.contains(w)))
        .collect()
}

fn find_add_passenger(clickables: &[Clickable]) -> Option<&Clickable> {
    ADD_PASSENGER_WORDS
        .iter()
        .find_map(|word| clickables.iter().find(|c| c.text.contains(word)))
}

/// At least one unclaimed, interactable input matches a field selector
fn form_present<P: BookingPage>(page: &P) -> bool {
    FieldKind::FILL_ORDER.iter().any(|field| {
        selectors_for(*field)
            .iter()
            .any(|selector| page.query_inputs(selector).into_iter().any(|i| page.is_interactable(i)))
    })
}

/// What one attempt did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// A package was clicked; the page is transitioning
    PackageSelected { text: String },
    Filled { outcomes: Vec<FieldOutcome> },
}

impl AttemptOutcome {
    pub fn filled_count(&self) -> usize {
        match self {
            AttemptOutcome::PackageSelected { .. } => 0,
            AttemptOutcome::Filled { outcomes } => outcomes.iter().filter(|o| o.filled).count(),
        }
    }
}

/// Summary of an autofill run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AutofillReport {
    pub attempts: u32,
    pub filled: usize,
    pub outcomes: Vec<FieldOutcome>,
    /// False when the profile was incomplete and nothing was attempted
    pub started: bool,
}

impl AutofillReport {
    pub fn succeeded(&self) -> bool {
        self.filled > 0
    }
}

#[derive(Debug, Default)]
struct RunState {
    package_selected: bool,
    add_passenger_clicked: bool,
}

pub struct AutofillEngine {
    profile: PassengerProfile,
    preference: SearchPreference,
    settings: AutofillSettings,
    ranker: PackageRanker,
}

impl AutofillEngine {
    pub fn new(profile: PassengerProfile, preference: SearchPreference, settings: AutofillSettings) -> Result<Self> {
        Ok(Self {
            profile,
            preference,
            settings,
            ranker: PackageRanker::new()?,
        })
    }

    pub fn profile(&self) -> &PassengerProfile {
        &self.profile
    }

    /// Retry attempts on a fixed interval until one fills a field
    #[instrument(level = "info", skip_all, fields(url = %page.url()))]
    pub async fn run<P, C>(&self, page: &mut P, clock: &C, sink: &EventSink) -> AutofillReport
    where
        P: BookingPage,
        C: Clock,
    {
        if !self.profile.is_complete() {
            warn!("Passenger profile incomplete, autofill skipped");
            sink.emit(StatusEvent::status("⚠️ 乘客信息不完整，请返回填写"));
            return AutofillReport {
                attempts: 0,
                filled: 0,
                outcomes: Vec::new(),
                started: false,
            };
        }

        let mut poller = Poller::new(self.settings.interval(), self.settings.max_attempts);
        let mut state = RunState::default();
        let mut last_outcomes = Vec::new();
        sink.emit(StatusEvent::status("等待页面加载..."));

        while let Some(attempt) = poller.next() {
            clock.sleep(poller.interval()).await;
            debug!(attempt = attempt.index, max = attempt.max, "Autofill attempt");

            let outcome = self.attempt(page, clock, sink, &mut state).await;
            let filled = outcome.filled_count();
            if let AttemptOutcome::Filled { outcomes } = outcome {
                last_outcomes = outcomes;
            }
            if filled > 0 {
                info!(attempt = attempt.index, filled, "Autofill succeeded");
                return AutofillReport {
                    attempts: attempt.index,
                    filled,
                    outcomes: last_outcomes,
                    started: true,
                };
            }
        }

        warn!(attempts = poller.attempts_made(), "Autofill attempt budget exhausted");
        sink.emit(StatusEvent::status("自动填表未成功，请手动填写"));
        AutofillReport {
            attempts: poller.attempts_made(),
            filled: 0,
            outcomes: last_outcomes,
            started: true,
        }
    }

    async fn attempt<P, C>(&self, page: &mut P, clock: &C, sink: &EventSink, state: &mut RunState) -> AttemptOutcome
    where
        P: BookingPage,
        C: Clock,
    {
        sink.emit(StatusEvent::status("正在分析页面..."));
        let ready = form_present(page);

        if !ready && !state.package_selected {
            let clickables = page.clickables();
            let candidates = package_candidates(&clickables);
            if let Some(choice) = self.ranker.choose(&candidates, self.preference) {
                let text = choice.text.clone();
                info!(text = %text, preference = %self.preference, "Selecting package");
                sink.emit(StatusEvent::log(format!("已选择套餐: {}", text)));
                page.click(choice.handle);
                state.package_selected = true;
                clock.sleep(self.settings.package_delay()).await;
                return AttemptOutcome::PackageSelected { text };
            }
        }

        if !ready && !state.add_passenger_clicked {
            let clickables = page.clickables();
            if let Some(button) = find_add_passenger(&clickables) {
                info!(text = %button.text, "Opening add-passenger form");
                sink.emit(StatusEvent::log(format!("点击: {}", button.text)));
                page.click(button.handle);
                state.add_passenger_clicked = true;
                clock.sleep(self.settings.add_passenger_delay()).await;
            }
        }

        let outcomes = self.fill_fields(page, sink);
        let filled: Vec<String> = outcomes
            .iter()
            .filter(|o| o.filled)
            .map(|o| format!("✓ {}: {}", o.field.label(), self.profile.masked(o.field)))
            .collect();

        if filled.is_empty() {
            sink.emit(StatusEvent::status("未找到表单，可能还在搜索页"));
            sink.emit(StatusEvent::DomInfo {
                inputs: page.describe_inputs(),
                url: page.url().to_string(),
                html: page.markup().chars().take(2000).collect(),
            });
        } else {
            sink.emit(StatusEvent::status(filled.join("  ")));
            clock.sleep(self.settings.settle()).await;
            sink.emit(StatusEvent::status(format!(
                "已完成自动填表，共填写 {} 个字段 ✓",
                filled.len()
            )));
        }

        AttemptOutcome::Filled { outcomes }
    }

    /// Fill the three fields in order with a fresh claim set
    pub fn fill_fields<P: BookingPage>(&self, page: &mut P, sink: &EventSink) -> Vec<FieldOutcome> {
        let mut claimed = ClaimedInputs::new();
        FieldKind::FILL_ORDER
            .iter()
            .map(|field| {
                let outcome = fill_field(
                    page,
                    *field,
                    self.profile.value(*field),
                    &mut claimed,
                    self.settings.match_mode,
                );
                let line = match &outcome.selector {
                    Some(selector) if outcome.filled => {
                        format!("✓ {}: {} ({})", field.label(), self.profile.masked(*field), selector)
                    }
                    _ => format!("✗ {}: 未找到", field.label()),
                };
                sink.emit(StatusEvent::log(line));
                outcome
            })
            .collect()
    }
}
