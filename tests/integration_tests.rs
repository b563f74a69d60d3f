//! Integration tests for flight-assist
//!
//! These drive the public API end to end: search form to results session,
//! extraction against replayed snapshots, and autofill against in-memory
//! booking pages relayed through a booking session.

use chrono::NaiveDate;
use flight_assist::booking::BookingSession;
use flight_assist::config::{AutofillSettings, ExtractionSettings, ResultsSettings};
use flight_assist::events::{self, StatusEvent};
use flight_assist::profile::StoredProfile;
use flight_assist::results::ResultsAction;
use flight_assist::{
    AutofillEngine, BookingPage, BookingParams, Clock, ExtractionEngine, ExtractionParser, PassengerProfile,
    Platform, ProfileStore, ResultsSession, ResultsState, SearchForm, SearchPreference, Settings, SnapshotSequence,
    SyntheticPage,
};
use std::cell::RefCell;
use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

/// Returns immediately, recording the requested delays
#[derive(Default)]
struct RecordingClock {
    sleeps: RefCell<Vec<Duration>>,
}

impl RecordingClock {
    fn count(&self) -> usize {
        self.sleeps.borrow().len()
    }

    fn total(&self) -> Duration {
        self.sleeps.borrow().iter().sum()
    }
}

impl Clock for RecordingClock {
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> {
        self.sleeps.borrow_mut().push(duration);
        std::future::ready(())
    }
}

fn drain(rx: &mut UnboundedReceiver<StatusEvent>) -> Vec<StatusEvent> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        out.push(event);
    }
    out
}

fn zhang_san() -> PassengerProfile {
    PassengerProfile::new("张三", "110101199001011234", "13800138000")
}

const RESULTS_PAGE: &str = r#"
    <html><body>
      <div class="list">
        <div class="card">
          <p>东方航空 MU5712</p>
          <p><b>08:30</b> 昆明长水 - <b>11:45</b> 北京首都</p>
          <p>3小时15分 直飞</p>
          <p class="price">¥1280</p>
        </div>
        <div class="card">
          <p>国航 CA4175</p>
          <p><b>07:05</b> 昆明长水 - <b>10:10</b> 北京大兴</p>
          <p>3h05m 直飞</p>
          <p class="price">¥680</p>
        </div>
        <div class="card">
          <p>四川航空 3U8888</p>
          <p><b>13:00</b> 昆明长水 - <b>18:40</b> 北京首都</p>
          <p>1次中转 成都</p>
          <p class="price">¥920</p>
        </div>
      </div>
    </body></html>
"#;

#[tokio::test]
async fn test_autofill_fills_all_three_fields() {
    let html = r#"
        <form class="passenger">
          <label>姓名</label><input name="name">
          <label>证件</label><input placeholder="身份证号">
          <label>手机</label><input type="tel">
        </form>
    "#;
    let mut page = SyntheticPage::new("https://m.flight.qunar.com/ncs/page/order", html).unwrap();
    let engine = AutofillEngine::new(zhang_san(), SearchPreference::Cheapest, AutofillSettings::default()).unwrap();
    let clock = RecordingClock::default();
    let (sink, mut rx) = events::channel();

    let report = engine.run(&mut page, &clock, &sink).await;
    assert!(report.started);
    assert_eq!(report.attempts, 1);
    assert_eq!(report.filled, 3);
    assert!(report.outcomes.iter().all(|o| o.filled));

    assert_eq!(page.value_of(r#"input[name="name"]"#).as_deref(), Some("张三"));
    assert_eq!(page.value_of(r#"input[placeholder="身份证号"]"#).as_deref(), Some("110101199001011234"));
    assert_eq!(page.value_of(r#"input[type="tel"]"#).as_deref(), Some("13800138000"));

    let events = drain(&mut rx);
    let logs: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            StatusEvent::Log { message } => Some(message.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(logs.len(), 3);
    assert!(logs[0].starts_with("✓ 姓名: 张三 ("));
    assert!(logs[1].starts_with("✓ 身份证: 1101... ("));
    assert!(logs[2].starts_with("✓ 手机: 138... ("));
    assert!(!logs.iter().any(|line| line.contains("110101199001011234")));
    assert!(events.contains(&StatusEvent::status("✓ 姓名: 张三  ✓ 身份证: 1101...  ✓ 手机: 138...")));
}

#[tokio::test]
async fn test_booking_session_relays_autofill_messages() {
    let html = r#"<input placeholder="乘机人姓名"><input placeholder="证件号码"><input placeholder="联系手机">"#;
    let params = BookingParams {
        url: "https://m.flight.qunar.com/ncs/page/order".to_string(),
        platform: Platform::Qunar,
        flight_no: "CA4175".to_string(),
        preference: SearchPreference::Cheapest,
        target_price: Some(680),
    };
    let stored = StoredProfile {
        passenger: zhang_san(),
        preference: SearchPreference::Cheapest,
    };
    let mut booking = BookingSession::new(params.clone(), stored);
    assert!(booking.on_load_end(&params.url));

    let engine = booking.engine(&Settings::default()).unwrap().unwrap();
    let mut page = SyntheticPage::new(params.url.clone(), html).unwrap();
    let (sink, mut rx) = events::channel();
    engine.run(&mut page, &RecordingClock::default(), &sink).await;

    for event in drain(&mut rx) {
        booking.handle_raw(&event.to_json());
    }
    assert_eq!(booking.status(), "已完成自动填表，共填写 3 个字段 ✓");
    let log: Vec<_> = booking.log().map(|line| line.message.clone()).collect();
    assert_eq!(log.len(), 3);
    assert!(log[2].starts_with("✓ 手机: 138..."));
}

#[test]
fn test_one_input_never_takes_two_values() {
    let html = r#"
        <input placeholder="姓名/手机">
        <input placeholder="身份证">
    "#;
    let mut page = SyntheticPage::new("https://m.example.com/order", html).unwrap();
    let engine = AutofillEngine::new(zhang_san(), SearchPreference::Cheapest, AutofillSettings::default()).unwrap();

    let outcomes = engine.fill_fields(&mut page, &events::EventSink::disconnected());
    let filled: Vec<_> = outcomes.iter().filter(|o| o.filled).collect();
    assert_eq!(filled.len(), 2);
    assert!(!outcomes[2].filled);

    let inputs: Vec<_> = outcomes.iter().filter_map(|o| o.input).collect();
    let unique: HashSet<_> = inputs.iter().collect();
    assert_eq!(inputs.len(), unique.len());

    let values: Vec<String> = page
        .query_inputs("input")
        .into_iter()
        .map(|input| page.read_value(input))
        .collect();
    assert_eq!(values, vec!["张三".to_string(), "110101199001011234".to_string()]);
}

#[test]
fn test_extraction_is_idempotent_and_sorted() {
    let parser = ExtractionParser::new(Platform::Qunar, ExtractionSettings::default()).unwrap();
    let first = parser.parse_page(RESULTS_PAGE);
    let second = parser.parse_page(RESULTS_PAGE);

    assert_eq!(first, second);
    let prices: Vec<u32> = first.iter().map(|f| f.price).collect();
    assert_eq!(prices, vec![680, 920, 1280]);
    assert_eq!(first[1].stop_count, 1);
    assert_eq!(first[2].duration.as_deref(), Some("3h15m"));

    let keys: HashSet<_> = first.iter().map(|f| f.dedup_key()).collect();
    assert_eq!(keys.len(), first.len());
}

#[tokio::test]
async fn test_extraction_stops_at_budget() {
    let settings = ExtractionSettings {
        max_attempts: 10,
        ..ExtractionSettings::default()
    };
    let engine = ExtractionEngine::new(Platform::Qunar, settings.clone()).unwrap();
    let mut source = SnapshotSequence::new(vec!["<html><body><div>航班加载中，请稍候</div></body></html>".to_string()]);
    let clock = RecordingClock::default();
    let (sink, mut rx) = events::channel();

    let outcome = engine.run(&mut source, &clock, &sink).await;
    assert_eq!(outcome.attempts(), 10);
    assert!(outcome.flights().is_empty());
    assert_eq!(clock.count(), 10);
    assert_eq!(clock.total(), settings.interval() * 10);

    let events = drain(&mut rx);
    let progress = events.iter().filter(|e| matches!(e, StatusEvent::Progress { .. })).count();
    assert_eq!(progress, 10);
    assert_eq!(events.last(), Some(&StatusEvent::NotFound { platform: Platform::Qunar }));
}

#[test]
fn test_autofill_stops_at_budget() {
    let settings = AutofillSettings {
        max_attempts: 3,
        ..AutofillSettings::default()
    };
    let mut page = SyntheticPage::new("https://m.example.com/order", "<p>请先登录</p>").unwrap();
    let engine = AutofillEngine::new(zhang_san(), SearchPreference::Cheapest, settings).unwrap();
    let clock = RecordingClock::default();

    let report = tokio_test::block_on(engine.run(&mut page, &clock, &events::EventSink::disconnected()));
    assert_eq!(report.attempts, 3);
    assert!(!report.succeeded());
    assert_eq!(clock.count(), 3);
}

#[tokio::test]
async fn test_search_to_results_fails_over_to_source_site() {
    let dir = tempfile::tempdir().unwrap();
    let store = ProfileStore::new(dir.path().join("profile.json"));
    let today = NaiveDate::from_ymd_opt(2026, 10, 15).unwrap();
    let mut form = SearchForm::new(today);
    form.passenger = zhang_san();

    let params = form.submit(&store).unwrap();
    assert_eq!(params.date, "2026-10-16");
    assert_eq!(store.load().unwrap().passenger, zhang_san());

    let mut session = ResultsSession::new(params, ResultsSettings::default()).unwrap();
    let urls: Vec<(Platform, String)> = session.request_urls().map(|(p, u)| (p, u.to_string())).collect();
    assert_eq!(urls.len(), 1);
    assert_eq!(
        urls[0].1,
        "https://m.flight.qunar.com/ncs/page/flightlist?depCity=%E6%98%86%E6%98%8E&arrCity=%E5%8C%97%E4%BA%AC&goDate=2026-10-16"
    );

    let settings = ExtractionSettings {
        max_attempts: 3,
        ..ExtractionSettings::default()
    };
    let engine = ExtractionEngine::new(Platform::Qunar, settings).unwrap();
    let clock = RecordingClock::default();
    let mut reloads = 0;

    loop {
        let mut source = SnapshotSequence::new(vec!["<html><body>没有找到符合条件的航班</body></html>".to_string()]);
        let (sink, mut rx) = events::channel();
        engine.run(&mut source, &clock, &sink).await;

        let mut action = ResultsAction::None;
        for event in drain(&mut rx) {
            if let ResultsAction::Reload { after } = session.handle_raw(&event.to_json()) {
                action = ResultsAction::Reload { after };
            }
        }
        match action {
            ResultsAction::Reload { after } => {
                assert_eq!(after, Duration::from_millis(2000));
                reloads += 1;
            }
            ResultsAction::None => break,
        }
    }

    assert_eq!(reloads, 2);
    match session.state() {
        ResultsState::Failed { message, fallback_url } => {
            assert_eq!(message, "未找到航班数据");
            assert_eq!(fallback_url, &urls[0].1);
        }
        other => panic!("expected Failed, got {:?}", other),
    }
    assert!(session.flights().is_empty());
}

#[tokio::test]
async fn test_results_to_booking_parameters() {
    let today = NaiveDate::from_ymd_opt(2026, 10, 15).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let store = ProfileStore::new(dir.path().join("profile.json"));
    let mut form = SearchForm::new(today);
    form.preference = SearchPreference::Direct;
    let params = form.submit(&store).unwrap();

    let mut session = ResultsSession::new(params, ResultsSettings::default()).unwrap();
    let engine = ExtractionEngine::new(Platform::Qunar, ExtractionSettings::default()).unwrap();
    let mut source = SnapshotSequence::new(vec![RESULTS_PAGE.to_string()]);
    let (sink, mut rx) = events::channel();
    engine.run(&mut source, &RecordingClock::default(), &sink).await;
    for event in drain(&mut rx) {
        assert_eq!(session.handle_event(event), ResultsAction::None);
    }

    assert_eq!(session.state(), &ResultsState::Loaded);
    let cheapest = session.flights()[0].clone();
    assert!(session.is_cheapest(&cheapest));
    assert_eq!(cheapest.flight_number.as_deref(), Some("CA4175"));

    let booking = session.book(&cheapest);
    assert_eq!(booking.flight_no, "CA4175");
    assert_eq!(booking.target_price, Some(680));
    assert_eq!(booking.preference, SearchPreference::Direct);
}
