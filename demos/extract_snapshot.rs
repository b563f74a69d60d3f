//! Extract flights from a saved results page
//!
//! cargo run --example extract_snapshot -- page.html

use flight_assist::config::ExtractionSettings;
use flight_assist::events::{self, StatusEvent};
use flight_assist::{ExtractionEngine, Platform, SnapshotSequence, TokioClock};

const SAMPLE: &str = r#"
<html><body>
  <div class="card">东方航空 MU5712 <b>08:30</b> - <b>11:45</b> 3h15m ¥1,280</div>
  <div class="card">国航 CA4175 <b>07:05</b> - <b>10:10</b> 直飞 ¥680</div>
</body></html>
"#;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let html = match std::env::args().nth(1) {
        Some(path) => std::fs::read_to_string(path)?,
        None => SAMPLE.to_string(),
    };

    let settings = ExtractionSettings {
        interval_ms: 100,
        max_attempts: 3,
        ..ExtractionSettings::default()
    };
    let engine = ExtractionEngine::new(Platform::Qunar, settings)?;

    // One-shot parse, no polling
    let flights = engine.parser().parse_page(&html);
    println!("Parsed {} flights directly", flights.len());

    // Polling run, as the results screen drives it
    let mut source = SnapshotSequence::new(vec![html]);
    let (sink, mut rx) = events::channel();
    let started = std::time::Instant::now();
    let outcome = engine.run(&mut source, &TokioClock, &sink).await;
    println!(
        "Run finished after {} attempt(s) in {:?}",
        outcome.attempts(),
        started.elapsed()
    );

    while let Ok(event) = rx.try_recv() {
        match event {
            StatusEvent::Progress { attempt, max, .. } => println!("progress {}/{}", attempt, max),
            StatusEvent::Flights { data, .. } => {
                for flight in data {
                    println!(
                        "¥{} {} {}-{} {}",
                        flight.price,
                        flight.flight_number.as_deref().unwrap_or("-"),
                        flight.departure_time,
                        flight.arrival_time,
                        flight.duration.as_deref().unwrap_or("")
                    );
                }
            }
            StatusEvent::NotFound { .. } => println!("❌ No flights found"),
            other => println!("{}", other.to_json()),
        }
    }
    Ok(())
}
