//! CLI interface for flight-assist

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use flight_assist::booking::BookingSession;
use flight_assist::events::{self, StatusEvent};
use flight_assist::results::ResultsAction;
use flight_assist::{
    AutofillEngine, BookingParams, Clock, ExtractionEngine, ExtractionParser, HttpPageSource, PassengerProfile, Platform,
    ProfileStore, ResultsSession, ResultsState, SearchForm, SearchPreference, Settings, SyntheticPage, TokioClock,
};
use std::fs;
use std::path::PathBuf;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "flight-assist")]
#[command(about = "Scrape flight offers and autofill booking forms")]
#[command(version)]
pub struct Cli {
    /// Settings file (JSON); falls back to $FLIGHT_ASSIST_CONFIG
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// Write JSON logs to daily rolling files in this directory
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,
    /// Passenger profile file
    #[arg(long, global = true)]
    pub profile_path: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate a search, save the profile and print the results URL
    Search {
        /// Departure city
        #[arg(short, long, default_value = "昆明")]
        from: String,
        /// Arrival city
        #[arg(short, long, default_value = "北京")]
        to: String,
        /// Departure date (YYYY-MM-DD), tomorrow when omitted
        #[arg(short, long)]
        date: Option<String>,
        /// Package preference (cheapest, fastest, direct)
        #[arg(short, long)]
        preference: Option<SearchPreference>,
    },
    /// Extract flights from a saved results page
    Extract {
        #[arg(long)]
        html: PathBuf,
        #[arg(long, default_value = "qunar")]
        platform: Platform,
        /// Output file for JSON results
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Fetch a live results page and extract flights
    Fetch {
        #[arg(short, long)]
        from: String,
        #[arg(short, long)]
        to: String,
        #[arg(short, long)]
        date: String,
    },
    /// Run autofill against a saved booking page
    Fill {
        #[arg(long)]
        html: PathBuf,
        #[arg(long, default_value = "https://m.flight.qunar.com/ncs/page/order")]
        url: String,
    },
    /// Show or update the stored passenger profile
    Profile {
        #[command(subcommand)]
        action: ProfileAction,
    },
}

#[derive(Subcommand)]
pub enum ProfileAction {
    Show,
    Set {
        #[arg(long)]
        name: String,
        #[arg(long)]
        id_number: String,
        #[arg(long)]
        phone: String,
        #[arg(long, default_value = "cheapest")]
        preference: SearchPreference,
    },
}

fn init_logging(log_dir: Option<&PathBuf>) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("flight_assist=info"))?;

    let file_layer = match log_dir {
        Some(dir) => {
            fs::create_dir_all(dir)?;
            let file_appender = tracing_appender::rolling::daily(dir, "flight-assist.log");
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(file_appender)
                    .with_ansi(false)
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true)
                    .json(),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
    Ok(())
}

fn drain(rx: &mut UnboundedReceiver<StatusEvent>) -> Vec<StatusEvent> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        out.push(event);
    }
    out
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_dir.as_ref())?;

    let settings = Settings::resolve(cli.config.clone()).context("loading settings")?;
    let store = match &cli.profile_path {
        Some(path) => ProfileStore::new(path),
        None => ProfileStore::open_default(),
    };
    debug!(profile = %store.path().display(), "Using profile store");

    match cli.command {
        Commands::Search { from, to, date, preference } => {
            let today = chrono::Local::now().date_naive();
            let mut form = SearchForm::new(today).with_stored(store.load()?);
            form.origin = from;
            form.destination = to;
            if let Some(date) = date {
                form.date = chrono::NaiveDate::parse_from_str(&date, "%Y-%m-%d")
                    .with_context(|| format!("invalid date: {}", date))?;
            }
            if let Some(preference) = preference {
                form.preference = preference;
            }

            let params = form.submit(&store)?;
            if !form.passenger.is_complete() {
                println!("⚠️ 乘客信息不完整，自动填表将被跳过");
            }
            let session = ResultsSession::new(params, settings.results)?;
            for (platform, url) in session.request_urls() {
                println!("{}: {}", platform.display_name(), url);
            }
        }
        Commands::Extract { html, platform, output } => {
            let markup = fs::read_to_string(&html).with_context(|| format!("reading {}", html.display()))?;
            let parser = ExtractionParser::new(platform, settings.extraction)?;
            let flights = parser.parse_page(&markup);
            let json = serde_json::to_string_pretty(&flights)?;

            if let Some(output_file) = output {
                fs::write(&output_file, &json)?;
                println!("Results saved to {}", output_file.display());
            } else {
                println!("{}", json);
            }
            println!("\nFound {} flights", flights.len());
        }
        Commands::Fetch { from, to, date } => {
            let query = flight_assist::SearchQuery::new(&from, &to, &date)?;
            let params = flight_assist::ResultsParams::new(&query, SearchPreference::default());
            let mut session = ResultsSession::new(params, settings.results.clone())?;
            let (sink, mut rx) = events::channel();
            let clock = TokioClock;

            loop {
                let targets: Vec<(Platform, String)> =
                    session.request_urls().map(|(p, url)| (p, url.to_string())).collect();
                for (platform, url) in targets {
                    info!(platform = %platform, url = %url, "Fetching results page");
                    let engine = ExtractionEngine::new(platform, settings.extraction.clone())?;
                    let mut source = HttpPageSource::new(url, &settings.user_agent)?;
                    engine.run(&mut source, &clock, &sink).await;
                }

                let mut action = ResultsAction::None;
                for event in drain(&mut rx) {
                    if let ResultsAction::Reload { after } = session.handle_event(event) {
                        action = ResultsAction::Reload { after };
                    }
                }
                eprintln!("{}", session.status_line());
                match action {
                    ResultsAction::Reload { after } => clock.sleep(after).await,
                    ResultsAction::None => break,
                }
            }

            match session.state() {
                ResultsState::Failed { message, fallback_url } => {
                    bail!("{}，可直接打开: {}", message, fallback_url);
                }
                _ => {
                    for flight in session.flights() {
                        let marker = if session.is_cheapest(flight) { " 最低价" } else { "" };
                        println!(
                            "¥{} {} {}-{} {}{}",
                            flight.price,
                            flight.flight_number.as_deref().unwrap_or("-"),
                            flight.departure_time,
                            flight.arrival_time,
                            if flight.is_direct() { "直飞" } else { "中转" },
                            marker
                        );
                    }
                }
            }
        }
        Commands::Fill { html, url } => {
            let markup = fs::read_to_string(&html).with_context(|| format!("reading {}", html.display()))?;
            let stored = store.load()?;
            let params = BookingParams {
                url: url.clone(),
                platform: Platform::Qunar,
                flight_no: String::new(),
                preference: stored.preference,
                target_price: None,
            };
            let mut booking = BookingSession::new(params, stored);
            if !booking.manual_fill() {
                bail!("{}", booking.status());
            }

            let engine: AutofillEngine = match booking.engine(&settings)? {
                Some(engine) => engine,
                None => bail!("{}", booking.status()),
            };
            let mut page = SyntheticPage::new(url, &markup)?;
            let (sink, mut rx) = events::channel();
            let report = engine.run(&mut page, &TokioClock, &sink).await;

            for event in drain(&mut rx) {
                booking.handle_event(event);
            }
            for line in booking.log() {
                println!("[{}] {}", line.time, line.message);
            }
            println!("{}", booking.status());
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Profile { action } => match action {
            ProfileAction::Show => {
                let stored = store.load()?;
                let passenger = &stored.passenger;
                println!("Profile: {}", store.path().display());
                for field in flight_assist::FieldKind::FILL_ORDER {
                    println!("  {}: {}", field.label(), passenger.masked(field));
                }
                println!("  偏好: {}", stored.preference);
                if !passenger.is_complete() {
                    println!("⚠️ 乘客信息不完整");
                }
            }
            ProfileAction::Set { name, id_number, phone, preference } => {
                let profile = PassengerProfile::new(name, id_number, phone);
                store.save(&profile, preference)?;
                println!("Saved to {}", store.path().display());
            }
        },
    }

    Ok(())
}
