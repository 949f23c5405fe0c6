//! Ticker Example
//!
//! Drives a small program with timer subscriptions and simulated network
//! fetches, writes a compressed debug log, then replays it.
//!
//! Usage: `ticker [config.ron]`, where the config is a `LogConfig`, e.g.
//! `(path: Some("ticker.jsonl"), compression: true)`.
//! Set `RUST_LOG=debug` to see runner diagnostics.

use reel_journal::{LogConfig, Replayer};
use reel_runtime::{continuation, EffectOutcome, Platform, Program, Runner};
use serde::Serialize;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

const STEPS: usize = 60;
const STEP_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Serialize)]
struct Model {
    heartbeats: u32,
    reports: u32,
    fast: bool,
    fetched: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "_type")]
enum Msg {
    Heartbeat,
    Report,
    SpeedUp,
    Fetched { url: String, completed: u32 },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "_type")]
enum Fx {
    Print { line: String },
    Fetch { url: String, latency_ms: u64 },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "_type")]
enum Sub {
    Every { name: String, interval_ms: u64 },
}

struct Ticker;

impl Program for Ticker {
    type Model = Model;
    type Message = Msg;
    type Effect = Fx;
    type Subscription = Sub;

    fn init(&self, args: &[String]) -> (Model, Vec<Fx>) {
        let model = Model {
            heartbeats: 0,
            reports: 0,
            fast: false,
            fetched: Vec::new(),
        };
        let effects = args
            .iter()
            .map(|url| Fx::Fetch {
                url: url.clone(),
                latency_ms: 80,
            })
            .collect();
        (model, effects)
    }

    fn update(&self, message: Msg, mut model: Model) -> (Model, Vec<Fx>) {
        match message {
            Msg::Heartbeat => {
                model.heartbeats += 1;
                let mut effects = Vec::new();
                if model.heartbeats % 5 == 0 {
                    effects.push(Fx::Fetch {
                        url: format!("https://example.invalid/beat/{}", model.heartbeats),
                        latency_ms: 30,
                    });
                }
                (model, effects)
            }
            Msg::Report => {
                model.reports += 1;
                let line = format!(
                    "report #{}: {} heartbeats, {} fetched",
                    model.reports,
                    model.heartbeats,
                    model.fetched.len()
                );
                (model, vec![Fx::Print { line }])
            }
            Msg::SpeedUp => {
                model.fast = true;
                (model, vec![])
            }
            Msg::Fetched { url, completed } => {
                model.fetched.push(url);
                let effects = if completed == 2 {
                    vec![Fx::Print {
                        line: "two fetches done, speeding up".into(),
                    }]
                } else {
                    vec![]
                };
                (model, effects)
            }
        }
    }

    fn subscriptions(&self, model: &Model) -> Vec<Sub> {
        // Same id after speeding up: the running handler keeps its original interval
        let mut subs = vec![Sub::Every {
            name: "heartbeat".into(),
            interval_ms: if model.fast { 20 } else { 40 },
        }];
        if model.reports < 3 {
            subs.push(Sub::Every {
                name: "reporter".into(),
                interval_ms: 150,
            });
        }
        subs
    }
}

#[derive(Debug, Default)]
struct HostState {
    printed: Vec<String>,
    fetches_completed: u32,
}

#[derive(Debug)]
struct EveryHandler {
    name: String,
    interval: Duration,
    last_fired: Instant,
    fired: u32,
}

struct Host;

impl Platform<Msg> for Host {
    type State = HostState;
    type Effect = Fx;
    type Subscription = Sub;
    type SubscriptionId = String;
    type Handler = EveryHandler;

    fn init_state(&self, _args: &[String]) -> HostState {
        HostState::default()
    }

    fn dispatch(&self, mut state: HostState, effect: Fx) -> EffectOutcome<HostState, Msg> {
        match effect {
            Fx::Print { line } => {
                println!("  {}", line);
                let speed_up = line.contains("speeding up");
                state.printed.push(line);
                if speed_up {
                    EffectOutcome::reply(state, Msg::SpeedUp)
                } else {
                    EffectOutcome::done(state)
                }
            }
            Fx::Fetch { url, latency_ms } => EffectOutcome::spawn(state, move || {
                thread::sleep(Duration::from_millis(latency_ms));
                continuation(move |mut state: HostState| {
                    state.fetches_completed += 1;
                    let completed = state.fetches_completed;
                    (state, Some(Msg::Fetched { url, completed }))
                })
            }),
        }
    }

    fn effect_name(&self, effect: &Fx) -> std::borrow::Cow<'static, str> {
        match effect {
            Fx::Print { .. } => "print".into(),
            Fx::Fetch { url, .. } => format!("fetch {}", url).into(),
        }
    }

    fn subscription_id(&self, sub: &Sub) -> String {
        match sub {
            Sub::Every { name, .. } => name.clone(),
        }
    }

    fn start_subscription(&self, sub: &Sub) -> EveryHandler {
        let Sub::Every { name, interval_ms } = sub;
        println!("  [start {} every {}ms]", name, interval_ms);
        EveryHandler {
            name: name.clone(),
            interval: Duration::from_millis(*interval_ms),
            last_fired: Instant::now(),
            fired: 0,
        }
    }

    fn stop_subscription(&self, handler: EveryHandler) {
        println!("  [stop {} after {} firings]", handler.name, handler.fired);
    }

    fn poll_subscription(&self, mut handler: EveryHandler) -> (EveryHandler, Option<Msg>) {
        if handler.last_fired.elapsed() < handler.interval {
            return (handler, None);
        }
        handler.last_fired = Instant::now();
        handler.fired += 1;
        let message = match handler.name.as_str() {
            "reporter" => Msg::Report,
            _ => Msg::Heartbeat,
        };
        (handler, Some(message))
    }
}

fn load_config() -> Result<LogConfig, reel_journal::Error> {
    match std::env::args().nth(1) {
        Some(path) => LogConfig::load(path),
        None => Ok(LogConfig::to_file(std::env::temp_dir().join("ticker.jsonl")).with_compression(true)),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    println!("=== Reel Ticker Example ===\n");

    let config = load_config()?;
    let log_path: Option<PathBuf> = config.path.clone();

    let mut runner = Runner::builder(Host, Ticker)
        .program_args(["https://example.invalid/boot"])
        .with_log_config(config)
        .build()?;

    println!("Running {} steps...\n", STEPS);
    for _ in 0..STEPS {
        runner.step()?;
        thread::sleep(STEP_INTERVAL);
    }

    tracing::info!(steps = runner.steps(), in_flight = runner.in_flight(), "Shutting down");
    let (state, model) = runner.shutdown()?;
    println!("Heartbeats: {}", model.heartbeats);
    println!("Reports:    {}", model.reports);
    println!("Fetched:    {:?}", model.fetched);
    println!("Fetches completed by platform: {}", state.fetches_completed);
    println!("Lines printed by platform: {}", state.printed.len());

    let Some(path) = log_path else {
        return Ok(());
    };
    let replayer = Replayer::from_reader(BufReader::new(File::open(&path)?))?;
    println!("\nReplayed {} frames from {}", replayer.len(), path.display());
    if let Some(frame) = replayer.frames().last() {
        println!("Final logged model: {}", frame.model);
    }
    println!(
        "Subscription changes: {}",
        replayer.subscription_events().len()
    );

    println!("\n=== Example Complete ===");
    Ok(())
}
