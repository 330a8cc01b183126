//! Latchguard - Door lock controller CLI
//!
//! `run` drives the controller against simulated peripherals from the
//! terminal. The other commands administer the stored credential and the
//! simulated sensor's templates directly, each gated by the current PIN.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use latchguard_controller::{
    load_or_initialize,
    sim::{
        ChannelKeypad, KeypadHandle, RecordingActuator, RecordingDisplay, RecordingFeedback,
        RecordingPower, SimulatedSensor,
    },
    Controller, ControllerConfig, EnrollStage, EnrollStep, EnrollTimings, EnrollmentSession,
    FileCredentialStore, Peripherals,
};
use latchguard_core::{AdminFlow, AuthContext, CredentialRecord};

/// Latchguard - PIN and fingerprint door lock
#[derive(Parser)]
#[command(name = "latchguard")]
#[command(about = "PIN and fingerprint door lock controller")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory holding the credential record and sensor templates
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Configuration file (defaults to <data-dir>/config.json)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the lock against simulated peripherals
    Run,

    /// Show the stored auth mode and enrolled fingerprints
    Status,

    /// Replace the PIN
    ChangePin {
        /// Current PIN
        #[arg(long)]
        current: String,

        /// New PIN (1-6 digits)
        #[arg(long)]
        new: String,
    },

    /// Switch between single- and two-factor mode
    ToggleMode {
        /// Current PIN
        #[arg(long)]
        pin: String,
    },

    /// Enroll a simulated finger into a template slot
    Enroll {
        /// Current PIN
        #[arg(long)]
        pin: String,

        /// Template slot (1-127)
        #[arg(long)]
        id: String,

        /// Which simulated finger to enroll
        #[arg(long, default_value_t = 1)]
        finger: u32,
    },

    /// Delete a template slot
    Delete {
        /// Current PIN
        #[arg(long)]
        pin: String,

        /// Template slot (1-127)
        #[arg(long)]
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "latchguard=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let data_dir = cli
        .data_dir
        .unwrap_or_else(ControllerConfig::default_data_dir);
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating data directory {:?}", data_dir))?;

    let config_path = cli.config.unwrap_or_else(|| data_dir.join("config.json"));
    let config = ControllerConfig::load_or_create(&config_path)?;

    match cli.command {
        Commands::Run => run(&data_dir, config).await,
        Commands::Status => status(&data_dir),
        Commands::ChangePin { current, new } => change_pin(&data_dir, &current, &new),
        Commands::ToggleMode { pin } => toggle_mode(&data_dir, &config, &pin),
        Commands::Enroll { pin, id, finger } => enroll(&data_dir, &config, &pin, &id, finger),
        Commands::Delete { pin, id } => delete(&data_dir, &pin, &id),
    }
}

// ============================================
// Simulator
// ============================================

/// One line typed at the simulator prompt
#[derive(Debug, PartialEq, Eq)]
enum Input {
    /// Keypad legends
    Keys(String),
    /// A finger on the sensor
    Finger(u32),
    /// Something the sensor cannot read
    Smudge,
}

/// Finger number used for `f?`, never enrolled by the CLI
const UNKNOWN_FINGER: u32 = u32::MAX;

fn parse_input(line: &str) -> Option<Input> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match line.strip_prefix('f') {
        Some("?") => Some(Input::Finger(UNKNOWN_FINGER)),
        Some("x") => Some(Input::Smudge),
        Some(n) => n.parse().ok().map(Input::Finger),
        None => Some(Input::Keys(line.to_string())),
    }
}

async fn read_input(keys: KeypadHandle, sensor: SimulatedSensor) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match parse_input(&line) {
            Some(Input::Keys(k)) => keys.type_keys(&k),
            Some(Input::Finger(n)) => sensor.place_finger(n),
            Some(Input::Smudge) => sensor.place_smudge(),
            None => debug!("Ignoring input {:?}", line),
        }
    }
    info!("Input closed");
    Ok(())
}

async fn run(data_dir: &Path, config: ControllerConfig) -> Result<()> {
    info!("Starting Latchguard v{}", env!("CARGO_PKG_VERSION"));

    let (keypad, keys) = ChannelKeypad::new();
    let sensor = SimulatedSensor::load(data_dir)?;
    let store = FileCredentialStore::new(data_dir)?;

    let mut controller = Controller::boot(
        Peripherals {
            keypad: Box::new(keypad),
            sensor: Box::new(sensor.clone()),
            store: Box::new(store),
            display: Box::new(RecordingDisplay::new()),
            feedback: Box::new(RecordingFeedback::new()),
            actuator: Box::new(RecordingActuator::new()),
            power: Box::new(RecordingPower::new()),
        },
        config.clone(),
        Instant::now(),
    )?;

    println!("Type keys (0-9, *, #) and press enter.");
    println!("  f<N>  place finger N    f?  unknown finger    fx  unreadable image");

    let input = tokio::spawn(read_input(keys, sensor));

    let mut interval = tokio::time::interval(config.loop_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = interval.tick() => controller.tick(Instant::now()),
            _ = &mut shutdown => {
                info!("Received shutdown signal");
                break;
            }
        }
    }

    input.abort();
    Ok(())
}

// ============================================
// Administration
// ============================================

fn open_store(data_dir: &Path) -> Result<(FileCredentialStore, CredentialRecord)> {
    let mut store = FileCredentialStore::new(data_dir)?;
    let record = load_or_initialize(&mut store, &CredentialRecord::factory_default())
        .context("reading credential record")?;
    Ok((store, record))
}

fn status(data_dir: &Path) -> Result<()> {
    let (store, record) = open_store(data_dir)?;
    let sensor = SimulatedSensor::load(data_dir)?;
    let slots = sensor.enrolled_slots();

    println!("Latchguard Status:");
    println!("  Record: {}", store.path().display());
    println!("  Auth mode: {}", record.mode);
    println!("  PIN length: {}", record.credential.len());
    if slots.is_empty() {
        println!("  Enrolled fingerprints: none");
    } else {
        let list: Vec<String> = slots.iter().map(u16::to_string).collect();
        println!("  Enrolled fingerprints: {}", list.join(", "));
    }
    Ok(())
}

fn change_pin(data_dir: &Path, current: &str, new: &str) -> Result<()> {
    let (mut store, _) = open_store(data_dir)?;
    AdminFlow::change_credential(&mut store, current.as_bytes(), new.as_bytes())?;
    println!("✓ PIN updated");
    Ok(())
}

fn toggle_mode(data_dir: &Path, config: &ControllerConfig, pin: &str) -> Result<()> {
    let (mut store, record) = open_store(data_dir)?;
    AdminFlow::verify_admin(&record.credential, pin.as_bytes())?;

    let mut ctx = AuthContext::new(record.mode, config.lockout_policy());
    let mode = AdminFlow::toggle_auth_mode(&mut ctx, &mut store)?;
    println!("✓ Auth mode is now {}", mode);
    Ok(())
}

fn enroll(data_dir: &Path, config: &ControllerConfig, pin: &str, id: &str, finger: u32) -> Result<()> {
    let (_, record) = open_store(data_dir)?;
    AdminFlow::verify_admin(&record.credential, pin.as_bytes())?;
    let id = AdminFlow::parse_biometric_id(id.as_bytes())?;

    let mut sensor = SimulatedSensor::load(data_dir)?;
    let timings = EnrollTimings {
        capture_timeout: config.capture_timeout(),
        removal_timeout: config.removal_timeout(),
        removal_settle: config.removal_settle(),
    };

    // Simulated time: each step jumps a full settle period ahead
    let mut now = Instant::now();
    let mut session = EnrollmentSession::new(id, timings, now);
    loop {
        if matches!(
            session.stage(),
            EnrollStage::AwaitFirst { .. } | EnrollStage::AwaitSecond { .. }
        ) {
            sensor.place_finger(finger);
        }

        match session.step(&mut sensor, now) {
            EnrollStep::Enrolled(id) => {
                println!("✓ Finger {} enrolled as ID #{}", finger, id);
                return Ok(());
            }
            EnrollStep::Failed(e) => bail!("Enrollment failed: {:?}", e),
            EnrollStep::Pending(Some(message)) => println!("  {}", message),
            EnrollStep::Pending(None) => {}
        }
        now += timings.removal_settle;
    }
}

fn delete(data_dir: &Path, pin: &str, id: &str) -> Result<()> {
    let (_, record) = open_store(data_dir)?;
    AdminFlow::verify_admin(&record.credential, pin.as_bytes())?;
    let id = AdminFlow::parse_biometric_id(id.as_bytes())?;

    let mut sensor = SimulatedSensor::load(data_dir)?;
    let (deleted, message) = latchguard_controller::delete_template(&mut sensor, id);
    if !deleted {
        bail!("{} {}", message.line1, message.line2);
    }
    println!("✓ Deleted ID #{}", id);
    Ok(())
}
