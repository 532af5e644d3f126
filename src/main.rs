//! rollplay - plays a session of note rolls on a MIDI output.
//!
//! Usage: rollplay <session.yaml> [--roll ID] [--duration SECS]
//!
//! Without `--roll` the session's queue is played. Falls back to logging
//! triggers when no MIDI output port is available. `RUST_LOG` controls
//! verbosity.

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use log::{info, warn};

use rollplay::config::SessionConfig;
use rollplay::coordinator::Coordinator;
use rollplay::instrument::{InstrumentFactory, LogInstrumentFactory};
use rollplay::midi::{MidiInstrumentFactory, MidiOut, SharedSink};
use rollplay::transport::SystemTransport;

struct Args {
    session: PathBuf,
    roll: Option<String>,
    duration: Option<f64>,
}

fn parse_args() -> Result<Args> {
    let mut args = std::env::args().skip(1);
    let mut session = None;
    let mut roll = None;
    let mut duration = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--roll" => roll = Some(args.next().context("--roll needs a roll id")?),
            "--duration" => {
                let value = args.next().context("--duration needs seconds")?;
                duration = Some(
                    value
                        .parse::<f64>()
                        .with_context(|| format!("Invalid duration: {}", value))?,
                );
            }
            other if other.starts_with("--") => bail!("Unknown option: {}", other),
            other => session = Some(PathBuf::from(other)),
        }
    }

    let session = session.context("Usage: rollplay <session.yaml> [--roll ID] [--duration SECS]")?;
    Ok(Args {
        session,
        roll,
        duration,
    })
}

fn instrument_factory(config: &SessionConfig) -> Box<dyn InstrumentFactory> {
    match MidiOut::new(config.output_device.as_deref()) {
        Ok(out) => {
            info!("MIDI output: {}", out.port_name);
            let sink: SharedSink = Rc::new(RefCell::new(out));
            Box::new(MidiInstrumentFactory::new(sink, config.midi_channel()))
        }
        Err(e) => {
            warn!("{}; logging triggers instead", e);
            Box::new(LogInstrumentFactory::default())
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    env_logger::init();

    let args = parse_args()?;
    if !args.session.exists() {
        bail!("Session file not found: {}", args.session.display());
    }
    let config = SessionConfig::load(&args.session)?;
    let base_dir = args.session.parent().unwrap_or(Path::new("."));

    let transport = SystemTransport::new(config.tempo_bpm);
    let mut coordinator = Coordinator::new(transport, instrument_factory(&config), config.settings());

    for (id, roll_config) in &config.rolls {
        let roll = roll_config
            .build_roll(base_dir)
            .with_context(|| format!("Failed to build roll '{}'", id))?;
        let _ = coordinator.register_roll(id, Box::new(roll))?;
        coordinator.set_loop(id, roll_config.loop_config);
        if let Some(kind) = roll_config.instrument {
            coordinator.set_instrument(id, kind);
        }
    }
    info!("Loaded {} rolls at {} BPM", config.rolls.len(), config.tempo_bpm);

    match &args.roll {
        Some(id) => {
            if !config.rolls.contains_key(id) {
                bail!("Unknown roll: {}", id);
            }
            coordinator.play_roll(id).await?;
        }
        None => coordinator.play_queue(&config.queue).await?,
    }

    if !coordinator.is_playing() {
        warn!("Nothing to play");
        coordinator.dispose();
        return Ok(());
    }

    let started = Instant::now();
    let mut frames = tokio::time::interval(config.frame_interval());
    while coordinator.is_playing() {
        frames.tick().await;
        coordinator.tick();

        if args
            .duration
            .is_some_and(|limit| started.elapsed().as_secs_f64() >= limit)
        {
            info!("Duration reached, stopping");
            coordinator.stop();
        }
    }

    // Let pending note-offs reach the output before disposing
    for _ in 0..10 {
        frames.tick().await;
        coordinator.tick();
    }
    coordinator.dispose();
    Ok(())
}
