use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use mideaxye::config::{PollConfig, Port};
use mideaxye::poller::{Change, Poller};
use mideaxye::protocol::encoder::SetpointRange;
use mideaxye::protocol::layout::ProtocolVariant;
use mideaxye::protocol::response::Telemetry;
use mideaxye::protocol::unit::{DesiredState, FanSpeed, Mode, ModeFlags};
use mideaxye::sync::{self, DeviceSync, SyncSettings, TickOutcome, DEFAULT_MAX_ATTEMPTS};
use mideaxye::transport::BlockingTransport;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;


/// Controller for Midea XYE air handlers
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// URL of the port to connect to
    ///
    /// either serial:///device/path or tcp+raw://host:port URLs supported
    port: Url,

    /// Command frame layout used by the unit (A or B)
    #[arg(long, default_value = "A")]
    variant: ProtocolVariant,

    /// Lowest setpoint that will be sent to the unit
    #[arg(long, default_value_t = 60)]
    min_setpoint: u8,

    /// Highest setpoint that will be sent to the unit
    #[arg(long, default_value_t = 90)]
    max_setpoint: u8,

    /// Consecutive failed exchanges before the unit is considered unreachable
    #[arg(long, default_value_t = DEFAULT_MAX_ATTEMPTS, value_parser = clap::value_parser!(u32).range(1..))]
    max_attempts: u32,

    /// How long to wait for a response, in milliseconds
    #[arg(long, default_value_t = 500)]
    timeout_ms: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Query the unit once and print its status
    Status,

    /// Change one or more settings, keeping the rest as the unit reports them
    Set(DesiredArgs),

    /// Keep polling the unit, reading changes such as `mode cool` from stdin
    Run {
        /// Time between polls, in milliseconds
        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,

        #[command(flatten)]
        desired: DesiredArgs,
    },
}

#[derive(clap::Args, Debug, Clone, Copy)]
struct DesiredArgs {
    #[arg(long)]
    mode: Option<Mode>,

    #[arg(long)]
    fan: Option<FanSpeed>,

    #[arg(long)]
    setpoint: Option<u8>,

    /// Comma separated: eco, aux-heat, swing, vent or none (variant B only)
    #[arg(long)]
    flags: Option<ModeFlags>,
}

impl DesiredArgs {
    fn is_empty(&self) -> bool {
        self.mode.is_none() && self.fan.is_none() && self.setpoint.is_none() && self.flags.is_none()
    }

    fn apply_to(&self, base: DesiredState) -> DesiredState {
        DesiredState {
            mode: self.mode.unwrap_or(base.mode),
            fan: self.fan.unwrap_or(base.fan),
            setpoint: self.setpoint.unwrap_or(base.setpoint),
            mode_flags: self.flags.unwrap_or(base.mode_flags),
        }
    }
}

impl Args {
    fn settings(&self) -> SyncSettings {
        SyncSettings {
            variant: self.variant,
            setpoint_range: SetpointRange::from(self.min_setpoint..=self.max_setpoint),
            max_attempts: self.max_attempts,
        }
    }
}

/// What the unit currently reports, as a starting point for a change.
fn reported_state(telemetry: &Telemetry, variant: ProtocolVariant) -> DesiredState {
    DesiredState {
        mode: telemetry.mode,
        fan: telemetry.fan,
        setpoint: telemetry.setpoint,
        // variant A cannot carry flags, so don't echo them back
        mode_flags: match variant {
            ProtocolVariant::A => ModeFlags::default(),
            ProtocolVariant::B => telemetry.mode_flags,
        },
    }
}

/// Tick until `done` says the exchange it was waiting for happened.
fn tick_until(sync: &mut DeviceSync, transport: &mut BlockingTransport, done: impl Fn(&TickOutcome) -> bool) -> Result<()> {
    loop {
        let outcome = sync::tick(sync, transport);

        match outcome {
            TickOutcome::Unreachable => bail!("unit unreachable after {} attempts", sync.failures()),
            TickOutcome::Retry { attempt, ref error } => warn!(attempt, "exchange failed: {error}"),
            _ if done(&outcome) => return Ok(()),
            _ => (),
        }
    }
}

fn status(args: &Args) -> Result<Telemetry> {
    let mut transport = BlockingTransport::open(&args.port, Duration::from_millis(args.timeout_ms))?;
    let mut sync = DeviceSync::new(args.settings(), DesiredState::default());

    tick_until(&mut sync, &mut transport, |outcome| matches!(outcome, TickOutcome::Refreshed))?;

    sync.observed().cloned().context("no telemetry received")
}

fn set(args: &Args, desired: DesiredArgs) -> Result<Telemetry> {
    if desired.is_empty() {
        bail!("nothing to change");
    }

    let mut transport = BlockingTransport::open(&args.port, Duration::from_millis(args.timeout_ms))?;
    let mut sync = DeviceSync::new(args.settings(), DesiredState::default());

    tick_until(&mut sync, &mut transport, |outcome| matches!(outcome, TickOutcome::Refreshed))?;

    let current = sync.observed().context("no telemetry received")?;
    let target = desired.apply_to(reported_state(current, args.variant));

    sync.set_desired(target)?;
    tick_until(&mut sync, &mut transport, |outcome| matches!(outcome, TickOutcome::Acknowledged))?;

    sync.observed().cloned().context("no telemetry received")
}

async fn run(args: &Args, interval_ms: u64, desired: DesiredArgs) -> Result<()> {
    let config = PollConfig {
        sync: args.settings(),
        response_timeout: Duration::from_millis(args.timeout_ms),
        poll_interval: Duration::from_millis(interval_ms),
    };

    let port = Port::open(&args.port).await?.framed_controller();
    let mut poller = Poller::new(port, config, DesiredState::default());

    if !desired.is_empty() {
        poller.apply(Change::State(desired.apply_to(DesiredState::default())))?;
    }

    let (changes_tx, changes) = mpsc::channel(16);
    let (telemetry_tx, mut telemetry) = watch::channel(None);

    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim().is_empty() {
                continue;
            }

            match line.parse::<Change>() {
                Ok(change) => {
                    if changes_tx.send(change).await.is_err() {
                        break;
                    }
                }
                Err(err) => warn!("ignoring {line:?}: {err}"),
            }
        }
    });

    tokio::spawn(async move {
        let mut last: Option<Telemetry> = None;

        while telemetry.changed().await.is_ok() {
            let current = telemetry.borrow_and_update().clone();

            if current != last {
                if let Some(t) = &current {
                    println!("{t}");
                }
                last = current;
            }
        }
    });

    info!(port = %args.port, variant = ?args.variant, "polling unit");

    poller.run(changes, telemetry_tx).await
}


#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    match args.command {
        Command::Status => {
            let telemetry = tokio::task::spawn_blocking(move || status(&args)).await??;
            println!("{telemetry}");
        }
        Command::Set(desired) => {
            let telemetry = tokio::task::spawn_blocking(move || set(&args, desired)).await??;
            println!("{telemetry}");
        }
        Command::Run { interval_ms, desired } => {
            run(&args, interval_ms, desired).await?;
        }
    }

    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args() {
        let args = Args::try_parse_from([
            "mideaxye", "--variant", "b", "--max-setpoint", "86", "serial:///dev/ttyUSB0",
            "set", "--mode", "cool", "--fan", "high", "--flags", "eco",
        ]).unwrap();

        assert_eq!(args.variant, ProtocolVariant::B);
        assert_eq!(args.settings().setpoint_range, SetpointRange { min: 60, max: 86 });

        let Command::Set(desired) = args.command else { panic!("expected set") };
        assert_eq!(desired.mode, Some(Mode::Cool));
        assert_eq!(desired.fan, Some(FanSpeed::High));
        assert_eq!(desired.flags, Some(ModeFlags { eco: true, ..Default::default() }));
    }

    #[test]
    fn test_max_attempts_must_be_positive() {
        let parse = |attempts: &str| {
            Args::try_parse_from(["mideaxye", "--max-attempts", attempts, "serial:///dev/ttyUSB0", "status"])
        };

        assert!(parse("0").is_err());
        assert_eq!(parse("1").unwrap().settings().max_attempts, 1);
    }

    #[test]
    fn test_apply_keeps_reported_values() {
        let desired = DesiredArgs { mode: None, fan: Some(FanSpeed::Low), setpoint: None, flags: None };
        let base = DesiredState { mode: Mode::Heat, setpoint: 68, ..Default::default() };

        assert_eq!(desired.apply_to(base), DesiredState { fan: FanSpeed::Low, ..base });
    }
}
