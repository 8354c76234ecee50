use anyhow::Result;
use clap::Parser;
use futures::{SinkExt, TryStreamExt};
use mideaxye::config::{Port, UnitPort};
use mideaxye::protocol::codec::RxFrame;
use mideaxye::protocol::constants::{CURRENT_NOT_MEASURED, UNIT_DIRECTION};
use mideaxye::protocol::encoder::CommandType;
use mideaxye::protocol::layout::{ProtocolVariant, VariantLayout};
use mideaxye::protocol::response::ResponseFrame;
use mideaxye::protocol::unit::{Capabilities, DesiredState};
use rand::Rng;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;


/// Emulator for a Midea XYE air handler
///
/// Answers queries and applies Set commands so a controller can be exercised
/// without real hardware.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// URL of the port to connect to
    ///
    /// either serial:///device/path or tcp+raw://host:port URLs supported
    port: Url,

    /// Command frame layout to decode Set frames with (A or B)
    #[arg(long, default_value = "A")]
    variant: ProtocolVariant,

    /// Raw inlet temperature reported by the unit
    #[arg(long, default_value_t = 0x4a)]
    inlet_temp: u8,

    /// Error code reported by the unit
    #[arg(long, default_value_t = 0)]
    error_code: u16,

    /// Probability of ignoring a frame entirely
    #[arg(long, default_value_t = 0.0)]
    drop_rate: f64,
}

struct EmulatedUnit {
    state: DesiredState,
    locked: bool,

    inlet_temp: u8,
    error_code: u16,
}

/// Sensors wobble a little between reads.
fn jitter(temp: u8, rng: &mut impl Rng) -> u8 {
    temp.wrapping_add(rng.gen_range(0..=2)).wrapping_sub(1)
}

impl EmulatedUnit {
    fn response(&self, response_type: u8, rng: &mut impl Rng) -> ResponseFrame {
        ResponseFrame {
            response_type,
            direction: UNIT_DIRECTION,
            capabilities: Capabilities::SWING,
            mode: u8::try_from(self.state.mode).unwrap_or_default(),
            fan: u8::try_from(self.state.fan).unwrap_or_default(),
            setpoint: self.state.setpoint,
            inlet_temp: jitter(self.inlet_temp, rng),
            coil_temp_a: jitter(self.inlet_temp.wrapping_sub(0x10), rng),
            coil_temp_b: jitter(self.inlet_temp.wrapping_sub(0x10), rng),
            outside_temp: jitter(self.inlet_temp.wrapping_add(0x08), rng),
            current: CURRENT_NOT_MEASURED,
            mode_flags: self.state.mode_flags.to_byte(),
            error_code: self.error_code,
            ..Default::default()
        }
    }
}

async fn unit_emulator(mut port: UnitPort, args: &Args) -> Result<()> {
    let layout = VariantLayout::from(args.variant);
    let drop_rate = args.drop_rate.clamp(0.0, 1.0);

    let mut unit = EmulatedUnit {
        state: DesiredState::default(),
        locked: false,
        inlet_temp: args.inlet_temp,
        error_code: args.error_code,
    };

    info!(variant = ?args.variant, "unit emulator started");

    while let Some(frame) = port.try_next().await? {
        let command = match frame {
            RxFrame::Valid(command) => command,
            RxFrame::Corrupted(data, err) => {
                warn!("ignoring corrupted frame {data:02x?}: {err}");
                continue;
            }
        };

        match command.command_type() {
            Some(CommandType::Query) => debug!("query"),
            Some(CommandType::Set) if unit.locked => {
                warn!("locked, set ignored");
            }
            Some(CommandType::Set) => {
                unit.state = command.desired_state(&layout);
                info!(state = ?unit.state, "set");
            }
            Some(CommandType::Lock) => {
                unit.locked = true;
                info!("locked");
            }
            Some(CommandType::Unlock) => {
                unit.locked = false;
                info!("unlocked");
            }
            None => {
                warn!("unknown command {:02x?}", command.as_bytes());
                continue;
            }
        }

        let response = {
            let mut rng = rand::thread_rng();

            if rng.gen_bool(drop_rate) {
                debug!("dropping frame");
                continue;
            }

            unit.response(command.as_bytes()[1], &mut rng)
        };

        port.send(response).await?;
    }

    Ok(())
}


#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let port = Port::open(&args.port).await?.framed_unit();

    unit_emulator(port, &args).await
}
