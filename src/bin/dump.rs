use std::time::SystemTime;

use anyhow::Result;
use clap::Parser;
use colored::{ColoredString, Colorize};
use futures::TryStreamExt;
use mideaxye::config::Port;
use mideaxye::protocol::codec::{BusFrame, RxFrame};
use mideaxye::protocol::encoder::{CommandFrame, CommandType};
use mideaxye::protocol::layout::{ProtocolVariant, VariantLayout};
use url::Url;


/// Passive monitor for a Midea XYE bus
///
/// Prints every command and response seen on the wire.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// URL of the port to connect to
    ///
    /// either serial:///device/path or tcp+raw://host:port URLs supported
    port: Url,

    /// Command frame layout used on the bus (A or B)
    #[arg(long, default_value = "A")]
    variant: ProtocolVariant,
}

fn delta_ms(time: Option<SystemTime>) -> u128 {
    time.and_then(|time| time.elapsed().ok())
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or(0)
}

fn command_desc(frame: &CommandFrame, layout: &VariantLayout) -> String {
    match frame.command_type() {
        Some(CommandType::Query) => "Query".to_string(),
        Some(CommandType::Set) => {
            let state = frame.desired_state(layout);
            format!(
                "Set       mode {}, fan {}, setpoint {}, flags {}",
                state.mode, state.fan, state.setpoint, state.mode_flags
            )
        }
        Some(CommandType::Lock) => "Lock".to_string(),
        Some(CommandType::Unlock) => "Unlock".to_string(),
        None => format!("Unknown   {:02x?}", frame.as_bytes()),
    }
}

fn coloured(frame: &BusFrame, line: String) -> ColoredString {
    match frame {
        BusFrame::Command(command) => match command.command_type() {
            Some(CommandType::Query) => line.on_cyan().bright_white(),
            Some(CommandType::Set) => line.on_purple().bright_white(),
            Some(_) => line.on_magenta().bright_white(),
            None => line.on_black(),
        },
        BusFrame::Response(telemetry) if telemetry.has_fault() => line.on_red().bright_white(),
        BusFrame::Response(_) => line.on_green().bright_white(),
    }
}


#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let layout = VariantLayout::from(args.variant);
    let mut framed = Port::open(&args.port).await?.framed_monitor();

    let start_time = SystemTime::now();
    let mut last_frame_time: Option<SystemTime> = None;

    while let Some(frame) = framed.try_next().await? {
        let start_delta_ms = delta_ms(Some(start_time));
        let last_frame_delta_ms = delta_ms(last_frame_time);

        last_frame_time = Some(SystemTime::now());

        let frame = match frame {
            RxFrame::Valid(frame) => frame,
            RxFrame::Corrupted(data, err) => {
                let line = format!("[{start_delta_ms:8}, {last_frame_delta_ms:8}] corrupted ({err}): {data:02x?}");
                println!("{}", line.red());
                continue;
            }
        };

        let desc = match &frame {
            BusFrame::Command(command) => format!("controller -> unit: {}", command_desc(command, &layout)),
            BusFrame::Response(telemetry) => format!("unit -> controller: {telemetry}"),
        };

        let line = format!("[{start_delta_ms:8}, {last_frame_delta_ms:8}] {desc}");

        println!("{}", coloured(&frame, line));
    }

    Ok(())
}
