//! # Niimlink CLI
//!
//! Command-line interface for label printer links.
//!
//! ## Usage
//!
//! ```bash
//! # List nearby BLE printers
//! niimlink scan
//!
//! # Encode an image and show the row summary
//! niimlink encode label.png
//!
//! # Encode with the head along the image width, save what would print
//! niimlink encode --direction top --png preview.png label.png
//!
//! # Send one packet over serial and print replies for 500 ms
//! niimlink send --transport serial --address /dev/ttyACM0 --command 40 --payload 01
//!
//! # Same over BLE, by advertised name
//! niimlink send --transport ble --address B1-H123456789 --command 40 --payload 01
//! ```

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;

use niimlink::{
    LinkConfig, NiimlinkError, PrintDirection, Session, TransportEvent, TransportKind,
    protocol::Packet,
    raster::{RasterImage, encode, flatten_onto_white},
    transport::{self, ble},
};

/// Niimlink - Label printer link utility
#[derive(Parser, Debug)]
#[command(name = "niimlink")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Verbose library logging (overridden by RUST_LOG)
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List BLE devices in range
    Scan {
        /// Scan duration in milliseconds
        #[arg(long, default_value = "5000")]
        timeout: u64,
    },

    /// Encode an image into printer rows
    Encode {
        /// Image file (PNG, JPEG, ...)
        path: PathBuf,

        /// Which image axis runs along the print head
        #[arg(long, default_value = "left")]
        direction: PrintDirection,

        /// Print the encoded rows as JSON
        #[arg(long)]
        json: bool,

        /// Save the encoded result as a PNG, in device orientation
        #[arg(long, value_name = "FILE")]
        png: Option<PathBuf>,
    },

    /// Send one packet and print the replies
    Send {
        /// Link to use: ble, serial or bluetooth
        #[arg(long)]
        transport: TransportKind,

        /// BLE address or name, serial port path, or Bluetooth MAC
        #[arg(long)]
        address: String,

        /// Command byte in hex
        #[arg(long, value_parser = parse_command)]
        command: u8,

        /// Payload bytes in hex
        #[arg(long, value_parser = parse_payload, default_value = "")]
        payload: HexBytes,

        /// Skip the send queue and interval
        #[arg(long)]
        urgent: bool,

        /// How long to print replies, in milliseconds
        #[arg(long, default_value = "500")]
        listen: u64,

        /// Discovery timeout in milliseconds
        #[arg(long, default_value = "5000")]
        timeout: u64,

        /// Minimum spacing between sends in milliseconds
        #[arg(long, default_value = "10")]
        interval: u64,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.debug);

    if let Err(e) = run(cli.command).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn init_logging(debug: bool) {
    let default = if debug { "niimlink=debug" } else { "niimlink=warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

async fn run(command: Commands) -> Result<(), NiimlinkError> {
    match command {
        Commands::Scan { timeout } => {
            let config = LinkConfig::DEFAULT.with_discovery_timeout(Duration::from_millis(timeout));
            println!("Scanning for {} ms...", timeout);

            let devices = ble::scan(&config).await?;
            if devices.is_empty() {
                println!("No devices found.");
            }
            for device in devices {
                println!("  {}  {}", device.address, device.name);
            }
        }

        Commands::Encode {
            path,
            direction,
            json,
            png,
        } => encode_file(&path, direction, json, png)?,

        Commands::Send {
            transport: kind,
            address,
            command,
            payload,
            urgent,
            listen,
            timeout,
            interval,
        } => {
            let config = LinkConfig::DEFAULT
                .with_discovery_timeout(Duration::from_millis(timeout))
                .with_packet_interval(Duration::from_millis(interval));
            let packet = Packet::new(command, payload.0)?;

            let mut session = Session::open(transport::open(kind, &address, config)).await?;
            println!("Connected to {}", session.info().device_name);

            let result = exchange(&mut session, &packet, urgent, Duration::from_millis(listen)).await;
            session.close().await?;
            result?;
        }
    }

    Ok(())
}

/// Send `packet` and print every reply until `listen` elapses or the link drops.
async fn exchange(
    session: &mut Session,
    packet: &Packet,
    urgent: bool,
    listen: Duration,
) -> Result<(), NiimlinkError> {
    session.send_packet(packet, urgent).await?;
    println!("-> 0x{:02X} {}", packet.command(), hex::encode(packet.payload()));

    let deadline = tokio::time::Instant::now() + listen;
    while let Ok(event) = tokio::time::timeout_at(deadline, session.next_event()).await {
        match event {
            Some(TransportEvent::Packet(reply)) => {
                println!("<- 0x{:02X} {}", reply.command(), hex::encode(reply.payload()));
            }
            Some(TransportEvent::Connected(_)) => {}
            Some(TransportEvent::Disconnected(reason)) => {
                if let Some(e) = reason.error() {
                    return Err(e);
                }
                println!("Link closed by device");
                break;
            }
            None => {
                println!("Link closed by device");
                break;
            }
        }
    }

    let dropped = session.transport().decode_errors();
    if dropped > 0 {
        println!("{} malformed span(s) dropped", dropped);
    }
    Ok(())
}

fn encode_file(
    path: &Path,
    direction: PrintDirection,
    json: bool,
    png: Option<PathBuf>,
) -> Result<(), NiimlinkError> {
    let decoded = image::open(path)
        .map_err(|e| NiimlinkError::Image(format!("Failed to open {}: {}", path.display(), e)))?;
    let rgb = flatten_onto_white(&decoded);
    let encoded = encode(&RasterImage::from(&rgb), direction)?;

    if json {
        let out = serde_json::to_string_pretty(&encoded)
            .map_err(|e| NiimlinkError::Image(format!("Failed to serialize rows: {}", e)))?;
        println!("{}", out);
    } else {
        let void = encoded.row_data.iter().filter(|r| r.is_void()).count();
        println!(
            "{}x{} ({}), {} columns x {} rows",
            rgb.width(),
            rgb.height(),
            direction,
            encoded.columns,
            encoded.rows
        );
        println!(
            "{} entries ({} void), {} dots set",
            encoded.row_data.len(),
            void,
            encoded.total_set_pixels()
        );
    }

    if let Some(png_path) = png {
        encoded
            .to_gray_image()
            .save(&png_path)
            .map_err(|e| NiimlinkError::Image(format!("Failed to save PNG: {}", e)))?;
        println!("Saved to {}", png_path.display());
    }

    Ok(())
}

fn parse_command(s: &str) -> Result<u8, String> {
    let digits = s.trim_start_matches("0x").trim_start_matches("0X");
    u8::from_str_radix(digits, 16).map_err(|e| format!("invalid command byte '{}': {}", s, e))
}

/// Payload bytes given on the command line as hex
#[derive(Debug, Clone, PartialEq, Eq)]
struct HexBytes(Vec<u8>);

fn parse_payload(s: &str) -> Result<HexBytes, String> {
    let digits: String = s.chars().filter(|c| !c.is_whitespace() && *c != ':').collect();
    hex::decode(&digits)
        .map(HexBytes)
        .map_err(|e| format!("invalid payload '{}': {}", s, e))
}
