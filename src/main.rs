//! `serialctl` - list serial devices and probe them through a session.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use serialport::SerialPortType;

use serial_session::config::DEFAULT_CONFIG_FILE;
use serial_session::hardware::SystemOpener;
use serial_session::{logging, DeviceSession, SessionError, Settings, Wait};

#[derive(Parser, Debug)]
#[command(name = "serialctl")]
#[command(about = "Inspect and exercise serial devices")]
#[command(version)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, value_name = "FILE", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List serial devices known to the host
    Ports {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Write bytes and print what comes back (use on a loopback to check wiring)
    Probe {
        /// Device name, e.g. COM3 or ttyUSB0
        #[arg(long)]
        port: String,
        /// Baud rate
        #[arg(long, default_value_t = 9600)]
        baud: u32,
        /// Text to send
        #[arg(long)]
        data: String,
        /// How long to wait for the reply
        #[arg(long, default_value_t = 1000)]
        timeout_ms: u64,
    },
    /// Print the effective configuration
    ShowConfig,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load_from(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    logging::init(&settings.logging);

    match cli.command {
        Commands::Ports { json } => list_ports(json),
        Commands::Probe {
            port,
            baud,
            data,
            timeout_ms,
        } => probe(&port, baud, data.as_bytes(), Duration::from_millis(timeout_ms)),
        Commands::ShowConfig => {
            print!("{}", settings.to_toml_string()?);
            Ok(())
        }
    }
}

fn port_kind(port_type: &SerialPortType) -> &'static str {
    match port_type {
        SerialPortType::UsbPort(_) => "usb",
        SerialPortType::PciPort => "pci",
        SerialPortType::BluetoothPort => "bluetooth",
        SerialPortType::Unknown => "unknown",
        #[allow(unreachable_patterns)]
        _ => "other",
    }
}

fn list_ports(as_json: bool) -> Result<()> {
    let ports = serialport::available_ports().context("Failed to enumerate serial ports")?;

    if as_json {
        let listing: Vec<_> = ports
            .iter()
            .map(|p| json!({ "name": p.port_name, "type": port_kind(&p.port_type) }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&listing)?);
        return Ok(());
    }

    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in &ports {
        println!("{:<24} {}", port.port_name, port_kind(&port.port_type));
    }
    Ok(())
}

fn probe(port: &str, baud: u32, data: &[u8], timeout: Duration) -> Result<()> {
    if data.is_empty() {
        bail!("Nothing to send");
    }

    let mut session = DeviceSession::new(Arc::new(SystemOpener))?;
    session
        .open(port, baud)
        .with_context(|| format!("Failed to open {} at {} baud", port, baud))?;

    let written = session.write(data, &Wait::timeout(timeout))?;
    println!("wrote {} byte(s): {:02x?}", written, &data[..written]);

    let deadline = Instant::now() + timeout;
    let mut received = Vec::with_capacity(written);
    let mut buf = vec![0u8; written.max(1)];
    while received.len() < written {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match session.read(&mut buf, &Wait::timeout(remaining)) {
            Ok(n) => received.extend_from_slice(&buf[..n]),
            Err(SessionError::TimedOut(_)) => break,
            Err(e) => return Err(e).context("Read failed"),
        }
    }

    println!("read  {} byte(s): {:02x?}", received.len(), received);
    if received.as_slice() == &data[..written] {
        println!("loopback OK");
    }
    session.close()?;
    Ok(())
}
