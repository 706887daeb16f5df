//! # Classic Bluetooth (RFCOMM) Transport
//!
//! This module talks to printers over the Bluetooth Serial Port Profile
//! (SPP) via RFCOMM on Linux.
//!
//! ## Channel Resolution
//!
//! A MAC address resolves directly to a byte stream:
//!
//! 1. Reuse an RFCOMM tty already bound to the address (`/proc/net/rfcomm`,
//!    falling back to `rfcomm -a`)
//! 2. Otherwise ask the device's SDP server for its Serial Port channel
//!    (`sdptool search --bdaddr <MAC> SP`)
//! 3. Bind a free `/dev/rfcommN` to that channel (`rfcomm bind N <MAC> <ch>`)
//!
//! The whole resolution is bounded by `discovery_timeout`; spawned tools are
//! killed when it expires. A tty bound in step 3 belongs to the transport
//! and is released (`rfcomm release N`) on disconnect or on a failed
//! connect. Ttys found in step 1 are left alone.
//!
//! ## Bluetooth Setup (Linux)
//!
//! The printer must be paired first:
//!
//! ```bash
//! $ bluetoothctl
//! [bluetooth]# scan on
//! [bluetooth]# pair 00:11:62:XX:XX:XX
//! ```
//!
//! Binding needs root (or `CAP_NET_ADMIN`); a tty bound beforehand with
//! `sudo rfcomm bind 0 00:11:62:XX:XX:XX 1` is picked up without it.
//!
//! ## TTY Configuration
//!
//! The RFCOMM device is opened through `tokio-serial`, so reads and writes
//! are readiness-driven and closing the transport closes the fd. It is then
//! put in raw mode so binary data is transmitted without modification:
//!
//! - **No input processing**: Disable IGNBRK, BRKINT, PARMRK, ISTRIP, etc.
//! - **No output processing**: Disable OPOST (no CR/LF translation)
//! - **8-bit characters**: CS8 (8 data bits, no parity)
//! - **No echo**: Disable ECHO, ECHONL
//! - **Non-canonical mode**: Disable ICANON, reads return as soon as one byte
//!   is available (VMIN 1, VTIME 0)
//!
//! The stream has no framing of its own; packet boundaries are found by the
//! framer.

use std::io;
use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{ReadHalf, WriteHalf};
use tokio::process::Command;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, warn};

use super::channel::WireWriter;
use super::link::Link;
use super::stream::StreamIo;
use super::{
    ConnectionInfo, ConnectionState, DisconnectReason, EventReceiver, Transport, TransportKind,
};
use crate::config::{LinkConfig, SERIAL_BAUD_RATE};
use crate::error::{NiimlinkError, Result};

/// Highest `/dev/rfcommN` index tried when binding
const MAX_RFCOMM_DEVICES: u8 = 32;

/// Polling step while waiting for a freshly bound tty to appear
const BIND_POLL: Duration = Duration::from_millis(100);

pub struct ClassicBluetoothTransport {
    mac: String,
    link: Arc<Link>,
    io: StreamIo,
    /// `/dev/rfcommN` index this transport bound itself
    bound: Mutex<Option<u8>>,
}

impl ClassicBluetoothTransport {
    pub fn new(mac: impl Into<String>, config: LinkConfig) -> Self {
        Self {
            mac: mac.into().to_uppercase(),
            link: Arc::new(Link::new(TransportKind::Bluetooth, config)),
            io: StreamIo::default(),
            bound: Mutex::new(None),
        }
    }

    pub fn mac(&self) -> &str {
        &self.mac
    }

    fn bound(&self) -> std::sync::MutexGuard<'_, Option<u8>> {
        self.bound.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn open_stream(&self) -> Result<()> {
        if !is_valid_mac(&self.mac) {
            return Err(NiimlinkError::Connection(format!(
                "Invalid Bluetooth address: {}",
                self.mac
            )));
        }

        let timeout = self.link.config().discovery_timeout;
        let device = tokio::time::timeout(timeout, self.resolve_device())
            .await
            .map_err(|_| NiimlinkError::Discovery(format!("No device found: {}", self.mac)))??;
        debug!(device = %device, "rfcomm device resolved");

        let (reader, writer) = open_tty(&device)?;
        self.io.attach(self.link.clone(), reader, writer).await;
        Ok(())
    }

    /// Existing tty for the address, or a newly bound one.
    async fn resolve_device(&self) -> Result<String> {
        if let Some(device) = find_rfcomm_for_mac(&self.mac).await? {
            return Ok(device);
        }

        let channel = find_serial_port_channel(&self.mac).await?;
        debug!(mac = %self.mac, channel, "serial port channel found");

        let index = bind_rfcomm(&self.mac, channel).await?;
        // Recorded before the wait so a timeout still releases it.
        *self.bound() = Some(index);

        let device_path = format!("/dev/rfcomm{}", index);
        // udev creates the node asynchronously; the caller's timeout bounds this.
        while !Path::new(&device_path).exists() {
            tokio::time::sleep(BIND_POLL).await;
        }
        Ok(device_path)
    }

    /// Undo a binding made by [`Self::resolve_device`]. Failures are logged.
    async fn release_binding(&self) {
        let Some(index) = self.bound().take() else {
            return;
        };

        debug!(index, "releasing rfcomm");
        match run_tool(&mut release_command(index)).await {
            Ok(output) if output.status.success() => {}
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                warn!(index, error = %stderr.trim(), "rfcomm release failed");
            }
            Err(e) => warn!(index, error = %e, "failed to run rfcomm release"),
        }
    }
}

#[async_trait]
impl Transport for ClassicBluetoothTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Bluetooth
    }

    fn state(&self) -> ConnectionState {
        self.link.state()
    }

    fn take_events(&self) -> Option<EventReceiver> {
        self.link.take_events()
    }

    fn decode_errors(&self) -> u64 {
        self.link.decode_errors()
    }

    async fn connect(&self) -> Result<ConnectionInfo> {
        self.disconnect().await?;
        self.link.begin_connect();

        if let Err(e) = self.open_stream().await {
            self.io.close().await;
            self.release_binding().await;
            self.link.abort_connect();
            return Err(e);
        }

        let info = ConnectionInfo {
            device_name: format!("Bluetooth ({})", self.mac),
            kind: TransportKind::Bluetooth,
        };
        if let Err(e) = self.link.mark_connected(&info) {
            self.io.close().await;
            self.release_binding().await;
            return Err(e);
        }
        Ok(info)
    }

    async fn disconnect(&self) -> Result<()> {
        self.io.close().await;
        self.release_binding().await;
        self.link.mark_disconnected(DisconnectReason::Requested);
        Ok(())
    }

    async fn send(&self, data: &[u8], urgent: bool) -> Result<()> {
        self.link.channel().send(self, data, urgent).await
    }
}

#[async_trait]
impl WireWriter for ClassicBluetoothTransport {
    fn is_writable(&self) -> bool {
        self.link.is_connected()
    }

    async fn write_raw(&self, data: &[u8]) -> Result<()> {
        self.io.write(data).await
    }

    async fn teardown(&self) {
        let _ = self.disconnect().await;
    }
}

// ============================================================================
// RFCOMM RESOLUTION
// ============================================================================

/// Validate a Bluetooth MAC address format (XX:XX:XX:XX:XX:XX).
pub fn is_valid_mac(mac: &str) -> bool {
    let parts: Vec<&str> = mac.split(':').collect();
    if parts.len() != 6 {
        return false;
    }
    parts
        .iter()
        .all(|part| part.len() == 2 && part.chars().all(|c| c.is_ascii_hexdigit()))
}

/// Find an existing RFCOMM device bound to the given MAC address.
///
/// Checks `/proc/net/rfcomm` and falls back to `rfcomm -a`.
/// Returns the device path (e.g., "/dev/rfcomm0") if found.
pub async fn find_rfcomm_for_mac(mac: &str) -> Result<Option<String>> {
    // Format: "rfcomm0: XX:XX:XX:XX:XX:XX channel N ..."
    if let Ok(contents) = tokio::fs::read_to_string("/proc/net/rfcomm").await {
        if let Some(device) = device_for_mac(&contents, mac) {
            return Ok(Some(device));
        }
    }

    let output = match run_tool(Command::new("rfcomm").arg("-a")).await {
        Ok(output) => output,
        Err(e) => {
            debug!(error = %e, "rfcomm -a unavailable");
            return Ok(None);
        }
    };
    Ok(device_for_mac(&String::from_utf8_lossy(&output.stdout), mac))
}

fn device_for_mac(listing: &str, mac: &str) -> Option<String> {
    let mac_upper = mac.to_uppercase();
    listing
        .lines()
        .filter(|line| line.to_uppercase().contains(&mac_upper))
        .filter_map(|line| line.split(':').next())
        .map(|name| format!("/dev/{}", name.trim()))
        .find(|path| Path::new(path).exists())
}

/// Ask the device's SDP server for its Serial Port RFCOMM channel.
pub async fn find_serial_port_channel(mac: &str) -> Result<u8> {
    let output = run_tool(
        Command::new("sdptool")
            .arg("search")
            .arg("--bdaddr")
            .arg(mac)
            .arg("SP"),
    )
    .await
    .map_err(|e| NiimlinkError::Discovery(format!("Failed to run sdptool: {}", e)))?;

    parse_sdp_channel(&String::from_utf8_lossy(&output.stdout))
        .ok_or_else(|| NiimlinkError::Discovery(format!("No device found: {}", mac)))
}

/// First `Channel: N` line of an `sdptool` record listing.
fn parse_sdp_channel(listing: &str) -> Option<u8> {
    listing
        .lines()
        .filter_map(|line| line.trim().strip_prefix("Channel:"))
        .find_map(|value| value.trim().parse().ok())
}

/// Bind the first free `/dev/rfcommN` to `mac` on `channel`, returning N.
///
/// **Requires root privileges.**
async fn bind_rfcomm(mac: &str, channel: u8) -> Result<u8> {
    let index = (0..MAX_RFCOMM_DEVICES)
        .find(|i| !Path::new(&format!("/dev/rfcomm{}", i)).exists())
        .ok_or_else(|| NiimlinkError::Connection("No free rfcomm device".into()))?;
    let device_path = format!("/dev/rfcomm{}", index);

    debug!(device = %device_path, channel, "binding rfcomm");
    let output = run_tool(
        Command::new("rfcomm")
            .arg("bind")
            .arg(index.to_string())
            .arg(mac)
            .arg(channel.to_string()),
    )
    .await
    .map_err(|e| NiimlinkError::Connection(format!("Failed to run rfcomm bind: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(NiimlinkError::Connection(format!(
            "rfcomm bind failed: {}",
            stderr.trim()
        )));
    }

    Ok(index)
}

fn release_command(index: u8) -> Command {
    let mut command = Command::new("rfcomm");
    command.arg("release").arg(index.to_string());
    command
}

async fn run_tool(command: &mut Command) -> io::Result<std::process::Output> {
    command
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
}

// ============================================================================
// TTY
// ============================================================================

/// Open an RFCOMM tty as read and write halves of one stream.
///
/// The fd is closed once both halves are dropped.
fn open_tty(device: &str) -> Result<(ReadHalf<SerialStream>, WriteHalf<SerialStream>)> {
    let port = tokio_serial::new(device, SERIAL_BAUD_RATE)
        .open_native_async()
        .map_err(|e| NiimlinkError::Connection(format!("Failed to open {}: {}", device, e)))?;

    configure_tty_raw(&port)?;
    Ok(tokio::io::split(port))
}

/// Configure a tty for raw binary transfer.
///
/// Note: IXON/IXOFF/IXANY disable XON/XOFF software flow control. This is
/// critical because 0x11 (XON) and 0x13 (XOFF) appear in packet payloads.
#[cfg(unix)]
fn configure_tty_raw(port: &SerialStream) -> Result<()> {
    use std::mem::MaybeUninit;
    use std::os::unix::io::AsRawFd;

    let fd = port.as_raw_fd();

    let mut termios = MaybeUninit::uninit();
    let result = unsafe { libc::tcgetattr(fd, termios.as_mut_ptr()) };
    if result != 0 {
        return Err(NiimlinkError::Connection(format!(
            "tcgetattr failed: {}",
            io::Error::last_os_error()
        )));
    }
    let mut termios = unsafe { termios.assume_init() };

    termios.c_iflag &= !(libc::IGNBRK
        | libc::BRKINT
        | libc::PARMRK
        | libc::ISTRIP
        | libc::INLCR
        | libc::IGNCR
        | libc::ICRNL
        | libc::IXON
        | libc::IXOFF
        | libc::IXANY);

    termios.c_oflag &= !libc::OPOST;

    termios.c_lflag &= !(libc::ECHO | libc::ECHONL | libc::ICANON | libc::ISIG | libc::IEXTEN);

    termios.c_cflag &= !(libc::CSIZE | libc::PARENB);
    termios.c_cflag |= libc::CS8 | libc::CREAD | libc::CLOCAL;

    termios.c_cc[libc::VMIN] = 1;
    termios.c_cc[libc::VTIME] = 0;

    let result = unsafe { libc::tcsetattr(fd, libc::TCSANOW, &termios) };
    if result != 0 {
        return Err(NiimlinkError::Connection(format!(
            "tcsetattr failed: {}",
            io::Error::last_os_error()
        )));
    }

    Ok(())
}

#[cfg(not(unix))]
fn configure_tty_raw(_port: &SerialStream) -> Result<()> {
    Err(NiimlinkError::Connection(
        "RFCOMM is not supported on this platform".to_string(),
    ))
}

// ============================================================================
// TESTS
// ============================================================================
