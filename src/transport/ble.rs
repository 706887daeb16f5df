//! # Bluetooth Low Energy Transport
//!
//! Talks to the printer through a single GATT characteristic that both
//! notifies (device → host) and accepts write-without-response
//! (host → device).
//!
//! ## Connect Sequence
//!
//! ```text
//! adapter powered on? ──(adapter_timeout)──► Connection error
//!        │
//! scan until address or local name matches ──(discovery_timeout)──► Discovery error
//!        │                                       scan is always stopped
//! connect, discover services
//!        │
//! first characteristic with NOTIFY + WRITE_WITHOUT_RESPONSE
//!        │                  none ──► disconnect peripheral, Discovery error
//! subscribe, start notification task
//!        │
//! Connected
//! ```
//!
//! Services carrying a 16-bit Bluetooth SIG UUID (Generic Access, Device
//! Information, ...) are skipped while looking for the channel.
//!
//! ## Receive Path
//!
//! Notifications usually carry exactly one packet, but a long reply may be
//! split over several notifications, so every payload still goes through the
//! framer.
//!
//! When the notification stream ends or the framer overflows, the receive
//! task disconnects the peripheral itself and reports the reason in the
//! `Disconnected` event.
//!
//! ## Example
//!
//! ```no_run
//! use niimlink::config::LinkConfig;
//! use niimlink::transport::ble::{self, BleTransport};
//! use niimlink::transport::Transport;
//!
//! # async fn example() -> Result<(), niimlink::NiimlinkError> {
//! for item in ble::scan(&LinkConfig::DEFAULT).await? {
//!     println!("{}: {}", item.address, item.name);
//! }
//!
//! let transport = BleTransport::new("B1-H123456789", LinkConfig::DEFAULT);
//! transport.connect().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CentralState, CharPropFlags, Characteristic, Manager as _,
    Peripheral as _, ScanFilter, Service, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use super::channel::WireWriter;
use super::link::Link;
use super::{
    ConnectionInfo, ConnectionState, DisconnectReason, EventReceiver, Transport, TransportKind,
};
use crate::config::LinkConfig;
use crate::error::{NiimlinkError, Result};

/// Bluetooth SIG base UUID `0000xxxx-0000-1000-8000-00805f9b34fb`
const SIG_BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_0080_5f9b_34fb;

/// Mask clearing the 32-bit alias part of a UUID
const SIG_ALIAS_MASK: u128 = !(0xFFFF_FFFF_u128 << 96);

/// One advertisement seen during [`scan`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanItem {
    pub address: String,
    pub name: String,
}

struct BleDevice {
    peripheral: Peripheral,
    channel: Characteristic,
}

pub struct BleTransport {
    target: String,
    link: Arc<Link>,
    device: Arc<AsyncMutex<Option<BleDevice>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl BleTransport {
    /// `target` is a device address (`AA:BB:CC:DD:EE:FF`) or advertised name.
    pub fn new(target: impl Into<String>, config: LinkConfig) -> Self {
        Self {
            target: target.into(),
            link: Arc::new(Link::new(TransportKind::Ble, config)),
            device: Arc::new(AsyncMutex::new(None)),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    async fn open_device(&self) -> Result<(BleDevice, String)> {
        let config = self.link.config();
        let adapter = default_adapter(config.adapter_timeout).await?;
        let peripheral = find_peripheral(&adapter, &self.target, config).await?;

        let name = peripheral
            .properties()
            .await
            .ok()
            .flatten()
            .and_then(|props| props.local_name)
            .unwrap_or_else(|| self.target.clone());

        peripheral
            .connect()
            .await
            .map_err(|e| NiimlinkError::Connection(format!("Failed to connect {}: {}", name, e)))?;

        if let Err(e) = peripheral.discover_services().await {
            let _ = peripheral.disconnect().await;
            return Err(NiimlinkError::Connection(format!(
                "Service discovery failed: {}",
                e
            )));
        }

        let Some(channel) = select_channel(&peripheral.services()) else {
            let _ = peripheral.disconnect().await;
            return Err(NiimlinkError::Discovery(
                "Unable to find suitable channel characteristic".into(),
            ));
        };
        debug!(service = %channel.service_uuid, characteristic = %channel.uuid, "channel selected");

        if let Err(e) = peripheral.subscribe(&channel).await {
            let _ = peripheral.disconnect().await;
            return Err(NiimlinkError::Connection(format!("Subscribe failed: {}", e)));
        }

        let notifications = match peripheral.notifications().await {
            Ok(stream) => stream,
            Err(e) => {
                let _ = peripheral.disconnect().await;
                return Err(NiimlinkError::Connection(format!(
                    "Notification stream unavailable: {}",
                    e
                )));
            }
        };

        let link = self.link.clone();
        let device = self.device.clone();
        let channel_uuid = channel.uuid;
        let receive = tokio::spawn(async move {
            let mut notifications = notifications;
            let mut reason = DisconnectReason::Lost;
            while let Some(notification) = notifications.next().await {
                if notification.uuid != channel_uuid {
                    continue;
                }
                if let Err(e) = link.ingest(&notification.value) {
                    warn!(error = %e, "receive stream unusable");
                    reason = DisconnectReason::from_error(&e);
                    break;
                }
            }
            release_device(&device).await;
            link.mark_disconnected(reason);
        });

        let link = self.link.clone();
        let device = self.device.clone();
        let id = peripheral.id();
        let watch = match adapter.events().await {
            Ok(mut events) => Some(tokio::spawn(async move {
                while let Some(event) = events.next().await {
                    if let CentralEvent::DeviceDisconnected(gone) = event {
                        if gone == id {
                            debug!("peripheral dropped the link");
                            release_device(&device).await;
                            link.mark_disconnected(DisconnectReason::Lost);
                            break;
                        }
                    }
                }
            })),
            Err(e) => {
                warn!(error = %e, "no adapter events, link drops surface on next send");
                None
            }
        };

        {
            let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
            tasks.push(receive);
            tasks.extend(watch);
        }

        Ok((BleDevice { peripheral, channel }, name))
    }

    fn abort_tasks(&self) {
        let tasks: Vec<_> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for task in tasks {
            task.abort();
        }
    }
}

#[async_trait]
impl Transport for BleTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Ble
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

        let (device, name) = match self.open_device().await {
            Ok(opened) => opened,
            Err(e) => {
                self.abort_tasks();
                self.link.abort_connect();
                return Err(e);
            }
        };
        *self.device.lock().await = Some(device);

        let info = ConnectionInfo {
            device_name: name,
            kind: TransportKind::Ble,
        };
        if let Err(e) = self.link.mark_connected(&info) {
            self.disconnect().await?;
            return Err(e);
        }
        Ok(info)
    }

    async fn disconnect(&self) -> Result<()> {
        self.abort_tasks();
        release_device(&self.device).await;
        self.link.mark_disconnected(DisconnectReason::Requested);
        Ok(())
    }

    async fn send(&self, data: &[u8], urgent: bool) -> Result<()> {
        self.link.channel().send(self, data, urgent).await
    }
}

#[async_trait]
impl WireWriter for BleTransport {
    fn is_writable(&self) -> bool {
        self.link.is_connected()
    }

    async fn write_raw(&self, data: &[u8]) -> Result<()> {
        let guard = self.device.lock().await;
        let device = guard.as_ref().ok_or(NiimlinkError::NotConnected)?;
        device
            .peripheral
            .write(&device.channel, data, WriteType::WithoutResponse)
            .await
            .map_err(|e| NiimlinkError::Transport(format!("Write failed: {}", e)))
    }

    async fn teardown(&self) {
        let _ = self.disconnect().await;
    }
}

/// Drop the open peripheral, if any, and disconnect it.
async fn release_device(device: &AsyncMutex<Option<BleDevice>>) {
    let device = device.lock().await.take();
    if let Some(device) = device {
        if let Err(e) = device.peripheral.disconnect().await {
            warn!(error = %e, "peripheral disconnect failed");
        }
    }
}

// ============================================================================
// DISCOVERY
// ============================================================================

/// List advertising devices for `config.discovery_timeout`.
pub async fn scan(config: &LinkConfig) -> Result<Vec<ScanItem>> {
    let adapter = default_adapter(config.adapter_timeout).await?;

    adapter
        .start_scan(ScanFilter::default())
        .await
        .map_err(|e| NiimlinkError::Discovery(format!("Scan failed: {}", e)))?;
    tokio::time::sleep(config.discovery_timeout).await;

    let peripherals = adapter.peripherals().await;
    if let Err(e) = adapter.stop_scan().await {
        warn!(error = %e, "stop scan failed");
    }
    let peripherals =
        peripherals.map_err(|e| NiimlinkError::Discovery(format!("Scan failed: {}", e)))?;

    let mut items = Vec::with_capacity(peripherals.len());
    for peripheral in peripherals {
        if let Ok(Some(props)) = peripheral.properties().await {
            items.push(ScanItem {
                address: props.address.to_string(),
                name: props.local_name.unwrap_or_else(|| "unknown".to_string()),
            });
        }
    }
    Ok(items)
}

async fn default_adapter(timeout: std::time::Duration) -> Result<Adapter> {
    let manager = Manager::new()
        .await
        .map_err(|e| NiimlinkError::Connection(format!("Can't init BLE: {}", e)))?;
    let adapter = manager
        .adapters()
        .await
        .map_err(|e| NiimlinkError::Connection(format!("Can't list adapters: {}", e)))?
        .into_iter()
        .next()
        .ok_or_else(|| NiimlinkError::Connection("No Bluetooth adapter found".into()))?;

    wait_powered_on(&adapter, timeout).await?;
    Ok(adapter)
}

async fn wait_powered_on(adapter: &Adapter, timeout: std::time::Duration) -> Result<()> {
    let mut events = adapter
        .events()
        .await
        .map_err(|e| NiimlinkError::Connection(format!("Can't init BLE: {}", e)))?;

    let state = adapter
        .adapter_state()
        .await
        .map_err(|e| NiimlinkError::Connection(format!("Can't init BLE: {}", e)))?;
    if matches!(state, CentralState::PoweredOn) {
        return Ok(());
    }

    let wait = async {
        while let Some(event) = events.next().await {
            if let CentralEvent::StateUpdate(state) = event {
                return match state {
                    CentralState::PoweredOn => Ok(()),
                    other => Err(NiimlinkError::Connection(format!("BLE state is {:?}", other))),
                };
            }
        }
        Err(NiimlinkError::Connection("Adapter event stream ended".into()))
    };

    tokio::time::timeout(timeout, wait)
        .await
        .map_err(|_| NiimlinkError::Connection("Can't init BLE: adapter not powered on".into()))?
}

async fn find_peripheral(adapter: &Adapter, target: &str, config: &LinkConfig) -> Result<Peripheral> {
    let mut events = adapter
        .events()
        .await
        .map_err(|e| NiimlinkError::Discovery(format!("Scan failed: {}", e)))?;
    adapter
        .start_scan(ScanFilter::default())
        .await
        .map_err(|e| NiimlinkError::Discovery(format!("Scan failed: {}", e)))?;

    let search = async {
        if let Ok(known) = adapter.peripherals().await {
            for peripheral in known {
                if matches_target(&peripheral, target).await {
                    return Some(peripheral);
                }
            }
        }

        while let Some(event) = events.next().await {
            if let CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) = event {
                if let Ok(peripheral) = adapter.peripheral(&id).await {
                    if matches_target(&peripheral, target).await {
                        return Some(peripheral);
                    }
                }
            }
        }
        None
    };

    let found = tokio::time::timeout(config.discovery_timeout, search).await;

    if let Err(e) = adapter.stop_scan().await {
        warn!(error = %e, "stop scan failed");
    }

    match found {
        Ok(Some(peripheral)) => Ok(peripheral),
        _ => Err(NiimlinkError::Discovery(format!("Device {} not found", target))),
    }
}

async fn matches_target(peripheral: &Peripheral, target: &str) -> bool {
    match peripheral.properties().await {
        Ok(Some(props)) => {
            props.address.to_string().eq_ignore_ascii_case(target)
                || props.local_name.as_deref() == Some(target)
        }
        _ => false,
    }
}

// ============================================================================
// CHANNEL SELECTION
// ============================================================================

/// First characteristic usable as the bidirectional channel.
fn select_channel(services: &std::collections::BTreeSet<Service>) -> Option<Characteristic> {
    services
        .iter()
        .filter(|service| !is_sig_uuid(service.uuid))
        .flat_map(|service| service.characteristics.iter())
        .find(|ch| is_channel_candidate(ch.properties))
        .cloned()
}

/// Both notify and write-without-response are required.
fn is_channel_candidate(properties: CharPropFlags) -> bool {
    properties.contains(CharPropFlags::NOTIFY | CharPropFlags::WRITE_WITHOUT_RESPONSE)
}

/// UUID built on the Bluetooth SIG base, i.e. a standard 16/32-bit service.
fn is_sig_uuid(uuid: Uuid) -> bool {
    uuid.as_u128() & SIG_ALIAS_MASK == SIG_BASE_UUID
}

// ============================================================================
// TESTS
// ============================================================================
