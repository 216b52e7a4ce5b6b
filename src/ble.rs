use async_trait::async_trait;
use btleplug::{
    api::{BDAddr, Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType},
    platform::{Manager, Peripheral},
};
use futures::stream::StreamExt;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::{
    sync::{mpsc, Mutex},
    time::timeout,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    error::{LiftError, Result},
    types::{ConnectionParams, HardwareModel},
    TRAINER_COMMAND_CHAR_UUID, TRAINER_REP_CHAR_UUID, TRAINER_SERVICE_UUID,
    TRAINER_STATUS_CHAR_UUID, TRAINER_TELEMETRY_CHAR_UUID,
};

/// Number of notification sources subscribed during negotiation
///
/// Rep events and machine status. `Ready` is never declared before both
/// subscriptions have completed.
pub const NOTIFICATION_SOURCE_COUNT: usize = 2;

/// Raw notification routed off the shared BLE stream
#[derive(Debug, Clone)]
pub enum RawNotification {
    /// Frame from the rep characteristic
    Rep(Vec<u8>),
    /// Frame from the machine status characteristic
    Status(Vec<u8>),
}

/// Checklist of link negotiation steps
///
/// Every step is tracked individually; a command is accepted only once
/// all of them have completed. Commands issued earlier fail with
/// [`LiftError::NotReady`] rather than being queued or dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct NegotiationProgress {
    /// Physical link established (MTU settled by the platform stack)
    pub connected: bool,
    /// Vendor service discovered
    pub service_discovered: bool,
    /// Command characteristic located
    pub command_char_found: bool,
    /// Telemetry characteristic located
    pub telemetry_char_found: bool,
    /// Rep notification subscription active
    pub rep_subscribed: bool,
    /// Machine status subscription active
    pub status_subscribed: bool,
}

impl NegotiationProgress {
    /// True once every negotiation step has completed
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        self.connected
            && self.service_discovered
            && self.command_char_found
            && self.telemetry_char_found
            && self.rep_subscribed
            && self.status_subscribed
    }

    /// Name of the first incomplete step, for `NotReady` messages
    #[must_use]
    pub const fn missing_step(&self) -> Option<&'static str> {
        if !self.connected {
            Some("link not established")
        } else if !self.service_discovered {
            Some("service discovery incomplete")
        } else if !self.command_char_found {
            Some("command characteristic not located")
        } else if !self.telemetry_char_found {
            Some("telemetry characteristic not located")
        } else if !self.rep_subscribed {
            Some("rep notifications not subscribed")
        } else if !self.status_subscribed {
            Some("status notifications not subscribed")
        } else {
            None
        }
    }
}

/// A trainer found during scanning
#[derive(Debug, Clone)]
pub struct DiscoveredTrainer {
    /// Advertised device name
    pub name: String,
    /// Peripheral address
    pub address: String,
    /// Hardware revision from the name prefix
    pub model: HardwareModel,
    /// Signal strength (RSSI)
    pub rssi: i16,
}

/// Link operations the device layer depends on
///
/// The trait is the seam between protocol logic and `btleplug`: the
/// polling loop and command plumbing are generic over it, and tests
/// substitute a scripted fake to prove backpressure and teardown
/// behavior without a radio.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Write one command frame to the trainer
    async fn write_frame(&self, frame: &[u8]) -> Result<()>;

    /// Read the telemetry characteristic once
    ///
    /// Callers own the pacing: the next read must not be issued until
    /// this one's completion has been observed.
    async fn read_telemetry(&self) -> Result<Vec<u8>>;

    /// Whether the underlying link is still up
    async fn is_connected(&self) -> bool;
}

/// BLE manager owning discovery and connection establishment
pub struct BleManager {
    manager: Manager,
    peripherals: Arc<Mutex<HashMap<BDAddr, Peripheral>>>,
}

impl BleManager {
    /// Create a new BLE manager
    ///
    /// # Errors
    ///
    /// Returns [`LiftError::Ble`] if the Bluetooth adapter cannot be
    /// initialized.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new().await?;

        Ok(Self {
            manager,
            peripherals: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Scan for Forma trainers
    ///
    /// Advertisements are filtered by the vendor service UUID and then by
    /// the two recognized name prefixes; anything else is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`LiftError::DeviceNotFound`] if no Bluetooth adapters are
    /// available or the scan window expires with no recognized trainer,
    /// or [`LiftError::Ble`] for other Bluetooth-related errors.
    pub async fn scan_for_trainers(&self, params: &ConnectionParams) -> Result<Vec<DiscoveredTrainer>> {
        info!("starting scan for Forma trainers");

        let adapters = self.manager.adapters().await?;
        if adapters.is_empty() {
            return Err(LiftError::DeviceNotFound);
        }

        let central = &adapters[0];

        let service_uuid = Uuid::parse_str(TRAINER_SERVICE_UUID)
            .map_err(|e| LiftError::Other(format!("invalid service UUID: {e}")))?;
        let scan_filter = ScanFilter {
            services: vec![service_uuid],
        };

        central.start_scan(scan_filter).await?;
        tokio::time::sleep(Duration::from_millis(params.scan_timeout_ms)).await;
        central.stop_scan().await?;

        let peripherals = central.peripherals().await?;
        let mut trainers = Vec::new();
        for peripheral in peripherals {
            if let Some(found) = Self::identify_trainer(&peripheral).await {
                info!(name = %found.name, model = %found.model, "found trainer");
                trainers.push(found);
                self.peripherals
                    .lock()
                    .await
                    .insert(peripheral.address(), peripheral);
            }
        }

        info!("scan completed, found {} trainer(s)", trainers.len());
        Ok(trainers)
    }

    /// Connect to a discovered trainer and negotiate the link
    ///
    /// Every negotiation step is recorded in the returned connection's
    /// [`NegotiationProgress`]; the caller declares `Ready` only when the
    /// checklist is complete.
    ///
    /// # Errors
    ///
    /// Returns [`LiftError::DeviceNotFound`] if the trainer is no longer
    /// cached from the scan, [`LiftError::Timeout`] if connection exceeds
    /// its bound, or [`LiftError::ConnectionFailed`] for negotiation
    /// failures.
    pub async fn connect(
        &self,
        trainer: &DiscoveredTrainer,
        params: &ConnectionParams,
    ) -> Result<TrainerConnection> {
        info!(name = %trainer.name, "connecting to trainer");

        let peripheral = {
            let peripherals = self.peripherals.lock().await;
            peripherals
                .values()
                .find(|p| p.address().to_string() == trainer.address)
                .cloned()
                .ok_or(LiftError::DeviceNotFound)?
        };

        let mut progress = NegotiationProgress::default();

        let connect_future = peripheral.connect();
        timeout(Duration::from_millis(params.timeout_ms), connect_future)
            .await
            .map_err(|_| LiftError::Timeout {
                timeout_ms: params.timeout_ms,
            })?
            .map_err(|e| LiftError::ConnectionFailed(e.to_string()))?;
        progress.connected = true;

        peripheral.discover_services().await?;
        progress.service_discovered = true;

        let service_uuid = Uuid::parse_str(TRAINER_SERVICE_UUID)
            .map_err(|e| LiftError::Other(format!("invalid service UUID: {e}")))?;
        let services = peripheral.services();
        let service = services
            .iter()
            .find(|s| s.uuid == service_uuid)
            .ok_or_else(|| LiftError::ConnectionFailed("trainer service not found".to_string()))?;

        let find_char = |uuid_str: &str| -> Result<Characteristic> {
            let uuid = Uuid::parse_str(uuid_str)
                .map_err(|e| LiftError::Other(format!("invalid characteristic UUID: {e}")))?;
            service
                .characteristics
                .iter()
                .find(|c| c.uuid == uuid)
                .cloned()
                .ok_or_else(|| {
                    LiftError::ConnectionFailed(format!("characteristic {uuid_str} not found"))
                })
        };

        let command_char = find_char(TRAINER_COMMAND_CHAR_UUID)?;
        progress.command_char_found = true;
        let telemetry_char = find_char(TRAINER_TELEMETRY_CHAR_UUID)?;
        progress.telemetry_char_found = true;
        let rep_char = find_char(TRAINER_REP_CHAR_UUID)?;
        let status_char = find_char(TRAINER_STATUS_CHAR_UUID)?;

        peripheral.subscribe(&rep_char).await?;
        progress.rep_subscribed = true;
        peripheral.subscribe(&status_char).await?;
        progress.status_subscribed = true;

        let (notification_tx, notification_rx) = mpsc::unbounded_channel();
        let dispatch = tokio::spawn(dispatch_notifications(
            peripheral.clone(),
            rep_char.uuid,
            status_char.uuid,
            notification_tx,
        ));

        info!(name = %trainer.name, "link negotiation complete");

        Ok(TrainerConnection {
            peripheral,
            command_char,
            telemetry_char,
            progress,
            notification_rx: Mutex::new(Some(notification_rx)),
            dispatch_task: dispatch,
        })
    }

    async fn identify_trainer(peripheral: &Peripheral) -> Option<DiscoveredTrainer> {
        let properties = peripheral.properties().await.ok()??;
        let name = properties.local_name?;
        let model = HardwareModel::from_advertised_name(&name)?;

        Some(DiscoveredTrainer {
            name,
            address: properties.address.to_string(),
            model,
            rssi: properties.rssi.unwrap_or(0),
        })
    }
}

/// Route the shared notification stream to a typed channel
///
/// Frames from unrelated characteristics are dropped here so downstream
/// consumers only ever see rep and status frames.
async fn dispatch_notifications(
    peripheral: Peripheral,
    rep_uuid: Uuid,
    status_uuid: Uuid,
    sender: mpsc::UnboundedSender<RawNotification>,
) {
    let mut stream = match peripheral.notifications().await {
        Ok(stream) => stream,
        Err(e) => {
            warn!("failed to open notification stream: {e}");
            return;
        }
    };

    while let Some(data) = stream.next().await {
        let routed = if data.uuid == rep_uuid {
            RawNotification::Rep(data.value)
        } else if data.uuid == status_uuid {
            RawNotification::Status(data.value)
        } else {
            continue;
        };

        if sender.send(routed).is_err() {
            break;
        }
    }

    debug!("notification stream closed");
}

/// Active, fully negotiated connection to a trainer
pub struct TrainerConnection {
    peripheral: Peripheral,
    command_char: Characteristic,
    telemetry_char: Characteristic,
    progress: NegotiationProgress,
    notification_rx: Mutex<Option<mpsc::UnboundedReceiver<RawNotification>>>,
    dispatch_task: tokio::task::JoinHandle<()>,
}

impl TrainerConnection {
    /// Negotiation checklist for this link
    #[must_use]
    pub const fn progress(&self) -> &NegotiationProgress {
        &self.progress
    }

    /// Take the notification receiver; yields once, to the session owner
    pub async fn take_notifications(&self) -> Option<mpsc::UnboundedReceiver<RawNotification>> {
        self.notification_rx.lock().await.take()
    }

    /// Tear the link down
    ///
    /// Stops the notification dispatch task and closes the peripheral.
    /// Must complete before a new connection is constructed; overlapping
    /// link objects produce repeating short disconnect loops on some
    /// platform stacks.
    ///
    /// # Errors
    ///
    /// Returns [`LiftError::Ble`] if disconnection fails.
    pub async fn teardown(&self) -> Result<()> {
        self.dispatch_task.abort();
        self.peripheral.disconnect().await?;
        Ok(())
    }

    /// Peripheral address
    #[must_use]
    pub fn address(&self) -> BDAddr {
        self.peripheral.address()
    }
}

#[async_trait]
impl Transport for TrainerConnection {
    async fn write_frame(&self, frame: &[u8]) -> Result<()> {
        debug!("writing frame: {:02X?}", frame);
        self.peripheral
            .write(&self.command_char, frame, WriteType::WithoutResponse)
            .await
            .map_err(LiftError::Ble)
    }

    async fn read_telemetry(&self) -> Result<Vec<u8>> {
        self.peripheral
            .read(&self.telemetry_char)
            .await
            .map_err(LiftError::Ble)
    }

    async fn is_connected(&self) -> bool {
        self.peripheral.is_connected().await.unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_parsing() {
        for uuid in [
            TRAINER_SERVICE_UUID,
            TRAINER_COMMAND_CHAR_UUID,
            TRAINER_TELEMETRY_CHAR_UUID,
            TRAINER_REP_CHAR_UUID,
            TRAINER_STATUS_CHAR_UUID,
        ] {
            assert!(Uuid::parse_str(uuid).is_ok());
        }
    }

    #[test]
    fn test_negotiation_progress_checklist() {
        let mut progress = NegotiationProgress::default();
        assert!(!progress.is_ready());
        assert_eq!(progress.missing_step(), Some("link not established"));

        progress.connected = true;
        progress.service_discovered = true;
        progress.command_char_found = true;
        progress.telemetry_char_found = true;
        assert!(!progress.is_ready());
        assert_eq!(progress.missing_step(), Some("rep notifications not subscribed"));

        progress.rep_subscribed = true;
        progress.status_subscribed = true;
        assert!(progress.is_ready());
        assert_eq!(progress.missing_step(), None);
    }
}
