//! A connected armband and the operations that can be run against it.
//!
//! [`DeviceSession`] owns the transport for the lifetime of a connection.
//! Command writes are serialised through a single lock so that each frame is
//! acknowledged before the next one is sent. Every characteristic subscribed
//! through the session is remembered so that teardown can unsubscribe all of
//! them.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use myo_types::uuid::{BASIC_INFO, BATTERY_LEVEL, COMMAND, DEVICE_NAME, FIRMWARE_VERSION};
use myo_types::{CharacteristicCode, Command, DeviceInfo, FirmwareVersion, ModeConfig, ParseError};

use crate::error::{Error, Result};
use crate::traits::{Connector, NotificationHandler, Transport};

/// An open connection to a Myo armband.
pub struct DeviceSession<T: Transport> {
    transport: Arc<T>,
    command_lock: Mutex<()>,
    subscriptions: Mutex<Vec<Uuid>>,
    disconnected: AtomicBool,
}

impl<T: Transport> DeviceSession<T> {
    /// Connect to the device at `address`.
    #[instrument(level = "debug", skip(connector))]
    pub async fn connect<C>(connector: &C, address: &str) -> Result<Self>
    where
        C: Connector<Transport = T>,
    {
        let transport = connector.connect(address).await?;
        info!("Connected to {}", transport.address());
        Ok(Self::from_transport(transport))
    }

    /// Wrap an already connected transport.
    pub fn from_transport(transport: T) -> Self {
        Self {
            transport: Arc::new(transport),
            command_lock: Mutex::new(()),
            subscriptions: Mutex::new(Vec::new()),
            disconnected: AtomicBool::new(false),
        }
    }

    /// Connect, run `f`, then disconnect whether or not `f` succeeded.
    ///
    /// ```ignore
    /// let info = DeviceSession::scoped(&connector, address, |session| async move {
    ///     session.read_device_info().await
    /// })
    /// .await?;
    /// ```
    pub async fn scoped<C, F, Fut, R>(connector: &C, address: &str, f: F) -> Result<R>
    where
        C: Connector<Transport = T>,
        F: FnOnce(Arc<Self>) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let session = Arc::new(Self::connect(connector, address).await?);
        let result = f(Arc::clone(&session)).await;
        if let Err(e) = session.unsubscribe_all().await {
            warn!("Unsubscribe after scoped session failed: {}", e);
        }
        if let Err(e) = session.disconnect().await {
            warn!("Disconnect after scoped session failed: {}", e);
        }
        result
    }

    pub fn address(&self) -> &str {
        self.transport.address()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.is_disconnected() {
            return Err(Error::NotConnected);
        }
        Ok(())
    }

    /// Write a raw frame to the command characteristic.
    ///
    /// Writes from concurrent callers are applied one at a time, each
    /// waiting for the transport's acknowledgement. A failed write is
    /// returned as-is and never retried.
    pub async fn run_command(&self, frame: &[u8]) -> Result<()> {
        self.ensure_connected()?;
        let _guard = self.command_lock.lock().await;
        debug!("Writing command frame {:02x?}", frame);
        self.transport.write(COMMAND.uuid(), frame).await
    }

    /// Encode and write one command.
    pub async fn execute(&self, command: &Command) -> Result<()> {
        debug!("Sending {}", command);
        self.run_command(&command.encode()).await
    }

    /// Unlock, set the sleep policy and then select the streaming modes.
    ///
    /// Stops at the first failed write.
    #[instrument(level = "debug", skip(self))]
    pub async fn configure(&self, mode: &ModeConfig) -> Result<()> {
        for command in mode.commands() {
            self.execute(&command).await?;
        }
        info!(
            "Configured {}: emg={:?} imu={:?} classifier={:?}",
            self.address(),
            mode.emg,
            mode.imu,
            mode.classifier
        );
        Ok(())
    }

    /// Read a characteristic by UUID.
    pub async fn read_characteristic(&self, uuid: Uuid) -> Result<Vec<u8>> {
        self.ensure_connected()?;
        self.transport.read(uuid).await
    }

    /// Read a vendor characteristic by short code.
    pub async fn read_code(&self, code: CharacteristicCode) -> Result<Vec<u8>> {
        self.read_characteristic(code.uuid()).await
    }

    pub async fn read_device_info(&self) -> Result<DeviceInfo> {
        let data = self.read_code(BASIC_INFO).await?;
        Ok(DeviceInfo::from_bytes(&data)?)
    }

    pub async fn read_firmware_version(&self) -> Result<FirmwareVersion> {
        let data = self.read_code(FIRMWARE_VERSION).await?;
        Ok(FirmwareVersion::from_bytes(&data)?)
    }

    /// Battery level in percent, from the standard battery service.
    pub async fn read_battery_level(&self) -> Result<u8> {
        let data = self.read_characteristic(BATTERY_LEVEL).await?;
        data.first()
            .copied()
            .ok_or_else(|| ParseError::truncated(1, 0).into())
    }

    /// Advertised device name, from the generic access service.
    pub async fn read_device_name(&self) -> Result<String> {
        let data = self.read_characteristic(DEVICE_NAME).await?;
        Ok(String::from_utf8_lossy(&data)
            .trim_end_matches('\0')
            .to_string())
    }

    /// Enable notifications on each code, in order, all delivered to
    /// `handler`.
    ///
    /// On failure the codes subscribed so far stay recorded so that
    /// [`unsubscribe_all`](Self::unsubscribe_all) can release them.
    pub async fn subscribe(
        &self,
        codes: &[CharacteristicCode],
        handler: Arc<dyn NotificationHandler>,
    ) -> Result<()> {
        self.ensure_connected()?;
        for code in codes {
            let uuid = code.uuid();
            self.transport
                .start_notify(uuid, Arc::clone(&handler))
                .await?;
            debug!("Subscribed to {}", code);
            self.subscriptions.lock().await.push(uuid);
        }
        Ok(())
    }

    /// Disable notifications on each code.
    ///
    /// Keeps going past failures and returns the first one.
    pub async fn unsubscribe(&self, codes: &[CharacteristicCode]) -> Result<()> {
        let uuids: Vec<Uuid> = codes.iter().map(|code| code.uuid()).collect();
        self.stop_notifications(&uuids).await
    }

    /// Disable notifications on every characteristic this session
    /// subscribed to.
    pub async fn unsubscribe_all(&self) -> Result<()> {
        let uuids = self.subscriptions.lock().await.clone();
        self.stop_notifications(&uuids).await
    }

    async fn stop_notifications(&self, uuids: &[Uuid]) -> Result<()> {
        let mut first_error = None;
        for uuid in uuids {
            match self.transport.stop_notify(*uuid).await {
                Ok(()) => debug!("Unsubscribed from {}", uuid),
                Err(e) => {
                    warn!("Failed to unsubscribe from {}: {}", uuid, e);
                    first_error.get_or_insert(e);
                }
            }
        }
        self.subscriptions
            .lock()
            .await
            .retain(|uuid| !uuids.contains(uuid));
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Characteristics currently subscribed through this session.
    pub async fn subscriptions(&self) -> Vec<Uuid> {
        self.subscriptions.lock().await.clone()
    }

    /// Release the connection. Calling this more than once is a no-op.
    pub async fn disconnect(&self) -> Result<()> {
        if self.disconnected.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("Disconnecting from {}", self.address());
        self.transport.disconnect().await
    }
}

impl<T: Transport> Drop for DeviceSession<T> {
    fn drop(&mut self) {
        if self.disconnected.swap(true, Ordering::SeqCst) {
            return;
        }
        warn!(
            device_address = %self.transport.address(),
            "Session dropped while still connected, disconnecting in the background"
        );

        let transport = Arc::clone(&self.transport);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = transport.disconnect().await {
                    debug!(error = %e, "Best-effort disconnect failed");
                }
            });
        }
    }
}

impl<T: Transport> std::fmt::Debug for DeviceSession<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("address", &self.address())
            .field("disconnected", &self.is_disconnected())
            .finish_non_exhaustive()
    }
}
