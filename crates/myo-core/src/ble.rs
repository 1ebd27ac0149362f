//! btleplug-backed transport.
//!
//! [`BleConnector`] finds the armband by address (scanning if the adapter
//! has not seen it yet), connects, discovers services and caches every
//! characteristic. [`BleTransport`] then runs all GATT operations with the
//! timeouts from [`ConnectionConfig`].
//!
//! All notifications from the peripheral arrive on a single btleplug stream.
//! One background task drains it and dispatches each notification to the
//! handler registered for its characteristic.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, instrument, trace, warn};
use uuid::Uuid;

use crate::error::{DeviceNotFoundReason, Error, Result};
use crate::traits::{Connector, NotificationHandler, Transport};

/// Default timeout for establishing a connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
/// Default timeout for service discovery.
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);
/// Default timeout for reads and writes.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(10);
/// Default time spent scanning for a device the adapter has not seen.
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(10);

const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Timeouts for BLE operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub connection_timeout: Duration,
    pub discovery_timeout: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    /// How long to scan before giving up on an unseen address.
    pub scan_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connection_timeout: DEFAULT_CONNECT_TIMEOUT,
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
            read_timeout: DEFAULT_OPERATION_TIMEOUT,
            write_timeout: DEFAULT_OPERATION_TIMEOUT,
            scan_timeout: DEFAULT_SCAN_TIMEOUT,
        }
    }
}

impl ConnectionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    #[must_use]
    pub fn discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    #[must_use]
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    #[must_use]
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    #[must_use]
    pub fn scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = timeout;
        self
    }

    /// Every timeout must be non-zero.
    pub fn validate(&self) -> Result<()> {
        let timeouts = [
            ("connection_timeout", self.connection_timeout),
            ("discovery_timeout", self.discovery_timeout),
            ("read_timeout", self.read_timeout),
            ("write_timeout", self.write_timeout),
            ("scan_timeout", self.scan_timeout),
        ];
        for (name, value) in timeouts {
            if value.is_zero() {
                return Err(Error::invalid_config(format!("{} must be > 0", name)));
            }
        }
        Ok(())
    }
}

/// Get the first Bluetooth adapter.
pub async fn get_adapter() -> Result<Adapter> {
    let manager = Manager::new().await?;
    manager
        .adapters()
        .await?
        .into_iter()
        .next()
        .ok_or(Error::DeviceNotFound(DeviceNotFoundReason::NoAdapter))
}

/// Connects to armbands over the system Bluetooth adapter.
#[derive(Debug, Clone, Default)]
pub struct BleConnector {
    config: ConnectionConfig,
}

impl BleConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ConnectionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }
}

#[async_trait]
impl Connector for BleConnector {
    type Transport = BleTransport;

    async fn connect(&self, address: &str) -> Result<BleTransport> {
        BleTransport::connect(address, self.config.clone()).await
    }
}

type HandlerMap = Arc<RwLock<HashMap<Uuid, Arc<dyn NotificationHandler>>>>;

/// A connected btleplug peripheral.
pub struct BleTransport {
    peripheral: Peripheral,
    address: String,
    characteristics: HashMap<Uuid, Characteristic>,
    service_count: usize,
    handlers: HandlerMap,
    pump: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    config: ConnectionConfig,
}

impl std::fmt::Debug for BleTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BleTransport")
            .field("address", &self.address)
            .field("characteristics", &self.characteristics.len())
            .finish_non_exhaustive()
    }
}

impl BleTransport {
    /// Find, connect to and discover the device at `address`.
    #[instrument(level = "info", skip(config))]
    pub async fn connect(address: &str, config: ConnectionConfig) -> Result<Self> {
        config.validate()?;
        let adapter = get_adapter().await?;
        let peripheral = find_peripheral(&adapter, address, config.scan_timeout).await?;

        // A timed-out connect may still complete later, so every failure past
        // this point releases the link.
        let established = establish(&peripheral, &config).await;
        release_on_error(established, || peripheral.disconnect()).await?;

        let services = peripheral.services();
        let mut characteristics = HashMap::new();
        for service in &services {
            debug!("  Service: {}", service.uuid);
            for characteristic in &service.characteristics {
                trace!("    Characteristic: {}", characteristic.uuid);
                characteristics.insert(characteristic.uuid, characteristic.clone());
            }
        }
        debug!(
            "Cached {} characteristics across {} services",
            characteristics.len(),
            services.len()
        );

        Ok(Self {
            peripheral,
            address: address.to_string(),
            characteristics,
            service_count: services.len(),
            handlers: Arc::new(RwLock::new(HashMap::new())),
            pump: tokio::sync::Mutex::new(None),
            config,
        })
    }

    fn find_characteristic(&self, uuid: Uuid) -> Result<&Characteristic> {
        find_characteristic(&self.characteristics, uuid, self.service_count)
    }

    // The notification stream must exist before the first subscribe so no
    // early notification is lost.
    async fn ensure_pump(&self) -> Result<()> {
        let mut pump = self.pump.lock().await;
        if pump.is_some() {
            return Ok(());
        }

        let mut notifications = self.peripheral.notifications().await?;
        let handlers = Arc::clone(&self.handlers);
        *pump = Some(tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                let handler = handlers
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .get(&notification.uuid)
                    .cloned();
                match handler {
                    Some(handler) => {
                        handler.on_notification(notification.uuid, &notification.value)
                    }
                    None => trace!("Notification from unsubscribed {}", notification.uuid),
                }
            }
            debug!("Notification stream ended");
        }));
        Ok(())
    }

    fn set_handler(&self, uuid: Uuid, handler: Option<Arc<dyn NotificationHandler>>) {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        match handler {
            Some(handler) => handlers.insert(uuid, handler),
            None => handlers.remove(&uuid),
        };
    }
}

#[async_trait]
impl Transport for BleTransport {
    fn address(&self) -> &str {
        &self.address
    }

    async fn write(&self, characteristic: Uuid, data: &[u8]) -> Result<()> {
        let target = self
            .find_characteristic(characteristic)
            .map_err(|e| Error::write_failed(characteristic, e))?;
        gatt_op(
            self.config.write_timeout,
            self.peripheral.write(target, data, WriteType::WithResponse),
        )
        .await
        .map_err(|reason| Error::write_failed(characteristic, reason))
    }

    async fn read(&self, characteristic: Uuid) -> Result<Vec<u8>> {
        let target = self
            .find_characteristic(characteristic)
            .map_err(|e| Error::read_failed(characteristic, e))?;
        gatt_op(self.config.read_timeout, self.peripheral.read(target))
            .await
            .map_err(|reason| Error::read_failed(characteristic, reason))
    }

    async fn start_notify(
        &self,
        characteristic: Uuid,
        handler: Arc<dyn NotificationHandler>,
    ) -> Result<()> {
        let target = self
            .find_characteristic(characteristic)
            .map_err(|e| Error::subscription_failed(characteristic, e))?;
        self.ensure_pump().await?;

        self.set_handler(characteristic, Some(handler));
        let subscribed = self.peripheral.subscribe(target);
        if let Err(reason) = gatt_op(self.config.write_timeout, subscribed).await {
            self.set_handler(characteristic, None);
            return Err(Error::subscription_failed(characteristic, reason));
        }
        Ok(())
    }

    async fn stop_notify(&self, characteristic: Uuid) -> Result<()> {
        let target = self
            .find_characteristic(characteristic)
            .map_err(|e| Error::subscription_failed(characteristic, e))?;
        self.set_handler(characteristic, None);
        gatt_op(self.config.write_timeout, self.peripheral.unsubscribe(target))
            .await
            .map_err(|reason| Error::subscription_failed(characteristic, reason))
    }

    async fn disconnect(&self) -> Result<()> {
        if let Some(pump) = self.pump.lock().await.take() {
            pump.abort();
        }
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.peripheral.disconnect().await?;
        Ok(())
    }
}

impl Drop for BleTransport {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.get_mut().take() {
            pump.abort();
        }
    }
}

async fn establish(peripheral: &Peripheral, config: &ConnectionConfig) -> Result<()> {
    info!("Connecting to device...");
    timeout(config.connection_timeout, peripheral.connect())
        .await
        .map_err(|_| Error::timeout("connect to device", config.connection_timeout))??;

    info!("Discovering services...");
    timeout(config.discovery_timeout, peripheral.discover_services())
        .await
        .map_err(|_| Error::timeout("discover services", config.discovery_timeout))??;
    Ok(())
}

/// Run `release` if `result` is an error, keeping the original error.
async fn release_on_error<T, F, Fut>(result: Result<T>, release: F) -> Result<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = std::result::Result<(), btleplug::Error>>,
{
    if let Err(e) = &result {
        debug!("Releasing connection after failed setup: {}", e);
        if let Err(release_err) = release().await {
            warn!("Failed to release connection: {}", release_err);
        }
    }
    result
}

/// Run one GATT operation under `limit`. Timeouts and stack errors both come
/// back as a reason for the caller's transport error.
async fn gatt_op<T, Fut>(limit: Duration, operation: Fut) -> std::result::Result<T, String>
where
    Fut: Future<Output = std::result::Result<T, btleplug::Error>>,
{
    match timeout(limit, operation).await {
        Ok(result) => result.map_err(|e| e.to_string()),
        Err(_) => Err(format!("timed out after {:?}", limit)),
    }
}

fn find_characteristic(
    characteristics: &HashMap<Uuid, Characteristic>,
    uuid: Uuid,
    service_count: usize,
) -> Result<&Characteristic> {
    characteristics
        .get(&uuid)
        .ok_or(Error::CharacteristicNotFound {
            uuid,
            service_count,
        })
}

async fn find_peripheral(
    adapter: &Adapter,
    address: &str,
    scan_timeout: Duration,
) -> Result<Peripheral> {
    info!("Looking for device: {}", address);
    if let Some(peripheral) = lookup_known(adapter, address).await? {
        debug!("Found device without scanning");
        return Ok(peripheral);
    }

    adapter.start_scan(ScanFilter::default()).await?;
    let found = timeout(scan_timeout, async {
        loop {
            if let Some(peripheral) = lookup_known(adapter, address).await? {
                return Ok::<_, Error>(peripheral);
            }
            sleep(SCAN_POLL_INTERVAL).await;
        }
    })
    .await;
    if let Err(e) = adapter.stop_scan().await {
        warn!("Failed to stop scan: {}", e);
    }

    match found {
        Ok(result) => result,
        Err(_) => Err(Error::device_not_found(address)),
    }
}

async fn lookup_known(adapter: &Adapter, address: &str) -> Result<Option<Peripheral>> {
    for peripheral in adapter.peripherals().await? {
        let Ok(Some(properties)) = peripheral.properties().await else {
            continue;
        };
        let peripheral_address = properties.address.to_string();
        let peripheral_id = format_peripheral_id(&peripheral.id());
        if address_matches(address, &peripheral_address, &peripheral_id) {
            return Ok(Some(peripheral));
        }
    }
    Ok(None)
}

fn format_peripheral_id(id: &PeripheralId) -> String {
    format!("{:?}", id)
        .trim_start_matches("PeripheralId(")
        .trim_end_matches(')')
        .to_string()
}

fn normalize_address(address: &str) -> String {
    address
        .chars()
        .filter(|c| c.is_ascii_hexdigit())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Match a user-supplied address against a peripheral's MAC address, or its
/// platform id where the MAC is hidden (macOS reports all zeroes).
fn address_matches(wanted: &str, peripheral_address: &str, peripheral_id: &str) -> bool {
    let wanted = normalize_address(wanted);
    if wanted.is_empty() {
        return false;
    }
    let mac = normalize_address(peripheral_address);
    if !mac.is_empty() && mac.chars().any(|c| c != '0') && mac == wanted {
        return true;
    }
    normalize_address(peripheral_id) == wanted
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_config_defaults_and_builder() {
        let config = ConnectionConfig::new()
            .write_timeout(Duration::from_secs(2))
            .scan_timeout(Duration::from_secs(30));
        assert_eq!(config.connection_timeout, DEFAULT_CONNECT_TIMEOUT);
        assert_eq!(config.write_timeout, Duration::from_secs(2));
        assert_eq!(config.scan_timeout, Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_rejects_zero_timeout() {
        let err = ConnectionConfig::new()
            .read_timeout(Duration::ZERO)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("read_timeout"));
    }

    #[test]
    fn test_address_matching() {
        let zero = "00:00:00:00:00:00";
        assert!(address_matches("F3:F8:2E:FB:8C:3C", "f3:f8:2e:fb:8c:3c", "hci0/dev_x"));
        assert!(address_matches("f3f82efb8c3c", "F3:F8:2E:FB:8C:3C", ""));
        assert!(!address_matches("F3:F8:2E:FB:8C:3D", "F3:F8:2E:FB:8C:3C", ""));
        assert!(!address_matches("00:00:00:00:00:00", zero, "abcd"));
        assert!(address_matches(
            "6a7b2c1d-0000-4e5f-9a8b-112233445566",
            zero,
            "6A7B2C1D-0000-4E5F-9A8B-112233445566"
        ));
        assert!(!address_matches("", "F3:F8:2E:FB:8C:3C", ""));
    }

    #[tokio::test]
    async fn test_failed_setup_releases_connection() {
        let releases = AtomicUsize::new(0);
        let failed: Result<()> = Err(Error::timeout("discover services", Duration::from_secs(10)));
        let err = release_on_error(failed, || async {
            releases.fetch_add(1, Ordering::SeqCst);
            Ok::<(), btleplug::Error>(())
        })
        .await
        .unwrap_err();

        assert!(matches!(err, Error::Timeout { .. }));
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_release_failure_keeps_setup_error() {
        let failed: Result<()> = Err(Error::NotConnected);
        let err = release_on_error(failed, || async { Err::<(), _>(btleplug::Error::NotConnected) })
        .await
        .unwrap_err();
        assert!(matches!(err, Error::NotConnected));
    }

    #[tokio::test]
    async fn test_successful_setup_keeps_connection() {
        let releases = AtomicUsize::new(0);
        release_on_error(Ok(()), || async {
            releases.fetch_add(1, Ordering::SeqCst);
            Ok::<(), btleplug::Error>(())
        })
        .await
        .unwrap();
        assert_eq!(releases.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gatt_op_timeout_is_a_reason() {
        let reason = gatt_op(
            Duration::from_secs(2),
            std::future::pending::<std::result::Result<(), btleplug::Error>>(),
        )
        .await
        .unwrap_err();
        assert!(reason.contains("timed out"));

        let err = Error::write_failed(Uuid::nil(), reason);
        assert!(matches!(err, Error::TransportWrite { .. }));
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn test_gatt_op_passes_stack_errors_through() {
        let reason = gatt_op(Duration::from_secs(2), async {
            Err::<Vec<u8>, _>(btleplug::Error::NotConnected)
        })
        .await
        .unwrap_err();
        assert!(!reason.is_empty());

        let value = gatt_op(Duration::from_secs(2), async {
            Ok::<_, btleplug::Error>(vec![7u8])
        })
        .await
        .unwrap();
        assert_eq!(value, vec![7]);
    }

    #[test]
    fn test_missing_characteristic_is_a_subscription_error() {
        let uuid = myo_types::uuid::EMG_DATA[0].uuid();
        let err = find_characteristic(&HashMap::new(), uuid, 3).unwrap_err();
        assert!(err.to_string().contains("3 services"));

        let err = Error::subscription_failed(uuid, err);
        assert!(matches!(err, Error::Subscription { characteristic, .. } if characteristic == uuid));
        assert!(err.is_transport());
    }

    #[test]
    fn test_normalize_address() {
        assert_eq!(normalize_address("F3:F8:2E:FB:8C:3C"), "f3f82efb8c3c");
        assert_eq!(normalize_address("f3-f8-2e"), "f3f82e");
    }
}
