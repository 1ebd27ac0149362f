//! In-memory transport for testing.
//!
//! [`MockTransport`] records every GATT operation, serves preset
//! characteristic values and delivers notifications injected by the test
//! straight to the registered handler, the same way a real transport's
//! delivery path would.
//!
//! # Features
//!
//! - **Failure injection**: fail specific command opcodes, subscriptions,
//!   unsubscriptions or connection attempts
//! - **Latency simulation**: delay command writes to expose ordering bugs
//! - **Call log**: assert on the exact sequence of transport operations
//!
//! ```
//! use myo_core::mock::{MockConnector, MockTransport};
//! use myo_core::{DeviceSession, ModeConfig};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let transport = MockTransport::new("F3:F8:2E:FB:8C:3C");
//! let connector = MockConnector::new(transport.clone());
//!
//! let session = DeviceSession::connect(&connector, "F3:F8:2E:FB:8C:3C").await.unwrap();
//! session.configure(&ModeConfig::default()).await.unwrap();
//! assert_eq!(transport.writes().len(), 3);
//! session.disconnect().await.unwrap();
//! # }
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::traits::{Connector, NotificationHandler, Transport};

/// One operation observed by a [`MockTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    /// An acknowledged write.
    Write { characteristic: Uuid, data: Vec<u8> },
    Read(Uuid),
    /// A successful notification registration.
    StartNotify(Uuid),
    /// A successful notification removal.
    StopNotify(Uuid),
    Disconnect,
}

#[derive(Default)]
struct MockState {
    address: String,
    connected: AtomicBool,
    values: Mutex<HashMap<Uuid, Vec<u8>>>,
    handlers: RwLock<HashMap<Uuid, Arc<dyn NotificationHandler>>>,
    queued: Mutex<HashMap<Uuid, Vec<Vec<u8>>>>,
    calls: Mutex<Vec<TransportCall>>,
    failing_opcodes: Mutex<HashSet<u8>>,
    failing_subscribes: Mutex<HashSet<Uuid>>,
    failing_unsubscribes: Mutex<HashSet<Uuid>>,
    fail_reads: AtomicBool,
    write_latency_ms: AtomicU64,
    writes_in_flight: AtomicUsize,
    max_writes_in_flight: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A transport backed by memory. Clones share state.
#[derive(Clone)]
pub struct MockTransport {
    state: Arc<MockState>,
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("address", &self.state.address)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl MockTransport {
    /// Create a connected transport for `address`.
    pub fn new(address: &str) -> Self {
        let state = MockState {
            address: address.to_string(),
            connected: AtomicBool::new(true),
            ..Default::default()
        };
        Self {
            state: Arc::new(state),
        }
    }

    /// Preset the value returned when `characteristic` is read.
    pub fn set_value(&self, characteristic: Uuid, value: Vec<u8>) {
        lock(&self.state.values).insert(characteristic, value);
    }

    /// Fail every command write whose first byte is `opcode`.
    pub fn fail_command(&self, opcode: u8) {
        lock(&self.state.failing_opcodes).insert(opcode);
    }

    /// Fail notification registration on `characteristic`.
    pub fn fail_subscribe(&self, characteristic: Uuid) {
        lock(&self.state.failing_subscribes).insert(characteristic);
    }

    /// Fail notification removal on `characteristic`.
    pub fn fail_unsubscribe(&self, characteristic: Uuid) {
        lock(&self.state.failing_unsubscribes).insert(characteristic);
    }

    /// Make every read fail.
    pub fn set_fail_reads(&self, fail: bool) {
        self.state.fail_reads.store(fail, Ordering::Relaxed);
    }

    /// Delay every write by `latency`.
    pub fn set_write_latency(&self, latency: Duration) {
        self.state
            .write_latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Queue a notification that is delivered as soon as `characteristic`
    /// is subscribed, as if the device were already streaming.
    pub fn queue_notification(&self, characteristic: Uuid, data: Vec<u8>) {
        lock(&self.state.queued)
            .entry(characteristic)
            .or_default()
            .push(data);
    }

    /// Deliver a notification now. Returns `false` if nothing is
    /// subscribed to `sender`.
    pub fn notify(&self, sender: Uuid, data: &[u8]) -> bool {
        let handler = self
            .state
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&sender)
            .cloned();
        match handler {
            Some(handler) => {
                handler.on_notification(sender, data);
                true
            }
            None => false,
        }
    }

    pub fn is_subscribed(&self, characteristic: Uuid) -> bool {
        self.state
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&characteristic)
    }

    pub fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::SeqCst)
    }

    /// Every recorded operation, oldest first.
    pub fn calls(&self) -> Vec<TransportCall> {
        lock(&self.state.calls).clone()
    }

    /// Acknowledged writes as `(characteristic, data)`.
    pub fn writes(&self) -> Vec<(Uuid, Vec<u8>)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                TransportCall::Write {
                    characteristic,
                    data,
                } => Some((characteristic, data)),
                _ => None,
            })
            .collect()
    }

    pub fn started_notifications(&self) -> Vec<Uuid> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                TransportCall::StartNotify(uuid) => Some(uuid),
                _ => None,
            })
            .collect()
    }

    pub fn stopped_notifications(&self) -> Vec<Uuid> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                TransportCall::StopNotify(uuid) => Some(uuid),
                _ => None,
            })
            .collect()
    }

    /// Highest number of writes that were ever in progress at once.
    pub fn max_concurrent_writes(&self) -> usize {
        self.state.max_writes_in_flight.load(Ordering::SeqCst)
    }

    fn record(&self, call: TransportCall) {
        lock(&self.state.calls).push(call);
    }

    fn ensure_connected(&self) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        Ok(())
    }

    fn reconnect(&self) {
        self.state.connected.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn address(&self) -> &str {
        &self.state.address
    }

    async fn write(&self, characteristic: Uuid, data: &[u8]) -> Result<()> {
        self.ensure_connected()?;

        let in_flight = self.state.writes_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.state
            .max_writes_in_flight
            .fetch_max(in_flight, Ordering::SeqCst);

        let latency = self.state.write_latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        } else {
            tokio::task::yield_now().await;
        }
        self.state.writes_in_flight.fetch_sub(1, Ordering::SeqCst);

        let opcode = data.first().copied();
        if opcode.is_some_and(|op| lock(&self.state.failing_opcodes).contains(&op)) {
            return Err(Error::write_failed(characteristic, "mock write failure"));
        }

        self.record(TransportCall::Write {
            characteristic,
            data: data.to_vec(),
        });
        Ok(())
    }

    async fn read(&self, characteristic: Uuid) -> Result<Vec<u8>> {
        self.ensure_connected()?;
        self.record(TransportCall::Read(characteristic));

        if self.state.fail_reads.load(Ordering::Relaxed) {
            return Err(Error::read_failed(characteristic, "mock read failure"));
        }
        lock(&self.state.values)
            .get(&characteristic)
            .cloned()
            .ok_or_else(|| Error::read_failed(characteristic, "no value"))
    }

    async fn start_notify(
        &self,
        characteristic: Uuid,
        handler: Arc<dyn NotificationHandler>,
    ) -> Result<()> {
        self.ensure_connected()?;
        if lock(&self.state.failing_subscribes).contains(&characteristic) {
            return Err(Error::subscription_failed(
                characteristic,
                "mock subscribe failure",
            ));
        }

        self.state
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(characteristic, Arc::clone(&handler));
        self.record(TransportCall::StartNotify(characteristic));

        let queued = lock(&self.state.queued)
            .remove(&characteristic)
            .unwrap_or_default();
        for data in queued {
            handler.on_notification(characteristic, &data);
        }
        Ok(())
    }

    async fn stop_notify(&self, characteristic: Uuid) -> Result<()> {
        if lock(&self.state.failing_unsubscribes).contains(&characteristic) {
            return Err(Error::subscription_failed(
                characteristic,
                "mock unsubscribe failure",
            ));
        }
        self.state
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&characteristic);
        self.record(TransportCall::StopNotify(characteristic));
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.state.connected.store(false, Ordering::SeqCst);
        self.state
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.record(TransportCall::Disconnect);
        Ok(())
    }
}

/// Hands out a shared [`MockTransport`] for one known address.
#[derive(Debug)]
pub struct MockConnector {
    transport: MockTransport,
    remaining_failures: AtomicU32,
    attempts: AtomicU32,
}

impl MockConnector {
    pub fn new(transport: MockTransport) -> Self {
        Self {
            transport,
            remaining_failures: AtomicU32::new(0),
            attempts: AtomicU32::new(0),
        }
    }

    /// Fail the next `count` connection attempts.
    pub fn fail_connects(&self, count: u32) {
        self.remaining_failures.store(count, Ordering::SeqCst);
    }

    /// Number of connection attempts made so far.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn transport(&self) -> &MockTransport {
        &self.transport
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Transport = MockTransport;

    async fn connect(&self, address: &str) -> Result<MockTransport> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let failed = self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed || !address.eq_ignore_ascii_case(self.transport.address()) {
            return Err(Error::device_not_found(address));
        }

        self.transport.reconnect();
        Ok(self.transport.clone())
    }
}
