//! The protocol engine: request/response semantics on top of lossy UDP.
//!
//! # Data flow
//!
//! ```text
//! read_coil / write_coil
//!   └─ coil codec (encode) ─ frame codec (request) ─ Transport::send_to
//!                                                         │
//!                                          [NibeGW gateway ⇄ RS485 bus]
//!                                                         │
//! receive loop ─ Transport::recv ─ frame codec (decode_all, resync)
//!   └─ on_frame_received ─ coil codec (decode) ─┬─ pending caller
//!                                               └─ UpdateSink
//! ```
//!
//! Reads go to the gateway's read port, writes to its write port.  The
//! gateway sends everything from the bus (responses, periodic telemetry and
//! product announcements) to our listening socket.
//!
//! # Concurrency
//!
//! One receive task per engine.  Callers suspend on a oneshot that the
//! receive task completes.  The pending tables sit behind one
//! `std::sync::Mutex`; each critical section is a single lookup/insert/remove
//! and never spans an `.await`.  Dropping a `read_coil`/`write_coil` future
//! removes its entry through a drop guard and releases its gate.
//!
//! Reads queue per register.  Writes share a single gate: a write
//! acknowledgement does not say which register it belongs to, so only one
//! write may be outstanding at a time.

use std::fmt;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use nibe_core::coil::{self, CoilData, CoilError, CoilValue, RegisterCatalog};
use nibe_core::protocol::{
    decode_all, encode_request, payload, Command, Frame, FrameError, PayloadError, ProductInfo, RmuData,
    SequenceCounter,
};
use thiserror::Error;
use tokio::sync::{oneshot, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::application::pending::{PendingRequest, PendingTable};
use crate::application::retry::RetryPolicy;
use crate::application::sink::{Update, UpdateSink};

/// Gateway port that accepts read requests.
pub const DEFAULT_READ_PORT: u16 = 9999;

/// Gateway port that accepts write requests.
pub const DEFAULT_WRITE_PORT: u16 = 10000;

/// How long [`Gateway::first_product_info`] waits when nothing else is configured.
pub const DEFAULT_PRODUCT_INFO_TIMEOUT: Duration = Duration::from_secs(20);

/// Heat pump setting telling the MODBUS40 interface how to order 32-bit words.
pub const WORD_SWAP_REGISTER: u16 = 48852;

/// Registers whose write is accepted and ignored by the pump, used to check
/// that requests get through: F-series first, then S-series.
const ALARM_RESET_REGISTERS: [&str; 2] = ["alarm-reset-45171", "reset-alarm-40023"];

/// Pause after a failed `recv` so a broken socket does not spin the loop.
const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(100);

// ── Errors ────────────────────────────────────────────────────────────────────

/// Failures reported to `read_coil`, `write_coil` and friends.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("register {address} is not in the catalog")]
    UnknownCoil { address: u16 },

    #[error(transparent)]
    Encode(#[from] CoilError),

    #[error("failed to decode response for register {address}: {source}")]
    Decode {
        address: u16,
        #[source]
        source: CoilError,
    },

    #[error("failed to build request frame: {0}")]
    Frame(#[from] FrameError),

    #[error("failed to build request payload: {0}")]
    Payload(#[from] PayloadError),

    #[error("no response for register {address} after {attempts} attempts")]
    ReadTimeout { address: u16, attempts: u32 },

    #[error("no write acknowledgement for register {address} after {attempts} attempts")]
    WriteTimeout { address: u16, attempts: u32 },

    #[error("heat pump rejected the write to register {address}")]
    WriteRejected { address: u16 },

    #[error("no product announcement within {timeout:?}")]
    ProductInfoTimeout { timeout: Duration },

    #[error("gateway address unknown: configure remote_ip or wait for the first datagram")]
    RemoteUnknown,

    #[error("no alarm reset register in the catalog")]
    NoAlarmResetRegister,

    #[error("failed to send to {destination}: {source}")]
    Send {
        destination: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("engine stopped")]
    Stopped,
}

// ── Collaborators ─────────────────────────────────────────────────────────────

/// Datagram transport between the host and the gateway.
///
/// The production implementation wraps a tokio UDP socket; tests use an
/// in-memory double.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends one datagram.
    async fn send_to(&self, bytes: &[u8], destination: SocketAddr) -> io::Result<()>;

    /// Waits for the next datagram and its source address.
    async fn recv(&self) -> io::Result<(Vec<u8>, SocketAddr)>;
}

/// Lifecycle of the engine as seen by observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Constructed, receive loop not started.
    Idle,
    /// `start` called, receive loop being spawned.
    Connecting,
    /// Receive loop running, nothing heard from the gateway yet.
    Listening,
    /// At least one valid frame received.
    Connected,
    /// Receive loop ended.
    Stopped,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Listening => "listening",
            ConnectionState::Connected => "connected",
            ConnectionState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Engine tuning that does not change after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    /// Gateway IP.  `None` adopts the source of the first datagram received.
    pub remote_ip: Option<IpAddr>,
    pub read_port: u16,
    pub write_port: u16,
    /// Initial word order for 32-bit registers; see [`Gateway::detect_word_swap`].
    pub word_swap: bool,
    pub read_policy: RetryPolicy,
    pub write_policy: RetryPolicy,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            remote_ip: None,
            read_port: DEFAULT_READ_PORT,
            write_port: DEFAULT_WRITE_PORT,
            word_swap: false,
            read_policy: RetryPolicy::default(),
            write_policy: RetryPolicy::default(),
        }
    }
}

// ── Engine ────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Pending {
    reads: PendingTable<CoilData>,
    writes: PendingTable<()>,
}

fn reads(pending: &mut Pending) -> &mut PendingTable<CoilData> {
    &mut pending.reads
}

fn writes(pending: &mut Pending) -> &mut PendingTable<()> {
    &mut pending.writes
}

type TableSelector<T> = fn(&mut Pending) -> &mut PendingTable<T>;

struct Shared {
    catalog: Arc<RegisterCatalog>,
    transport: Arc<dyn Transport>,
    sink: Arc<dyn UpdateSink>,
    settings: EngineSettings,
    word_swap: AtomicBool,
    remote_ip: Mutex<Option<IpAddr>>,
    pending: Mutex<Pending>,
    write_turn: Arc<AsyncMutex<()>>,
    ids: SequenceCounter,
    state: watch::Sender<ConnectionState>,
    product_info: watch::Sender<Option<ProductInfo>>,
    shutdown: watch::Sender<bool>,
}

/// Handle to a running (or not yet started) protocol engine.
///
/// Cheap to clone; all clones drive the same engine.
#[derive(Clone)]
pub struct Gateway {
    shared: Arc<Shared>,
}

impl Gateway {
    pub fn new(
        catalog: Arc<RegisterCatalog>,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn UpdateSink>,
        settings: EngineSettings,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Idle);
        let (product_info, _) = watch::channel(None);
        let (shutdown, _) = watch::channel(false);

        Self {
            shared: Arc::new(Shared {
                catalog,
                transport,
                sink,
                word_swap: AtomicBool::new(settings.word_swap),
                remote_ip: Mutex::new(settings.remote_ip),
                settings,
                pending: Mutex::new(Pending::default()),
                write_turn: Arc::default(),
                ids: SequenceCounter::new(),
                state,
                product_info,
                shutdown,
            }),
        }
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    /// Spawns the receive loop.  The returned handle finishes after [`stop`](Self::stop).
    pub fn start(&self) -> JoinHandle<()> {
        let shared = Arc::clone(&self.shared);
        let mut shutdown = shared.shutdown.subscribe();
        shared.set_state(ConnectionState::Connecting);

        tokio::spawn(async move {
            shared.set_state(ConnectionState::Listening);
            info!("receive loop started");

            loop {
                if *shutdown.borrow() {
                    break;
                }
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    received = shared.transport.recv() => match received {
                        Ok((bytes, source)) => shared.on_datagram(&bytes, source),
                        Err(e) => {
                            warn!(error = %e, "receive failed");
                            tokio::time::sleep(RECV_ERROR_BACKOFF).await;
                        }
                    },
                }
            }

            shared.lock_pending().reads.clear();
            shared.lock_pending().writes.clear();
            shared.set_state(ConnectionState::Stopped);
            info!("receive loop stopped");
        })
    }

    /// Ends the receive loop.  Callers still waiting fail with
    /// [`GatewayError::Stopped`].
    pub fn stop(&self) {
        self.shared.shutdown.send_replace(true);
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    pub fn catalog(&self) -> &RegisterCatalog {
        &self.shared.catalog
    }

    /// Gateway IP, configured or discovered.
    pub fn remote_ip(&self) -> Option<IpAddr> {
        *self.shared.lock_remote()
    }

    pub fn word_swap(&self) -> bool {
        self.shared.word_swap.load(Ordering::Relaxed)
    }

    pub fn set_word_swap(&self, word_swap: bool) {
        self.shared.word_swap.store(word_swap, Ordering::Relaxed);
    }

    // ── Requests ──────────────────────────────────────────────────────────────

    /// Reads one register.
    ///
    /// # Errors
    ///
    /// [`GatewayError::UnknownCoil`] for addresses outside the catalog,
    /// [`GatewayError::ReadTimeout`] when every attempt went unanswered, and
    /// [`GatewayError::Decode`] when the response could not be decoded.
    pub async fn read_coil(&self, address: u16) -> Result<CoilData, GatewayError> {
        let shared = &self.shared;
        if !shared.catalog.contains(address) {
            return Err(GatewayError::UnknownCoil { address });
        }

        let frame = encode_request(Command::ReadRequest, &payload::read_request(address))?;
        let destination = shared.destination(shared.settings.read_port)?;
        let policy = shared.settings.read_policy;
        let gate = shared.lock_pending().reads.gate(address);

        debug!(address, "reading register");
        shared
            .exchange(reads, gate, address, frame, destination, policy, |address, attempts| {
                GatewayError::ReadTimeout { address, attempts }
            })
            .await
    }

    /// Writes one register.
    ///
    /// The value is validated and encoded before anything is sent.
    ///
    /// # Errors
    ///
    /// [`GatewayError::Encode`] when the value is rejected locally,
    /// [`GatewayError::WriteRejected`] when the heat pump refuses it and
    /// [`GatewayError::WriteTimeout`] when no acknowledgement arrives.
    ///
    /// Writes are sent one at a time; a second write waits until the first
    /// has been acknowledged or has failed.
    pub async fn write_coil(&self, address: u16, value: CoilValue) -> Result<(), GatewayError> {
        let shared = &self.shared;
        let definition = shared
            .catalog
            .get(address)
            .ok_or(GatewayError::UnknownCoil { address })?;

        let raw = coil::encode(definition, &value, shared.word_swap.load(Ordering::Relaxed))?;
        let frame = encode_request(Command::WriteRequest, &payload::write_request(address, &raw)?)?;
        let destination = shared.destination(shared.settings.write_port)?;
        let policy = shared.settings.write_policy;

        let gate = Arc::clone(&shared.write_turn);

        debug!(address, %value, "writing register");
        shared
            .exchange(writes, gate, address, frame, destination, policy, |address, attempts| {
                GatewayError::WriteTimeout { address, attempts }
            })
            .await?;
        info!(address, %value, "write accepted");
        Ok(())
    }

    /// Reads the pump's word-swap setting and adopts the matching word order.
    ///
    /// With the pump setting ON, 32-bit values already arrive in plain
    /// little-endian order; with it OFF their 16-bit words are swapped.
    ///
    /// # Errors
    ///
    /// Any error of [`read_coil`](Self::read_coil); the current setting is
    /// kept in that case.
    pub async fn detect_word_swap(&self) -> Result<bool, GatewayError> {
        let data = self.read_coil(WORD_SWAP_REGISTER).await?;
        let pump_setting_on = match &data.value {
            CoilValue::Label(label) => label.eq_ignore_ascii_case("on"),
            CoilValue::Number(n) => *n != 0.0,
        };

        let word_swap = !pump_setting_on;
        self.set_word_swap(word_swap);
        info!(pump_setting = %data.value, word_swap, "word swap setting detected");
        Ok(word_swap)
    }

    /// Checks that requests reach the heat pump by reading the alarm reset
    /// register and writing `0` back, which the pump accepts and ignores.
    ///
    /// # Errors
    ///
    /// [`GatewayError::NoAlarmResetRegister`] when the catalog has neither
    /// alarm reset register, otherwise any error of the read or the write.
    pub async fn verify_connectivity(&self) -> Result<(), GatewayError> {
        let address = ALARM_RESET_REGISTERS
            .iter()
            .find_map(|name| self.shared.catalog.get_by_name(name))
            .map(|definition| definition.address)
            .ok_or(GatewayError::NoAlarmResetRegister)?;

        self.read_coil(address).await?;
        self.write_coil(address, CoilValue::Number(0.0)).await?;
        info!(address, "connectivity verified");
        Ok(())
    }

    // ── Product info ──────────────────────────────────────────────────────────

    /// Latest product announcement, if any arrived yet.
    pub fn product_info(&self) -> Option<ProductInfo> {
        self.shared.product_info.borrow().clone()
    }

    /// Returns the cached product announcement, waiting up to `timeout` for
    /// the first one.
    ///
    /// # Errors
    ///
    /// [`GatewayError::ProductInfoTimeout`] when none arrives in time.
    pub async fn first_product_info(&self, timeout: Duration) -> Result<ProductInfo, GatewayError> {
        let mut rx = self.shared.product_info.subscribe();
        let waited = tokio::time::timeout(timeout, async {
            rx.wait_for(Option::is_some).await.map(|info| (*info).clone())
        })
        .await;

        match waited {
            Ok(Ok(Some(info))) => Ok(info),
            Ok(Ok(None)) | Ok(Err(_)) => Err(GatewayError::Stopped),
            Err(_) => Err(GatewayError::ProductInfoTimeout { timeout }),
        }
    }

    // ── Inbound ───────────────────────────────────────────────────────────────

    /// Feeds one raw datagram as if the receive loop had read it.
    pub fn on_datagram(&self, bytes: &[u8], source: SocketAddr) {
        self.shared.on_datagram(bytes, source);
    }

    /// Handles one decoded frame.
    pub fn on_frame_received(&self, frame: Frame) {
        self.shared.on_frame_received(frame);
    }
}

impl Shared {
    fn lock_pending(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_remote(&self) -> MutexGuard<'_, Option<IpAddr>> {
        self.remote_ip.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, next: ConnectionState) {
        let changed = self.state.send_if_modified(|state| {
            if *state == next {
                false
            } else {
                *state = next;
                true
            }
        });
        if changed {
            debug!(state = %next, "connection state changed");
        }
    }

    fn destination(&self, port: u16) -> Result<SocketAddr, GatewayError> {
        self.lock_remote()
            .map(|ip| SocketAddr::new(ip, port))
            .ok_or(GatewayError::RemoteUnknown)
    }

    /// Sends `frame` and waits for its resolution, resending on timeout.
    #[allow(clippy::too_many_arguments)]
    async fn exchange<T>(
        &self,
        select: TableSelector<T>,
        gate: Arc<AsyncMutex<()>>,
        address: u16,
        frame: Vec<u8>,
        destination: SocketAddr,
        policy: RetryPolicy,
        timed_out: fn(u16, u32) -> GatewayError,
    ) -> Result<T, GatewayError> {
        let _turn = gate.lock_owned().await;

        let (tx, mut rx) = oneshot::channel();
        let id = self.ids.next();
        select(&mut self.lock_pending()).insert(address, PendingRequest::new(id, policy.max_retries, tx));
        let _guard = PendingGuard {
            shared: self,
            select,
            address,
            id,
        };

        // Checked after the insert: a stop racing with it either sees the
        // entry and clears it, or has already set the flag.
        let stopped = *self.shutdown.borrow();
        if stopped {
            return Err(GatewayError::Stopped);
        }

        let mut deadline = Instant::now() + policy.timeout;

        let mut attempt = 1;
        loop {
            debug!(address, attempt, %destination, bytes = %Hex(&frame), "sending request");
            self.transport
                .send_to(&frame, destination)
                .await
                .map_err(|source| GatewayError::Send { destination, source })?;

            match tokio::time::timeout_at(deadline, &mut rx).await {
                Ok(Ok(outcome)) => return outcome,
                Ok(Err(_)) => return Err(GatewayError::Stopped),
                Err(_) => {
                    let retry = select(&mut self.lock_pending()).schedule_retry(address, id);
                    match retry {
                        Some(retries_left) => {
                            warn!(address, attempt, retries_left, "no response, resending");
                            deadline = Instant::now() + policy.timeout;
                            attempt += 1;
                        }
                        None => {
                            // A response may have landed between the timeout and the lock.
                            if let Ok(outcome) = rx.try_recv() {
                                return outcome;
                            }
                            warn!(address, attempts = attempt, "giving up");
                            return Err(timed_out(address, attempt));
                        }
                    }
                }
            }
        }
    }

    fn on_datagram(&self, bytes: &[u8], source: SocketAddr) {
        debug!(%source, bytes = %Hex(bytes), "datagram received");

        let mut seen_valid = false;
        for result in decode_all(bytes) {
            match result {
                Ok(frame) => {
                    if !seen_valid {
                        seen_valid = true;
                        self.note_peer(source);
                    }
                    self.on_frame_received(frame);
                }
                Err(FrameError::ChecksumMismatch { carried, computed }) => {
                    warn!(%source, carried, computed, bytes = %Hex(bytes), "dropping frame with bad checksum");
                }
                Err(e) => {
                    warn!(%source, error = %e, bytes = %Hex(bytes), "dropping malformed frame");
                }
            }
        }
    }

    /// Records the gateway's address on first contact and marks the engine connected.
    fn note_peer(&self, source: SocketAddr) {
        {
            let mut remote = self.lock_remote();
            if remote.is_none() {
                info!(ip = %source.ip(), "gateway discovered");
                *remote = Some(source.ip());
            }
        }
        self.set_state(ConnectionState::Connected);
    }

    fn on_frame_received(&self, frame: Frame) {
        if !frame.checksum_valid {
            warn!(command = %frame.command, "dropping frame with bad checksum");
            return;
        }

        match frame.command {
            Command::ReadResponse => match payload::parse_read_response(&frame.payload) {
                Ok(response) => self.on_register_value(response.address, &response.value, true),
                Err(e) => warn!(error = %e, "dropping read response"),
            },
            Command::Telemetry => {
                for row in payload::telemetry_rows(&frame.payload) {
                    self.on_register_value(row.address, &row.value, false);
                }
            }
            Command::WriteResponse => match payload::parse_write_response(&frame.payload) {
                Ok(accepted) => self.on_write_ack(accepted),
                Err(e) => warn!(error = %e, "dropping write response"),
            },
            Command::ProductInfo => match ProductInfo::parse(&frame.payload) {
                Ok(info) => self.on_product_info(info),
                Err(e) => warn!(error = %e, "dropping product announcement"),
            },
            Command::RmuData => match RmuData::parse(&frame.payload) {
                Ok(data) => self.on_rmu_data(frame.address, &data),
                Err(e) => warn!(error = %e, "dropping room unit broadcast"),
            },
            other => debug!(command = %other, address = frame.address, "ignoring frame"),
        }
    }

    /// Decodes one register value, resolves a waiting reader and publishes it.
    ///
    /// Telemetry rows carry only two value bytes, so 32-bit registers cannot
    /// be decoded from them; such failures never fail a waiting reader.
    fn on_register_value(&self, address: u16, raw: &[u8], is_response: bool) {
        let Some(definition) = self.catalog.get(address) else {
            warn!(address, "ignoring value for register not in the catalog");
            return;
        };

        match coil::decode(definition, raw, self.word_swap.load(Ordering::Relaxed)) {
            Ok(data) => self.publish(data),
            Err(source) if is_response => {
                warn!(address, error = %source, "failed to decode read response");
                self.lock_pending()
                    .reads
                    .resolve(address, Err(GatewayError::Decode { address, source }));
            }
            Err(e) => debug!(address, error = %e, "skipping telemetry row"),
        }
    }

    /// Publishes the readings an RMU40 broadcast mirrors.  Registers missing
    /// from the catalog are skipped quietly; the broadcast always carries the
    /// same fixed set.
    fn on_rmu_data(&self, bus_address: u16, data: &RmuData) {
        debug!(bus_address, outdoor = data.outdoor_temperature, "room unit broadcast");
        for (address, value) in data.register_values(bus_address) {
            match self.catalog.get(address) {
                Some(definition) => self.publish(coil::from_scaled(definition, value)),
                None => debug!(address, "room unit value for register not in the catalog"),
            }
        }
    }

    /// Resolves a waiting reader of the register and hands the value to the sink.
    fn publish(&self, data: CoilData) {
        debug!(%data, "register value");
        self.lock_pending().reads.resolve(data.address, Ok(data.clone()));
        self.sink.deliver(Update::Coil(data));
    }

    fn on_write_ack(&self, accepted: bool) {
        let resolved = self.lock_pending().writes.resolve_oldest(|address| {
            if accepted {
                Ok(())
            } else {
                Err(GatewayError::WriteRejected { address })
            }
        });

        match resolved {
            Some(address) if !accepted => warn!(address, "write rejected"),
            Some(_) => {}
            None => debug!(accepted, "write acknowledgement with no pending write"),
        }
    }

    fn on_product_info(&self, info: ProductInfo) {
        let changed = self.product_info.borrow().as_ref() != Some(&info);
        if changed {
            info!(model = %info.model, firmware = %info.firmware_version, "product info received");
        }
        self.product_info.send_replace(Some(info.clone()));
        self.sink.deliver(Update::ProductInfo(info));
    }
}

/// Removes a caller's pending entry when its future completes or is dropped.
struct PendingGuard<'a, T> {
    shared: &'a Shared,
    select: TableSelector<T>,
    address: u16,
    id: u64,
}

impl<T> Drop for PendingGuard<'_, T> {
    fn drop(&mut self) {
        let mut pending = self.shared.lock_pending();
        if (self.select)(&mut pending).remove(self.address, self.id).is_some() {
            debug!(address = self.address, id = self.id, "pending request abandoned");
        }
    }
}

/// Lower-case hex rendering of a byte slice for log fields.
struct Hex<'a>(&'a [u8]);

impl fmt::Display for Hex<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::sink::MockUpdateSink;
    use nibe_core::coil::{Encoding, RegisterDefinition};
    use nibe_core::protocol::{encode_frame, MODBUS40_ADDRESS};
    use std::sync::Mutex as StdMutex;

    // ── Test doubles ──────────────────────────────────────────────────────────

    #[derive(Default)]
    struct RecordingTransport {
        sent: StdMutex<Vec<(Vec<u8>, SocketAddr)>>,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send_to(&self, bytes: &[u8], destination: SocketAddr) -> io::Result<()> {
            self.sent.lock().unwrap().push((bytes.to_vec(), destination));
            Ok(())
        }

        async fn recv(&self) -> io::Result<(Vec<u8>, SocketAddr)> {
            std::future::pending().await
        }
    }

    fn catalog() -> Arc<RegisterCatalog> {
        Arc::new(
            RegisterCatalog::new([
                RegisterDefinition::new(40004, "bt1-outdoor-temperature-40004", Encoding::S16).with_factor(10),
                RegisterDefinition::new(43424, "tot-op-time-compr-43424", Encoding::S32),
            ])
            .unwrap(),
        )
    }

    fn gateway_with(sink: MockUpdateSink) -> Gateway {
        Gateway::new(
            catalog(),
            Arc::new(RecordingTransport::default()),
            Arc::new(sink),
            EngineSettings::default(),
        )
    }

    fn gateway_addr() -> SocketAddr {
        "192.168.1.50:40000".parse().unwrap()
    }

    #[test]
    fn test_telemetry_rows_for_known_registers_reach_sink() {
        // Arrange – 40004 = -2.5 °C, 40008 unknown, padding row
        let mut sink = MockUpdateSink::new();
        sink.expect_deliver()
            .withf(|update| matches!(update, Update::Coil(data) if data.address == 40004 && data.value == CoilValue::Number(-2.5)))
            .times(1)
            .return_const(());
        let gateway = gateway_with(sink);
        let payload = [0x44, 0x9C, 0xE7, 0xFF, 0x48, 0x9C, 0x01, 0x00, 0xFF, 0xFF, 0x00, 0x00];
        let bytes = encode_frame(MODBUS40_ADDRESS, Command::Telemetry, &payload).unwrap();

        // Act
        gateway.on_datagram(&bytes, gateway_addr());

        // Assert – expectations checked when the mock drops
        assert_eq!(gateway.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_first_datagram_discovers_gateway() {
        let mut sink = MockUpdateSink::new();
        sink.expect_deliver().return_const(());
        let gateway = gateway_with(sink);
        assert_eq!(gateway.remote_ip(), None);

        gateway.on_datagram(&[0x5C, 0x00, 0x20, 0x6C, 0x01, 0x01, 0x4C], gateway_addr());

        assert_eq!(gateway.remote_ip(), Some(gateway_addr().ip()));
    }

    #[test]
    fn test_corrupt_datagram_does_not_discover_gateway() {
        let sink = MockUpdateSink::new();
        let gateway = gateway_with(sink);

        gateway.on_datagram(&[0x5C, 0x00, 0x20, 0x6C, 0x01, 0x01, 0x4D], gateway_addr());

        assert_eq!(gateway.remote_ip(), None);
        assert_eq!(gateway.state(), ConnectionState::Idle);
    }

    #[test]
    fn test_frame_with_invalid_checksum_flag_is_dropped() {
        let sink = MockUpdateSink::new();
        let gateway = gateway_with(sink);
        let mut frame = Frame::new(MODBUS40_ADDRESS, Command::ReadResponse, vec![0x44, 0x9C, 0x01, 0x00, 0, 0]);
        frame.checksum_valid = false;

        gateway.on_frame_received(frame);
    }

    #[test]
    fn test_product_info_is_cached_and_published() {
        // Arrange
        let mut sink = MockUpdateSink::new();
        sink.expect_deliver()
            .withf(|update| matches!(update, Update::ProductInfo(info) if info.model == "F1255-12 R"))
            .times(1)
            .return_const(());
        let gateway = gateway_with(sink);
        let frame = Frame::new(MODBUS40_ADDRESS, Command::ProductInfo, b"\x01\x24\xe3F1255-12 R".to_vec());

        // Act
        gateway.on_frame_received(frame);

        // Assert
        let info = gateway.product_info().expect("cached");
        assert_eq!(info.firmware_version, "9443");
    }

    #[test]
    fn test_rmu_broadcast_publishes_catalogued_registers() {
        // Arrange – captured RMU40 S2 broadcast, outdoor temperature 15.0 °C
        let mut sink = MockUpdateSink::new();
        sink.expect_deliver()
            .withf(|update| {
                matches!(update, Update::Coil(data)
                    if data.address == 40004 && data.raw == 150 && data.value == CoilValue::Number(15.0))
            })
            .times(1)
            .return_const(());
        let gateway = gateway_with(sink);
        let bytes = [
            0x5C, 0x00, 0x1A, 0x62, 0x19, 0x9B, 0x00, 0x29, 0x02, 0x9B, 0xA0, 0x00, 0x00, 0xE2, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x02, 0x39, 0x00, 0x1F, 0x00, 0x03, 0x00, 0x00, 0x01, 0x00, 0x2E,
        ];

        // Act
        gateway.on_datagram(&bytes, gateway_addr());

        // Assert – only 40004 is catalogued; expectations checked on drop
        assert_eq!(gateway.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_verify_connectivity_needs_alarm_reset_register() {
        let gateway = gateway_with(MockUpdateSink::new());

        let result = gateway.verify_connectivity().await;

        assert!(matches!(result, Err(GatewayError::NoAlarmResetRegister)));
    }

    #[tokio::test]
    async fn test_read_without_known_gateway_fails_fast() {
        let gateway = gateway_with(MockUpdateSink::new());

        let result = gateway.read_coil(40004).await;

        assert!(matches!(result, Err(GatewayError::RemoteUnknown)));
    }

    #[tokio::test]
    async fn test_read_unknown_register() {
        let gateway = gateway_with(MockUpdateSink::new());

        let result = gateway.read_coil(1).await;

        assert!(matches!(result, Err(GatewayError::UnknownCoil { address: 1 })));
    }

    #[tokio::test]
    async fn test_write_read_only_register_is_rejected_before_send() {
        let gateway = gateway_with(MockUpdateSink::new());

        let result = gateway.write_coil(40004, CoilValue::Number(1.0)).await;

        assert!(matches!(
            result,
            Err(GatewayError::Encode(CoilError::NotWritable { address: 40004 }))
        ));
    }

    #[test]
    fn test_hex_rendering() {
        assert_eq!(Hex(&[0x5C, 0x00, 0xAB]).to_string(), "5c00ab");
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Listening.to_string(), "listening");
    }
}
