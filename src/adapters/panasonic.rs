//! Panasonic Blu-ray device session
//!
//! One `PanasonicDevice` per configured player. It owns the transport, keeps
//! the cached playback state fresh with a background poll task, and runs
//! every command through a reconnect-and-retry-once wrapper.
//!
//! Handles are cheap to clone; all clones share the same session.

use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;
use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::http::HttpConnector;
use super::protocol::{
    control_url, decode_response, derive_play_status, encode_key_press,
    encode_play_status_query, encode_status_query, is_known_key, CommandResult, PlayStatus,
};
use super::traits::{CommandStatus, Connector, DeviceCommand, Transport, TransportError};
use super::variant::{idle_status, ProtocolVariant};
use crate::bus::{BusEvent, DeviceUpdate, PlaybackState, SharedBus};
use crate::config::DeviceConfig;

/// Default connect/read timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);
/// Default sleep between poll cycles
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);
/// Consecutive off cycles tolerated before polling stops
pub const DEFAULT_OFF_RETRY_BUDGET: u32 = 10;
/// Default wait for the reconnect after a failed command
pub const DEFAULT_RECONNECT_WAIT: Duration = Duration::from_secs(5);

/// Timing knobs for a device session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    /// Connect and read timeout of the transport
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub off_retry_budget: u32,
    /// How long a failed command waits for the reconnect before giving up
    pub reconnect_wait: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            off_retry_budget: DEFAULT_OFF_RETRY_BUDGET,
            reconnect_wait: DEFAULT_RECONNECT_WAIT,
        }
    }
}

/// Mutable session state, only written by refresh and detection
#[derive(Debug, Default)]
struct SessionState {
    state: PlaybackState,
    position: u32,
    duration: u32,
    variant: ProtocolVariant,
    last_error: Option<String>,
}

struct PollTask {
    generation: u64,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Point-in-time view of a device, as returned by the HTTP API
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceSnapshot {
    pub id: String,
    pub name: String,
    pub address: String,
    pub always_on: bool,
    pub state: PlaybackState,
    pub is_on: bool,
    pub position: u32,
    pub duration: u32,
    pub variant: ProtocolVariant,
    pub connected: bool,
    pub polling: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Session with one Panasonic Blu-ray player
#[derive(Clone)]
pub struct PanasonicDevice {
    id: Arc<str>,
    config: Arc<RwLock<DeviceConfig>>,
    settings: SessionSettings,
    session: Arc<RwLock<SessionState>>,
    /// At most one open transport; replaced under `connect_lock`
    transport: Arc<RwLock<Option<Arc<dyn Transport>>>>,
    connect_lock: Arc<Mutex<()>>,
    connector: Arc<dyn Connector>,
    /// Single-flight gate for refresh
    refresh_lock: Arc<Mutex<()>>,
    /// Start gate for the poll task
    poller: Arc<Mutex<Option<PollTask>>>,
    poll_generation: Arc<AtomicU64>,
    /// Cancelled once the device is removed; nothing reconnects after that
    closed: CancellationToken,
    bus: SharedBus,
}

impl PanasonicDevice {
    pub fn new(config: DeviceConfig, settings: SessionSettings, bus: SharedBus) -> Self {
        Self::with_connector(config, settings, bus, Arc::new(HttpConnector))
    }

    pub fn with_connector(
        config: DeviceConfig,
        settings: SessionSettings,
        bus: SharedBus,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            id: Arc::from(config.id.as_str()),
            config: Arc::new(RwLock::new(config)),
            settings,
            session: Arc::new(RwLock::new(SessionState::default())),
            transport: Arc::new(RwLock::new(None)),
            connect_lock: Arc::new(Mutex::new(())),
            connector,
            refresh_lock: Arc::new(Mutex::new(())),
            poller: Arc::new(Mutex::new(None)),
            poll_generation: Arc::new(AtomicU64::new(0)),
            closed: CancellationToken::new(),
            bus,
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn settings(&self) -> SessionSettings {
        self.settings
    }

    pub async fn name(&self) -> String {
        self.config.read().await.name.clone()
    }

    pub async fn address(&self) -> String {
        self.config.read().await.address.clone()
    }

    pub async fn always_on(&self) -> bool {
        self.config.read().await.always_on
    }

    pub async fn config(&self) -> DeviceConfig {
        self.config.read().await.clone()
    }

    pub async fn state(&self) -> PlaybackState {
        self.session.read().await.state
    }

    pub async fn media_position(&self) -> u32 {
        self.session.read().await.position
    }

    pub async fn media_duration(&self) -> u32 {
        self.session.read().await.duration
    }

    pub async fn is_on(&self) -> bool {
        self.state().await.is_on()
    }

    pub async fn variant(&self) -> ProtocolVariant {
        self.session.read().await.variant
    }

    /// Message of the last failed transport open, cleared on success
    pub async fn last_error(&self) -> Option<String> {
        self.session.read().await.last_error.clone()
    }

    pub async fn is_connected(&self) -> bool {
        self.transport.read().await.is_some()
    }

    pub async fn is_polling(&self) -> bool {
        self.poller
            .lock()
            .await
            .as_ref()
            .is_some_and(|task| !task.handle.is_finished())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Whether two handles refer to the same session
    pub fn same_session(&self, other: &PanasonicDevice) -> bool {
        Arc::ptr_eq(&self.session, &other.session)
    }

    pub async fn snapshot(&self) -> DeviceSnapshot {
        let config = self.config().await;
        let (state, position, duration, variant, last_error) = {
            let s = self.session.read().await;
            (s.state, s.position, s.duration, s.variant, s.last_error.clone())
        };
        DeviceSnapshot {
            id: config.id,
            name: config.name,
            address: config.address,
            always_on: config.always_on,
            state,
            is_on: state.is_on(),
            position,
            duration,
            variant,
            connected: self.is_connected().await,
            polling: self.is_polling().await,
            last_error,
        }
    }

    /// Replace name/address/always-on. Takes effect on the next connect.
    pub async fn reconfigure(&self, config: DeviceConfig) {
        if config.id != *self.id {
            warn!(
                device_id = %self.id,
                new_id = %config.id,
                "Ignoring reconfigure with mismatched device id"
            );
            return;
        }
        *self.config.write().await = config;
    }

    // =========================================================================
    // Session lifecycle
    // =========================================================================

    /// Close any open transport, open a fresh one and arm polling.
    pub async fn connect(&self) -> Result<(), TransportError> {
        let _guard = self.connect_lock.lock().await;
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        let previous = self.transport.write().await.take();
        if let Some(previous) = previous {
            previous.close().await;
        }

        let address = self.address().await;
        match self.connector.open(&address, self.settings.timeout).await {
            Ok(transport) if self.is_closed() => {
                // Removed while the open was in flight
                transport.close().await;
                return Err(TransportError::Closed);
            }
            Ok(transport) => {
                *self.transport.write().await = Some(transport);
                self.session.write().await.last_error = None;
            }
            Err(e) => {
                warn!(device_id = %self.id, address = %address, "Failed to open transport: {}", e);
                self.session.write().await.last_error = Some(e.to_string());
                self.bus.publish(BusEvent::DeviceError {
                    device_id: self.id.to_string(),
                    message: e.to_string(),
                });
                return Err(e);
            }
        }

        info!(device_id = %self.id, address = %address, "Connected");
        self.bus.publish(BusEvent::DeviceConnected {
            device_id: self.id.to_string(),
        });
        self.start_polling().await;
        Ok(())
    }

    /// Tear the session down for good: stop polling, close the transport and
    /// refuse any later connect. Used when the device is removed.
    pub async fn shutdown(&self) {
        self.closed.cancel();
        self.stop_polling().await;
        self.disconnect().await;
        debug!(device_id = %self.id, "Session closed");
    }

    /// Close the transport if open. Polling is left alone.
    pub async fn disconnect(&self) {
        let _guard = self.connect_lock.lock().await;

        let previous = self.transport.write().await.take();
        if let Some(previous) = previous {
            previous.close().await;
            info!(device_id = %self.id, "Disconnected");
            self.bus.publish(BusEvent::DeviceDisconnected {
                device_id: self.id.to_string(),
            });
        }
    }

    // =========================================================================
    // Polling
    // =========================================================================

    /// Arm the poll task. No-op while a task is live.
    pub async fn start_polling(&self) {
        let mut poller = self.poller.lock().await;
        if self.is_closed() {
            return;
        }
        if poller.as_ref().is_some_and(|task| !task.handle.is_finished()) {
            return;
        }

        let generation = self.poll_generation.fetch_add(1, Ordering::Relaxed) + 1;
        let cancel = CancellationToken::new();
        debug!(device_id = %self.id, generation, "Starting poll task");
        let handle = tokio::spawn(self.clone().poll_loop(cancel.clone(), generation));
        *poller = Some(PollTask {
            generation,
            cancel,
            handle,
        });
    }

    /// Cancel the poll task, if any
    pub async fn stop_polling(&self) {
        if let Some(task) = self.poller.lock().await.take() {
            debug!(device_id = %self.id, generation = task.generation, "Stopping poll task");
            task.cancel.cancel();
        }
    }

    // Boxed: refresh -> connect -> start_polling spawns this future again.
    fn poll_loop(self, cancel: CancellationToken, generation: u64) -> BoxFuture<'static, ()> {
        async move {
            let mut off_cycles: u32 = 0;

            loop {
                if cancel.is_cancelled() {
                    break;
                }

                if !self.always_on().await {
                    if self.state().await == PlaybackState::Off {
                        off_cycles += 1;
                        if off_cycles > self.settings.off_retry_budget {
                            debug!(device_id = %self.id, "Device is off, stopping poll task");
                            self.release_poller(generation).await;
                            return;
                        }
                        debug!(device_id = %self.id, retry = off_cycles, "Device is off");
                    } else if off_cycles > 0 {
                        off_cycles = 0;
                        debug!(device_id = %self.id, "Device is on again");
                    }
                }

                self.refresh().await;

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.settings.poll_interval) => {}
                }
            }

            debug!(device_id = %self.id, generation, "Poll task cancelled");
        }
        .boxed()
    }

    /// Clear the poll slot if it still belongs to `generation`
    async fn release_poller(&self, generation: u64) {
        let mut poller = self.poller.lock().await;
        if poller
            .as_ref()
            .is_some_and(|task| task.generation == generation)
        {
            *poller = None;
        }
    }

    // =========================================================================
    // Status refresh
    // =========================================================================

    /// Query the player and publish the fields that changed.
    ///
    /// Returns immediately if another refresh is in progress.
    pub async fn refresh(&self) {
        if self.is_closed() {
            return;
        }
        let Ok(_guard) = self.refresh_lock.try_lock() else {
            trace!(device_id = %self.id, "Refresh already in progress");
            return;
        };

        if !self.is_connected().await {
            if let Err(e) = self.connect().await {
                debug!(device_id = %self.id, "Connect before refresh failed: {}", e);
            }
        }

        let status = self.query_play_status().await;

        let update = {
            let mut session = self.session.write().await;
            let mut update = DeviceUpdate::default();
            if session.state != status.state {
                session.state = status.state;
                update.state = Some(status.state);
            }
            if session.position != status.position {
                session.position = status.position;
                update.position = Some(status.position);
            }
            if session.duration != status.duration {
                session.duration = status.duration;
                update.duration = Some(status.duration);
            }
            update
        };

        if !update.is_empty() {
            debug!(device_id = %self.id, ?update, "Device updated");
            self.bus.publish(BusEvent::DeviceUpdated {
                device_id: self.id.to_string(),
                update,
            });
        }
    }

    async fn query_play_status(&self) -> PlayStatus {
        let play_status = match self.request(encode_play_status_query()).await {
            Ok(CommandResult::Ok(fields)) => fields,
            Ok(CommandResult::Error) => return PlayStatus::unavailable(),
            Ok(CommandResult::Off) => return PlayStatus::off(),
            Err(e) => {
                trace!(device_id = %self.id, "Play status query failed: {}", e);
                return PlayStatus::off();
            }
        };

        let status = self.query_status().await;
        derive_play_status(&play_status, &status)
    }

    /// Coarse status query, resolving the protocol variant on first answer
    async fn query_status(&self) -> CommandResult {
        let variant = self.variant().await;
        if !variant.supports_status_probe() {
            return idle_status();
        }

        let result = match self.request(encode_status_query()).await {
            Ok(result) => result,
            Err(e) => {
                trace!(device_id = %self.id, "Status query failed: {}", e);
                CommandResult::Off
            }
        };
        if variant.is_resolved() {
            return result;
        }

        let mut session = self.session.write().await;
        let (resolved, result) = session.variant.after_status_probe(result);
        if resolved != session.variant {
            info!(device_id = %self.id, variant = ?resolved, "Detected protocol variant");
            session.variant = resolved;
        }
        result
    }

    // =========================================================================
    // Requests
    // =========================================================================

    async fn request(&self, body: Vec<u8>) -> Result<CommandResult, TransportError> {
        let transport = self
            .transport
            .read()
            .await
            .clone()
            .ok_or(TransportError::NotConnected)?;
        let url = control_url(&self.address().await);
        let raw = transport.post(&url, body).await?;
        Ok(decode_response(&raw))
    }

    /// Send a key press, resolving the protocol variant on first answer
    async fn press_key(&self, key: &str) -> Result<CommandResult, TransportError> {
        if !is_known_key(key) {
            info!(device_id = %self.id, key, "Key not known, sending anyway");
        }

        let variant = self.variant().await;
        if !variant.supports_key_press() {
            return Ok(CommandResult::Error);
        }

        let result = self.request(encode_key_press(key)).await?;
        if !variant.is_resolved() {
            let mut session = self.session.write().await;
            let resolved = session.variant.after_key_press(&result);
            if resolved != session.variant {
                info!(device_id = %self.id, variant = ?resolved, "Detected protocol variant");
                session.variant = resolved;
            }
        }
        Ok(result)
    }

    async fn execute_once(&self, command: &DeviceCommand) -> Result<CommandResult, TransportError> {
        let state = self.state().await;
        match command.key_for(state) {
            Some(key) => self.press_key(key).await,
            None => {
                debug!(device_id = %self.id, ?command, %state, "Nothing to send");
                Ok(CommandResult::Ok(Vec::new()))
            }
        }
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Run a command with reconnect-and-retry-once on transport failure.
    pub async fn execute(&self, command: DeviceCommand) -> CommandStatus {
        if self.is_closed() {
            debug!(device_id = %self.id, ?command, "Session closed, command dropped");
            return CommandStatus::ServiceUnavailable;
        }

        let err = match self.execute_once(&command).await {
            Ok(result) => {
                self.start_polling().await;
                return translate(&result);
            }
            Err(e) => e,
        };

        // Failures are expected while the player is off
        let expected = self.state().await == PlaybackState::Off;
        log_failure(
            expected,
            &self.id,
            &command,
            &err,
            "Command failed, reconnecting before retry",
        );

        let device = self.clone();
        let reconnect = tokio::spawn(async move { device.connect().await });
        tokio::task::yield_now().await;

        match tokio::time::timeout(self.settings.reconnect_wait, reconnect).await {
            Err(_) => {
                log_failure(
                    expected,
                    &self.id,
                    &command,
                    &"reconnect timed out",
                    "Command not sent",
                );
                return CommandStatus::BadRequest;
            }
            Ok(Err(join_err)) => {
                error!(device_id = %self.id, ?command, "Reconnect task failed: {}", join_err);
                return CommandStatus::BadRequest;
            }
            Ok(Ok(Err(connect_err))) => {
                log_failure(expected, &self.id, &command, &connect_err, "Reconnect failed");
                return CommandStatus::BadRequest;
            }
            Ok(Ok(Ok(()))) => {}
        }

        match self.execute_once(&command).await {
            Ok(result) => {
                self.start_polling().await;
                translate(&result)
            }
            Err(e) => {
                log_failure(expected, &self.id, &command, &e, "Retry failed");
                CommandStatus::BadRequest
            }
        }
    }

    pub async fn send_key(&self, key: &str) -> CommandStatus {
        self.execute(DeviceCommand::SendKey(key.to_string())).await
    }

    /// Always sends the power key
    pub async fn toggle(&self) -> CommandStatus {
        self.execute(DeviceCommand::Toggle).await
    }

    pub async fn turn_on(&self) -> CommandStatus {
        self.execute(DeviceCommand::TurnOn).await
    }

    pub async fn turn_off(&self) -> CommandStatus {
        self.execute(DeviceCommand::TurnOff).await
    }

    pub async fn play_pause(&self) -> CommandStatus {
        self.execute(DeviceCommand::PlayPause).await
    }

    pub async fn play(&self) -> CommandStatus {
        self.execute(DeviceCommand::Play).await
    }

    pub async fn pause(&self) -> CommandStatus {
        self.execute(DeviceCommand::Pause).await
    }

    pub async fn stop(&self) -> CommandStatus {
        self.execute(DeviceCommand::Stop).await
    }

    pub async fn eject(&self) -> CommandStatus {
        self.execute(DeviceCommand::Eject).await
    }

    pub async fn fast_forward(&self) -> CommandStatus {
        self.execute(DeviceCommand::FastForward).await
    }

    pub async fn rewind(&self) -> CommandStatus {
        self.execute(DeviceCommand::Rewind).await
    }

    pub async fn channel_up(&self) -> CommandStatus {
        self.execute(DeviceCommand::ChannelUp).await
    }

    pub async fn channel_down(&self) -> CommandStatus {
        self.execute(DeviceCommand::ChannelDown).await
    }
}

fn translate(result: &CommandResult) -> CommandStatus {
    if result.is_error() {
        CommandStatus::BadRequest
    } else {
        CommandStatus::Ok
    }
}

fn log_failure(
    expected: bool,
    device_id: &str,
    command: &DeviceCommand,
    err: &dyn Display,
    message: &str,
) {
    if expected {
        debug!(device_id, ?command, "{}: {}", message, err);
    } else {
        error!(device_id, ?command, "{}: {}", message, err);
    }
}
