use std::{collections::VecDeque, sync::Arc};
use tokio::{
    sync::{Mutex, RwLock},
    time::Instant,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    error::{FtmsError, Result},
    protocol::{decode_treadmill_data, matches_short_uuid},
    queue::CommandQueue,
    status,
    transport::{latest_notification, Transport},
    types::{
        CharacteristicInfo, CharacteristicProperties, Command, Reading, SessionConfig,
        SessionState, StatusLine,
    },
    CONTROL_POINT_SHORT_UUID, TREADMILL_DATA_SHORT_UUID,
};

/// State published by the poll loop for user-input handlers and displays
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    /// Current session state
    pub state: SessionState,
    /// Last reading confirmed by the device
    pub reading: Option<Reading>,
    /// Speed requested by the user but not yet confirmed by a reading
    pub speed_hint: Option<u16>,
    /// Last published status line
    pub status: StatusLine,
    /// Most recent failure, cleared by the next good reading
    pub last_error: Option<String>,
    /// A Resume was queued while inactive and the poll loop has not taken it yet
    pub resume_requested: bool,
}

impl SessionSnapshot {
    /// Speed the user should see: the pending hint if any, else the confirmed speed
    #[must_use]
    pub fn effective_speed(&self) -> Option<u16> {
        self.speed_hint
            .or_else(|| self.reading.as_ref().map(Reading::instantaneous_speed))
    }
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            state: SessionState::Disconnected,
            reading: None,
            speed_hint: None,
            status: status::not_connected(),
            last_error: None,
            resume_requested: false,
        }
    }
}

/// Characteristics located on the connected device
#[derive(Debug, Clone, Copy)]
struct Endpoints {
    control_point: Uuid,
    treadmill_data: Uuid,
}

/// Connection and idle state machine for one treadmill
///
/// The session owns the transport and is driven by [`TreadmillSession::tick`],
/// normally from a [`crate::PollLoop`]. Each tick:
///
/// 1. takes every command queued by [`TreadmillController`] handles,
/// 2. walks `Scanning -> Connecting -> DiscoveringCharacteristics -> Connected`
///    if there is no link (skipped while `Inactive` unless a Resume arrived),
/// 3. writes queued commands in order and reads one telemetry record,
/// 4. runs the idle timer: zero speed enters `Paused`, and staying paused past
///    the idle timeout disconnects into `Inactive`.
///
/// Anticipated failures (device not found, connect failure, missing
/// characteristic, lost link, silent device) drop back to `Disconnected` and
/// are retried next tick. Other failures do the same but count toward
/// [`SessionConfig::max_consecutive_failures`]; crossing it makes `tick`
/// return [`FtmsError::FailureLimitExceeded`].
pub struct TreadmillSession<T: Transport> {
    transport: T,
    config: SessionConfig,
    state: SessionState,
    device: Option<T::Device>,
    handle: Option<T::Handle>,
    endpoints: Option<Endpoints>,
    pending: VecDeque<Command>,
    queue: CommandQueue,
    snapshot: Arc<Mutex<SessionSnapshot>>,
    shutdown: Arc<RwLock<bool>>,
    consecutive_failures: u32,
    failed: bool,
}

impl<T: Transport> TreadmillSession<T> {
    /// Create a session and the controller handle that feeds it
    pub fn new(transport: T, config: SessionConfig) -> (Self, TreadmillController) {
        let session = Self {
            transport,
            config,
            state: SessionState::Disconnected,
            device: None,
            handle: None,
            endpoints: None,
            pending: VecDeque::new(),
            queue: CommandQueue::new(),
            snapshot: Arc::new(Mutex::new(SessionSnapshot::default())),
            shutdown: Arc::new(RwLock::new(false)),
            consecutive_failures: 0,
            failed: false,
        };
        let controller = session.controller();
        (session, controller)
    }

    /// Another controller handle for this session
    #[must_use]
    pub fn controller(&self) -> TreadmillController {
        TreadmillController {
            queue: self.queue.clone(),
            snapshot: self.snapshot.clone(),
            shutdown: self.shutdown.clone(),
            speed_step: self.config.speed_step,
        }
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Session configuration
    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Whether a controller asked the poll loop to stop
    pub async fn is_shutdown_requested(&self) -> bool {
        *self.shutdown.read().await
    }

    /// Run one poll tick and return the status line it published
    ///
    /// # Errors
    ///
    /// Returns [`FtmsError::FailureLimitExceeded`] once more than
    /// `max_consecutive_failures` unanticipated failures happened in a row.
    /// Every other failure is absorbed and retried on the next tick.
    pub async fn tick(&mut self) -> Result<StatusLine> {
        let resume_requested = self.collect_commands().await;

        match self.state {
            SessionState::Inactive if resume_requested => {
                info!("Resume requested while inactive, reconnecting");
                self.snapshot.lock().await.resume_requested = false;
                self.set_state(SessionState::Scanning).await;
            }
            SessionState::Inactive => return Ok(self.publish_status().await),
            SessionState::Disconnected => self.set_state(SessionState::Scanning).await,
            _ => {}
        }

        if let Err(e) = self.advance().await {
            self.handle_failure(e).await?;
        }

        Ok(self.publish_status().await)
    }

    /// Disconnect from the device, if linked
    ///
    /// Commands still queued are written first while the link is up;
    /// otherwise they are dropped with a warning.
    ///
    /// # Errors
    ///
    /// Returns the transport error if the disconnect request fails; the
    /// session is `Disconnected` either way.
    pub async fn close(&mut self) -> Result<()> {
        self.collect_commands().await;

        if !self.pending.is_empty() && self.state.is_connected() {
            if let Err(e) = self.flush_pending().await {
                warn!("Failed to send queued commands before closing: {}", e);
            }
        }
        if !self.pending.is_empty() {
            warn!(
                "Discarding {} undelivered command(s) on close",
                self.pending.len()
            );
            self.pending.clear();
        }
        self.snapshot.lock().await.resume_requested = false;

        let result = if self.handle.is_some() {
            info!("Closing treadmill session");
            self.set_state(SessionState::Disconnecting).await;
            self.teardown().await
        } else {
            Ok(())
        };

        self.set_state(SessionState::Disconnected).await;
        self.publish_status().await;
        result
    }

    /// Move queued commands into the pending list; report whether a Resume was among them
    async fn collect_commands(&mut self) -> bool {
        let drained = self.queue.drain().await;
        let resume_requested = drained.contains(&Command::Resume);
        self.pending.extend(drained);
        resume_requested
    }

    async fn advance(&mut self) -> Result<()> {
        if self.state == SessionState::Scanning {
            self.scan().await?;
        }
        if self.state == SessionState::Connecting {
            self.connect().await?;
        }
        if self.state == SessionState::DiscoveringCharacteristics {
            self.discover().await?;
        }
        if self.state.is_connected() {
            self.service_link().await?;
        }
        Ok(())
    }

    async fn scan(&mut self) -> Result<()> {
        debug!("Scanning for '{}'", self.config.device_name);
        let device = self
            .transport
            .scan(&self.config.device_name, self.config.scan_timeout())
            .await?;

        info!("Found treadmill '{}'", self.config.device_name);
        self.device = Some(device);
        self.set_state(SessionState::Connecting).await;
        Ok(())
    }

    async fn connect(&mut self) -> Result<()> {
        let device = self.device.as_ref().ok_or(FtmsError::Disconnected)?;
        let handle = self
            .transport
            .connect(device, self.config.connect_timeout())
            .await?;

        self.handle = Some(handle);
        self.set_state(SessionState::DiscoveringCharacteristics).await;
        Ok(())
    }

    async fn discover(&mut self) -> Result<()> {
        let handle = self.handle.as_ref().ok_or(FtmsError::Disconnected)?;
        let characteristics = self.transport.list_characteristics(handle).await?;

        let control_point = find_characteristic(
            &characteristics,
            CONTROL_POINT_SHORT_UUID,
            CharacteristicProperties::is_writable,
        )
        .ok_or(FtmsError::CharacteristicMissing {
            name: "Fitness Machine Control Point",
            uuid: CONTROL_POINT_SHORT_UUID,
        })?;
        let treadmill_data = find_characteristic(
            &characteristics,
            TREADMILL_DATA_SHORT_UUID,
            |properties| properties.notify,
        )
        .ok_or(FtmsError::CharacteristicMissing {
            name: "Treadmill Data",
            uuid: TREADMILL_DATA_SHORT_UUID,
        })?;

        self.endpoints = Some(Endpoints {
            control_point,
            treadmill_data,
        });
        info!("Connected to '{}'", self.config.device_name);
        self.set_state(SessionState::Connected).await;
        Ok(())
    }

    /// Write pending commands in order, fire-and-forget
    ///
    /// A command is removed before it is written, so a failed write is not
    /// retried.
    async fn flush_pending(&mut self) -> Result<()> {
        let (Some(handle), Some(endpoints)) = (self.handle.as_ref(), self.endpoints) else {
            return Err(FtmsError::Disconnected);
        };

        while let Some(command) = self.pending.pop_front() {
            let data = command.to_bytes();
            debug!("Sending {}: {:02X?}", command, data.as_ref());
            self.transport
                .write(handle, endpoints.control_point, &data, false)
                .await?;
            info!("Sent {}", command);
        }
        Ok(())
    }

    /// Flush pending commands, then read and apply one telemetry record
    async fn service_link(&mut self) -> Result<()> {
        let link_up = match self.handle.as_ref() {
            Some(handle) => self.transport.is_connected(handle).await,
            None => false,
        };
        if !link_up {
            return Err(FtmsError::Disconnected);
        }

        self.flush_pending().await?;

        let (Some(handle), Some(endpoints)) = (self.handle.as_ref(), self.endpoints) else {
            return Err(FtmsError::Disconnected);
        };
        let notifications = self
            .transport
            .subscribe(handle, endpoints.treadmill_data)
            .await?;
        let window = self.config.notification_window();
        let latest = latest_notification(notifications, window).await;
        self.transport
            .unsubscribe(handle, endpoints.treadmill_data)
            .await?;

        let data = latest.ok_or(FtmsError::NoTelemetry {
            window_ms: self.config.notification_window_ms,
        })?;
        debug!("Treadmill data: {:02X?}", data.as_ref());

        match decode_treadmill_data(&data) {
            Ok(reading) => self.apply_reading(reading).await,
            Err(e) => {
                warn!("Discarding treadmill data: {}", e);
                Ok(())
            }
        }
    }

    async fn apply_reading(&mut self, reading: Reading) -> Result<()> {
        self.consecutive_failures = 0;
        let speed = reading.instantaneous_speed();

        {
            let mut snapshot = self.snapshot.lock().await;
            snapshot.reading = Some(reading);
            snapshot.speed_hint = None;
            snapshot.last_error = None;
        }

        if speed > 0 {
            if matches!(self.state, SessionState::Paused { .. }) {
                info!("Belt moving again, idle timer cleared");
            }
            self.set_state(SessionState::Connected).await;
            return Ok(());
        }

        let state = self.state;
        match state {
            SessionState::Connected => {
                info!("Belt stopped, starting idle timer");
                self.set_state(SessionState::Paused {
                    since: Instant::now(),
                })
                .await;
            }
            SessionState::Paused { since }
                if since.elapsed() > self.config.idle_disconnect_timeout() =>
            {
                info!(
                    "Idle for {}s, disconnecting until resumed",
                    since.elapsed().as_secs()
                );
                self.set_state(SessionState::Disconnecting).await;
                if let Err(e) = self.teardown().await {
                    warn!("Disconnect after idle timeout failed: {}", e);
                }
                self.set_state(SessionState::Inactive).await;
            }
            _ => {}
        }

        Ok(())
    }

    async fn handle_failure(&mut self, failure: FtmsError) -> Result<()> {
        if failure.is_recoverable() {
            warn!("{} while {}, retrying next tick", failure, self.state);
        } else {
            error!("{} while {}", failure, self.state);
        }

        if let Err(e) = self.teardown().await {
            warn!("Disconnect after failure failed: {}", e);
        }
        self.set_state(SessionState::Disconnected).await;
        self.snapshot.lock().await.last_error = Some(failure.to_string());

        if failure.is_recoverable() {
            return Ok(());
        }

        self.consecutive_failures += 1;
        if self.consecutive_failures > self.config.max_consecutive_failures {
            self.failed = true;
            self.snapshot.lock().await.status = status::error();
            return Err(FtmsError::FailureLimitExceeded {
                failures: self.consecutive_failures,
                source: Box::new(failure),
            });
        }

        Ok(())
    }

    /// Drop the link and forget the device and its last reading
    async fn teardown(&mut self) -> Result<()> {
        self.endpoints = None;
        self.device = None;

        {
            let mut snapshot = self.snapshot.lock().await;
            snapshot.reading = None;
            snapshot.speed_hint = None;
        }

        if let Some(handle) = self.handle.take() {
            self.transport.disconnect(&handle).await?;
            info!("Disconnected from '{}'", self.config.device_name);
        }
        Ok(())
    }

    async fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            debug!("Session state {} -> {}", self.state, state);
        }
        self.state = state;
        self.snapshot.lock().await.state = state;
    }

    async fn publish_status(&self) -> StatusLine {
        let mut snapshot = self.snapshot.lock().await;

        let line = match &snapshot.reading {
            _ if self.failed => status::error(),
            Some(reading) if self.state.is_connected() => {
                status::telemetry(&self.config.status_format, reading, snapshot.speed_hint)
            }
            _ => status::not_connected(),
        };

        snapshot.status = line.clone();
        line
    }
}

/// First characteristic with the given short UUID that supports what we need
fn find_characteristic(
    characteristics: &[CharacteristicInfo],
    short: u16,
    usable: impl Fn(&CharacteristicProperties) -> bool,
) -> Option<Uuid> {
    let matching = characteristics
        .iter()
        .filter(|characteristic| matches_short_uuid(&characteristic.uuid, short))
        .collect::<Vec<_>>();
    if matching.is_empty() {
        return None;
    }

    let found = matching
        .iter()
        .find(|characteristic| usable(&characteristic.properties))
        .map(|characteristic| characteristic.uuid);
    if found.is_none() {
        warn!("Characteristic {:04X} lacks the required properties", short);
    }
    found
}

/// Handle for user-input code
///
/// Cheap to clone and safe to use from any task. Methods only enqueue
/// commands or read the published snapshot; they never wait on the radio.
#[derive(Debug, Clone)]
pub struct TreadmillController {
    queue: CommandQueue,
    snapshot: Arc<Mutex<SessionSnapshot>>,
    shutdown: Arc<RwLock<bool>>,
    speed_step: u16,
}

impl TreadmillController {
    /// Copy of the last published snapshot
    pub async fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.lock().await.clone()
    }

    /// Current session state
    pub async fn state(&self) -> SessionState {
        self.snapshot.lock().await.state
    }

    /// Last confirmed reading
    pub async fn reading(&self) -> Option<Reading> {
        self.snapshot.lock().await.reading.clone()
    }

    /// Last published status line
    pub async fn status(&self) -> StatusLine {
        self.snapshot.lock().await.status.clone()
    }

    /// Pause a moving belt or resume a stopped one
    ///
    /// While the session is inactive the first press queues Resume, which
    /// also makes the poll loop reconnect; further presses before the poll
    /// loop picks it up queue nothing. Otherwise the decision uses the
    /// effective speed; with no reading yet nothing is queued.
    ///
    /// Returns the queued command, if any.
    pub async fn toggle_pause(&self) -> Option<Command> {
        let mut snapshot = self.snapshot.lock().await;

        let command = if snapshot.state == SessionState::Inactive {
            if snapshot.resume_requested {
                debug!("Reconnect already requested");
                return None;
            }
            info!("Treadmill inactive, requesting reconnect");
            snapshot.resume_requested = true;
            Command::Resume
        } else {
            match snapshot.effective_speed() {
                None => {
                    info!("No treadmill data yet, ignoring pause/resume");
                    return None;
                }
                Some(0) => Command::Resume,
                Some(_) => Command::Pause,
            }
        };

        self.queue.push(command).await;
        Some(command)
    }

    /// Change the target speed by `delta` hundredths of km/h
    ///
    /// The new speed is computed from the effective speed and clamped to
    /// `0..=u16::MAX`. It is stored as the snapshot's speed hint until the
    /// next reading confirms or overrides it. With no reading yet nothing is
    /// queued.
    ///
    /// Returns the queued command, if any.
    pub async fn adjust_speed(&self, delta: i32) -> Option<Command> {
        let mut snapshot = self.snapshot.lock().await;

        let Some(current) = snapshot.effective_speed() else {
            info!("No treadmill data yet, ignoring speed change");
            return None;
        };

        let target = clamp_speed(i32::from(current).saturating_add(delta));
        snapshot.speed_hint = Some(target);

        let command = Command::SetSpeed(target);
        self.queue.push(command).await;
        Some(command)
    }

    /// Raise the speed by one configured step
    pub async fn speed_up(&self) -> Option<Command> {
        self.adjust_speed(i32::from(self.speed_step)).await
    }

    /// Lower the speed by one configured step, not below zero
    pub async fn speed_down(&self) -> Option<Command> {
        self.adjust_speed(-i32::from(self.speed_step)).await
    }

    /// Queue a Stop command
    pub async fn stop(&self) -> Command {
        self.queue.push(Command::Stop).await;
        Command::Stop
    }

    /// Ask the poll loop to disconnect and exit after its current tick
    pub async fn shutdown(&self) {
        info!("Shutdown requested");
        *self.shutdown.write().await = true;
    }

    /// Whether shutdown has been requested
    pub async fn is_shutdown_requested(&self) -> bool {
        *self.shutdown.read().await
    }
}

fn clamp_speed(speed: i32) -> u16 {
    u16::try_from(speed.max(0)).unwrap_or(u16::MAX)
}
