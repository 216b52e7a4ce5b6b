use crate::{
    ble::{BleManager, DiscoveredTrainer, RawNotification, TrainerConnection, Transport},
    error::{LiftError, Result},
    protocol,
    session::{SessionEngine, SessionEvent, SessionInput},
    types::{ConnectionParams, ConnectionState, TimeoutConfig, WorkoutParameters, WorkoutType},
};
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{mpsc, watch, Mutex, RwLock},
    time::timeout,
};
use tracing::{debug, error, info, warn};

/// Consecutive rep-frame decode failures tolerated before the session is
/// treated as link-lost
///
/// A single bad frame is radio noise and only dropped; a run of them
/// means the link is feeding garbage.
pub const MAX_CONSECUTIVE_DECODE_FAILURES: u32 = 5;

/// Main interface for controlling a Forma cable trainer
///
/// `TrainerDevice` owns the link lifecycle: discovery, connection and
/// negotiation, the sequential telemetry poll, command writes, and
/// teardown. It is the single owner of [`ConnectionState`]; no other
/// component mutates it.
///
/// # Examples
///
/// ```no_run
/// use liftbridge::{ProgramMode, TrainerDevice, WorkoutParameters};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let device = TrainerDevice::connect_first().await?;
///
///     let params = WorkoutParameters::program(ProgramMode::OldSchool, 25.0, 3, 10);
///     let mut workout = device.start_workout(params).await?;
///
///     while let Some(event) = workout.next_event().await {
///         println!("{event:?}");
///     }
///
///     device.disconnect().await?;
///     Ok(())
/// }
/// ```
pub struct TrainerDevice {
    manager: BleManager,
    connection: Arc<Mutex<Option<Arc<TrainerConnection>>>>,
    info: DiscoveredTrainer,
    connection_state: Arc<RwLock<ConnectionState>>,
    connection_params: ConnectionParams,
    timeout_config: TimeoutConfig,
    poll_cancel: Mutex<Option<watch::Sender<bool>>>,
}

impl TrainerDevice {
    /// Connect to the first trainer found with default settings
    ///
    /// Scans for advertisements carrying a recognized name prefix and
    /// connects to the strongest signal.
    ///
    /// # Errors
    ///
    /// Returns [`LiftError::DeviceNotFound`] when the scan window expires
    /// without a recognized trainer, or any connection or negotiation
    /// error from the underlying link setup.
    pub async fn connect_first() -> Result<Self> {
        Self::connect_first_with_params(ConnectionParams::default()).await
    }

    /// Connect to the first trainer found with custom connection parameters
    ///
    /// # Errors
    ///
    /// Returns [`LiftError::DeviceNotFound`] when no trainer is found, or
    /// any connection or negotiation error.
    pub async fn connect_first_with_params(params: ConnectionParams) -> Result<Self> {
        Self::connect_first_with_params_and_timeout(params, TimeoutConfig::default()).await
    }

    /// Connect with custom connection parameters and timeout configuration
    ///
    /// # Errors
    ///
    /// Returns [`LiftError::DeviceNotFound`] when no trainer is found, or
    /// any connection or negotiation error.
    pub async fn connect_first_with_params_and_timeout(
        params: ConnectionParams,
        timeout_config: TimeoutConfig,
    ) -> Result<Self> {
        let manager = BleManager::new().await?;

        let trainers = manager.scan_for_trainers(&params).await?;
        if trainers.is_empty() {
            return Err(LiftError::DeviceNotFound);
        }

        let mut sorted = trainers;
        sorted.sort_by(|a, b| b.rssi.cmp(&a.rssi));
        let trainer = sorted.into_iter().next().unwrap_or_else(|| unreachable!());

        Self::connect_to(manager, trainer, params, timeout_config).await
    }

    /// Connect to a specific trainer from an earlier scan
    ///
    /// The connection is declared ready only when every negotiation step
    /// in the checklist has completed; a partially negotiated link is a
    /// connection failure, not a usable device.
    ///
    /// # Errors
    ///
    /// Returns [`LiftError::ConnectionFailed`] when negotiation is
    /// incomplete, or the underlying connection error.
    pub async fn connect_to(
        manager: BleManager,
        trainer: DiscoveredTrainer,
        params: ConnectionParams,
        timeout_config: TimeoutConfig,
    ) -> Result<Self> {
        let connection_state = Arc::new(RwLock::new(ConnectionState::Connecting));

        let connection = match manager.connect(&trainer, &params).await {
            Ok(conn) => conn,
            Err(e) => {
                *connection_state.write().await = ConnectionState::Error(e.to_string());
                return Err(e);
            }
        };

        if !connection.progress().is_ready() {
            let reason = connection
                .progress()
                .missing_step()
                .unwrap_or("negotiation incomplete");
            let _ = connection.teardown().await;
            *connection_state.write().await = ConnectionState::Error(reason.to_string());
            return Err(LiftError::ConnectionFailed(reason.to_string()));
        }

        *connection_state.write().await = ConnectionState::Connected {
            device_name: trainer.name.clone(),
            address: trainer.address.clone(),
            model: trainer.model,
        };

        info!(name = %trainer.name, model = %trainer.model, "trainer ready");

        Ok(Self {
            manager,
            connection: Arc::new(Mutex::new(Some(Arc::new(connection)))),
            info: trainer,
            connection_state,
            connection_params: params,
            timeout_config,
            poll_cancel: Mutex::new(None),
        })
    }

    /// Information about the connected trainer
    #[must_use]
    pub const fn info(&self) -> &DiscoveredTrainer {
        &self.info
    }

    /// Current authoritative connection state
    pub async fn connection_state(&self) -> ConnectionState {
        self.connection_state.read().await.clone()
    }

    /// Whether the underlying link is still up
    pub async fn is_connected(&self) -> bool {
        if let Some(conn) = self.connection.lock().await.as_ref() {
            conn.is_connected().await
        } else {
            false
        }
    }

    /// Timeout configuration in effect
    #[must_use]
    pub const fn timeout_config(&self) -> &TimeoutConfig {
        &self.timeout_config
    }

    /// Fetch the live connection, failing `NotReady` when there is none
    async fn transport(&self) -> Result<Arc<TrainerConnection>> {
        let guard = self.connection.lock().await;
        match guard.as_ref() {
            Some(conn) if conn.progress().is_ready() => Ok(Arc::clone(conn)),
            Some(conn) => Err(LiftError::NotReady {
                reason: conn
                    .progress()
                    .missing_step()
                    .unwrap_or("negotiation incomplete")
                    .to_string(),
            }),
            None => Err(LiftError::NotReady {
                reason: "not connected".to_string(),
            }),
        }
    }

    /// Write a command frame, retrying transient failures on the same link
    ///
    /// Writes are single-outstanding: the write's completion is observed
    /// before this returns, and the session layer never issues the next
    /// command until it has. Connection-level failures are not retried;
    /// they surface immediately so the session can tear down.
    async fn write_with_retry(&self, frame: &[u8]) -> Result<()> {
        let transport = self.transport().await?;
        let mut last_error = None;

        for attempt in 0..=self.timeout_config.max_retry_attempts {
            match transport.write_frame(frame).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_connection_error() => {
                    error!("command write failed terminally: {e}");
                    return Err(e);
                }
                Err(e) => {
                    warn!(
                        attempt = attempt + 1,
                        "command write failed, retrying: {e}"
                    );
                    last_error = Some(e);
                    tokio::time::sleep(Duration::from_millis(self.timeout_config.retry_delay_ms))
                        .await;
                }
            }
        }

        Err(last_error.unwrap_or(LiftError::LinkLost))
    }

    /// Configure and start a workout set
    ///
    /// Sequences the outbound exchange the way the trainer expects:
    /// configuration frame first, then the start frame, each write's
    /// completion observed before the next is issued. Refuses to start
    /// until the link negotiation checklist is complete.
    ///
    /// # Errors
    ///
    /// Returns [`LiftError::InvalidParameter`] or
    /// [`LiftError::OutOfHardwareRange`] for bad configuration (nothing
    /// is written), [`LiftError::NotReady`] before negotiation completes,
    /// or a write error.
    pub async fn start_workout(&self, params: WorkoutParameters) -> Result<WorkoutHandle> {
        // Validation happens before any frame is built or written.
        let mut engine = SessionEngine::new(params.clone())?;

        let transport = self.transport().await?;

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (input_tx, input_rx) = mpsc::unbounded_channel();

        for event in engine.begin() {
            let _ = event_tx.send(event);
        }

        let config_frame = match params.workout {
            WorkoutType::Program { mode } => protocol::build_program_frame(
                mode,
                params.weight_per_cable_kg,
                params.progression_kg_per_rep,
                params.warmup_reps,
                params.target_reps,
                params.stop_at_top,
            )?,
            WorkoutType::Echo { level, eccentric_pct } => protocol::build_echo_frame(
                level,
                eccentric_pct,
                params.warmup_reps,
                params.target_reps,
                params.amrap,
            )?,
        };

        self.write_with_retry(&config_frame).await?;
        self.write_with_retry(&protocol::build_start_frame()).await?;

        let (cancel_tx, cancel_rx) = watch::channel(false);
        {
            let mut poll_cancel = self.poll_cancel.lock().await;
            if let Some(previous) = poll_cancel.take() {
                // A previous session's loops must be gone before new ones
                // exist; two pollers on one link floods the transport.
                let _ = previous.send(true);
            }
            *poll_cancel = Some(cancel_tx.clone());
        }

        tokio::spawn(poll_telemetry(
            Arc::clone(&transport) as Arc<dyn Transport>,
            cancel_rx.clone(),
            input_tx.clone(),
            Duration::from_millis(self.timeout_config.telemetry_read_timeout_ms),
        ));

        if let Some(notifications) = transport.take_notifications().await {
            tokio::spawn(pump_notifications(
                notifications,
                cancel_rx.clone(),
                input_tx.clone(),
            ));
        } else {
            warn!("notification receiver already taken; rep events unavailable");
        }

        tokio::spawn(tick(cancel_rx.clone(), input_tx.clone()));

        let _ = input_tx.send(SessionInput::Started);

        let connection_state = Arc::clone(&self.connection_state);
        tokio::spawn(run_session(
            engine,
            input_rx,
            cancel_rx,
            cancel_tx.clone(),
            event_tx,
            connection_state,
        ));

        Ok(WorkoutHandle {
            events: event_rx,
            input: input_tx,
            cancel: cancel_tx,
            transport,
        })
    }

    /// Release cable tension immediately
    ///
    /// The deload frame is the safety path; it is written without the
    /// usual retry delay so it reaches the motor as fast as the link
    /// allows.
    ///
    /// # Errors
    ///
    /// Returns [`LiftError::NotReady`] when not connected, or the write
    /// error.
    pub async fn deload(&self) -> Result<()> {
        warn!("deload requested");
        let transport = self.transport().await?;
        transport.write_frame(&protocol::build_deload_frame()).await
    }

    /// Tear the link down
    ///
    /// Cancels the poll loop, drops cached characteristic handles with
    /// the connection object, and closes the link. The teardown completes
    /// before this returns, so a subsequent [`Self::reconnect`] never
    /// overlaps link objects.
    ///
    /// # Errors
    ///
    /// Returns [`LiftError::Ble`] if closing the peripheral fails; the
    /// local state is torn down regardless.
    pub async fn disconnect(&self) -> Result<()> {
        info!("disconnecting from trainer");

        if let Some(cancel) = self.poll_cancel.lock().await.take() {
            let _ = cancel.send(true);
        }

        let connection = self.connection.lock().await.take();
        *self.connection_state.write().await = ConnectionState::Disconnected;

        if let Some(conn) = connection {
            conn.teardown().await?;
        }

        Ok(())
    }

    /// Re-establish the link after a disconnect
    ///
    /// Requires that teardown already completed: a live connection object
    /// here means overlapping links, which produce repeating
    /// short-disconnect loops on some platform stacks.
    ///
    /// # Errors
    ///
    /// Returns [`LiftError::InvalidState`] if still connected, or any
    /// connection error from the fresh attempt.
    pub async fn reconnect(&self) -> Result<()> {
        {
            let guard = self.connection.lock().await;
            if guard.is_some() {
                return Err(LiftError::InvalidState {
                    state: "still connected; disconnect before reconnecting".to_string(),
                });
            }
        }

        *self.connection_state.write().await = ConnectionState::Connecting;
        let connection = match self.manager.connect(&self.info, &self.connection_params).await {
            Ok(conn) => conn,
            Err(e) => {
                *self.connection_state.write().await = ConnectionState::Error(e.to_string());
                return Err(e);
            }
        };

        *self.connection_state.write().await = ConnectionState::Connected {
            device_name: self.info.name.clone(),
            address: self.info.address.clone(),
            model: self.info.model,
        };
        *self.connection.lock().await = Some(Arc::new(connection));

        info!("reconnected to trainer");
        Ok(())
    }
}

/// Handle to a running workout session
///
/// Events are consumed from here; control inputs (pause, resume, stop)
/// are injected through it. Dropping the handle does not stop the set;
/// call [`Self::stop`] for a deterministic end.
pub struct WorkoutHandle {
    events: mpsc::UnboundedReceiver<SessionEvent>,
    input: mpsc::UnboundedSender<SessionInput>,
    cancel: watch::Sender<bool>,
    transport: Arc<TrainerConnection>,
}

impl WorkoutHandle {
    /// Receive the next session event, or `None` when the session ended
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }

    /// Pause the set
    pub fn pause(&self) {
        let _ = self.input.send(SessionInput::Pause);
    }

    /// Resume a paused set
    pub fn resume(&self) {
        let _ = self.input.send(SessionInput::Resume);
    }

    /// Tell the engine the caller is moving on to the next exercise
    pub fn advance_exercise(&self) {
        let _ = self.input.send(SessionInput::AdvanceExercise);
    }

    /// Tell the engine the whole routine is done
    pub fn advance_routine(&self) {
        let _ = self.input.send(SessionInput::AdvanceRoutine);
    }

    /// Stop the set and release tension
    ///
    /// Sends the stop frame, routes a stop input through the engine for a
    /// deterministic final state, and cancels the poll and timer loops.
    ///
    /// # Errors
    ///
    /// Returns the stop frame's write error; the local session is ended
    /// regardless.
    pub async fn stop(mut self) -> Result<()> {
        info!("stopping workout");
        let _ = self.input.send(SessionInput::Stop);

        let write_result = self
            .transport
            .write_frame(&crate::protocol::build_stop_frame())
            .await;

        let _ = self.cancel.send(true);

        // Drain remaining events so the final transitions are observable
        // by a caller that stops consuming after stop().
        while self.events.try_recv().is_ok() {}

        write_result
    }
}

/// Sequential telemetry poll loop
///
/// Exactly one read is in flight at any time: the next read is issued
/// only after the prior read's completion (or timeout) has been
/// observed. This is deliberate backpressure; fixed-timer fire-and-forget
/// reads flood the transport and trip the supervision timeout on some
/// platform stacks. Cancellation drops the in-flight read immediately.
pub(crate) async fn poll_telemetry(
    transport: Arc<dyn Transport>,
    mut cancel: watch::Receiver<bool>,
    input: mpsc::UnboundedSender<SessionInput>,
    read_timeout: Duration,
) {
    debug!("telemetry poll loop started");

    loop {
        if *cancel.borrow() {
            break;
        }

        tokio::select! {
            changed = cancel.changed() => {
                if changed.is_err() || *cancel.borrow() {
                    break;
                }
            }
            read = timeout(read_timeout, transport.read_telemetry()) => {
                match read {
                    Ok(Ok(bytes)) => match crate::protocol::parse_telemetry_frame(&bytes) {
                        Ok(sample) => {
                            if input.send(SessionInput::Telemetry(sample)).is_err() {
                                break;
                            }
                        }
                        // Radio noise: drop the sample, keep the session.
                        Err(e) => debug!("dropping undecodable telemetry frame: {e}"),
                    },
                    Ok(Err(e)) => {
                        warn!("telemetry read failed, treating link as lost: {e}");
                        let _ = input.send(SessionInput::LinkLost);
                        break;
                    }
                    Err(_) => {
                        debug!("telemetry read timed out, reissuing");
                    }
                }
            }
        }
    }

    debug!("telemetry poll loop stopped");
}

/// Pump decoded rep and status notifications into the session
///
/// A lone undecodable rep frame is dropped and counted; a run of
/// [`MAX_CONSECUTIVE_DECODE_FAILURES`] escalates to link-lost, since the
/// link is evidently feeding garbage.
pub(crate) async fn pump_notifications(
    mut notifications: mpsc::UnboundedReceiver<RawNotification>,
    mut cancel: watch::Receiver<bool>,
    input: mpsc::UnboundedSender<SessionInput>,
) {
    let mut consecutive_failures = 0u32;

    loop {
        tokio::select! {
            changed = cancel.changed() => {
                if changed.is_err() || *cancel.borrow() {
                    break;
                }
            }
            notification = notifications.recv() => {
                let Some(notification) = notification else { break };
                let forwarded = match notification {
                    RawNotification::Rep(bytes) => {
                        match crate::protocol::parse_rep_notification(&bytes) {
                            Ok(note) => {
                                consecutive_failures = 0;
                                input.send(SessionInput::Rep(note))
                            }
                            Err(e) => {
                                consecutive_failures += 1;
                                debug!(
                                    consecutive_failures,
                                    "dropping undecodable rep frame: {e}"
                                );
                                if consecutive_failures >= MAX_CONSECUTIVE_DECODE_FAILURES {
                                    error!("repeated rep decode failures, treating link as lost");
                                    let _ = input.send(SessionInput::LinkLost);
                                    break;
                                }
                                Ok(())
                            }
                        }
                    }
                    RawNotification::Status(bytes) => {
                        match crate::protocol::parse_status_frame(&bytes) {
                            Ok(status) => input.send(SessionInput::Machine(status)),
                            Err(e) => {
                                debug!("dropping undecodable status frame: {e}");
                                Ok(())
                            }
                        }
                    }
                };

                if forwarded.is_err() {
                    break;
                }
            }
        }
    }
}

/// One-second tick source for countdown, rest, and stall windows
async fn tick(mut cancel: watch::Receiver<bool>, input: mpsc::UnboundedSender<SessionInput>) {
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    interval.tick().await; // the first tick completes immediately

    loop {
        tokio::select! {
            changed = cancel.changed() => {
                if changed.is_err() || *cancel.borrow() {
                    break;
                }
            }
            _ = interval.tick() => {
                if input.send(SessionInput::Tick).is_err() {
                    break;
                }
            }
        }
    }
}

/// Drive the session engine from the ordered input channel
///
/// The engine is the sole owner of workout state; this loop is the only
/// place that feeds it. On cancellation the engine is stopped explicitly
/// so teardown always leaves a deterministic final state.
async fn run_session(
    mut engine: SessionEngine,
    mut input: mpsc::UnboundedReceiver<SessionInput>,
    mut cancel: watch::Receiver<bool>,
    cancel_tx: watch::Sender<bool>,
    events: mpsc::UnboundedSender<SessionEvent>,
    connection_state: Arc<RwLock<ConnectionState>>,
) {
    loop {
        let next = tokio::select! {
            changed = cancel.changed() => {
                if changed.is_err() || *cancel.borrow() {
                    for event in engine.handle(SessionInput::Stop) {
                        let _ = events.send(event);
                    }
                    break;
                }
                continue;
            }
            next = input.recv() => next,
        };

        let Some(next) = next else { break };

        if matches!(next, SessionInput::LinkLost) {
            *connection_state.write().await = ConnectionState::Error("connection lost".to_string());
        }

        for event in engine.handle(next) {
            let _ = events.send(event);
        }

        if engine.is_terminal() {
            break;
        }
    }

    // The session is over; take the poll, pump, and tick loops down with
    // it so nothing keeps reading a link nobody is consuming.
    let _ = cancel_tx.send(true);

    debug!("session loop ended in state {}", engine.state());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::Transport;
    use async_trait::async_trait;
    use bytes::{BufMut, BytesMut};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Scripted transport for exercising the poll loop without a radio
    struct FakeTransport {
        outstanding_reads: AtomicUsize,
        max_outstanding: AtomicUsize,
        total_reads: AtomicUsize,
        writes: AtomicUsize,
        never_complete: AtomicBool,
    }

    impl FakeTransport {
        fn new(never_complete: bool) -> Self {
            Self {
                outstanding_reads: AtomicUsize::new(0),
                max_outstanding: AtomicUsize::new(0),
                total_reads: AtomicUsize::new(0),
                writes: AtomicUsize::new(0),
                never_complete: AtomicBool::new(never_complete),
            }
        }

        fn telemetry_frame() -> Vec<u8> {
            let mut frame = BytesMut::new();
            frame.put_u16_le(250);
            frame.put_u16_le(250);
            frame.put_u16_le(5000);
            frame.put_u16_le(5000);
            frame.put_i16_le(100);
            frame.put_i16_le(100);
            frame.put_u16_le(200);
            frame.put_u8(0x01);
            frame.to_vec()
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn write_frame(&self, _frame: &[u8]) -> crate::Result<()> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn read_telemetry(&self) -> crate::Result<Vec<u8>> {
            let now = self.outstanding_reads.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_outstanding.fetch_max(now, Ordering::SeqCst);
            self.total_reads.fetch_add(1, Ordering::SeqCst);

            if self.never_complete.load(Ordering::SeqCst) {
                // Never resolves; the outstanding count stays at one and
                // the caller must not issue another read.
                futures::future::pending::<()>().await;
            }

            tokio::time::sleep(Duration::from_millis(5)).await;
            self.outstanding_reads.fetch_sub(1, Ordering::SeqCst);
            Ok(Self::telemetry_frame())
        }

        async fn is_connected(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn test_poll_never_overlaps_reads() {
        let transport = Arc::new(FakeTransport::new(false));
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (input_tx, mut input_rx) = mpsc::unbounded_channel();

        let poll = tokio::spawn(poll_telemetry(
            Arc::clone(&transport) as Arc<dyn Transport>,
            cancel_rx,
            input_tx,
            Duration::from_millis(500),
        ));

        tokio::time::sleep(Duration::from_millis(100)).await;
        let _ = cancel_tx.send(true);
        poll.await.unwrap();

        assert!(transport.total_reads.load(Ordering::SeqCst) > 1);
        assert_eq!(transport.max_outstanding.load(Ordering::SeqCst), 1);
        assert!(matches!(
            input_rx.try_recv(),
            Ok(SessionInput::Telemetry(_))
        ));
    }

    #[tokio::test]
    async fn test_never_completing_read_stays_single() {
        let transport = Arc::new(FakeTransport::new(true));
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (input_tx, _input_rx) = mpsc::unbounded_channel();

        let poll = tokio::spawn(poll_telemetry(
            Arc::clone(&transport) as Arc<dyn Transport>,
            cancel_rx,
            input_tx,
            // A timeout far beyond the observation window: the read hangs
            // for the whole test.
            Duration::from_secs(60),
        ));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(transport.outstanding_reads.load(Ordering::SeqCst), 1);
        assert_eq!(transport.max_outstanding.load(Ordering::SeqCst), 1);

        let _ = cancel_tx.send(true);
        poll.await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_stops_all_reads() {
        let transport = Arc::new(FakeTransport::new(false));
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (input_tx, _input_rx) = mpsc::unbounded_channel();

        let poll = tokio::spawn(poll_telemetry(
            Arc::clone(&transport) as Arc<dyn Transport>,
            cancel_rx,
            input_tx,
            Duration::from_millis(500),
        ));

        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = cancel_tx.send(true);
        poll.await.unwrap();

        let reads_at_teardown = transport.total_reads.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Zero further read attempts after teardown completes.
        assert_eq!(transport.total_reads.load(Ordering::SeqCst), reads_at_teardown);
        assert_eq!(transport.writes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_single_decode_failure_drops_sample_only() {
        let (notification_tx, notification_rx) = mpsc::unbounded_channel();
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let (input_tx, mut input_rx) = mpsc::unbounded_channel();

        let pump = tokio::spawn(pump_notifications(notification_rx, cancel_rx, input_tx));

        // One garbage frame, then a valid legacy frame.
        notification_tx
            .send(RawNotification::Rep(vec![0xFF, 0x00]))
            .unwrap();
        let mut valid = BytesMut::new();
        valid.put_u16_le(1);
        valid.put_u16_le(1);
        valid.put_u16_le(9000);
        valid.put_u16_le(1500);
        notification_tx
            .send(RawNotification::Rep(valid.to_vec()))
            .unwrap();
        drop(notification_tx);
        pump.await.unwrap();

        // The bad frame produced nothing; the good one came through.
        let received = input_rx.recv().await.unwrap();
        assert!(matches!(received, SessionInput::Rep(_)));
        assert!(input_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_repeated_decode_failures_escalate() {
        let (notification_tx, notification_rx) = mpsc::unbounded_channel();
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let (input_tx, mut input_rx) = mpsc::unbounded_channel();

        let pump = tokio::spawn(pump_notifications(notification_rx, cancel_rx, input_tx));

        for _ in 0..MAX_CONSECUTIVE_DECODE_FAILURES {
            notification_tx
                .send(RawNotification::Rep(vec![0xFF]))
                .unwrap();
        }
        pump.await.unwrap();

        let received = input_rx.recv().await.unwrap();
        assert!(matches!(received, SessionInput::LinkLost));
    }

    #[tokio::test]
    async fn test_status_frames_forwarded() {
        let (notification_tx, notification_rx) = mpsc::unbounded_channel();
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let (input_tx, mut input_rx) = mpsc::unbounded_channel();

        let pump = tokio::spawn(pump_notifications(notification_rx, cancel_rx, input_tx));

        notification_tx
            .send(RawNotification::Status(vec![2, 0]))
            .unwrap();
        drop(notification_tx);
        pump.await.unwrap();

        let received = input_rx.recv().await.unwrap();
        assert!(matches!(received, SessionInput::Machine(_)));
    }
}
