use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, instrument, warn};

use super::capability::{ResolvedHandles, validate_capabilities};
use super::queue::{
    OperationOutput, OperationQueue, OperationResult, OperationTicket, QueuedOperation,
};
use super::state::{ConnectionState, LifecycleEvent, SessionStateMachine};
use crate::codec::{CommandId, DataCodec};
use crate::error::SessionError;
use crate::hw::{DeviceIdentity, ServiceInfo, Transport, TransportEvent, TransportEvents};
use crate::profile::ProfileDescriptor;
use crate::publisher::{StatePublisher, ValueStream};

/// Owns the single active session.
///
/// Opening a session for a device replaces whatever session was active
/// before.
#[derive(Debug)]
pub struct DeviceManager {
    transport: Arc<dyn Transport>,
    profile: ProfileDescriptor,
    current: Mutex<Option<SessionHandle>>,
}

impl DeviceManager {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, profile: ProfileDescriptor) -> Self {
        Self {
            transport,
            profile,
            current: Mutex::new(None),
        }
    }

    /// Opens a session for `device` and starts connecting.
    ///
    /// The previous session, if any, is closed; the new one connects once
    /// its teardown has finished. Must be called from within a Tokio runtime.
    #[instrument(skip(self), fields(address = device.address()))]
    pub fn open(&self, device: DeviceIdentity) -> SessionHandle {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        let previous_teardown = current.take().map(|previous| {
            previous.close();
            previous.teardown_finished()
        });

        let session = SessionHandle::start(
            Arc::clone(&self.transport),
            self.profile.clone(),
            device,
            previous_teardown,
        );
        *current = Some(session.clone());
        session
    }

    /// Returns the active session, if one was opened.
    #[must_use]
    pub fn current(&self) -> Option<SessionHandle> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn profile(&self) -> &ProfileDescriptor {
        &self.profile
    }
}

/// Caller-facing handle to one session.
///
/// Handles are cheap to clone; every clone controls the same session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    core: Arc<SessionCore>,
}

#[derive(Debug)]
struct SessionCore {
    device: DeviceIdentity,
    profile: ProfileDescriptor,
    transport: Arc<dyn Transport>,
    publisher: StatePublisher,
    record: Mutex<SessionRecord>,
}

/// Mutable per-attempt session state. Replaced wholesale on reconnect.
#[derive(Debug)]
struct SessionRecord {
    generation: u64,
    machine: SessionStateMachine,
    handles: Option<ResolvedHandles>,
    services: Vec<ServiceInfo>,
    supported: bool,
    led: bool,
    led_target: Option<bool>,
    button: Option<bool>,
    queue: Option<OperationQueue>,
    interrupted: CancellationToken,
    finished: CancellationToken,
}

impl SessionRecord {
    fn new(generation: u64) -> Self {
        Self {
            generation,
            machine: SessionStateMachine::new(),
            handles: None,
            services: Vec::new(),
            supported: false,
            led: false,
            led_target: None,
            button: None,
            queue: None,
            interrupted: CancellationToken::new(),
            finished: CancellationToken::new(),
        }
    }
}

impl SessionHandle {
    fn start(
        transport: Arc<dyn Transport>,
        profile: ProfileDescriptor,
        device: DeviceIdentity,
        previous_teardown: Option<CancellationToken>,
    ) -> Self {
        let core = Arc::new(SessionCore {
            device,
            profile,
            transport,
            publisher: StatePublisher::default(),
            record: Mutex::new(SessionRecord::new(0)),
        });
        let generation = core.begin_attempt(&mut core.record());
        spawn_driver(Arc::clone(&core), generation, previous_teardown);
        Self { core }
    }

    /// Requests disconnection. Pending operations fail with
    /// [`crate::OperationError::SessionClosed`].
    ///
    /// Does nothing when the session is already disconnecting or
    /// disconnected.
    pub fn close(&self) {
        self.core.interrupt(None, LifecycleEvent::DisconnectRequested);
    }

    /// Starts a fresh connection attempt to the same device.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::ReconnectWhileActive`] unless the session is
    /// disconnected.
    pub fn reconnect(&self) -> Result<(), SessionError> {
        let (generation, previous_teardown) = {
            let mut record = self.core.record();
            let state = record.machine.state();
            if !state.is_disconnected() {
                return Err(SessionError::ReconnectWhileActive { state });
            }

            let previous_teardown = record.finished.clone();
            *record = SessionRecord::new(record.generation + 1);
            self.core.publisher.reset_device_values();
            (self.core.begin_attempt(&mut record), previous_teardown)
        };

        spawn_driver(Arc::clone(&self.core), generation, Some(previous_teardown));
        Ok(())
    }

    /// Switches the LED.
    ///
    /// Returns `None` without touching the device when the session is not
    /// ready or the LED is already in (or heading to) the requested state.
    pub fn set_led(&self, on: bool) -> Option<OperationTicket> {
        let mut record = self.core.record();
        let (Some(handles), Some(queue)) = (record.handles.as_ref(), record.queue.as_ref()) else {
            debug!(on, "ignoring LED request while not ready");
            return None;
        };

        let effective = record.led_target.unwrap_or(record.led);
        if effective == on {
            debug!(on, "LED already in requested state");
            return None;
        }

        let operation =
            QueuedOperation::Write(handles.control.clone(), DataCodec::encode_led(on).to_vec());
        let core = Arc::downgrade(&self.core);
        let generation = record.generation;
        let ticket = queue.enqueue(
            operation,
            Some(Box::new(move |outcome: &OperationResult| {
                complete_led_write(&core, generation, on, outcome);
            })),
        );
        record.led_target = Some(on);
        Some(ticket)
    }

    /// Sends one of the numbered commands.
    ///
    /// Returns `None` without touching the device when the session is not
    /// ready. Repeated commands are always sent.
    pub fn send_command(&self, id: CommandId) -> Option<OperationTicket> {
        let record = self.core.record();
        let (Some(handles), Some(queue)) = (record.handles.as_ref(), record.queue.as_ref()) else {
            debug!(%id, "ignoring command while not ready");
            return None;
        };

        let payload = DataCodec::encode_command(self.core.profile.commands(), id);
        debug!(%id, payload = %hex::encode(&payload), "sending command");
        Some(queue.enqueue(QueuedOperation::Write(handles.control.clone(), payload), None))
    }

    /// Connection state changes, starting with the current state.
    #[must_use]
    pub fn observe_connection_state(&self) -> ValueStream<ConnectionState> {
        self.core.publisher.connection.subscribe()
    }

    /// Acknowledged LED values, starting with the latest one.
    #[must_use]
    pub fn observe_led(&self) -> ValueStream<bool> {
        self.core.publisher.led.subscribe()
    }

    /// Decoded button values, starting with the latest one.
    #[must_use]
    pub fn observe_button(&self) -> ValueStream<bool> {
        self.core.publisher.button.subscribe()
    }

    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.core.record().machine.state()
    }

    /// Whether the last capability negotiation accepted the peripheral.
    #[must_use]
    pub fn is_supported(&self) -> bool {
        self.core.record().supported
    }

    /// Last acknowledged LED value.
    #[must_use]
    pub fn led(&self) -> bool {
        self.core.record().led
    }

    /// Last decoded button value, if one arrived during this attempt.
    #[must_use]
    pub fn button(&self) -> Option<bool> {
        self.core.record().button
    }

    /// Service tree found by the latest discovery of this attempt.
    #[must_use]
    pub fn discovered_services(&self) -> Vec<ServiceInfo> {
        self.core.record().services.clone()
    }

    #[must_use]
    pub fn device(&self) -> &DeviceIdentity {
        &self.core.device
    }

    /// Cancelled once the current attempt has fully torn down.
    fn teardown_finished(&self) -> CancellationToken {
        self.core.record().finished.clone()
    }
}

impl SessionCore {
    fn record(&self) -> MutexGuard<'_, SessionRecord> {
        self.record.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies `event` and publishes the new state. Must be called with the
    /// record lock held so observers see transitions in order.
    fn transition(
        &self,
        record: &mut SessionRecord,
        event: LifecycleEvent,
    ) -> Option<ConnectionState> {
        let state = record.machine.apply(event)?;
        if state != ConnectionState::Ready {
            record.handles = None;
        }
        self.publisher.connection.publish(state);
        Some(state)
    }

    fn transition_if_current(
        &self,
        generation: u64,
        event: LifecycleEvent,
    ) -> Option<ConnectionState> {
        let mut record = self.record();
        if Self::is_current(&record, generation) {
            self.transition(&mut record, event)
        } else {
            None
        }
    }

    fn begin_attempt(&self, record: &mut SessionRecord) -> u64 {
        self.transition(record, LifecycleEvent::ConnectRequested);
        record.generation
    }

    fn is_current(record: &SessionRecord, generation: u64) -> bool {
        record.generation == generation
    }

    /// Moves the session to `Disconnecting` and wakes the driver.
    ///
    /// `generation` restricts the interruption to one attempt; `None` targets
    /// whatever attempt is current.
    fn interrupt(&self, generation: Option<u64>, event: LifecycleEvent) {
        let (queue, interrupted) = {
            let mut record = self.record();
            if generation.is_some_and(|generation| !Self::is_current(&record, generation)) {
                return;
            }
            if !matches!(
                record.machine.state(),
                ConnectionState::Connecting | ConnectionState::Initializing | ConnectionState::Ready
            ) {
                debug!(%event, state = %record.machine.state(), "session already shutting down");
                return;
            }

            self.transition(&mut record, event);
            record.led_target = None;
            (record.queue.take(), record.interrupted.clone())
        };

        if let Some(queue) = queue {
            queue.close();
        }
        interrupted.cancel();
    }

    fn handle_notification(&self, generation: u64, characteristic: uuid::Uuid, value: &[u8]) {
        if characteristic != self.profile.telemetry() {
            debug!(%characteristic, "ignoring notification from unexpected characteristic");
            return;
        }

        let mut record = self.record();
        // The queue exists only once the peripheral passed validation.
        if !Self::is_current(&record, generation)
            || record.queue.is_none()
            || !matches!(
                record.machine.state(),
                ConnectionState::Initializing | ConnectionState::Ready
            )
        {
            debug!(%characteristic, "ignoring telemetry outside a validated attempt");
            return;
        }

        match DataCodec::decode_button(value) {
            Ok(pressed) => {
                record.button = Some(pressed);
                self.publisher.button.publish(pressed);
            }
            Err(error) => {
                warn!(%error, payload = %hex::encode(value), "dropping invalid telemetry notification");
            }
        }
    }
}

fn complete_led_write(
    core: &Weak<SessionCore>,
    generation: u64,
    on: bool,
    outcome: &OperationResult,
) {
    let Some(core) = core.upgrade() else {
        return;
    };
    let mut record = core.record();
    if !SessionCore::is_current(&record, generation) {
        return;
    }
    if record.led_target == Some(on) {
        record.led_target = None;
    }

    match outcome {
        Ok(OperationOutput::Written(ack)) => match DataCodec::decode_led_ack(on, ack) {
            Ok(led) => {
                record.led = led;
                core.publisher.led.publish(led);
            }
            Err(error) => {
                warn!(%error, payload = %hex::encode(ack), "discarding LED acknowledgement");
            }
        },
        Ok(other) => warn!(?other, "unexpected LED write outcome"),
        Err(error) => debug!(%error, on, "LED write did not complete"),
    }
}

fn spawn_driver(
    core: Arc<SessionCore>,
    generation: u64,
    previous_teardown: Option<CancellationToken>,
) {
    let span = info_span!("session", address = core.device.address(), generation);
    tokio::spawn(drive(core, generation, previous_teardown).instrument(span));
}

/// Resolves to `None` when `token` is cancelled before `future` completes.
async fn until_interrupted<F: Future>(token: &CancellationToken, future: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        () = token.cancelled() => None,
        output = future => Some(output),
    }
}

async fn drive(
    core: Arc<SessionCore>,
    generation: u64,
    previous_teardown: Option<CancellationToken>,
) {
    if let Some(previous_teardown) = previous_teardown {
        previous_teardown.cancelled().await;
    }

    let (interrupted, finished) = {
        let record = core.record();
        (record.interrupted.clone(), record.finished.clone())
    };

    let connected = until_interrupted(&interrupted, core.transport.connect(&core.device)).await;
    let events = match connected {
        None => return teardown(&core, generation, &finished).await,
        Some(Err(error)) => {
            warn!(%error, "connect failed");
            if let Err(error) = core.transport.disconnect().await {
                debug!(%error, "cleanup after failed connect did not complete");
            }
            core.transition_if_current(generation, LifecycleEvent::ConnectFailed);
            finished.cancel();
            return;
        }
        Some(Ok(events)) => events,
    };

    let established = core
        .transition_if_current(generation, LifecycleEvent::LinkEstablished)
        .is_some();
    if !established {
        return teardown(&core, generation, &finished).await;
    }
    info!("link established");
    tokio::spawn(
        pump_events(Arc::clone(&core), generation, events, finished.clone()).in_current_span(),
    );

    if let Err(event) = initialise(&core, generation, &interrupted).await {
        if let Some(event) = event {
            core.transition_if_current(generation, event);
        }
        return teardown(&core, generation, &finished).await;
    }

    interrupted.cancelled().await;
    teardown(&core, generation, &finished).await;
}

/// Runs discovery, validation and the initialisation sequence.
///
/// On failure returns the lifecycle event to apply, or `None` when the
/// attempt was already interrupted.
async fn initialise(
    core: &SessionCore,
    generation: u64,
    interrupted: &CancellationToken,
) -> Result<(), Option<LifecycleEvent>> {
    let services = match until_interrupted(interrupted, core.transport.discover_services()).await {
        None => return Err(None),
        Some(Err(error)) => {
            warn!(%error, "service discovery failed");
            return Err(Some(LifecycleEvent::InitializationFailed));
        }
        Some(Ok(services)) => services,
    };
    {
        let mut record = core.record();
        if SessionCore::is_current(&record, generation) {
            record.services.clone_from(&services);
        }
    }

    let handles = match validate_capabilities(&core.profile, &services) {
        Ok(handles) => handles,
        Err(error) => {
            warn!(%error, "peripheral does not expose the required profile");
            core.transition_if_current(generation, LifecycleEvent::CapabilityRejected);
            if let Err(error) = core.transport.invalidate_cache().await {
                warn!(%error, "failed to invalidate service cache");
            }
            return Err(None);
        }
    };

    let queue = {
        let mut record = core.record();
        if !SessionCore::is_current(&record, generation)
            || record.machine.state() != ConnectionState::Initializing
        {
            return Err(None);
        }
        record.supported = true;
        let queue = OperationQueue::start(Arc::clone(&core.transport));
        record.queue = Some(queue.clone());
        queue
    };

    let subscribed = queue.enqueue(
        QueuedOperation::EnableNotifications(handles.telemetry.clone()),
        None,
    );
    match until_interrupted(interrupted, subscribed).await {
        None => return Err(None),
        Some(Err(error)) => {
            warn!(%error, "enabling telemetry notifications failed");
            return Err(Some(LifecycleEvent::InitializationFailed));
        }
        Some(Ok(_)) => debug!("telemetry notifications enabled"),
    }

    if core.record().button.is_none() {
        let read = queue.enqueue(QueuedOperation::Read(handles.telemetry.clone()), None);
        match until_interrupted(interrupted, read).await {
            None => return Err(None),
            Some(Err(error)) => {
                warn!(%error, "initial telemetry read failed");
                return Err(Some(LifecycleEvent::InitializationFailed));
            }
            Some(Ok(OperationOutput::Read(value))) => apply_initial_read(core, generation, &value),
            Some(Ok(other)) => warn!(?other, "unexpected telemetry read outcome"),
        }
    } else {
        debug!("skipping initial read, telemetry already received");
    }

    let mut record = core.record();
    if !SessionCore::is_current(&record, generation) {
        return Err(None);
    }
    if core.transition(&mut record, LifecycleEvent::InitializationComplete).is_none() {
        return Err(None);
    }
    record.handles = Some(handles);
    info!("session ready");
    Ok(())
}

fn apply_initial_read(core: &SessionCore, generation: u64, value: &[u8]) {
    let mut record = core.record();
    if !SessionCore::is_current(&record, generation) || record.button.is_some() {
        return;
    }
    match DataCodec::decode_button(value) {
        Ok(pressed) => {
            record.button = Some(pressed);
            core.publisher.button.publish(pressed);
        }
        Err(error) => {
            warn!(%error, payload = %hex::encode(value), "dropping invalid telemetry read");
        }
    }
}

async fn teardown(core: &SessionCore, generation: u64, finished: &CancellationToken) {
    let queue = core.record().queue.take();
    if let Some(queue) = queue {
        queue.close();
    }

    if let Err(error) = core.transport.disconnect().await {
        warn!(%error, "transport disconnect failed");
    }

    core.transition_if_current(generation, LifecycleEvent::TeardownConfirmed);
    info!("session torn down");
    finished.cancel();
}

async fn pump_events(
    core: Arc<SessionCore>,
    generation: u64,
    mut events: TransportEvents,
    finished: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            () = finished.cancelled() => return,
            event = events.next() => event,
        };

        match event {
            Some(TransportEvent::Notification {
                characteristic,
                value,
            }) => core.handle_notification(generation, characteristic, &value),
            Some(TransportEvent::LinkLost) | None => {
                info!("link lost");
                core.interrupt(Some(generation), LifecycleEvent::LinkLost);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use tokio::time::timeout;

    use super::*;
    use crate::hw::{CharacteristicInfo, CharacteristicProperty, FakeTransport};
    use crate::session::DisconnectReason;

    async fn settle(session: &SessionHandle, predicate: impl Fn(ConnectionState) -> bool) {
        let mut states = session.observe_connection_state();
        timeout(Duration::from_secs(5), async {
            while let Some(state) = states.next().await {
                if predicate(state) {
                    return;
                }
            }
        })
        .await
        .expect("session should reach the expected state");
    }

    #[tokio::test]
    async fn handles_exist_only_while_ready() {
        let profile = ProfileDescriptor::blinky();
        let fake = FakeTransport::for_profile(&profile);
        let manager = DeviceManager::new(Arc::new(fake), profile);
        let session = manager.open(DeviceIdentity::new("AA:BB"));

        assert!(session.core.record().handles.is_none());
        settle(&session, |state| state == ConnectionState::Ready).await;
        assert!(session.core.record().handles.is_some());

        session.close();
        assert!(session.core.record().handles.is_none());
        settle(&session, ConnectionState::is_disconnected).await;
        assert!(session.core.record().handles.is_none());
    }

    #[tokio::test]
    async fn rejected_peripheral_keeps_no_handles() {
        let profile = ProfileDescriptor::blinky();
        let fake = FakeTransport::new(vec![ServiceInfo::new(
            profile.service(),
            true,
            vec![CharacteristicInfo::new(
                profile.telemetry(),
                vec![CharacteristicProperty::Notify],
            )],
        )]);
        let manager = DeviceManager::new(Arc::new(fake.clone()), profile);
        let session = manager.open(DeviceIdentity::new("AA:BB"));

        settle(&session, ConnectionState::is_disconnected).await;

        assert_eq!(
            ConnectionState::Disconnected {
                reason: DisconnectReason::NotSupported
            },
            session.connection_state()
        );
        assert!(session.core.record().handles.is_none());
        assert!(session.core.record().queue.is_none());
        assert_eq!(1, fake.cache_invalidations());
    }

    #[tokio::test]
    async fn telemetry_is_ignored_until_the_peripheral_is_validated() {
        let profile = ProfileDescriptor::blinky();
        let transport: Arc<dyn Transport> = Arc::new(FakeTransport::for_profile(&profile));
        let core = SessionCore {
            device: DeviceIdentity::new("AA:BB"),
            profile: profile.clone(),
            transport: Arc::clone(&transport),
            publisher: StatePublisher::default(),
            record: Mutex::new(SessionRecord::new(0)),
        };
        {
            let mut record = core.record();
            core.begin_attempt(&mut record);
            core.transition(&mut record, LifecycleEvent::LinkEstablished);
        }

        core.handle_notification(0, profile.telemetry(), &[0x01]);
        assert_eq!(None, core.record().button);
        assert_eq!(None, core.publisher.button.latest());

        core.record().queue = Some(OperationQueue::start(transport));
        core.handle_notification(0, profile.telemetry(), &[0x01]);
        assert_eq!(Some(true), core.record().button);
        assert_eq!(Some(true), core.publisher.button.latest());
    }

    #[tokio::test]
    async fn until_interrupted_prefers_cancellation() {
        let token = CancellationToken::new();
        token.cancel();
        assert_matches!(until_interrupted(&token, async { 7 }).await, None);
        assert_matches!(
            until_interrupted(&CancellationToken::new(), async { 7 }).await,
            Some(7)
        );
    }
}
