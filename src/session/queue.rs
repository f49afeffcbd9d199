use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use tokio::sync::{Notify, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, debug_span, trace};

use crate::error::OperationError;
use crate::hw::{CharacteristicHandle, Transport};

/// A request-style transport operation serialised by the session queue.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum QueuedOperation {
    EnableNotifications(CharacteristicHandle),
    Read(CharacteristicHandle),
    Write(CharacteristicHandle, Vec<u8>),
}

impl QueuedOperation {
    fn kind(&self) -> &'static str {
        match self {
            Self::EnableNotifications(_) => "enable_notifications",
            Self::Read(_) => "read",
            Self::Write(..) => "write",
        }
    }
}

/// Successful outcome of a queued operation.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum OperationOutput {
    Enabled,
    Read(Vec<u8>),
    /// The acknowledged payload.
    Written(Vec<u8>),
}

pub type OperationResult = Result<OperationOutput, OperationError>;

/// Runs on the queue worker once an operation settles, before the next one
/// starts.
pub(crate) type Continuation = Box<dyn FnOnce(&OperationResult) + Send>;

/// Completion handle for a queued operation.
///
/// Dropping the ticket does not cancel the operation.
#[derive(Debug)]
#[must_use = "a ticket does nothing unless awaited; drop it explicitly for fire-and-forget"]
pub struct OperationTicket {
    receiver: oneshot::Receiver<OperationResult>,
}

impl OperationTicket {
    fn closed() -> Self {
        let (sender, receiver) = oneshot::channel();
        let _ = sender.send(Err(OperationError::SessionClosed));
        Self { receiver }
    }
}

impl Future for OperationTicket {
    type Output = OperationResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(OperationError::SessionClosed)))
    }
}

struct Pending {
    operation: QueuedOperation,
    completion: oneshot::Sender<OperationResult>,
    continuation: Option<Continuation>,
}

impl Pending {
    fn settle(self, outcome: OperationResult) {
        if let Some(continuation) = self.continuation {
            continuation(&outcome);
        }
        let _ = self.completion.send(outcome);
    }
}

impl fmt::Debug for Pending {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pending")
            .field("operation", &self.operation)
            .field("continuation", &self.continuation.is_some())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<Pending>,
    closed: bool,
}

#[derive(Debug)]
struct QueueShared {
    state: Mutex<QueueState>,
    wakeup: Notify,
    closed: CancellationToken,
}

impl QueueShared {
    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// FIFO queue with at most one operation in flight.
///
/// Each queue belongs to one connection attempt and owns a worker task that
/// exits once the queue is closed.
#[derive(Debug, Clone)]
pub(crate) struct OperationQueue {
    shared: Arc<QueueShared>,
}

impl OperationQueue {
    /// Creates the queue and spawns its worker on the current runtime.
    pub(crate) fn start(transport: Arc<dyn Transport>) -> Self {
        let shared = Arc::new(QueueShared {
            state: Mutex::new(QueueState::default()),
            wakeup: Notify::new(),
            closed: CancellationToken::new(),
        });
        tokio::spawn(
            run_worker(Arc::clone(&shared), transport).instrument(debug_span!("operation_queue")),
        );
        Self { shared }
    }

    /// Appends an operation.
    ///
    /// On a closed queue the ticket resolves with
    /// [`OperationError::SessionClosed`] straight away and the continuation is
    /// dropped without running.
    pub(crate) fn enqueue(
        &self,
        operation: QueuedOperation,
        continuation: Option<Continuation>,
    ) -> OperationTicket {
        let mut state = self.shared.state();
        if state.closed {
            debug!(operation = operation.kind(), "enqueue on closed queue");
            return OperationTicket::closed();
        }

        let (completion, receiver) = oneshot::channel();
        trace!(operation = operation.kind(), depth = state.pending.len(), "enqueue");
        state.pending.push_back(Pending {
            operation,
            completion,
            continuation,
        });
        drop(state);
        self.shared.wakeup.notify_one();
        OperationTicket { receiver }
    }

    /// Fails every operation that has not started and abandons the one in
    /// flight.
    ///
    /// Continuations of the failed operations run on the calling task, so
    /// callers must not hold locks those continuations take.
    pub(crate) fn close(&self) {
        let drained: Vec<Pending> = {
            let mut state = self.shared.state();
            if state.closed {
                return;
            }
            state.closed = true;
            state.pending.drain(..).collect()
        };
        self.shared.closed.cancel();

        debug!(failed = drained.len(), "operation queue closed");
        for pending in drained {
            pending.settle(Err(OperationError::SessionClosed));
        }
    }

    #[cfg(test)]
    fn is_closed(&self) -> bool {
        self.shared.state().closed
    }
}

async fn run_worker(shared: Arc<QueueShared>, transport: Arc<dyn Transport>) {
    loop {
        let next = shared.state().pending.pop_front();
        let Some(pending) = next else {
            tokio::select! {
                biased;
                () = shared.closed.cancelled() => return,
                () = shared.wakeup.notified() => continue,
            }
        };

        let kind = pending.operation.kind();
        let outcome = tokio::select! {
            biased;
            () = shared.closed.cancelled() => None,
            outcome = execute(transport.as_ref(), &pending.operation) => Some(outcome),
        };
        let Some(outcome) = outcome else {
            debug!(operation = kind, "abandoning in-flight operation");
            pending.settle(Err(OperationError::SessionClosed));
            return;
        };

        match &outcome {
            Ok(_) => trace!(operation = kind, "operation completed"),
            Err(error) => debug!(operation = kind, %error, "operation failed"),
        }
        pending.settle(outcome);
    }
}

async fn execute(transport: &dyn Transport, operation: &QueuedOperation) -> OperationResult {
    let output = match operation {
        QueuedOperation::EnableNotifications(handle) => {
            transport.enable_notifications(handle).await?;
            OperationOutput::Enabled
        }
        QueuedOperation::Read(handle) => OperationOutput::Read(transport.read(handle).await?),
        QueuedOperation::Write(handle, payload) => {
            OperationOutput::Written(transport.write(handle, payload).await?)
        }
    };
    Ok(output)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::hw::{DeviceIdentity, FakeTransport};
    use crate::profile::ProfileDescriptor;

    async fn connected_fake() -> (FakeTransport, CharacteristicHandle) {
        let profile = ProfileDescriptor::blinky();
        let fake = FakeTransport::for_profile(&profile);
        let _events = fake
            .connect(&DeviceIdentity::new("AA:BB"))
            .await
            .expect("fake connect should succeed");
        (
            fake,
            CharacteristicHandle::new(profile.service(), profile.control()),
        )
    }

    #[tokio::test]
    async fn completions_follow_submission_order() {
        let (fake, control) = connected_fake().await;
        let queue = OperationQueue::start(Arc::new(fake.clone()));
        let order = Arc::new(Mutex::new(Vec::new()));

        let tickets: Vec<_> = (0u8..4)
            .map(|index| {
                let order = Arc::clone(&order);
                queue.enqueue(
                    QueuedOperation::Write(control.clone(), vec![index]),
                    Some(Box::new(move |_: &OperationResult| {
                        order.lock().expect("order lock").push(index);
                    })),
                )
            })
            .collect();

        for (index, ticket) in (0u8..).zip(tickets) {
            assert_matches!(
                ticket.await,
                Ok(OperationOutput::Written(ack)) if ack == vec![index]
            );
        }
        assert_eq!(vec![0, 1, 2, 3], *order.lock().expect("order lock"));
        assert_eq!(
            vec![vec![0], vec![1], vec![2], vec![3]],
            fake.writes()
        );
    }

    #[tokio::test]
    async fn close_fails_pending_and_in_flight_operations() {
        let (fake, control) = connected_fake().await;
        fake.hold_writes();
        let queue = OperationQueue::start(Arc::new(fake.clone()));

        let first = queue.enqueue(QueuedOperation::Write(control.clone(), vec![0x01]), None);
        let second = queue.enqueue(QueuedOperation::Write(control, vec![0x00]), None);
        tokio::task::yield_now().await;
        queue.close();

        assert_matches!(first.await, Err(OperationError::SessionClosed));
        assert_matches!(second.await, Err(OperationError::SessionClosed));
        assert!(queue.is_closed());
    }

    #[tokio::test]
    async fn enqueue_after_close_resolves_immediately() {
        let (fake, control) = connected_fake().await;
        let queue = OperationQueue::start(Arc::new(fake.clone()));
        queue.close();

        let ticket = queue.enqueue(QueuedOperation::Read(control), None);

        assert_matches!(ticket.await, Err(OperationError::SessionClosed));
        assert!(fake.operations().iter().all(|operation| !matches!(
            operation,
            crate::hw::FakeOperation::Read { .. }
        )));
    }

    #[tokio::test]
    async fn transport_failures_reach_the_ticket() {
        let profile = ProfileDescriptor::blinky();
        let fake = FakeTransport::for_profile(&profile);
        let queue = OperationQueue::start(Arc::new(fake));
        let telemetry = CharacteristicHandle::new(profile.service(), profile.telemetry());

        let result = queue.enqueue(QueuedOperation::Read(telemetry), None).await;

        assert_matches!(
            result,
            Err(OperationError::Transport(crate::error::TransportError::NotConnected))
        );
    }
}
