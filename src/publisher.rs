use std::pin::Pin;
use std::sync::{Mutex, PoisonError};
use std::task::{Context, Poll};

use tokio::sync::mpsc;
use tokio_stream::Stream;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::session::ConnectionState;

/// A value with replay-last subscription semantics.
///
/// New subscribers first receive the most recent value (if one was ever
/// published) and then every later value in publish order.
#[derive(Debug)]
pub struct PublishedValue<T> {
    inner: Mutex<PublishedInner<T>>,
}

#[derive(Debug)]
struct PublishedInner<T> {
    latest: Option<T>,
    subscribers: Vec<mpsc::UnboundedSender<T>>,
}

impl<T: Clone> PublishedValue<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(PublishedInner {
                latest: None,
                subscribers: Vec::new(),
            }),
        }
    }

    /// Stores `value` and delivers it to every live subscriber in
    /// subscription order.
    pub fn publish(&self, value: T) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner
            .subscribers
            .retain(|subscriber| subscriber.send(value.clone()).is_ok());
        inner.latest = Some(value);
    }

    /// Registers a subscriber, replaying the latest value first.
    #[must_use]
    pub fn subscribe(&self) -> ValueStream<T> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(latest) = &inner.latest {
            // The receiver is alive, so this cannot fail.
            let _ = sender.send(latest.clone());
        }
        inner.subscribers.push(sender);
        ValueStream {
            inner: UnboundedReceiverStream::new(receiver),
        }
    }

    /// Forgets the latest value so new subscribers start empty. Existing
    /// subscribers keep what they already received.
    pub fn reset(&self) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .latest = None;
    }

    /// Returns the most recently published value.
    #[must_use]
    pub fn latest(&self) -> Option<T> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .latest
            .clone()
    }
}

impl<T: Clone> Default for PublishedValue<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Stream of values delivered to one subscriber.
#[derive(Debug)]
pub struct ValueStream<T> {
    inner: UnboundedReceiverStream<T>,
}

impl<T> Stream for ValueStream<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// Observable session state exposed to callers.
#[derive(Debug, Default)]
pub(crate) struct StatePublisher {
    pub(crate) connection: PublishedValue<ConnectionState>,
    pub(crate) led: PublishedValue<bool>,
    pub(crate) button: PublishedValue<bool>,
}

impl StatePublisher {
    /// Drops the device values of a previous attempt. Connection state is
    /// kept since it always reflects the current attempt.
    pub(crate) fn reset_device_values(&self) {
        self.led.reset();
        self.button.reset();
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tokio_stream::StreamExt;

    use super::*;

    async fn drain<T>(stream: &mut ValueStream<T>, count: usize) -> Vec<T> {
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            values.push(stream.next().await.expect("stream should yield a value"));
        }
        values
    }

    #[tokio::test]
    async fn late_subscriber_receives_latest_then_updates() {
        let value = PublishedValue::new();
        value.publish(1);
        value.publish(2);

        let mut late = value.subscribe();
        value.publish(3);

        assert_eq!(vec![2, 3], drain(&mut late, 2).await);
    }

    #[tokio::test]
    async fn subscriber_before_first_publish_sees_every_update_in_order() {
        let value = PublishedValue::new();
        let mut early = value.subscribe();

        for update in [true, false, true] {
            value.publish(update);
        }

        assert_eq!(vec![true, false, true], drain(&mut early, 3).await);
        assert_eq!(Some(true), value.latest());
    }

    #[tokio::test]
    async fn dropped_subscribers_are_pruned() {
        let value = PublishedValue::new();
        let first = value.subscribe();
        let mut second = value.subscribe();
        drop(first);

        value.publish("ready");

        assert_eq!(vec!["ready"], drain(&mut second, 1).await);
        let subscribers = value
            .inner
            .lock()
            .expect("lock should not be poisoned")
            .subscribers
            .len();
        assert_eq!(1, subscribers);
    }

    #[tokio::test]
    async fn reset_hides_the_old_value_from_new_subscribers() {
        let value = PublishedValue::new();
        value.publish(true);
        value.reset();

        let mut fresh = value.subscribe();
        assert_eq!(None, value.latest());
        value.publish(false);
        assert_eq!(vec![false], drain(&mut fresh, 1).await);
    }

    #[test]
    fn latest_is_none_before_publish() {
        let value: PublishedValue<bool> = PublishedValue::default();
        assert_eq!(None, value.latest());
    }
}
