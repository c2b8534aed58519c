//! Cancellable server and bidirectional streams
//!
//! The node delivers stream callbacks on its own threads. A [`StreamSink`] is
//! the producer half handed to those callbacks, a [`Subscription`] is the
//! consumer half read from the launcher's event loop, and a
//! [`SubscriptionHandle`] is the cancel capability. A [`BidiStream`] adds a
//! [`StreamSender`] for writing back into the stream.
//!
//! Delivery rules:
//! - updates pushed after cancellation or after a stream error are dropped
//! - the first stream error is delivered once and ends the stream
//! - an update already queued when the handle is cancelled is discarded on the
//!   consumer side, right before it would be delivered

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Notify};

use super::runtime::{Payload, RuntimeError};

type Cleanup = Box<dyn FnOnce() + Send>;
type SendFn = dyn Fn(&[u8]) -> Result<(), RuntimeError> + Send + Sync;

/// One item read from a subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Update(Payload),
    Error(RuntimeError),
}

struct StreamShared {
    name: String,
    /// Producer may still push
    open: AtomicBool,
    /// Consumer asked to stop
    cancelled: AtomicBool,
    wake: Notify,
    cleanup: Mutex<Option<Cleanup>>,
}

/// Producer half, owned by the node callbacks
#[derive(Clone)]
pub struct StreamSink {
    shared: Arc<StreamShared>,
    tx: mpsc::UnboundedSender<StreamEvent>,
}

impl StreamSink {
    /// Push a state update. Returns false when the stream no longer accepts updates.
    pub fn push_update(&self, bytes: Vec<u8>) -> bool {
        if !self.shared.open.load(Ordering::SeqCst) {
            log::trace!("{} stream is not active, dropping update", self.shared.name);
            return false;
        }
        self.tx.send(StreamEvent::Update(Payload::new(bytes))).is_ok()
    }

    /// Push a stream failure. Only the first failure is delivered.
    pub fn push_error(&self, message: String) -> bool {
        if !self.shared.open.swap(false, Ordering::SeqCst) {
            log::trace!("{} stream is not active, dropping error", self.shared.name);
            return false;
        }
        self.tx
            .send(StreamEvent::Error(RuntimeError::Runtime(message)))
            .is_ok()
    }

    pub fn is_active(&self) -> bool {
        self.shared.open.load(Ordering::SeqCst) && !self.shared.cancelled.load(Ordering::SeqCst)
    }
}

/// Cancel capability for a subscription. Cloning shares the same stream.
#[derive(Clone)]
pub struct SubscriptionHandle {
    shared: Arc<StreamShared>,
}

impl SubscriptionHandle {
    /// Stop delivery. Returns true for the call that actually cancelled;
    /// later calls are no-ops.
    pub fn cancel(&self) -> bool {
        if self.shared.cancelled.swap(true, Ordering::SeqCst) {
            log::debug!("{} stream already closed", self.shared.name);
            return false;
        }

        self.shared.open.store(false, Ordering::SeqCst);

        let cleanup = match self.shared.cleanup.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(cleanup) = cleanup {
            cleanup();
        }

        self.shared.wake.notify_one();
        log::debug!("{} stream closed", self.shared.name);
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::SeqCst)
    }

    /// Neither cancelled nor ended by a stream error
    pub fn is_active(&self) -> bool {
        self.shared.open.load(Ordering::SeqCst) && !self.is_cancelled()
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }
}

/// Consumer half of a server stream
pub struct Subscription {
    shared: Arc<StreamShared>,
    rx: mpsc::UnboundedReceiver<StreamEvent>,
    finished: bool,
}

impl Subscription {
    /// Create a connected sink/subscription pair for the named stream
    pub fn channel(name: impl Into<String>) -> (StreamSink, Subscription) {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(StreamShared {
            name: name.into(),
            open: AtomicBool::new(true),
            cancelled: AtomicBool::new(false),
            wake: Notify::new(),
            cleanup: Mutex::new(None),
        });

        let sink = StreamSink {
            shared: shared.clone(),
            tx,
        };
        let subscription = Subscription {
            shared,
            rx,
            finished: false,
        };
        (sink, subscription)
    }

    /// Run `cleanup` once, on the first cancellation
    pub fn on_cancel<F>(self, cleanup: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        match self.shared.cleanup.lock() {
            Ok(mut guard) => *guard = Some(Box::new(cleanup)),
            Err(poisoned) => *poisoned.into_inner() = Some(Box::new(cleanup)),
        }
        self
    }

    pub fn handle(&self) -> SubscriptionHandle {
        SubscriptionHandle {
            shared: self.shared.clone(),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Wait for the next event. Returns `None` once the stream was cancelled
    /// or after its error has been delivered.
    pub async fn next(&mut self) -> Option<StreamEvent> {
        if self.finished || self.shared.cancelled.load(Ordering::SeqCst) {
            self.finished = true;
            return None;
        }

        let event = tokio::select! {
            biased;
            _ = self.shared.wake.notified() => None,
            event = self.rx.recv() => event,
        };

        if self.shared.cancelled.load(Ordering::SeqCst) {
            self.finished = true;
            return None;
        }

        match event {
            Some(StreamEvent::Error(err)) => {
                self.finished = true;
                Some(StreamEvent::Error(err))
            }
            Some(update) => Some(update),
            None => {
                self.finished = true;
                None
            }
        }
    }

    /// Drive the stream on a background task, calling `on_update` for every
    /// update and `on_error` at most once. Returns the cancel handle.
    pub fn forward<U, E>(mut self, mut on_update: U, on_error: E) -> SubscriptionHandle
    where
        U: FnMut(Payload) + Send + 'static,
        E: FnOnce(RuntimeError) + Send + 'static,
    {
        let handle = self.handle();
        tokio::spawn(async move {
            let mut on_error = Some(on_error);
            while let Some(event) = self.next().await {
                match event {
                    StreamEvent::Update(payload) => on_update(payload),
                    StreamEvent::Error(err) => {
                        if let Some(on_error) = on_error.take() {
                            on_error(err);
                        }
                    }
                }
            }
            log::trace!("{} forwarder finished", self.shared.name);
        });
        handle
    }
}

/// Write half of a bidirectional stream
#[derive(Clone)]
pub struct StreamSender {
    shared: Arc<StreamShared>,
    send: Arc<SendFn>,
}

impl StreamSender {
    /// Send one serialized message. Fails once the stream was cancelled or
    /// ended by an error.
    pub fn send(&self, bytes: &[u8]) -> Result<(), RuntimeError> {
        if !self.shared.open.load(Ordering::SeqCst) || self.shared.cancelled.load(Ordering::SeqCst)
        {
            return Err(RuntimeError::Closed(self.shared.name.clone()));
        }
        (self.send)(bytes)
    }
}

/// A stream the node reads from and writes to
pub struct BidiStream {
    subscription: Subscription,
    sender: StreamSender,
}

impl BidiStream {
    /// Pair a subscription with the function that writes into the stream
    pub fn new<F>(subscription: Subscription, send: F) -> Self
    where
        F: Fn(&[u8]) -> Result<(), RuntimeError> + Send + Sync + 'static,
    {
        let sender = StreamSender {
            shared: subscription.shared.clone(),
            send: Arc::new(send),
        };
        Self {
            subscription,
            sender,
        }
    }

    pub fn handle(&self) -> SubscriptionHandle {
        self.subscription.handle()
    }

    pub fn sender(&self) -> StreamSender {
        self.sender.clone()
    }

    /// Drive the read half like [`Subscription::forward`]
    pub fn forward<U, E>(self, on_message: U, on_error: E) -> (SubscriptionHandle, StreamSender)
    where
        U: FnMut(Payload) + Send + 'static,
        E: FnOnce(RuntimeError) + Send + 'static,
    {
        let handle = self.subscription.forward(on_message, on_error);
        (handle, self.sender)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_updates_are_delivered_in_order() {
        let (sink, mut subscription) = Subscription::channel("subscribeState");
        assert!(sink.push_update(vec![1]));
        assert!(sink.push_update(vec![2]));

        assert_eq!(
            subscription.next().await,
            Some(StreamEvent::Update(Payload::new(vec![1])))
        );
        assert_eq!(
            subscription.next().await,
            Some(StreamEvent::Update(Payload::new(vec![2])))
        );
    }

    #[tokio::test]
    async fn test_cancel_twice_is_harmless() {
        let (sink, subscription) = Subscription::channel("subscribeState");
        let updates = Arc::new(AtomicUsize::new(0));
        let counter = updates.clone();

        let handle = subscription.forward(
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
            |_| {},
        );

        sink.push_update(vec![1]);
        settle().await;
        assert_eq!(updates.load(Ordering::SeqCst), 1);

        assert!(handle.cancel());
        assert!(!handle.cancel());

        assert!(!sink.push_update(vec![2]));
        settle().await;
        assert_eq!(updates.load(Ordering::SeqCst), 1);
        assert!(handle.is_cancelled());
        assert!(!sink.is_active());
    }

    #[tokio::test]
    async fn test_queued_update_is_dropped_after_cancel() {
        let (sink, mut subscription) = Subscription::channel("subscribeState");
        sink.push_update(vec![7]);

        subscription.handle().cancel();

        assert_eq!(subscription.next().await, None);
        assert_eq!(subscription.next().await, None);
    }

    #[tokio::test]
    async fn test_cancel_wakes_pending_reader() {
        let (_sink, mut subscription) = Subscription::channel("subscribeState");
        let handle = subscription.handle();

        let reader = tokio::spawn(async move { subscription.next().await });
        settle().await;
        handle.cancel();

        let result = tokio::time::timeout(Duration::from_secs(1), reader)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn test_error_is_delivered_once_and_ends_stream() {
        let (sink, subscription) = Subscription::channel("subscribeState");
        let errors = Arc::new(Mutex::new(Vec::new()));
        let updates = Arc::new(AtomicUsize::new(0));
        let error_log = errors.clone();
        let counter = updates.clone();

        let handle = subscription.forward(
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
            move |err| error_log.lock().unwrap().push(err),
        );

        assert!(sink.push_error("stream reset".to_string()));
        assert!(!sink.push_error("second failure".to_string()));
        assert!(!sink.push_update(vec![1]));
        settle().await;

        let errors = errors.lock().unwrap();
        assert_eq!(
            *errors,
            vec![RuntimeError::Runtime("stream reset".to_string())]
        );
        assert_eq!(updates.load(Ordering::SeqCst), 0);
        assert!(!handle.is_active());
        assert!(!handle.is_cancelled());
    }

    #[tokio::test]
    async fn test_cleanup_runs_once() {
        let (_sink, subscription) = Subscription::channel("subscribeState");
        let cleanups = Arc::new(AtomicUsize::new(0));
        let counter = cleanups.clone();
        let subscription = subscription.on_cancel(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let handle = subscription.handle();
        let other = handle.clone();
        handle.cancel();
        other.cancel();

        assert_eq!(cleanups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_bidi_sender_stops_after_cancel() {
        let (sink, subscription) = Subscription::channel("channelAcceptor");
        let sent = Arc::new(Mutex::new(Vec::new()));
        let log = sent.clone();
        let stream = BidiStream::new(subscription, move |bytes: &[u8]| {
            log.lock().unwrap().push(bytes.to_vec());
            Ok(())
        });

        let received = Arc::new(AtomicUsize::new(0));
        let counter = received.clone();
        let (handle, sender) = stream.forward(
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
            |_| {},
        );

        sink.push_update(vec![1]);
        settle().await;
        assert_eq!(received.load(Ordering::SeqCst), 1);
        assert!(sender.send(&[0x10, 0x01]).is_ok());

        handle.cancel();
        assert_eq!(
            sender.send(&[0x10, 0x00]),
            Err(RuntimeError::Closed("channelAcceptor".to_string()))
        );
        assert_eq!(*sent.lock().unwrap(), vec![vec![0x10, 0x01]]);
    }

    #[tokio::test]
    async fn test_bidi_sender_stops_after_stream_error() {
        let (sink, subscription) = Subscription::channel("channelAcceptor");
        let stream = BidiStream::new(subscription, |_: &[u8]| Ok(()));
        let sender = stream.sender();

        sink.push_error("EOF".to_string());
        assert!(matches!(sender.send(&[1]), Err(RuntimeError::Closed(_))));
        assert!(!stream.handle().is_active());
    }
}
