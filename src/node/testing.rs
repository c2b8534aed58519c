//! In-memory NodeRuntime for tests

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::config::ConfigBlob;
use super::runtime::{NodeRuntime, Payload, RuntimeError, GET_INFO};
use super::subscription::{BidiStream, StreamSink, Subscription};

/// Runtime with scripted outcomes and call counters
pub struct MockRuntime {
    pub start_calls: AtomicUsize,
    pub info_calls: AtomicUsize,
    pub subscribe_calls: AtomicUsize,
    stop_calls: Arc<AtomicUsize>,
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
    start_outcome: Mutex<Result<Payload, RuntimeError>>,
    info_outcome: Mutex<Result<Payload, RuntimeError>>,
    subscribe_error: Mutex<Option<RuntimeError>>,
    sinks: Mutex<Vec<StreamSink>>,
    last_config: Mutex<Option<ConfigBlob>>,
    last_request: Mutex<Option<Vec<u8>>>,
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRuntime {
    pub fn new() -> Self {
        Self {
            start_calls: AtomicUsize::new(0),
            info_calls: AtomicUsize::new(0),
            subscribe_calls: AtomicUsize::new(0),
            stop_calls: Arc::new(AtomicUsize::new(0)),
            sent: Arc::new(Mutex::new(Vec::new())),
            start_outcome: Mutex::new(Ok(Payload::default())),
            info_outcome: Mutex::new(Ok(Payload::new(vec![0x0a, 0x02, 0x68, 0x69]))),
            subscribe_error: Mutex::new(None),
            sinks: Mutex::new(Vec::new()),
            last_config: Mutex::new(None),
            last_request: Mutex::new(None),
        }
    }

    pub fn fail_start(self, message: &str) -> Self {
        *self.start_outcome.lock().unwrap() = Err(RuntimeError::Runtime(message.to_string()));
        self
    }

    pub fn fail_info(self, message: &str) -> Self {
        *self.info_outcome.lock().unwrap() = Err(RuntimeError::Runtime(message.to_string()));
        self
    }

    pub fn fail_subscribe(self, err: RuntimeError) -> Self {
        *self.subscribe_error.lock().unwrap() = Some(err);
        self
    }

    pub fn start_count(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn info_count(&self) -> usize {
        self.info_calls.load(Ordering::SeqCst)
    }

    pub fn subscribe_count(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    pub fn last_config(&self) -> Option<ConfigBlob> {
        self.last_config.lock().unwrap().clone()
    }

    pub fn last_request(&self) -> Option<Vec<u8>> {
        self.last_request.lock().unwrap().clone()
    }

    /// Node side closes of bidirectional streams
    pub fn stop_count(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    /// Messages written into bidirectional streams
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().unwrap().clone()
    }

    /// Producer side of the most recent subscription
    pub fn sink(&self) -> Option<StreamSink> {
        self.sinks.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl NodeRuntime for MockRuntime {
    async fn start(&self, config: &ConfigBlob) -> Result<Payload, RuntimeError> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_config.lock().unwrap() = Some(config.clone());
        self.start_outcome.lock().unwrap().clone()
    }

    async fn call(&self, method: &str, request: &[u8]) -> Result<Payload, RuntimeError> {
        if method != GET_INFO {
            return Err(RuntimeError::SymbolNotFound(method.to_string()));
        }
        self.info_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some(request.to_vec());
        self.info_outcome.lock().unwrap().clone()
    }

    fn subscribe(&self, method: &str, request: &[u8]) -> Result<Subscription, RuntimeError> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some(request.to_vec());
        if let Some(err) = self.subscribe_error.lock().unwrap().clone() {
            return Err(err);
        }

        let (sink, subscription) = Subscription::channel(method);
        self.sinks.lock().unwrap().push(sink);
        Ok(subscription)
    }

    fn open_bidi_stream(&self, method: &str) -> Result<BidiStream, RuntimeError> {
        if let Some(err) = self.subscribe_error.lock().unwrap().clone() {
            return Err(err);
        }

        let (sink, subscription) = Subscription::channel(method);
        self.sinks.lock().unwrap().push(sink);

        let stops = self.stop_calls.clone();
        let subscription = subscription.on_cancel(move || {
            stops.fetch_add(1, Ordering::SeqCst);
        });
        let sent = self.sent.clone();
        Ok(BidiStream::new(subscription, move |bytes: &[u8]| {
            sent.lock().unwrap().push(bytes.to_vec());
            Ok(())
        }))
    }
}
