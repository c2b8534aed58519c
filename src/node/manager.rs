//! Node lifecycle management
//!
//! Wraps the node runtime with logging and status bookkeeping. Failures are
//! logged here and handed back to the caller; none of them are retried.

use std::sync::Arc;

use super::config::ConfigBlob;
use super::runtime::{
    decode_selector, NodeRuntime, Payload, RuntimeError, CHANNEL_ACCEPTOR, GET_INFO,
    SUBSCRIBE_STATE,
};
use super::state::{NodeStatus, SharedNodeState};
use super::subscription::{StreamSender, SubscriptionHandle};

/// Manages the embedded LND node
pub struct NodeManager {
    runtime: Arc<dyn NodeRuntime>,
    state: SharedNodeState,
}

impl NodeManager {
    pub fn new(runtime: Arc<dyn NodeRuntime>, state: SharedNodeState) -> Self {
        Self { runtime, state }
    }

    pub fn status(&self) -> NodeStatus {
        self.state.get_status()
    }

    /// Start the node with the given configuration
    pub async fn start(&self, config: &ConfigBlob) -> Result<Payload, RuntimeError> {
        log::info!("Starting LND with {} flags", config.len());
        log::debug!("LND configuration:\n{}", config);

        let result = self.runtime.start(config).await;
        match &result {
            Ok(payload) => {
                log::info!("LND started successfully");
                if !payload.is_empty() {
                    log::debug!("Start response: {}", payload);
                }
                self.state.mark_started(Ok(()));
            }
            Err(e) => {
                log::error!("Error starting LND: {}", e);
                self.state.mark_started(Err(e.to_string()));
            }
        }
        result
    }

    /// Query node status
    pub async fn get_info(&self, selector: &str) -> Result<Payload, RuntimeError> {
        self.state.update_status(|s| s.info_requests += 1);

        let result = match decode_selector(GET_INFO, selector) {
            Ok(request) => self.runtime.call(GET_INFO, &request).await,
            Err(e) => Err(e),
        };

        match &result {
            Ok(payload) => log::info!("GetInfo response: {}", payload),
            Err(e) => {
                log::error!("GetInfo error: {}", e);
                let message = e.to_string();
                self.state.update_status(|s| {
                    s.info_failures += 1;
                    s.last_error = Some(message);
                });
            }
        }
        result
    }

    /// Subscribe to node state transitions.
    ///
    /// `on_update` runs for every update until the returned handle is
    /// cancelled. `on_error` runs at most once, after which the subscription
    /// is inactive.
    pub fn subscribe_state<U, E>(
        &self,
        selector: &str,
        mut on_update: U,
        on_error: E,
    ) -> Result<SubscriptionHandle, RuntimeError>
    where
        U: FnMut(Payload) + Send + 'static,
        E: FnOnce(RuntimeError) + Send + 'static,
    {
        let request = decode_selector(SUBSCRIBE_STATE, selector)?;
        let subscription = match self.runtime.subscribe(SUBSCRIBE_STATE, &request) {
            Ok(subscription) => subscription,
            Err(e) => {
                log::error!("Failed to subscribe to state: {}", e);
                let message = e.to_string();
                self.state.update_status(|s| s.last_error = Some(message));
                return Err(e);
            }
        };

        log::info!("Subscribed to state updates");
        self.state.update_status(|s| s.subscribed = true);

        let update_state = self.state.clone();
        let error_state = self.state.clone();
        let handle = subscription.forward(
            move |payload| {
                log::debug!("Received state update: {}", payload);
                update_state.update_status(|s| s.state_updates += 1);
                on_update(payload);
            },
            move |err| {
                log::error!("State subscription error: {}", err);
                let message = err.to_string();
                error_state.update_status(|s| {
                    s.subscribed = false;
                    s.last_error = Some(message);
                });
                on_error(err);
            },
        );
        Ok(handle)
    }

    /// Open the channel acceptor stream.
    ///
    /// `on_request` runs for every incoming channel request. Answers go
    /// through the returned sender; cancelling the handle closes the stream
    /// on the node side.
    pub fn open_channel_acceptor<U, E>(
        &self,
        on_request: U,
        on_error: E,
    ) -> Result<(SubscriptionHandle, StreamSender), RuntimeError>
    where
        U: FnMut(Payload) + Send + 'static,
        E: FnOnce(RuntimeError) + Send + 'static,
    {
        let stream = match self.runtime.open_bidi_stream(CHANNEL_ACCEPTOR) {
            Ok(stream) => stream,
            Err(e) => {
                log::error!("Failed to open {}: {}", CHANNEL_ACCEPTOR, e);
                let message = e.to_string();
                self.state.update_status(|s| s.last_error = Some(message));
                return Err(e);
            }
        };

        log::info!("Opened {} stream", CHANNEL_ACCEPTOR);
        let error_state = self.state.clone();
        Ok(stream.forward(on_request, move |err| {
            log::error!("{} stream error: {}", CHANNEL_ACCEPTOR, err);
            let message = err.to_string();
            error_state.update_status(|s| s.last_error = Some(message));
            on_error(err);
        }))
    }

    /// Stop delivery on a stream. Returns true only when this call ended a
    /// stream that was still live; safe to call more than once.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        let was_active = handle.is_active();
        // Still cancel an ended stream so its cleanup runs
        if !handle.cancel() {
            return false;
        }
        if !was_active {
            log::debug!("{} already ended, nothing to unsubscribe", handle.name());
            return false;
        }

        log::info!("Unsubscribed from {}", handle.name());
        if handle.name() == SUBSCRIBE_STATE {
            self.state.update_status(|s| s.subscribed = false);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::state::create_node_state;
    use crate::node::testing::MockRuntime;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn manager_with(runtime: MockRuntime) -> (NodeManager, Arc<MockRuntime>) {
        let runtime = Arc::new(runtime);
        let manager = NodeManager::new(runtime.clone(), create_node_state());
        (manager, runtime)
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_start_success() {
        let (manager, runtime) = manager_with(MockRuntime::new());
        let config = ConfigBlob::new(["--lnddir=./lnd", "--noseedbackup"]);

        assert!(manager.start(&config).await.is_ok());
        assert_eq!(runtime.start_count(), 1);
        assert_eq!(runtime.last_config(), Some(config));
        assert!(manager.status().started);
    }

    #[tokio::test]
    async fn test_start_failure_is_recorded() {
        let (manager, runtime) = manager_with(MockRuntime::new().fail_start("wallet locked"));

        let err = manager.start(&ConfigBlob::default()).await.unwrap_err();
        assert_eq!(err, RuntimeError::Runtime("wallet locked".to_string()));
        assert_eq!(runtime.start_count(), 1);

        let status = manager.status();
        assert!(!status.started);
        assert_eq!(status.last_error.as_deref(), Some("wallet locked"));
    }

    #[tokio::test]
    async fn test_get_info_counts_requests() {
        let (manager, runtime) = manager_with(MockRuntime::new());

        manager.get_info("").await.unwrap();
        manager.get_info("CAE=").await.unwrap();

        assert_eq!(runtime.info_count(), 2);
        assert_eq!(runtime.last_request(), Some(vec![0x08, 0x01]));

        let status = manager.status();
        assert_eq!(status.info_requests, 2);
        assert_eq!(status.info_failures, 0);
        assert_eq!(status.last_error, None);
    }

    #[tokio::test]
    async fn test_get_info_failure() {
        let (manager, _runtime) = manager_with(MockRuntime::new().fail_info("not started"));

        assert!(manager.get_info("").await.is_err());
        let status = manager.status();
        assert_eq!(status.info_failures, 1);
        assert_eq!(status.last_error.as_deref(), Some("not started"));
    }

    #[tokio::test]
    async fn test_invalid_selector_skips_runtime() {
        let (manager, runtime) = manager_with(MockRuntime::new());

        let err = manager.get_info("%%%").await.unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidArgument { .. }));
        assert_eq!(runtime.info_count(), 0);

        assert!(manager.subscribe_state("%%%", |_| {}, |_| {}).is_err());
        assert_eq!(runtime.subscribe_count(), 0);
    }

    #[tokio::test]
    async fn test_subscribe_state_delivers_updates() {
        let (manager, runtime) = manager_with(MockRuntime::new());
        let updates = Arc::new(AtomicUsize::new(0));
        let counter = updates.clone();

        let handle = manager
            .subscribe_state(
                "",
                move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                },
                |_| {},
            )
            .unwrap();
        assert!(manager.status().subscribed);

        let sink = runtime.sink().unwrap();
        sink.push_update(vec![1]);
        sink.push_update(vec![2]);
        settle().await;

        assert_eq!(updates.load(Ordering::SeqCst), 2);
        assert_eq!(manager.status().state_updates, 2);

        assert!(manager.unsubscribe(&handle));
        assert!(!manager.unsubscribe(&handle));
        assert!(!manager.status().subscribed);

        sink.push_update(vec![3]);
        settle().await;
        assert_eq!(updates.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_subscription_error_ends_subscription() {
        let (manager, runtime) = manager_with(MockRuntime::new());
        let errors = Arc::new(Mutex::new(Vec::new()));
        let error_log = errors.clone();

        let handle = manager
            .subscribe_state("", |_| {}, move |err| error_log.lock().unwrap().push(err))
            .unwrap();

        runtime.sink().unwrap().push_error("EOF".to_string());
        settle().await;

        assert_eq!(errors.lock().unwrap().len(), 1);
        assert!(!handle.is_active());
        let status = manager.status();
        assert!(!status.subscribed);
        assert_eq!(status.last_error.as_deref(), Some("EOF"));
    }

    #[tokio::test]
    async fn test_unsubscribe_after_stream_error_is_a_no_op() {
        let (manager, runtime) = manager_with(MockRuntime::new());
        let handle = manager.subscribe_state("", |_| {}, |_| {}).unwrap();

        runtime.sink().unwrap().push_error("EOF".to_string());
        settle().await;

        assert!(!manager.unsubscribe(&handle));
        assert!(!manager.unsubscribe(&handle));
    }

    #[tokio::test]
    async fn test_channel_acceptor_round_trip() {
        let (manager, runtime) = manager_with(MockRuntime::new());
        let requests = Arc::new(Mutex::new(Vec::new()));
        let request_log = requests.clone();

        let (handle, sender) = manager
            .open_channel_acceptor(
                move |payload| request_log.lock().unwrap().push(payload),
                |_| {},
            )
            .unwrap();

        runtime.sink().unwrap().push_update(vec![0x0a, 0x01]);
        settle().await;
        assert_eq!(*requests.lock().unwrap(), vec![Payload::new(vec![0x0a, 0x01])]);

        sender.send(&[0x08, 0x01]).unwrap();
        assert_eq!(runtime.sent(), vec![vec![0x08, 0x01]]);

        assert!(manager.unsubscribe(&handle));
        assert!(!manager.unsubscribe(&handle));
        assert_eq!(runtime.stop_count(), 1);
        assert!(matches!(sender.send(&[0x08, 0x00]), Err(RuntimeError::Closed(_))));
        assert_eq!(runtime.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_channel_acceptor_error_keeps_stop_pending() {
        let (manager, runtime) = manager_with(MockRuntime::new());
        let (handle, _sender) = manager.open_channel_acceptor(|_| {}, |_| {}).unwrap();

        runtime.sink().unwrap().push_error("acceptor closed".to_string());
        settle().await;
        assert_eq!(manager.status().last_error.as_deref(), Some("acceptor closed"));

        // The node side stream is still closed exactly once
        assert!(!manager.unsubscribe(&handle));
        assert!(!manager.unsubscribe(&handle));
        assert_eq!(runtime.stop_count(), 1);
    }

    #[tokio::test]
    async fn test_channel_acceptor_open_failure() {
        let (manager, _runtime) = manager_with(MockRuntime::new().fail_subscribe(
            RuntimeError::SymbolNotFound(CHANNEL_ACCEPTOR.to_string()),
        ));

        assert!(manager.open_channel_acceptor(|_| {}, |_| {}).is_err());
        assert!(manager.status().last_error.is_some());
    }

    #[tokio::test]
    async fn test_subscribe_failure() {
        let (manager, runtime) = manager_with(
            MockRuntime::new().fail_subscribe(RuntimeError::SymbolNotFound(
                SUBSCRIBE_STATE.to_string(),
            )),
        );

        assert!(manager.subscribe_state("", |_| {}, |_| {}).is_err());
        assert_eq!(runtime.subscribe_count(), 1);
        assert!(!manager.status().subscribed);
    }
}
