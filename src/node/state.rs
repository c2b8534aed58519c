//! Shared state for node management
//!
//! Tracks what the launcher knows about the embedded node at runtime.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

/// Current status of the node
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeStatus {
    /// The node reported a successful start
    pub started: bool,

    /// Number of getInfo calls issued
    pub info_requests: u64,

    /// Number of getInfo calls that failed
    pub info_failures: u64,

    /// Whether a state subscription is active
    pub subscribed: bool,

    /// Number of state updates received
    pub state_updates: u64,

    /// Seconds since the node reported a successful start
    pub uptime: Option<u64>,

    /// Last error message (if any)
    pub last_error: Option<String>,
}

/// Internal state for node management
#[derive(Debug, Default)]
pub struct NodeState {
    /// Current node status
    pub status: Mutex<NodeStatus>,

    /// When the node reported a successful start (for uptime calculation)
    pub start_time: Mutex<Option<Instant>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl NodeState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the current node status
    pub fn get_status(&self) -> NodeStatus {
        let mut status = lock(&self.status).clone();

        if status.started {
            if let Some(start) = *lock(&self.start_time) {
                status.uptime = Some(start.elapsed().as_secs());
            }
        }

        status
    }

    /// Update specific fields of the status
    pub fn update_status<F>(&self, f: F)
    where
        F: FnOnce(&mut NodeStatus),
    {
        let mut status = lock(&self.status);
        f(&mut status);
    }

    /// Record the outcome of a start call
    pub fn mark_started(&self, result: Result<(), String>) {
        let started = result.is_ok();
        self.update_status(|s| {
            s.started = started;
            if let Err(e) = result {
                s.last_error = Some(e);
            }
        });

        *lock(&self.start_time) = if started { Some(Instant::now()) } else { None };
    }
}

/// Type alias for shared node state
pub type SharedNodeState = Arc<NodeState>;

/// Create a new shared node state
pub fn create_node_state() -> SharedNodeState {
    Arc::new(NodeState::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_status() {
        let status = create_node_state().get_status();
        assert_eq!(status, NodeStatus::default());
        assert!(!status.started);
        assert_eq!(status.uptime, None);
    }

    #[test]
    fn test_start_success_tracks_uptime() {
        let state = create_node_state();
        state.mark_started(Ok(()));

        let status = state.get_status();
        assert!(status.started);
        assert_eq!(status.uptime, Some(0));
        assert_eq!(status.last_error, None);
    }

    #[test]
    fn test_start_failure_records_error() {
        let state = create_node_state();
        state.mark_started(Err("unable to open wallet".to_string()));

        let status = state.get_status();
        assert!(!status.started);
        assert_eq!(status.last_error.as_deref(), Some("unable to open wallet"));
        assert_eq!(status.uptime, None);
    }
}
