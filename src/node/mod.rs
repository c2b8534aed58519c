//! Embedded LND node
//!
//! Loads the LND shared library and drives it through its C ABI: start the
//! node, query it with `getInfo`, follow its `subscribeState` stream and
//! answer its `channelAcceptor` stream.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    node module                           │
//! ├─────────────────────────────────────────────────────────┤
//! │  config.rs       - NodeConfig persistence, ConfigBlob    │
//! │  runtime.rs      - NodeRuntime trait, errors, payloads   │
//! │  ffi.rs          - C ABI types, dlopen/dlsym             │
//! │  native.rs       - NodeRuntime over the shared library   │
//! │  subscription.rs - Cancellable server and bidi streams   │
//! │  manager.rs      - Logging and status bookkeeping        │
//! │  state.rs        - Shared runtime state                  │
//! │  hasher.rs       - SHA256 verification of the library    │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod ffi;
pub mod hasher;
pub mod manager;
pub mod native;
pub mod runtime;
pub mod state;
pub mod subscription;

#[cfg(test)]
pub mod testing;

// Re-export key types for convenience
pub use config::{ConfigBlob, NodeConfig};
pub use manager::NodeManager;
pub use native::NativeRuntime;
pub use runtime::{NodeRuntime, Payload, RuntimeError};
pub use state::{create_node_state, NodeState, NodeStatus, SharedNodeState};
pub use subscription::{BidiStream, StreamSender, Subscription, SubscriptionHandle};
