//! Idempotent shutdown trigger

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

/// What asked the launcher to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// SIGINT
    Interrupt,
    /// SIGTERM
    Terminate,
    /// `q` or Ctrl+C in raw mode
    QuitKey,
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownSignal::Interrupt => write!(f, "SIGINT"),
            ShutdownSignal::Terminate => write!(f, "SIGTERM"),
            ShutdownSignal::QuitKey => write!(f, "quit key"),
        }
    }
}

/// Set once by the first shutdown trigger, later triggers are no-ops
#[derive(Debug, Default)]
pub struct ShutdownGuard {
    triggered: AtomicBool,
}

impl ShutdownGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true only for the first caller
    pub fn trigger(&self) -> bool {
        !self.triggered.swap(true, Ordering::SeqCst)
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }
}
