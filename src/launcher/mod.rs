//! Launcher event loop
//!
//! Everything the launcher reacts to arrives as a [`LauncherEvent`] on one
//! channel: key presses, process signals, node replies, state updates and
//! timers. The loop runs on a single-threaded runtime, so handlers never race
//! each other.
//!
//! Variants:
//! - interactive: raw terminal, `g` issues getInfo, `q` or Ctrl+C quits
//! - scripted: no key handling, subscribe and getInfo on a fixed timeline

pub mod input;
pub mod keys;
pub mod shutdown;
pub mod terminal;

use crossterm::event::KeyEvent;
use std::future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{Instant, Interval};

use crate::node::{ConfigBlob, NodeManager, NodeStatus, Payload, RuntimeError, SubscriptionHandle};
use keys::KeyCommand;
use shutdown::{ShutdownGuard, ShutdownSignal};
use terminal::TerminalMode;

/// Default delay between a successful start and the state subscription
pub const DEFAULT_SUBSCRIBE_DELAY: Duration = Duration::from_secs(1);

/// Default delay between a successful start and the scripted getInfo call
pub const DEFAULT_GET_INFO_DELAY: Duration = Duration::from_secs(3);

/// Default heartbeat period
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub enum LauncherEvent {
    Key(KeyEvent),
    Signal(ShutdownSignal),
    Started(Result<Payload, RuntimeError>),
    SubscribeDue,
    GetInfoDue,
    StateUpdate(Payload),
    StateError(RuntimeError),
    Heartbeat,
}

/// What the loop does after handling an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit(i32),
}

#[derive(Debug, Clone)]
pub struct LauncherOptions {
    /// Raw terminal with key commands
    pub interactive: bool,
    /// Selector passed to getInfo and subscribeState
    pub selector: String,
    pub subscribe_delay: Duration,
    /// Only used by the scripted variant
    pub get_info_delay: Duration,
    /// `None` disables the heartbeat line
    pub heartbeat: Option<Duration>,
    /// Cancel the state subscription after this many updates
    pub max_state_updates: Option<u64>,
}

impl Default for LauncherOptions {
    fn default() -> Self {
        Self {
            interactive: true,
            selector: String::new(),
            subscribe_delay: DEFAULT_SUBSCRIBE_DELAY,
            get_info_delay: DEFAULT_GET_INFO_DELAY,
            heartbeat: Some(DEFAULT_HEARTBEAT),
            max_state_updates: None,
        }
    }
}

pub struct Launcher {
    manager: Arc<NodeManager>,
    config: ConfigBlob,
    options: LauncherOptions,
    terminal: Box<dyn TerminalMode>,
    shutdown: ShutdownGuard,
    subscription: Option<SubscriptionHandle>,
    state_updates: u64,
    events_tx: mpsc::UnboundedSender<LauncherEvent>,
    events_rx: mpsc::UnboundedReceiver<LauncherEvent>,
    tasks: JoinSet<()>,
}

impl Launcher {
    pub fn new(
        manager: Arc<NodeManager>,
        config: ConfigBlob,
        options: LauncherOptions,
        terminal: Box<dyn TerminalMode>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            manager,
            config,
            options,
            terminal,
            shutdown: ShutdownGuard::new(),
            subscription: None,
            state_updates: 0,
            events_tx,
            events_rx,
            tasks: JoinSet::new(),
        }
    }

    /// Sender for injecting events into the loop
    pub fn events(&self) -> mpsc::UnboundedSender<LauncherEvent> {
        self.events_tx.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_triggered()
    }

    /// Run until a shutdown trigger. Returns the process exit code.
    pub async fn run(mut self) -> anyhow::Result<i32> {
        self.begin()?;

        input::spawn_signal_listener(&mut self.tasks, self.events_tx.clone());
        if self.options.interactive {
            input::spawn_key_listener(&mut self.tasks, self.events_tx.clone());
        }

        Ok(self.event_loop().await)
    }

    /// Enter raw mode (interactive) and issue the start call
    fn begin(&mut self) -> std::io::Result<()> {
        if self.options.interactive {
            self.terminal.enter_raw()?;
            log::info!("{}", keys::help_line());
        }

        let manager = self.manager.clone();
        let config = self.config.clone();
        let events = self.events_tx.clone();
        self.tasks.spawn(async move {
            let result = manager.start(&config).await;
            let _ = events.send(LauncherEvent::Started(result));
        });
        Ok(())
    }

    async fn event_loop(&mut self) -> i32 {
        let mut heartbeat = self
            .options
            .heartbeat
            .filter(|period| !period.is_zero())
            .map(|period| tokio::time::interval_at(Instant::now() + period, period));

        loop {
            let event = tokio::select! {
                Some(event) = self.events_rx.recv() => event,
                _ = next_tick(&mut heartbeat) => LauncherEvent::Heartbeat,
                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            log::error!("Background task panicked: {}", e);
                        }
                    }
                    continue;
                }
            };

            if let Flow::Exit(code) = self.handle_event(event) {
                return code;
            }
        }
    }

    /// React to one event
    pub fn handle_event(&mut self, event: LauncherEvent) -> Flow {
        match event {
            LauncherEvent::Key(key) => match keys::command_for(&key) {
                Some(KeyCommand::Quit) => self.shut_down(ShutdownSignal::QuitKey),
                Some(KeyCommand::GetInfo) => {
                    self.spawn_get_info();
                    Flow::Continue
                }
                None => Flow::Continue,
            },
            LauncherEvent::Signal(signal) => self.shut_down(signal),
            LauncherEvent::Started(Ok(_)) => {
                self.schedule(self.options.subscribe_delay, LauncherEvent::SubscribeDue);
                if !self.options.interactive {
                    self.schedule(self.options.get_info_delay, LauncherEvent::GetInfoDue);
                }
                Flow::Continue
            }
            LauncherEvent::Started(Err(_)) => {
                log::warn!("Node did not start, launcher keeps running until quit");
                Flow::Continue
            }
            LauncherEvent::SubscribeDue => {
                self.subscribe_state();
                Flow::Continue
            }
            LauncherEvent::GetInfoDue => {
                self.spawn_get_info();
                Flow::Continue
            }
            LauncherEvent::StateUpdate(payload) => {
                self.on_state_update(payload);
                Flow::Continue
            }
            LauncherEvent::StateError(err) => {
                log::warn!("State subscription ended: {}", err);
                Flow::Continue
            }
            LauncherEvent::Heartbeat => {
                if !self.is_shutting_down() {
                    log::info!("Still alive...");
                }
                Flow::Continue
            }
        }
    }

    fn spawn_get_info(&mut self) {
        let manager = self.manager.clone();
        let selector = self.options.selector.clone();
        self.tasks.spawn(async move {
            let _ = manager.get_info(&selector).await;
        });
    }

    fn schedule(&mut self, delay: Duration, event: LauncherEvent) {
        let events = self.events_tx.clone();
        self.tasks.spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(event);
        });
    }

    fn subscribe_state(&mut self) {
        if self.subscription.as_ref().is_some_and(|h| h.is_active()) {
            log::debug!("State subscription already active");
            return;
        }

        let updates = self.events_tx.clone();
        let errors = self.events_tx.clone();
        let result = self.manager.subscribe_state(
            &self.options.selector,
            move |payload| {
                let _ = updates.send(LauncherEvent::StateUpdate(payload));
            },
            move |err| {
                let _ = errors.send(LauncherEvent::StateError(err));
            },
        );

        // Failures are logged by the manager
        if let Ok(handle) = result {
            self.state_updates = 0;
            self.subscription = Some(handle);
        }
    }

    fn on_state_update(&mut self, payload: Payload) {
        let Some(handle) = self.subscription.as_ref() else {
            return;
        };
        if handle.is_cancelled() {
            log::trace!("Dropping state update queued before unsubscribe");
            return;
        }

        self.state_updates += 1;
        log::info!("Received state update: {}", payload);

        if let Some(limit) = self.options.max_state_updates {
            if self.state_updates >= limit {
                log::info!("Received {} state updates, unsubscribing", self.state_updates);
                self.manager.unsubscribe(handle);
            }
        }
    }

    /// Restore the terminal and stop. Only the first trigger has any effect.
    fn shut_down(&mut self, signal: ShutdownSignal) -> Flow {
        if !self.shutdown.trigger() {
            log::debug!("Ignoring {}, already shutting down", signal);
            return Flow::Continue;
        }

        log::info!("Received {}, shutting down...", signal);

        if let Some(handle) = self.subscription.take() {
            self.manager.unsubscribe(&handle);
        }

        if self.terminal.is_altered() {
            if let Err(e) = self.terminal.restore() {
                log::error!("Failed to restore terminal: {}", e);
            }
        }

        self.tasks.abort_all();

        log::info!("Shutdown complete: {}", summary(&self.manager.status()));
        Flow::Exit(0)
    }
}

/// One line account of the session, logged on exit
fn summary(status: &NodeStatus) -> String {
    let mut line = format!(
        "started={}, uptime={}s, getInfo calls={} ({} failed), state updates={}",
        status.started,
        status.uptime.unwrap_or(0),
        status.info_requests,
        status.info_failures,
        status.state_updates
    );
    if let Some(error) = &status.last_error {
        line.push_str(&format!(", last error: {}", error));
    }
    line
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => future::pending::<()>().await,
    }
}
