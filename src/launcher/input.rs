//! Input sources feeding the launcher event loop

use crossterm::event::{Event, EventStream};
use futures_util::StreamExt;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinSet;

use super::shutdown::ShutdownSignal;
use super::LauncherEvent;

/// Forward SIGINT and SIGTERM as events. Every delivery is forwarded; the
/// launcher's shutdown guard decides which one counts.
pub fn spawn_signal_listener(tasks: &mut JoinSet<()>, events: UnboundedSender<LauncherEvent>) {
    tasks.spawn(async move {
        if let Err(e) = listen_for_signals(&events).await {
            log::error!("Failed to install signal handlers: {}", e);
        }
    });
}

#[cfg(unix)]
async fn listen_for_signals(events: &UnboundedSender<LauncherEvent>) -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    loop {
        let received = tokio::select! {
            Some(()) = interrupt.recv() => ShutdownSignal::Interrupt,
            Some(()) = terminate.recv() => ShutdownSignal::Terminate,
            else => return Ok(()),
        };
        if events.send(LauncherEvent::Signal(received)).is_err() {
            return Ok(());
        }
    }
}

#[cfg(not(unix))]
async fn listen_for_signals(events: &UnboundedSender<LauncherEvent>) -> std::io::Result<()> {
    loop {
        tokio::signal::ctrl_c().await?;
        if events
            .send(LauncherEvent::Signal(ShutdownSignal::Interrupt))
            .is_err()
        {
            return Ok(());
        }
    }
}

/// Forward key presses from the terminal as events
pub fn spawn_key_listener(tasks: &mut JoinSet<()>, events: UnboundedSender<LauncherEvent>) {
    tasks.spawn(async move {
        let mut reader = EventStream::new();
        while let Some(event) = reader.next().await {
            match event {
                Ok(Event::Key(key)) => {
                    if events.send(LauncherEvent::Key(key)).is_err() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    log::error!("Failed to read terminal input: {}", e);
                    break;
                }
            }
        }
        log::debug!("Key listener stopped");
    });
}
