//! Terminal input mode
//!
//! The interactive launcher reads single key presses, which needs raw mode.
//! Whatever mode was entered must be left again before the process exits,
//! including on panic.

use std::io;
use std::sync::Once;

/// Switches the controlling terminal in and out of raw mode
pub trait TerminalMode: Send {
    fn enter_raw(&mut self) -> io::Result<()>;

    /// Undo [`TerminalMode::enter_raw`]. No-op when nothing was altered.
    fn restore(&mut self) -> io::Result<()>;

    fn is_altered(&self) -> bool;
}

static PANIC_HOOK: Once = Once::new();

/// Raw mode through crossterm
#[derive(Debug, Default)]
pub struct RawTerminal {
    raw: bool,
}

impl RawTerminal {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TerminalMode for RawTerminal {
    fn enter_raw(&mut self) -> io::Result<()> {
        if self.raw {
            return Ok(());
        }

        // Restore the terminal on panic before the default hook prints
        PANIC_HOOK.call_once(|| {
            let original_hook = std::panic::take_hook();
            std::panic::set_hook(Box::new(move |info| {
                let _ = crossterm::terminal::disable_raw_mode();
                original_hook(info);
            }));
        });

        crossterm::terminal::enable_raw_mode()?;
        self.raw = true;
        log::debug!("Terminal switched to raw mode");
        Ok(())
    }

    fn restore(&mut self) -> io::Result<()> {
        if !self.raw {
            return Ok(());
        }
        crossterm::terminal::disable_raw_mode()?;
        self.raw = false;
        log::debug!("Terminal restored");
        Ok(())
    }

    fn is_altered(&self) -> bool {
        self.raw
    }
}

impl Drop for RawTerminal {
    fn drop(&mut self) {
        if let Err(e) = self.restore() {
            log::error!("Failed to restore terminal: {}", e);
        }
    }
}

/// Terminal left untouched (scripted runs, no tty)
#[derive(Debug, Default)]
pub struct PlainTerminal;

impl TerminalMode for PlainTerminal {
    fn enter_raw(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn restore(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn is_altered(&self) -> bool {
        false
    }
}

#[cfg(test)]
pub use recording::RecordingTerminal;
