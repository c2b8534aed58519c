//! Key bindings for the interactive launcher

use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCommand {
    Quit,
    GetInfo,
}

/// Map a key press to a command. Releases, repeats and unbound keys map to None.
pub fn command_for(key: &KeyEvent) -> Option<KeyCommand> {
    if key.kind != KeyEventKind::Press {
        return None;
    }

    let control = key.modifiers.contains(KeyModifiers::CONTROL);
    match key.code {
        KeyCode::Char('c') | KeyCode::Char('C') if control => Some(KeyCommand::Quit),
        _ if control => None,
        KeyCode::Char('q') | KeyCode::Char('Q') => Some(KeyCommand::Quit),
        KeyCode::Char('g') | KeyCode::Char('G') => Some(KeyCommand::GetInfo),
        _ => None,
    }
}

/// One line of help shown when raw mode is entered
pub fn help_line() -> &'static str {
    "Press 'g' for getInfo, 'q' or Ctrl+C to quit"
}
