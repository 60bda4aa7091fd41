use ratatui::crossterm::event::{KeyCode, KeyEvent, KeyEventKind};

use crate::terminal::state::PopupView;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopupAction {
    Quit,
    Connect,
    Disconnect,
    Refresh,
    Open,
    Move(i32),
    None,
}

/// Map a key to what the current view allows.
pub fn handle_key(key: KeyEvent, view: &PopupView) -> PopupAction {
    if key.kind != KeyEventKind::Press {
        return PopupAction::None;
    }

    match key.code {
        KeyCode::Char('q') | KeyCode::Esc => return PopupAction::Quit,
        _ => {}
    }

    match view {
        PopupView::Connect => match key.code {
            KeyCode::Char('c') | KeyCode::Enter => PopupAction::Connect,
            _ => PopupAction::None,
        },
        PopupView::AuthProblem { .. } => match key.code {
            KeyCode::Char('r') => PopupAction::Refresh,
            KeyCode::Char('c') => PopupAction::Connect,
            _ => PopupAction::None,
        },
        PopupView::Inbox { .. } => match key.code {
            KeyCode::Down | KeyCode::Char('j') => PopupAction::Move(1),
            KeyCode::Up | KeyCode::Char('k') => PopupAction::Move(-1),
            KeyCode::Enter => PopupAction::Open,
            KeyCode::Char('r') => PopupAction::Refresh,
            KeyCode::Char('x') => PopupAction::Disconnect,
            _ => PopupAction::None,
        },
    }
}
