use ratatui::{
    Frame,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span, Text},
    widgets::{Block, BorderType, Borders, List, ListItem, Paragraph, Wrap},
};

use crate::domain::mail::MailItem;
use crate::terminal::format::format_local;
use crate::terminal::state::{PopupState, PopupView};

pub fn render(f: &mut Frame, state: &PopupState) {
    let [main, status, footer] = Layout::vertical([
        Constraint::Min(0),
        Constraint::Length(1),
        Constraint::Length(1),
    ])
    .margin(1)
    .areas(f.area());

    match &state.view {
        PopupView::Inbox {
            account_email,
            unread_label,
        } => render_inbox(f, main, state, account_email.as_deref(), unread_label),
        other => render_notice(f, main, other),
    }

    if let Some(msg) = &state.status {
        f.render_widget(
            Paragraph::new(msg.as_str()).style(Style::default().fg(Color::Yellow)),
            status,
        );
    }

    let hint = Paragraph::new(Span::styled(
        state.view.hint(),
        Style::default().fg(Color::DarkGray),
    ));
    f.render_widget(hint, footer);
}

fn render_notice(f: &mut Frame, area: Rect, view: &PopupView) {
    let color = match view {
        PopupView::AuthProblem { .. } => Color::Red,
        _ => Color::Yellow,
    };
    let block = Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(Style::default().fg(color));

    let text = Text::from(vec![
        Line::from(Span::styled(
            view.title(),
            Style::default().add_modifier(Modifier::BOLD),
        )),
        Line::from(""),
        Line::from(view.description()),
    ]);
    f.render_widget(
        Paragraph::new(text).block(block).wrap(Wrap { trim: true }),
        area,
    );
}

fn online_marker(online: Option<bool>) -> Span<'static> {
    match online {
        Some(true) => Span::styled("● online", Style::default().fg(Color::Green)),
        Some(false) => Span::styled("● offline", Style::default().fg(Color::Red)),
        None => Span::raw(""),
    }
}

fn item_lines(item: &MailItem, show_snippets: bool) -> Text<'static> {
    let mut lines = vec![
        Line::from(vec![
            Span::styled(
                format!("{} ", item.avatar_initial()),
                Style::default().fg(Color::Cyan),
            ),
            Span::styled(
                item.sender().to_string(),
                Style::default().add_modifier(Modifier::BOLD),
            ),
            Span::raw("  "),
            Span::styled(format_local(item.received_at), Style::default().fg(Color::Gray)),
        ]),
        Line::from(format!(
            "  {}",
            item.subject.as_deref().unwrap_or("(no subject)")
        )),
    ];
    if show_snippets && let Some(snippet) = item.snippet.as_deref() {
        lines.push(Line::from(Span::styled(
            format!("  {snippet}"),
            Style::default().fg(Color::DarkGray),
        )));
    }
    Text::from(lines)
}

fn render_inbox(
    f: &mut Frame,
    area: Rect,
    state: &PopupState,
    account_email: Option<&str>,
    unread_label: &str,
) {
    let title = Line::from(vec![
        Span::raw(" "),
        Span::raw(account_email.unwrap_or("Inbox").to_string()),
        Span::raw(" · "),
        Span::styled(
            unread_label.to_string(),
            Style::default().add_modifier(Modifier::BOLD),
        ),
        Span::raw(" "),
    ]);
    let block = Block::default()
        .title(title)
        .title_bottom(Line::from(online_marker(state.online)).right_aligned())
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(Style::default().fg(Color::Yellow));

    if state.items.is_empty() {
        f.render_widget(Paragraph::new("All caught up!").block(block), area);
        return;
    }

    let items: Vec<ListItem> = state
        .items
        .iter()
        .map(|e| ListItem::new(item_lines(e, state.settings.show_snippets)))
        .collect();

    let list = List::new(items)
        .block(block)
        .highlight_symbol("➜ ")
        .highlight_style(Style::default().fg(Color::Green));

    f.render_stateful_widget(list, area, &mut state.list_state.clone());
}
