// Handles the rendering of widgets to the terminal frame.

use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, List, ListItem, Paragraph, Wrap},
};

use super::model::{Scope, ServiceEntry};
use super::reconciler::confirmation_prompt;
use super::{AddForm, App, FormField, Popup, View};

/// Main render function called every frame.
pub fn render(f: &mut Frame, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(0),
            Constraint::Length(1),
            Constraint::Length(3),
        ])
        .split(f.area());

    match app.view {
        View::Indicator => render_service_list(f, chunks[0], app),
        View::Preferences => render_preferences(f, chunks[0], app),
    }
    render_toast(f, chunks[1], app);
    render_footer(f, chunks[2], app);

    if let Some(popup) = &app.popup {
        render_popup(f, popup);
    }
}

fn scope_tag(scope: Scope) -> Span<'static> {
    match scope {
        Scope::System => Span::styled("[system]", Style::default().fg(Color::Gray)),
        Scope::User => Span::styled("[user]", Style::default().fg(Color::Cyan)),
    }
}

fn render_service_list(f: &mut Frame, area: Rect, app: &mut App) {
    let items: Vec<ListItem> = app
        .services
        .iter()
        .map(|service| {
            let pending = app.pending.get(&service.key()).copied();
            let shown = pending.unwrap_or(service.active);
            let (status_symbol, color) = match (pending.is_some(), shown) {
                (true, _) => ("…", Color::Yellow),
                (false, true) => ("●", Color::Green),
                (false, false) => ("○", Color::DarkGray),
            };
            let state = if shown { "on" } else { "off" };

            let content = Line::from(vec![
                Span::styled(status_symbol, Style::default().fg(color)),
                Span::raw(format!(" {:<32}", service.display_name)),
                Span::styled(
                    format!("{:<4}", state),
                    Style::default().fg(if shown { Color::Green } else { Color::Gray }),
                ),
                Span::styled(
                    format!("{:<36}", service.unit()),
                    Style::default().fg(Color::Gray),
                ),
                scope_tag(service.scope),
            ]);

            ListItem::new(content)
        })
        .collect();

    let title = if items.is_empty() {
        " Services (none configured, press Tab to add) "
    } else {
        " Services "
    };

    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title(title))
        .highlight_style(
            Style::default()
                .add_modifier(Modifier::BOLD)
                .bg(Color::DarkGray),
        )
        .highlight_symbol(">> ");

    f.render_stateful_widget(list, area, &mut app.list_state);
}

fn preference_row(position: usize, entry: &ServiceEntry) -> ListItem<'static> {
    if !entry.is_usable() {
        return ListItem::new(Line::from(vec![
            Span::raw(format!("{position:>3}  ")),
            Span::styled("<invalid entry>", Style::default().fg(Color::Red)),
        ]));
    }
    ListItem::new(Line::from(vec![
        Span::raw(format!("{position:>3}  ")),
        Span::raw(format!("{:<32}", entry.display_name)),
        Span::styled(
            format!("{:<36}", entry.unit()),
            Style::default().fg(Color::Gray),
        ),
        scope_tag(entry.scope),
    ]))
}

fn render_preferences(f: &mut Frame, area: Rect, app: &mut App) {
    let items: Vec<ListItem> = app
        .list
        .rows()
        .iter()
        .enumerate()
        .map(|(position, row)| preference_row(position, &row.entry))
        .collect();

    let title = match app.list.settings_path() {
        Some(path) => format!(" Preferences ({}) ", path.display()),
        None => " Preferences ".to_string(),
    };

    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title(title))
        .highlight_style(
            Style::default()
                .add_modifier(Modifier::BOLD)
                .bg(Color::DarkGray),
        )
        .highlight_symbol(">> ");

    f.render_stateful_widget(list, area, &mut app.prefs_state);
}

fn render_toast(f: &mut Frame, area: Rect, app: &App) {
    let Some(toast) = &app.toast else {
        return;
    };
    let color = if toast.error { Color::Red } else { Color::Green };
    let line = Line::from(Span::styled(
        format!(" {}", toast.message),
        Style::default().fg(color),
    ));
    f.render_widget(Paragraph::new(line), area);
}

fn key(text: &'static str) -> Span<'static> {
    Span::styled(text, Style::default().add_modifier(Modifier::BOLD))
}

fn render_footer(f: &mut Frame, area: Rect, app: &App) {
    let help_text = match app.view {
        View::Indicator => Line::from(vec![
            Span::raw("Nav: "),
            key("j/k "),
            Span::raw("| View: "),
            key("Tab "),
            Span::raw("| Toggle: "),
            key("space "),
            Span::raw("| Action: "),
            Span::styled("s(start) x(stop) r(reload) ", Style::default().fg(Color::Cyan)),
            Span::raw("| Quit: "),
            Span::styled("q", Style::default().fg(Color::Red)),
        ]),
        View::Preferences => Line::from(vec![
            Span::raw("Nav: "),
            key("j/k "),
            Span::raw("| View: "),
            key("Tab "),
            Span::raw("| Edit: "),
            Span::styled("a(add) d(remove) ", Style::default().fg(Color::Cyan)),
            Span::raw("| Quit: "),
            Span::styled("q", Style::default().fg(Color::Red)),
        ]),
    };

    let paragraph =
        Paragraph::new(help_text).block(Block::default().borders(Borders::ALL).title(" Controls "));

    f.render_widget(paragraph, area);
}

fn render_popup(f: &mut Frame, popup: &Popup) {
    match popup {
        Popup::AddForm(form) => render_add_form(f, form),
        Popup::Checking(entry) => render_message(
            f,
            " Add service ",
            vec![
                Line::from(format!("Checking {}...", entry.unit())),
                Line::from(""),
                Line::from(Span::styled("Esc to cancel", Style::default().fg(Color::Gray))),
            ],
        ),
        Popup::Confirm { entry, existence } => render_message(
            f,
            " Service not found ",
            vec![
                Line::from(confirmation_prompt(entry, existence)),
                Line::from(""),
                Line::from(vec![
                    Span::styled("y", Style::default().fg(Color::Green)),
                    Span::raw(" add anyway   "),
                    Span::styled("n", Style::default().fg(Color::Red)),
                    Span::raw(" cancel"),
                ]),
            ],
        ),
    }
}

fn render_message(f: &mut Frame, title: &str, lines: Vec<Line>) {
    let area = centered_rect(60, 25, f.area());
    f.render_widget(Clear, area);
    let paragraph = Paragraph::new(lines)
        .wrap(Wrap { trim: true })
        .block(Block::default().borders(Borders::ALL).title(title.to_string()));
    f.render_widget(paragraph, area);
}

fn form_field(label: &str, value: String, focused: bool) -> Line<'static> {
    let style = if focused {
        Style::default().add_modifier(Modifier::BOLD).fg(Color::Yellow)
    } else {
        Style::default()
    };
    let cursor = if focused { "_" } else { "" };
    Line::from(vec![
        Span::styled(format!("{label:<14}"), style),
        Span::raw(format!("{value}{cursor}")),
    ])
}

fn render_add_form(f: &mut Frame, form: &AddForm) {
    let lines = vec![
        form_field("Unit name", form.name.clone(), form.focus == FormField::Name),
        form_field(
            "Display name",
            form.display_name.clone(),
            form.focus == FormField::DisplayName,
        ),
        form_field(
            "Scope",
            format!("{} (space to switch)", form.scope),
            form.focus == FormField::Scope,
        ),
        Line::from(""),
        Line::from(Span::styled(
            "Tab: next field | Enter: add | Esc: cancel",
            Style::default().fg(Color::Gray),
        )),
    ];
    render_message(f, " Add service ", lines);
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}
