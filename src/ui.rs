use anyhow::Result;
use company_registry::views::{self, History, Listing};
use company_registry::{format_cnpj, EntitySnapshot, SnapshotStore};
use crossterm::{
    event::{self, Event, KeyCode},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table, TableState},
    Frame, Terminal,
};
use std::collections::HashSet;
use std::io;
use tracing::warn;

const PAGE_SIZE: usize = 20;

pub struct App<'a> {
    store: &'a SnapshotStore,
    pub listing: Listing,
    pub state: TableState,
    /// History of the selected company, when the detail panel is open.
    pub history: Option<History>,
    pub message: Option<String>,
}

impl<'a> App<'a> {
    pub fn new(store: &'a SnapshotStore, listing: Listing) -> Self {
        let mut state = TableState::default();
        if !listing.companies.is_empty() {
            state.select(Some(0));
        }

        Self {
            store,
            listing,
            state,
            history: None,
            message: None,
        }
    }

    pub fn selected_company(&self) -> Option<&EntitySnapshot> {
        self.state.selected().and_then(|i| self.listing.companies.get(i))
    }

    /// Open the history panel for the selected company, or close it.
    pub fn toggle_detail(&mut self) {
        if self.history.take().is_some() {
            return;
        }

        let Some(identifier) = self.selected_company().map(|c| c.identifier().to_string()) else {
            return;
        };

        match views::history(self.store, &identifier) {
            Ok(history) => {
                self.message = None;
                self.history = Some(history);
            }
            Err(err) => {
                warn!("failed to load history for {identifier}: {err}");
                self.message = Some(format!("Failed to load history: {err}"));
            }
        }
    }

    fn select(&mut self, i: usize) {
        self.state.select(Some(i));
        // The panel follows the selection
        if self.history.is_some() {
            self.history = None;
            self.toggle_detail();
        }
    }

    pub fn next(&mut self) {
        let len = self.listing.companies.len();
        if len == 0 {
            return;
        }
        let i = match self.state.selected() {
            Some(i) if i + 1 < len => i + 1,
            _ => 0,
        };
        self.select(i);
    }

    pub fn previous(&mut self) {
        let len = self.listing.companies.len();
        if len == 0 {
            return;
        }
        let i = match self.state.selected() {
            Some(0) | None => len - 1,
            Some(i) => i - 1,
        };
        self.select(i);
    }

    pub fn page_down(&mut self) {
        let len = self.listing.companies.len();
        if len == 0 {
            return;
        }
        let i = self
            .state
            .selected()
            .map_or(0, |i| (i + PAGE_SIZE).min(len - 1));
        self.select(i);
    }

    pub fn page_up(&mut self) {
        if self.listing.companies.is_empty() {
            return;
        }
        let i = self.state.selected().map_or(0, |i| i.saturating_sub(PAGE_SIZE));
        self.select(i);
    }

    pub fn first(&mut self) {
        if !self.listing.companies.is_empty() {
            self.select(0);
        }
    }

    pub fn last(&mut self) {
        if let Some(last) = self.listing.companies.len().checked_sub(1) {
            self.select(last);
        }
    }

    /// (active, cancelled, other) counts over the listing.
    pub fn status_counts(&self) -> (usize, usize, usize) {
        self.listing
            .companies
            .iter()
            .fold((0, 0, 0), |(active, cancelled, other), c| match c.status() {
                "ATIVO" => (active + 1, cancelled, other),
                "CANCELADA" => (active, cancelled + 1, other),
                _ => (active, cancelled, other + 1),
            })
    }
}

pub fn run_ui(app: &mut App) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run_app(&mut terminal, app);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    res?;
    Ok(())
}

fn run_app<B: ratatui::backend::Backend>(terminal: &mut Terminal<B>, app: &mut App) -> io::Result<()> {
    loop {
        terminal.draw(|f| ui(f, app))?;

        if let Event::Key(key) = event::read()? {
            match key.code {
                KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
                KeyCode::Enter => app.toggle_detail(),
                KeyCode::Down | KeyCode::Char('j') => app.next(),
                KeyCode::Up | KeyCode::Char('k') => app.previous(),
                KeyCode::PageDown => app.page_down(),
                KeyCode::PageUp => app.page_up(),
                KeyCode::Home => app.first(),
                KeyCode::End => app.last(),
                _ => {}
            }
        }
    }
}

fn ui(f: &mut Frame, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header
            Constraint::Min(0),    // Listing (+ history)
            Constraint::Length(3), // Status bar
        ])
        .split(f.size());

    render_header(f, chunks[0], app);

    if app.history.is_some() {
        let content = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
            .split(chunks[1]);

        render_table(f, content[0], app);
        render_history(f, content[1], app);
    } else {
        render_table(f, chunks[1], app);
    }

    render_status_bar(f, chunks[2], app);
}

fn render_header(f: &mut Frame, area: Rect, app: &App) {
    let (active, cancelled, other) = app.status_counts();
    let last_updated = app
        .listing
        .last_updated
        .map(|d| d.to_string())
        .unwrap_or_else(|| "never".to_string());

    let spans = vec![
        Span::styled(
            "Company Registry",
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw("  |  "),
        Span::styled(format!("Last update: {last_updated}"), Style::default().fg(Color::White)),
        Span::raw("  |  "),
        Span::styled(format!("View: {}", app.listing.mode), Style::default().fg(Color::Cyan)),
        Span::raw("  |  "),
        Span::styled(format!("● {active}"), Style::default().fg(Color::Green)),
        Span::raw("  "),
        Span::styled(format!("✕ {cancelled}"), Style::default().fg(Color::Red)),
        Span::raw("  "),
        Span::styled(format!("? {other}"), Style::default().fg(Color::DarkGray)),
    ];

    let header = Paragraph::new(vec![Line::from(spans)]).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Cyan)),
    );

    f.render_widget(header, area);
}

fn status_color(status: &str) -> Color {
    match status {
        "ATIVO" => Color::Green,
        "CANCELADA" => Color::Red,
        _ => Color::Yellow,
    }
}

fn header_row<'r>(titles: &'r [&'r str]) -> Row<'r> {
    let cells = titles.iter().map(|h| {
        Cell::from(*h).style(
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        )
    });

    Row::new(cells)
        .style(Style::default().bg(Color::DarkGray))
        .height(1)
}

fn render_table(f: &mut Frame, area: Rect, app: &mut App) {
    let rows = app.listing.companies.iter().map(|c| {
        Row::new(vec![
            Cell::from(format_cnpj(c.identifier())),
            Cell::from(truncate(c.legal_name(), 40)),
            Cell::from(c.status().to_string()).style(Style::default().fg(status_color(c.status()))),
            Cell::from(c.record.sector.clone().unwrap_or_default()),
        ])
        .height(1)
    });

    let table = Table::new(
        rows,
        [
            Constraint::Length(20),
            Constraint::Length(42),
            Constraint::Length(12),
            Constraint::Min(10),
        ],
    )
    .header(header_row(&["CNPJ", "Legal name", "Status", "Sector"]))
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White))
            .title(" Companies "),
    )
    .highlight_style(
        Style::default()
            .bg(Color::DarkGray)
            .add_modifier(Modifier::BOLD),
    )
    .highlight_symbol("→ ");

    f.render_stateful_widget(table, area, &mut app.state);
}

fn render_history(f: &mut Frame, area: Rect, app: &App) {
    let Some(history) = &app.history else {
        return;
    };

    let changes: HashSet<_> = history.status_changes().map(|s| s.snapshot_date).collect();
    let rows = history.entries.iter().map(|entry| {
        let marker = if changes.contains(&entry.snapshot_date) { "•" } else { "" };
        Row::new(vec![
            Cell::from(marker),
            Cell::from(entry.snapshot_date.to_string()),
            Cell::from(entry.status().to_string())
                .style(Style::default().fg(status_color(entry.status()))),
            Cell::from(truncate(entry.legal_name(), 30)),
        ])
    });

    let table = Table::new(
        rows,
        [
            Constraint::Length(1),
            Constraint::Length(12),
            Constraint::Length(12),
            Constraint::Min(10),
        ],
    )
    .header(header_row(&["", "Snapshot", "Status", "Legal name"]))
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Cyan))
            .title(format!(" History {} ", format_cnpj(&history.identifier))),
    );

    f.render_widget(table, area);
}

fn render_status_bar(f: &mut Frame, area: Rect, app: &App) {
    let selected = app.state.selected().map(|i| i + 1).unwrap_or(0);
    let total = app.listing.companies.len();

    let mut spans = vec![Span::styled(
        format!(" Row: {selected}/{total} "),
        Style::default().fg(Color::Cyan),
    )];

    if let Some(message) = &app.message {
        spans.push(Span::raw(" | "));
        spans.push(Span::styled(message.clone(), Style::default().fg(Color::Red)));
    }

    for (key, label, color) in [
        ("Enter", " History", Color::Yellow),
        ("↑/↓", " Nav", Color::Yellow),
        ("PgUp/PgDn", " Fast", Color::Yellow),
        ("q", " Quit", Color::Red),
    ] {
        spans.push(Span::raw(" | "));
        spans.push(Span::styled(key, Style::default().fg(color)));
        spans.push(Span::raw(label));
    }

    let status_bar = Paragraph::new(vec![Line::from(spans)]).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White)),
    );

    f.render_widget(status_bar, area);
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use company_registry::{CompanyRecord, LatestMode};

    fn seeded_store() -> SnapshotStore {
        let store = SnapshotStore::open_in_memory().unwrap();
        for (cnpj, name, status, day) in [
            ("11111111000111", "ALFA", "ATIVO", 1),
            ("22222222000122", "BETA", "CANCELADA", 1),
            ("22222222000122", "BETA", "ATIVO", 2),
            ("33333333000133", "GAMA", "FASE PRÉ-OPERACIONAL", 2),
        ] {
            let record = CompanyRecord {
                cnpj: cnpj.to_string(),
                legal_name: name.to_string(),
                status: status.to_string(),
                ..CompanyRecord::default()
            };
            let on = NaiveDate::from_ymd_opt(2024, 1, day).unwrap();
            store.insert(&EntitySnapshot::new(record, on)).unwrap();
        }
        store
    }

    #[test]
    fn test_navigation_wraps() {
        let store = seeded_store();
        let listing = views::listing(&store, LatestMode::PerEntity).unwrap();
        let mut app = App::new(&store, listing);

        assert_eq!(app.state.selected(), Some(0));
        app.previous();
        assert_eq!(app.state.selected(), Some(2));
        app.next();
        assert_eq!(app.state.selected(), Some(0));
        app.page_down();
        assert_eq!(app.state.selected(), Some(2));
        app.page_up();
        assert_eq!(app.state.selected(), Some(0));
    }

    #[test]
    fn test_detail_panel_loads_selected_history() {
        let store = seeded_store();
        let listing = views::listing(&store, LatestMode::PerEntity).unwrap();
        let mut app = App::new(&store, listing);

        app.next(); // BETA
        app.toggle_detail();
        let history = app.history.as_ref().unwrap();
        assert_eq!(history.identifier, "22222222000122");
        assert_eq!(history.entries.len(), 2);

        app.next(); // panel follows to GAMA
        assert_eq!(app.history.as_ref().unwrap().identifier, "33333333000133");

        app.toggle_detail();
        assert!(app.history.is_none());
    }

    #[test]
    fn test_status_counts() {
        let store = seeded_store();
        let listing = views::listing(&store, LatestMode::PerEntity).unwrap();
        let app = App::new(&store, listing);

        assert_eq!(app.status_counts(), (2, 0, 1));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("AÇÚCAR", 10), "AÇÚCAR");
        assert_eq!(truncate("AÇÚCAR GUARANI", 6), "AÇÚ...");
    }
}
