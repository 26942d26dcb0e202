use anyhow::Result;
use country_integration::{IntegratedRow, IntegrationSummary, UnresolvedIdentity};
use crossterm::{
    event::{self, Event, KeyCode, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{BarChart, Block, Borders, Cell, Paragraph, Row, Table, TableState},
    Frame, Terminal,
};
use std::io;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    Countries,
    GdpChart,
    Unresolved,
}

impl Page {
    pub fn next(&self) -> Self {
        match self {
            Page::Countries => Page::GdpChart,
            Page::GdpChart => Page::Unresolved,
            Page::Unresolved => Page::Countries,
        }
    }

    pub fn previous(&self) -> Self {
        match self {
            Page::Countries => Page::Unresolved,
            Page::GdpChart => Page::Countries,
            Page::Unresolved => Page::GdpChart,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            Page::Countries => "Countries",
            Page::GdpChart => "Mean GDP",
            Page::Unresolved => "Unresolved",
        }
    }
}

pub struct App {
    pub rows: Vec<IntegratedRow>,
    pub unresolved: Vec<UnresolvedIdentity>,
    pub summary: IntegrationSummary,
    pub state: TableState,
    pub current_page: Page,
    pub show_detail: bool,

    /// Countries shown in the bar chart
    pub chart_len: usize,
}

impl App {
    pub fn new(
        rows: Vec<IntegratedRow>,
        unresolved: Vec<UnresolvedIdentity>,
        summary: IntegrationSummary,
    ) -> Self {
        let mut state = TableState::default();
        if !rows.is_empty() {
            state.select(Some(0));
        }

        Self {
            rows,
            unresolved,
            summary,
            state,
            current_page: Page::Countries,
            show_detail: false,
            chart_len: 15,
        }
    }

    pub fn toggle_detail(&mut self) {
        self.show_detail = !self.show_detail;
    }

    pub fn selected_row(&self) -> Option<&IntegratedRow> {
        self.state.selected().and_then(|i| self.rows.get(i))
    }

    pub fn next_page(&mut self) {
        self.current_page = self.current_page.next();
    }

    pub fn previous_page(&mut self) {
        self.current_page = self.current_page.previous();
    }

    pub fn next(&mut self) {
        let len = self.rows.len();
        if len == 0 {
            return;
        }
        let i = match self.state.selected() {
            Some(i) if i + 1 < len => i + 1,
            _ => 0,
        };
        self.state.select(Some(i));
    }

    pub fn previous(&mut self) {
        let len = self.rows.len();
        if len == 0 {
            return;
        }
        let i = match self.state.selected() {
            Some(0) | None => len - 1,
            Some(i) => i - 1,
        };
        self.state.select(Some(i));
    }

    pub fn page_down(&mut self) {
        let len = self.rows.len();
        if len == 0 {
            return;
        }
        let i = self.state.selected().map(|i| (i + 20).min(len - 1)).unwrap_or(0);
        self.state.select(Some(i));
    }

    pub fn page_up(&mut self) {
        let i = self.state.selected().map(|i| i.saturating_sub(20)).unwrap_or(0);
        self.state.select(Some(i));
    }

    /// Largest mean GDPs, in billions of US$
    pub fn gdp_bars(&self) -> Vec<(String, u64)> {
        let mut bars: Vec<(String, f64)> = self
            .rows
            .iter()
            .filter_map(|r| r.gdp_mean_usd.map(|gdp| (r.iso2.clone(), gdp)))
            .collect();

        bars.sort_by(|a, b| b.1.total_cmp(&a.1));
        bars.truncate(self.chart_len);
        bars.into_iter()
            .map(|(iso2, gdp)| (iso2, (gdp / 1e9).round().max(0.0) as u64))
            .collect()
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

    res.map_err(Into::into)
}

fn run_app<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    app: &mut App,
) -> io::Result<()> {
    loop {
        terminal.draw(|f| ui(f, app))?;

        if let Event::Key(key) = event::read()? {
            match key.code {
                KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
                KeyCode::Enter => app.toggle_detail(),
                KeyCode::Tab => {
                    if key.modifiers.contains(KeyModifiers::SHIFT) {
                        app.previous_page();
                    } else {
                        app.next_page();
                    }
                }
                KeyCode::BackTab => app.previous_page(),
                KeyCode::Char('+') => app.chart_len = (app.chart_len + 5).min(60),
                KeyCode::Char('-') => app.chart_len = app.chart_len.saturating_sub(5).max(5),
                KeyCode::Down | KeyCode::Char('j') => app.next(),
                KeyCode::Up | KeyCode::Char('k') => app.previous(),
                KeyCode::PageDown => app.page_down(),
                KeyCode::PageUp => app.page_up(),
                KeyCode::Home => app.state.select(Some(0)),
                KeyCode::End => {
                    if !app.rows.is_empty() {
                        app.state.select(Some(app.rows.len() - 1));
                    }
                }
                _ => {}
            }
        }
    }
}

fn ui(f: &mut Frame, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header with navigation
            Constraint::Min(0),    // Content area
            Constraint::Length(3), // Status bar
        ])
        .split(f.size());

    render_header(f, chunks[0], app);

    if app.show_detail && app.current_page == Page::Countries {
        let content_chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
            .split(chunks[1]);

        render_table(f, content_chunks[0], app);
        render_detail_panel(f, content_chunks[1], app);
    } else {
        match app.current_page {
            Page::Countries => render_table(f, chunks[1], app),
            Page::GdpChart => render_gdp_chart(f, chunks[1], app),
            Page::Unresolved => render_unresolved(f, chunks[1], app),
        }
    }

    render_status_bar(f, chunks[2], app);
}

fn render_header(f: &mut Frame, area: Rect, app: &App) {
    let pages = [Page::Countries, Page::GdpChart, Page::Unresolved];

    let mut tab_spans = vec![];
    for (i, page) in pages.iter().enumerate() {
        if i > 0 {
            tab_spans.push(Span::raw(" │ "));
        }

        let style = if *page == app.current_page {
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD | Modifier::UNDERLINED)
        } else {
            Style::default().fg(Color::DarkGray)
        };

        tab_spans.push(Span::styled(page.title().to_string(), style));
    }

    tab_spans.push(Span::raw("  |  "));
    tab_spans.push(Span::styled(
        format!("Countries: {}", app.summary.rows),
        Style::default().fg(Color::White),
    ));
    tab_spans.push(Span::raw("  "));
    tab_spans.push(Span::styled(
        format!("☁ {}", app.summary.with_weather),
        Style::default().fg(Color::Cyan),
    ));
    tab_spans.push(Span::raw("  "));
    tab_spans.push(Span::styled(
        format!("$ {}", app.summary.with_gdp),
        Style::default().fg(Color::Green),
    ));

    let header = Paragraph::new(vec![Line::from(tab_spans)]).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Cyan)),
    );

    f.render_widget(header, area);
}

fn fmt_opt<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}

fn fmt_gdp(value: Option<f64>) -> String {
    match value {
        Some(v) if v >= 1e12 => format!("{:.2}T", v / 1e12),
        Some(v) => format!("{:.1}B", v / 1e9),
        None => "-".to_string(),
    }
}

fn render_table(f: &mut Frame, area: Rect, app: &mut App) {
    let header_cells = ["ISO2", "ISO3", "Country", "Capital", "Population", "Temp °C", "Mean GDP"]
        .iter()
        .map(|h| {
            Cell::from(*h).style(
                Style::default()
                    .fg(Color::Yellow)
                    .add_modifier(Modifier::BOLD),
            )
        });

    let header = Row::new(header_cells)
        .style(Style::default().bg(Color::DarkGray))
        .height(1);

    let rows = app.rows.iter().map(|r| {
        let temp_color = match r.temperature {
            Some(t) if t >= 30.0 => Color::Red,
            Some(t) if t <= 0.0 => Color::Cyan,
            Some(_) => Color::White,
            None => Color::DarkGray,
        };

        let cells = vec![
            Cell::from(r.iso2.clone()),
            Cell::from(fmt_opt(r.iso3.as_deref())),
            Cell::from(truncate(r.display_name(), 28)),
            Cell::from(truncate(r.capital.as_deref().unwrap_or("-"), 20)),
            Cell::from(fmt_opt(r.population)),
            Cell::from(fmt_opt(r.temperature.map(|t| format!("{:.1}", t))))
                .style(Style::default().fg(temp_color)),
            Cell::from(fmt_gdp(r.gdp_mean_usd)).style(Style::default().fg(Color::Green)),
        ];

        Row::new(cells).height(1)
    });

    let table = Table::new(
        rows,
        [
            Constraint::Length(5),
            Constraint::Length(5),
            Constraint::Length(30),
            Constraint::Length(22),
            Constraint::Length(14),
            Constraint::Length(8),
            Constraint::Length(10),
        ],
    )
    .header(header)
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White))
            .title(" Integrated "),
    )
    .highlight_style(
        Style::default()
            .bg(Color::DarkGray)
            .add_modifier(Modifier::BOLD),
    )
    .highlight_symbol("→ ");

    f.render_stateful_widget(table, area, &mut app.state);
}

fn render_gdp_chart(f: &mut Frame, area: Rect, app: &App) {
    let bars = app.gdp_bars();
    let data: Vec<(&str, u64)> = bars.iter().map(|(iso2, v)| (iso2.as_str(), *v)).collect();

    let chart = BarChart::default()
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(format!(" Mean GDP 1960-2024, top {} (US$ bn) ", data.len())),
        )
        .data(data.as_slice())
        .bar_width(5)
        .bar_gap(1)
        .bar_style(Style::default().fg(Color::Green))
        .value_style(Style::default().fg(Color::Black).bg(Color::Green));

    f.render_widget(chart, area);
}

fn render_unresolved(f: &mut Frame, area: Rect, app: &App) {
    let header = Row::new(["Scraped name", "ISO3", "Reason"].iter().map(|h| {
        Cell::from(*h).style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD))
    }))
    .style(Style::default().bg(Color::DarkGray));

    let rows = app.unresolved.iter().map(|u| {
        Row::new(vec![
            Cell::from(truncate(&u.raw_name, 40)),
            Cell::from(fmt_opt(u.iso3.as_deref())),
            Cell::from(u.reason.as_str()).style(Style::default().fg(Color::Red)),
        ])
    });

    let table = Table::new(
        rows,
        [
            Constraint::Length(42),
            Constraint::Length(6),
            Constraint::Length(18),
        ],
    )
    .header(header)
    .block(
        Block::default()
            .borders(Borders::ALL)
            .title(format!(" Unresolved names ({}) ", app.unresolved.len())),
    );

    f.render_widget(table, area);
}

fn render_detail_panel(f: &mut Frame, area: Rect, app: &App) {
    let Some(row) = app.selected_row() else {
        let empty = Paragraph::new("No country selected")
            .block(Block::default().borders(Borders::ALL).title(" Details "));
        f.render_widget(empty, area);
        return;
    };

    let label = Style::default().fg(Color::Yellow);
    let line = |name: &str, value: String| {
        Line::from(vec![
            Span::styled(format!("{:<14}", name), label),
            Span::raw(value),
        ])
    };

    let lines = vec![
        line("Name", row.display_name().to_string()),
        line("Scraped as", row.raw_name.clone()),
        line("ISO2 / ISO3", format!("{} / {}", row.iso2, fmt_opt(row.iso3.as_deref()))),
        line("Capital", fmt_opt(row.capital.as_deref())),
        line("Population", fmt_opt(row.population)),
        line("Area km²", fmt_opt(row.area)),
        Line::from(""),
        line("Temperature", fmt_opt(row.temperature.map(|t| format!("{:.1} °C", t)))),
        line("Humidity", fmt_opt(row.humidity.map(|h| format!("{:.0} %", h)))),
        line(
            "Observed",
            fmt_opt(row.weather_retrieved_at.map(|t| t.format("%Y-%m-%d %H:%M UTC"))),
        ),
        Line::from(""),
        line("Mean GDP", fmt_gdp(row.gdp_mean_usd)),
        line("GDP years", row.gdp_years.to_string()),
    ];

    let panel = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Cyan))
            .title(" Details "),
    );

    f.render_widget(panel, area);
}

fn render_status_bar(f: &mut Frame, area: Rect, app: &App) {
    let selected = app.state.selected().map(|i| i + 1).unwrap_or(0);

    let mut status_spans = vec![Span::styled(
        format!(" Row: {}/{} ", selected, app.rows.len()),
        Style::default().fg(Color::Cyan),
    )];

    if app.summary.orphan_weather > 0 {
        status_spans.push(Span::raw(" | "));
        status_spans.push(Span::styled(
            format!("{} orphan weather rows", app.summary.orphan_weather),
            Style::default().fg(Color::Red),
        ));
    }

    status_spans.push(Span::raw(" | "));
    status_spans.push(Span::styled("Enter", Style::default().fg(Color::Yellow)));
    status_spans.push(Span::raw(" Details | "));
    status_spans.push(Span::styled("Tab", Style::default().fg(Color::Yellow)));
    status_spans.push(Span::raw(" Page | "));
    status_spans.push(Span::styled("+/-", Style::default().fg(Color::Yellow)));
    status_spans.push(Span::raw(" Bars | "));
    status_spans.push(Span::styled("↑/↓", Style::default().fg(Color::Yellow)));
    status_spans.push(Span::raw(" Nav | "));
    status_spans.push(Span::styled("q", Style::default().fg(Color::Red)));
    status_spans.push(Span::raw(" Quit"));

    let status_bar = Paragraph::new(vec![Line::from(status_spans)]).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White)),
    );

    f.render_widget(status_bar, area);
}

/// Truncate on char boundaries
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(iso2: &str, gdp: Option<f64>) -> IntegratedRow {
        IntegratedRow {
            iso2: iso2.to_string(),
            iso3: None,
            country_name: None,
            raw_name: iso2.to_string(),
            capital: None,
            population: None,
            area: None,
            temperature: None,
            humidity: None,
            weather_retrieved_at: None,
            gdp_mean_usd: gdp,
            gdp_years: 0,
        }
    }

    #[test]
    fn test_gdp_bars_sorted_and_capped() {
        let mut app = App::new(
            vec![
                row("FR", Some(2.5e12)),
                row("XY", None),
                row("US", Some(2.0e13)),
                row("MC", Some(7.0e9)),
            ],
            vec![],
            IntegrationSummary::default(),
        );
        app.chart_len = 2;

        assert_eq!(
            app.gdp_bars(),
            vec![("US".to_string(), 20_000), ("FR".to_string(), 2_500)]
        );
    }

    #[test]
    fn test_navigation_wraps() {
        let mut app = App::new(
            vec![row("FR", None), row("US", None)],
            vec![],
            IntegrationSummary::default(),
        );

        app.previous();
        assert_eq!(app.state.selected(), Some(1));
        app.next();
        assert_eq!(app.state.selected(), Some(0));
    }

    #[test]
    fn test_truncate_multibyte() {
        assert_eq!(truncate("Côte d'Ivoire", 8), "Côte ...");
        assert_eq!(truncate("Peru", 8), "Peru");
    }
}
