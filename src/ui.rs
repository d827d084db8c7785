use crate::app::{App, Outcome, Screen, Tab};
use crate::export::{self, CSV_FILE_NAME, JSON_FILE_NAME};
use crate::pipeline::Stage;
use ratatui::{
    buffer::Buffer,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span, Text},
    widgets::{Block, Cell, Paragraph, Row, Table, Tabs, Widget, Wrap},
};

const SPINNER: [&str; 4] = ["|", "/", "-", "\\"];

impl Widget for &App {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let [header, body, footer] = Layout::vertical([
            Constraint::Length(3),
            Constraint::Min(0),
            Constraint::Length(2),
        ])
        .areas(area);

        Paragraph::new(Line::from(vec![
            Span::styled(
                "Invoice Data Extractor",
                Style::new().fg(Color::Cyan).add_modifier(Modifier::BOLD),
            ),
            Span::raw("  extract fields from Amazon invoice PDFs with a local model"),
        ]))
        .block(Block::bordered())
        .render(header, buf);

        match &self.screen {
            Screen::Input => render_input(self, body, buf),
            Screen::Running { file, stage } => {
                render_progress(self, file.display().to_string(), *stage, body, buf)
            }
            Screen::Results(outcome) => render_results(self, outcome, body, buf),
            Screen::Failed { message, raw } => {
                render_failure(self, message, raw.as_deref(), body, buf)
            }
        }

        render_footer(self, footer, buf);
    }
}

fn render_input(app: &App, area: Rect, buf: &mut Buffer) {
    let [left, right] =
        Layout::horizontal([Constraint::Percentage(50), Constraint::Percentage(50)]).areas(area);
    let [input_area, hint_area] =
        Layout::vertical([Constraint::Length(3), Constraint::Min(0)]).areas(left);

    Paragraph::new(format!("{}_", app.input))
        .block(Block::bordered().title(" Upload Invoice (PDF path) "))
        .render(input_area, buf);

    Paragraph::new(vec![
        Line::from(format!("Reads page {} of the PDF.", app.page_index + 1)),
        Line::from(""),
        Line::from("1. Type the path of your invoice PDF"),
        Line::from("2. Press Enter to extract"),
        Line::from("3. Watch the progress"),
        Line::from("4. Review the results in the tabs"),
        Line::from("5. Download JSON or CSV"),
    ])
    .block(Block::bordered().title(" Instructions "))
    .render(hint_area, buf);

    let fields: Vec<Line> = app
        .schema
        .names()
        .map(|n| Line::from(format!("- {}", export::field_label(n))))
        .collect();
    Paragraph::new(fields)
        .block(Block::bordered().title(" Extracted Fields "))
        .render(right, buf);
}

fn render_progress(app: &App, file: String, current: Stage, area: Rect, buf: &mut Buffer) {
    let current_idx = Stage::ALL.iter().position(|s| *s == current).unwrap_or(0);
    let spinner = SPINNER[(app.tick as usize) % SPINNER.len()];

    let mut lines = vec![Line::from(format!("Processing {file}")), Line::from("")];
    for (i, stage) in Stage::ALL.iter().enumerate() {
        let line = if i < current_idx {
            Line::from(format!("[x] {}", stage.label())).fg(Color::Green)
        } else if i == current_idx {
            Line::from(format!("[{spinner}] {}...", stage.label())).fg(Color::Yellow).bold()
        } else {
            Line::from(format!("[ ] {}", stage.label())).fg(Color::DarkGray)
        };
        lines.push(line);
    }

    Paragraph::new(lines)
        .block(Block::bordered().title(" Progress "))
        .render(area, buf);
}

fn render_results(app: &App, outcome: &Outcome, area: Rect, buf: &mut Buffer) {
    let [tabs_area, content] =
        Layout::vertical([Constraint::Length(3), Constraint::Min(0)]).areas(area);

    Tabs::new(Tab::ALL.iter().map(|t| t.title()))
        .select(app.tab.index())
        .highlight_style(
            Style::new()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD | Modifier::UNDERLINED),
        )
        .block(Block::bordered())
        .render(tabs_area, buf);

    match app.tab {
        Tab::Summary => {
            let text = outcome
                .summary
                .clone()
                .unwrap_or_else(|| "No summary was generated.".to_string());
            Paragraph::new(text)
                .wrap(Wrap { trim: false })
                .scroll((app.scroll, 0))
                .block(Block::bordered().title(" Invoice Summary "))
                .render(content, buf);
        }
        Tab::Data if app.show_raw_json => {
            let json = export::to_pretty_json(&outcome.result)
                .unwrap_or_else(|e| format!("Could not render JSON: {e}"));
            Paragraph::new(json)
                .scroll((app.scroll, 0))
                .block(Block::bordered().title(" Raw JSON "))
                .render(content, buf);
        }
        Tab::Data => {
            let rows: Vec<Row> = outcome
                .result
                .iter()
                .skip(app.scroll as usize)
                .map(|(k, v)| {
                    let height = v.lines().count().max(1) as u16;
                    let value = Cell::from(Text::from(v.to_string()));
                    Row::new(vec![Cell::from(export::field_label(k)), value]).height(height)
                })
                .collect();
            Table::new(rows, [Constraint::Length(24), Constraint::Min(10)])
                .header(Row::new(vec!["Field", "Value"]).bold())
                .block(Block::bordered().title(" Extracted Data "))
                .render(content, buf);
        }
        Tab::Download => {
            Paragraph::new(vec![
                Line::from(format!("Export directory: {}", app.export_dir.display())),
                Line::from(""),
                Line::from(format!("[j] Download as JSON  -> {JSON_FILE_NAME}")),
                Line::from(format!("[c] Download as CSV   -> {CSV_FILE_NAME}")),
            ])
            .block(Block::bordered().title(" Download Results "))
            .render(content, buf);
        }
    }
}

fn render_failure(app: &App, message: &str, raw: Option<&str>, area: Rect, buf: &mut Buffer) {
    let [error_area, raw_area] =
        Layout::vertical([Constraint::Length(4), Constraint::Min(0)]).areas(area);

    Paragraph::new(message.to_string())
        .fg(Color::Red)
        .wrap(Wrap { trim: true })
        .block(Block::bordered().title(" Extraction failed "))
        .render(error_area, buf);

    if let Some(raw) = raw {
        Paragraph::new(raw.to_string())
            .wrap(Wrap { trim: false })
            .scroll((app.scroll, 0))
            .block(Block::bordered().title(" Raw model output "))
            .render(raw_area, buf);
    }
}

fn render_footer(app: &App, area: Rect, buf: &mut Buffer) {
    let keys = match app.screen {
        Screen::Input => "Enter extract  Esc quit",
        Screen::Running { .. } => "Esc quit",
        Screen::Results(_) => "Tab/arrows switch tab  Up/Down scroll  v raw JSON  r start over  q quit",
        Screen::Failed { .. } => "Up/Down scroll  r start over  q quit",
    };
    let mut lines = vec![Line::from(keys).fg(Color::DarkGray)];
    if let Some(status) = &app.status {
        lines.push(Line::from(status.as_str()).fg(Color::Yellow));
    }
    Paragraph::new(lines).render(area, buf);
}
