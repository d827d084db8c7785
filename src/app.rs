use crate::error::ExtractError;
use crate::event::{AppEvent, Event, EventHandler};
use crate::export;
use crate::parser::ExtractionResult;
use crate::pipeline::{Extractor, Stage};
use crate::schema::FieldSchema;
use ratatui::DefaultTerminal;
use ratatui::crossterm::event::{
    Event as CrosstermEvent, KeyCode, KeyEvent, KeyEventKind, KeyModifiers,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{error, info};

/// What a finished extraction hands back to the UI.
#[derive(Debug)]
pub struct Outcome {
    pub result: ExtractionResult,
    pub summary: Option<String>,
    pub summary_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tab {
    Summary,
    Data,
    Download,
}

impl Tab {
    pub const ALL: [Tab; 3] = [Tab::Summary, Tab::Data, Tab::Download];

    pub fn title(self) -> &'static str {
        match self {
            Tab::Summary => "Summary",
            Tab::Data => "Extracted Data",
            Tab::Download => "Download",
        }
    }

    pub fn index(self) -> usize {
        Tab::ALL.iter().position(|t| *t == self).unwrap_or(0)
    }

    fn next(self) -> Self {
        Tab::ALL[(self.index() + 1) % Tab::ALL.len()]
    }

    fn prev(self) -> Self {
        Tab::ALL[(self.index() + Tab::ALL.len() - 1) % Tab::ALL.len()]
    }
}

#[derive(Debug)]
pub enum Screen {
    Input,
    Running { file: PathBuf, stage: Stage },
    Results(Outcome),
    Failed { message: String, raw: Option<String> },
}

/// Side effects the event loop must perform for the app.
#[derive(Debug, PartialEq, Eq)]
pub enum Action {
    Extract(PathBuf),
}

/// Interactive extraction session. Holds no more than one result at a time.
#[derive(Debug)]
pub struct App {
    pub running: bool,
    pub screen: Screen,
    /// Path being typed on the input screen.
    pub input: String,
    pub tab: Tab,
    /// Data tab shows the raw JSON instead of the field table.
    pub show_raw_json: bool,
    /// Scroll offset for long text (summary, raw output).
    pub scroll: u16,
    /// Last status line (saved files, validation hints).
    pub status: Option<String>,
    pub tick: u64,
    pub schema: FieldSchema,
    pub page_index: usize,
    pub export_dir: PathBuf,
}

impl App {
    pub fn new(schema: FieldSchema, page_index: usize, export_dir: impl Into<PathBuf>) -> Self {
        Self {
            running: true,
            screen: Screen::Input,
            input: String::new(),
            tab: Tab::Summary,
            show_raw_json: false,
            scroll: 0,
            status: None,
            tick: 0,
            schema,
            page_index,
            export_dir: export_dir.into(),
        }
    }

    pub fn is_busy(&self) -> bool {
        matches!(self.screen, Screen::Running { .. })
    }

    pub fn on_tick(&mut self) {
        self.tick = self.tick.wrapping_add(1);
    }

    pub fn handle_key(&mut self, key: KeyEvent) -> Option<Action> {
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            self.running = false;
            return None;
        }
        if key.code == KeyCode::Esc {
            self.running = false;
            return None;
        }

        match self.screen {
            Screen::Input => self.handle_input_key(key),
            Screen::Running { .. } => {
                if key.code == KeyCode::Enter {
                    self.status = Some("An extraction is already running".to_string());
                }
                None
            }
            Screen::Results(_) => {
                self.handle_results_key(key);
                None
            }
            Screen::Failed { .. } => {
                match key.code {
                    KeyCode::Char('q') => self.running = false,
                    KeyCode::Char('r') => self.reset(),
                    KeyCode::Up => self.scroll = self.scroll.saturating_sub(1),
                    KeyCode::Down => self.scroll = self.scroll.saturating_add(1),
                    _ => {}
                }
                None
            }
        }
    }

    fn handle_input_key(&mut self, key: KeyEvent) -> Option<Action> {
        match key.code {
            KeyCode::Char(c) => {
                self.input.push(c);
                None
            }
            KeyCode::Backspace => {
                self.input.pop();
                None
            }
            KeyCode::Enter => {
                let trimmed = self.input.trim();
                if trimmed.is_empty() {
                    self.status = Some("Enter the path of a PDF invoice first".to_string());
                    return None;
                }
                let file = expand_home(trimmed);
                self.status = None;
                self.scroll = 0;
                self.screen = Screen::Running {
                    file: file.clone(),
                    stage: Stage::LoadingPdf,
                };
                Some(Action::Extract(file))
            }
            _ => None,
        }
    }

    fn handle_results_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Char('q') => self.running = false,
            KeyCode::Char('r') => self.reset(),
            KeyCode::Tab | KeyCode::Right => {
                self.tab = self.tab.next();
                self.scroll = 0;
            }
            KeyCode::BackTab | KeyCode::Left => {
                self.tab = self.tab.prev();
                self.scroll = 0;
            }
            KeyCode::Up => self.scroll = self.scroll.saturating_sub(1),
            KeyCode::Down => self.scroll = self.scroll.saturating_add(1),
            KeyCode::Char('v') if self.tab == Tab::Data => {
                self.show_raw_json = !self.show_raw_json;
                self.scroll = 0;
            }
            KeyCode::Char('j') if self.tab == Tab::Download => self.save(false),
            KeyCode::Char('c') if self.tab == Tab::Download => self.save(true),
            _ => {}
        }
    }

    fn save(&mut self, csv: bool) {
        let Screen::Results(outcome) = &self.screen else {
            return;
        };
        let written = if csv {
            export::write_csv_download(&self.export_dir, &outcome.result)
        } else {
            export::write_json_download(
                &self.export_dir,
                &outcome.result,
                outcome.summary.as_deref(),
            )
        };
        self.status = Some(match written {
            Ok(path) => format!("Saved {}", path.display()),
            Err(e) => {
                error!(error = %e, "Export failed");
                format!("Export failed: {e}")
            }
        });
    }

    /// Clear results and start over.
    pub fn reset(&mut self) {
        self.screen = Screen::Input;
        self.input.clear();
        self.tab = Tab::Summary;
        self.show_raw_json = false;
        self.scroll = 0;
        self.status = None;
    }

    pub fn on_stage(&mut self, stage: Stage) {
        if let Screen::Running { stage: current, .. } = &mut self.screen {
            *current = stage;
        }
    }

    pub fn on_finished(&mut self, outcome: Result<Outcome, ExtractError>) {
        self.scroll = 0;
        self.tab = Tab::Summary;
        self.show_raw_json = false;
        self.screen = match outcome {
            Ok(outcome) => {
                if let Some(e) = &outcome.summary_error {
                    self.status = Some(format!("Summary unavailable: {e}"));
                }
                Screen::Results(outcome)
            }
            Err(e) => Screen::Failed {
                message: e.to_string(),
                raw: e.raw_completion().map(str::to_string),
            },
        };
    }
}

/// `~/invoices/118.pdf` -> `$HOME/invoices/118.pdf`
fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), std::env::var_os("HOME")) {
        (Some(rest), Some(home)) => Path::new(&home).join(rest),
        _ => PathBuf::from(path),
    }
}

/// Run the extraction in the background, reporting stages over `sender`.
fn spawn_extraction(
    extractor: Arc<Extractor>,
    schema: FieldSchema,
    file: PathBuf,
    page_index: usize,
    summarize: bool,
    sender: UnboundedSender<Event>,
) {
    tokio::spawn(async move {
        let stage_tx = sender.clone();
        let report = move |stage: Stage| {
            let _ = stage_tx.send(Event::App(AppEvent::Stage(stage)));
        };

        let extracted = extractor
            .extract_invoice_with(&file, page_index, &schema, report.clone())
            .await;

        let outcome = match extracted {
            Ok(result) => {
                let (summary, summary_error) = if summarize {
                    report(Stage::Summarizing);
                    match extractor.summarize(&result).await {
                        Ok(s) => (Some(s), None),
                        Err(e) => {
                            error!(error = %e, "Summary generation failed");
                            (None, Some(e.to_string()))
                        }
                    }
                } else {
                    (None, None)
                };
                report(Stage::Complete);
                Ok(Outcome {
                    result,
                    summary,
                    summary_error,
                })
            }
            Err(e) => {
                error!(error = %e, "Extraction failed");
                Err(e)
            }
        };

        let _ = sender.send(Event::App(AppEvent::Finished(Box::new(outcome))));
    });
}

/// Run the application's main loop.
pub async fn run(
    mut app: App,
    extractor: Arc<Extractor>,
    summarize: bool,
    mut terminal: DefaultTerminal,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut events = EventHandler::new();

    while app.running {
        terminal.draw(|frame| frame.render_widget(&app, frame.area()))?;

        let Some(event) = events.next().await else {
            break;
        };
        match event {
            Event::Tick => app.on_tick(),
            Event::Crossterm(CrosstermEvent::Key(key)) if key.kind == KeyEventKind::Press => {
                if let Some(Action::Extract(file)) = app.handle_key(key) {
                    info!(file = %file.display(), "Starting extraction");
                    spawn_extraction(
                        extractor.clone(),
                        app.schema.clone(),
                        file,
                        app.page_index,
                        summarize,
                        events.sender(),
                    );
                }
            }
            Event::Crossterm(_) => {}
            Event::App(AppEvent::Stage(stage)) => app.on_stage(stage),
            Event::App(AppEvent::Finished(outcome)) => app.on_finished(*outcome),
        }
    }

    Ok(())
}
