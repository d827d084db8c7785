mod app;
mod config;
mod error;
mod event;
mod export;
mod llm;
mod parser;
mod pdf_extract;
mod pipeline;
mod prompt;
mod schema;
mod ui;

use clap::{Parser, Subcommand, ValueEnum};
use config::{Config, DEFAULT_CONFIG_PATH};
use error::ExtractError;
use llm::ChatClient;
use pdf_extract::PdfTextExtractor;
use pipeline::Extractor;
use std::error::Error;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Extract structured fields from Amazon invoice PDFs with a local language model
#[derive(Parser)]
#[command(name = "invoice_extract")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Raise log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Path to config file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract the invoice fields from one PDF
    Extract(ExtractArgs),

    /// Interactive terminal UI
    Ui {
        /// Write logs here instead of discarding them
        #[arg(long)]
        log_file: Option<PathBuf>,
    },

    /// Print the field registry and the format instructions sent to the model
    Schema,

    /// Inspect or edit the configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Args)]
struct ExtractArgs {
    /// PDF file, or `-` to read it from stdin
    pdf: String,

    /// 0-based page holding the invoice table
    #[arg(long)]
    page: Option<usize>,

    /// Model name for the configured backend
    #[arg(long)]
    model: Option<String>,

    /// Base URL of the OpenAI-compatible endpoint
    #[arg(long)]
    base_url: Option<String>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    format: OutputFormat,

    /// Write the result here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Also write the download document (fields, summary, timestamp)
    #[arg(long)]
    save_json: Option<PathBuf>,

    /// Skip the prose summary
    #[arg(long)]
    no_summary: bool,

    /// Print the prompt sent to the model on stderr
    #[arg(long)]
    show_prompt: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Json,
    Table,
    Csv,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the effective configuration
    Show,
    /// Set the model of the selected backend
    SetModel { model: String },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(&cli) {
        eprintln!("Error: could not initialise logging: {e}");
        std::process::exit(1);
    }

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        if let Some(raw) = e
            .downcast_ref::<ExtractError>()
            .and_then(ExtractError::raw_completion)
        {
            eprintln!("\nRaw model output:\n{raw}");
        }
        std::process::exit(1);
    }
}

fn init_tracing(cli: &Cli) -> Result<(), Box<dyn Error>> {
    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_target(true)
        .with_level(true)
        .with_env_filter(filter);

    match &cli.command {
        // The terminal UI owns the screen.
        Commands::Ui { log_file: Some(path) } => builder
            .with_ansi(false)
            .with_writer(Mutex::new(File::create(path)?))
            .init(),
        Commands::Ui { log_file: None } => builder.with_writer(std::io::sink).init(),
        _ => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let cfg = Config::load_or_default(&cli.config)?;

    match cli.command {
        Commands::Extract(args) => extract(cfg, args).await,
        Commands::Ui { .. } => ui(cfg).await,
        Commands::Schema => {
            let schema = cfg.schema()?;
            for field in schema.fields() {
                println!("{:<24} {}", field.name, field.description);
            }
            println!("\n{}", schema.format_instructions());
            Ok(())
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                show_config(&cli.config, &cfg)?;
                Ok(())
            }
            ConfigAction::SetModel { model } => {
                Config::update_model(&cli.config, cfg.llm.backend, &model)?;
                info!(path = %cli.config.display(), model = %model, "Updated model");
                Ok(())
            }
        },
    }
}

async fn extract(mut cfg: Config, args: ExtractArgs) -> Result<(), Box<dyn Error>> {
    if let Some(page) = args.page {
        cfg.extraction.page_index = page;
    }
    if let Some(model) = args.model {
        cfg.llm.endpoint_mut().model = model;
    }
    if let Some(base_url) = args.base_url {
        cfg.llm.endpoint_mut().base_url = base_url;
    }

    let schema = cfg.schema()?;
    let client = ChatClient::from_config(&cfg.llm)?;
    let mut extractor = Extractor::new(Arc::new(PdfTextExtractor), Arc::new(client))
        .with_key_policy(cfg.extraction.key_policy);
    if args.show_prompt {
        extractor = extractor.with_prompt_hook(|prompt| eprintln!("{prompt}"));
    }

    let page_index = cfg.extraction.page_index;
    let log_stage = |stage: pipeline::Stage| info!(stage = stage.label(), "Stage");
    let result = if args.pdf == "-" {
        let mut bytes = Vec::new();
        std::io::stdin().read_to_end(&mut bytes)?;
        extractor
            .extract_invoice_bytes(&bytes, page_index, &schema, log_stage)
            .await?
    } else {
        extractor
            .extract_invoice_with(Path::new(&args.pdf), page_index, &schema, log_stage)
            .await?
    };

    let rendered = match args.format {
        OutputFormat::Json => export::to_pretty_json(&result)?,
        OutputFormat::Table => export::to_table(&result),
        OutputFormat::Csv => export::to_csv(&result)?,
    };
    match &args.output {
        Some(path) => {
            fs::write(path, &rendered)?;
            info!(path = %path.display(), "Wrote result");
        }
        None => println!("{}", rendered.trim_end()),
    }

    let summary = if cfg.extraction.summary && !args.no_summary {
        match extractor.summarize(&result).await {
            Ok(summary) => {
                eprintln!("\nSummary:\n{summary}");
                Some(summary)
            }
            Err(e) => {
                warn!(error = %e, "Summary generation failed");
                None
            }
        }
    } else {
        None
    };

    if let Some(path) = &args.save_json {
        let doc = export::download_json(&result, summary.as_deref(), export::now())?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, doc)?;
        info!(path = %path.display(), "Wrote download document");
    }

    Ok(())
}

async fn ui(cfg: Config) -> Result<(), Box<dyn Error>> {
    let schema = cfg.schema()?;
    let client = ChatClient::from_config(&cfg.llm)?;
    info!(model = %client.model(), "Starting terminal UI");
    let extractor = Extractor::new(Arc::new(PdfTextExtractor), Arc::new(client))
        .with_key_policy(cfg.extraction.key_policy);
    let app = app::App::new(schema, cfg.extraction.page_index, &cfg.export.dir);

    let terminal = ratatui::init();
    let result = app::run(app, Arc::new(extractor), cfg.extraction.summary, terminal).await;
    ratatui::restore();
    result
}

fn show_config(path: &Path, cfg: &Config) -> Result<(), Box<dyn Error>> {
    let endpoint = cfg.llm.endpoint();
    let schema = cfg.schema()?;
    println!("config file:  {}", path.display());
    println!("backend:      {:?}", cfg.llm.backend);
    println!("base_url:     {}", endpoint.base_url);
    println!("model:        {}", endpoint.model);
    println!("temperature:  {}", cfg.llm.temperature);
    println!("page_index:   {}", cfg.extraction.page_index);
    println!("key_policy:   {:?}", cfg.extraction.key_policy);
    println!("summary:      {}", cfg.extraction.summary);
    println!("export dir:   {}", cfg.export.dir);
    println!("fields:       {}", schema.len());
    Ok(())
}
