//! convcost - token and cost analyzer for ChatGPT conversation exports
//!
//! Loads a `conversations.json` export (or a directory of them), estimates
//! the tokens each conversation consumed, prices them per model, and prints
//! or exports a report. Browse commands list and inspect single
//! conversations.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Logs: $XDG_STATE_HOME/convcost/convcost.log (~/.local/state/convcost/convcost.log)
//! - Config: $XDG_CONFIG_HOME/convcost/config.toml (~/.config/convcost/config.toml)

mod render;

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use convcost_core::analytics::pricing::CostTable;
use convcost_core::analytics::filter::parse_filter_date;
use convcost_core::analytics::{browse, build_report, report, AnalysisResult, Filters};
use convcost_core::config::ReportFormat;
use convcost_core::{AccrualEngine, CalculationMode, Config, Conversation, ExportLoader};
use indicatif::{ProgressBar, ProgressStyle};

#[derive(Parser)]
#[command(name = "convcost")]
#[command(about = "Estimate token usage and cost of exported ChatGPT conversations")]
#[command(version)]
struct Args {
    /// Export file or directory of export files
    #[arg(short, long, global = true, default_value = "conversations.json")]
    input: PathBuf,

    /// Calculation mode: detailed or simple (default: from config)
    #[arg(short, long, global = true)]
    mode: Option<CalculationMode>,

    /// Config file (default: $XDG_CONFIG_HOME/convcost/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// JSON cost table replacing the configured one
    #[arg(long, global = true)]
    costs: Option<PathBuf>,

    /// Only conversations created on or after this date (YYYY-MM-DD)
    #[arg(long, global = true)]
    filter_start_date: Option<String>,

    /// Only conversations created on or before this date (YYYY-MM-DD)
    #[arg(long, global = true)]
    filter_end_date: Option<String>,

    /// Only conversations with an assistant message from this model slug
    #[arg(long, global = true)]
    filter_model: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Print the full report and export it (default)
    Report {
        /// Export format: text, json or csv (default: from config)
        #[arg(short, long)]
        format: Option<ReportFormat>,

        /// Directory for the exported report (default: from config)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Include per-conversation details and extra rate columns
        #[arg(short, long)]
        verbose: bool,

        /// Print only, do not write a report file
        #[arg(long)]
        no_export: bool,
    },

    /// List the conversations with the most turns
    Top {
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Find conversations by title substring
    Search {
        query: String,

        #[arg(long)]
        case_sensitive: bool,
    },

    /// List the dates that have conversations
    Dates,

    /// List the conversations created on a date (YYYY-MM-DD)
    Day { date: String },

    /// Show one conversation by id or title
    Show {
        /// Conversation id, or a title substring matching exactly one conversation
        conversation: String,

        /// Also print the conversation text
        #[arg(short, long)]
        text: bool,

        /// Print the analysis as JSON
        #[arg(long)]
        json: bool,
    },

    /// Break down the messages carrying a model label (e.g. "N/A")
    Model { label: String },

    /// Write one conversation's message tree to a JSON file
    Export {
        /// Conversation id, or a title substring matching exactly one conversation
        conversation: String,

        /// Destination directory (default: from config)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Ensure XDG environment variables are set before using core library
    Config::ensure_xdg_env();

    let mut config = match &args.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .context("failed to load configuration")?;

    let _log_guard =
        convcost_core::logging::init(&config.logging).context("failed to initialize logging")?;

    tracing::info!(input = %args.input.display(), "convcost starting");

    if let Some(path) = &args.costs {
        let table = CostTable::from_json_file(path)
            .with_context(|| format!("failed to load cost table {}", path.display()))?;
        config.pricing.models = Some(table);
    }

    let filters = Filters::parse(
        args.filter_start_date.as_deref(),
        args.filter_end_date.as_deref(),
        args.filter_model.as_deref(),
    )?;
    let mode = args.mode.unwrap_or(config.analysis.mode);

    let conversations = load_conversations(&args.input)?;
    let conversations = filters.apply(conversations);
    if conversations.is_empty() {
        bail!("no conversations left to analyze");
    }

    let engine = AccrualEngine::from_config(&config);
    let results = analyze(&engine, &conversations, mode)?;

    let command = args.command.unwrap_or(Command::Report {
        format: None,
        output_dir: None,
        verbose: false,
        no_export: false,
    });

    match command {
        Command::Report {
            format,
            output_dir,
            verbose,
            no_export,
        } => {
            let verbose = verbose || config.report.verbose;
            let rates = report_rates(&config);
            let full_report = build_report(&results, mode, &filters, &rates, verbose);
            print!("{}", full_report);

            if !no_export {
                let format = format.unwrap_or(config.report.format);
                let dir = output_dir.unwrap_or_else(|| config.report.directory.clone());
                let paths = report::export(&full_report, format, &dir)
                    .with_context(|| format!("failed to export report to {}", dir.display()))?;
                println!();
                for path in paths {
                    println!("Report exported to: {}", path.display());
                }
            }
        }
        Command::Top { limit } => {
            print!("{}", render::most_turns(&browse::most_turns(&results, limit)));
        }
        Command::Search {
            query,
            case_sensitive,
        } => {
            let hits = browse::find_by_title(&results, &query, case_sensitive);
            print!("{}", render::matches(&query, &hits));
            if let [only] = hits.as_slice() {
                println!();
                print!("{}", render::conversation_details(only));
            }
        }
        Command::Dates => {
            print!("{}", render::dates(&browse::conversation_dates(&results)));
        }
        Command::Day { date } => {
            let date = parse_filter_date(&date)?;
            let rows: Vec<render::DayRow<'_>> = browse::conversations_on(&results, date)
                .into_iter()
                .map(|result| render::DayRow {
                    first_model: result
                        .conversation_id
                        .as_deref()
                        .and_then(|id| browse::find_conversation(&conversations, id).ok())
                        .map(browse::first_model_used)
                        .unwrap_or_else(|| "unknown".to_string()),
                    result,
                })
                .collect();
            print!("{}", render::day(date, &rows));
        }
        Command::Show {
            conversation,
            text,
            json,
        } => {
            let (conv, result) = select_conversation(&conversations, &results, &conversation)?;
            if json {
                println!("{}", serde_json::to_string_pretty(result)?);
            } else {
                print!("{}", render::conversation_details(result));
            }
            if text {
                println!();
                print!("{}", render::transcript(&browse::transcript(conv)));
            }
        }
        Command::Model { label } => {
            print!(
                "{}",
                render::model_details(&browse::model_details(&conversations, &label))
            );
        }
        Command::Export {
            conversation,
            output_dir,
        } => {
            let (conv, _) = select_conversation(&conversations, &results, &conversation)?;
            let dir = output_dir.unwrap_or_else(|| config.report.directory.clone());
            let path = browse::export_conversation(conv, &dir)
                .with_context(|| format!("failed to export conversation to {}", dir.display()))?;
            println!("Conversation exported to: {}", path.display());
        }
    }

    tracing::info!("convcost finished");
    Ok(())
}

fn progress_bar() -> Result<ProgressBar> {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .context("invalid progress template")?
            .progress_chars("#>-"),
    );
    Ok(pb)
}

/// Load every export under `input`, reporting skipped records on stderr.
fn load_conversations(input: &Path) -> Result<Vec<Conversation>> {
    let pb = progress_bar()?;
    let loaded = ExportLoader::new()
        .load_with_progress(input, |current, total, path| {
            if current == 0 {
                pb.set_length(total as u64);
            }
            pb.set_position(current as u64);
            pb.set_message(
                path.file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or("...")
                    .to_string(),
            );
        })
        .with_context(|| format!("failed to load {}", input.display()))?;
    pb.finish_and_clear();

    for warning in &loaded.warnings {
        eprintln!("warning: {}", warning);
    }
    for (path, error) in &loaded.errors {
        eprintln!("error: {}: {}", path.display(), error);
    }
    if loaded.files_processed == 0 {
        bail!("no export files could be read from {}", input.display());
    }

    tracing::info!(
        files = loaded.files_processed,
        conversations = loaded.conversations.len(),
        warnings = loaded.warnings.len(),
        "Loaded export"
    );
    Ok(loaded.conversations)
}

fn analyze(
    engine: &AccrualEngine,
    conversations: &[Conversation],
    mode: CalculationMode,
) -> Result<Vec<AnalysisResult>> {
    let pb = progress_bar()?;
    pb.set_length(conversations.len() as u64);
    pb.set_message("analyzing");
    let results = engine.analyze_all_with_progress(conversations, mode, |done, _| {
        pb.set_position(done as u64);
    });
    pb.finish_and_clear();
    Ok(results)
}

/// Rates shown in the model breakdown: the effective table, plus built-in
/// entries the fallback chain can reach.
fn report_rates(config: &Config) -> CostTable {
    let mut table = config.pricing.cost_table();
    if config.pricing.builtin_fallback {
        for (key, rates) in CostTable::builtin().iter() {
            if table.get(key).is_none() {
                table.insert(key, *rates);
            }
        }
    }
    table
}

/// Resolve `query` to one conversation: exact id first, then a unique
/// case-insensitive title match.
fn select_conversation<'a>(
    conversations: &'a [Conversation],
    results: &'a [AnalysisResult],
    query: &str,
) -> Result<(&'a Conversation, &'a AnalysisResult)> {
    let pairs = || conversations.iter().zip(results.iter());

    if let Some(pair) = pairs().find(|(conv, _)| conv.id.as_deref() == Some(query)) {
        return Ok(pair);
    }

    let needle = query.to_lowercase();
    let hits: Vec<_> = pairs()
        .filter(|(conv, _)| !conv.title.is_empty() && conv.title.to_lowercase().contains(&needle))
        .collect();
    match hits.as_slice() {
        [] => Err(convcost_core::Error::ConversationNotFound(query.to_string()).into()),
        [only] => Ok(*only),
        many => {
            let titles: Vec<&str> = many.iter().map(|(conv, _)| conv.title.as_str()).collect();
            bail!(
                "'{}' matches {} conversations ({}); pass an id instead",
                query,
                many.len(),
                titles.join(", ")
            )
        }
    }
}
