//! Report aggregation and export
//!
//! Folds per-conversation [`AnalysisResult`]s into a [`Report`]: a global
//! summary, a per-model breakdown and a per-day breakdown. Failed analyses
//! are listed under `errors` and never counted.
//!
//! A report renders to plain text through its `Display` impl and to JSON
//! through serde. [`export`] writes either form to a timestamped file, or
//! the summary, model and day tables as CSV.

use super::engine::{AnalysisResult, Outcome};
use super::filter::Filters;
use super::pricing::CostTable;
use crate::config::ReportFormat;
use crate::error::Result;
use crate::format::{format_decimal, format_tokens};
use crate::types::CalculationMode;
use chrono::{DateTime, Local};
use comfy_table::{presets::ASCII_FULL, CellAlignment, Table};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Width of the rules framing each text report section
const RULE_WIDTH: usize = 80;

/// Days listed in the text report before truncating to the costliest ones
const MAX_DAY_ROWS: usize = 10;

/// Suffix marking a model costed without configured rates
const RATES_NOT_FOUND: &str = "(rates not found)";

// ============================================
// Report model
// ============================================

#[derive(Debug, Clone, Serialize)]
pub struct ReportMetadata {
    pub generated_at: DateTime<Local>,
    pub calculation_mode: CalculationMode,
    pub filters: Filters,
    /// Every analyzed conversation, failed ones included
    pub total_conversations: usize,
    pub verbose: bool,
    /// Titles of conversations with a message costed at 0 for lack of rates
    pub conversations_missing_rates: Vec<String>,
}

/// Global totals in detailed mode.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DetailedSummary {
    pub total_input_tokens: f64,
    pub total_output_tokens: f64,
    pub total_tokens: f64,
    pub total_cost: f64,
    pub total_turns: usize,
    pub total_assistant_messages: usize,
    pub avg_tokens_per_conversation: f64,
    pub avg_cost_per_conversation: f64,
    pub avg_turns_per_conversation: f64,
    pub avg_messages_per_conversation: f64,
}

/// Global totals in simple mode.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SimpleSummary {
    pub total_user_tokens: u64,
    pub total_assistant_tokens: f64,
    pub total_system_tokens: u64,
    pub total_input_tokens: f64,
    pub total_output_tokens: f64,
    pub total_tokens: f64,
    pub total_input_cost: f64,
    pub total_output_cost: f64,
    pub total_cost: f64,
    pub total_turns: usize,
    pub avg_tokens_per_conversation: f64,
    pub avg_cost_per_conversation: f64,
    pub avg_turns_per_conversation: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Summary {
    Detailed(DetailedSummary),
    Simple(SimpleSummary),
}

impl Summary {
    pub fn total_cost(&self) -> f64 {
        match self {
            Summary::Detailed(s) => s.total_cost,
            Summary::Simple(s) => s.total_cost,
        }
    }

    pub fn total_tokens(&self) -> f64 {
        match self {
            Summary::Detailed(s) => s.total_tokens,
            Summary::Simple(s) => s.total_tokens,
        }
    }

    /// Labelled, display-formatted values in report order.
    pub fn rows(&self) -> Vec<(&'static str, String)> {
        let count = |n: usize| format_tokens(n as f64);
        let amount = |v: f64| format_decimal(v, 2);
        match self {
            Summary::Detailed(s) => vec![
                ("Total Input Tokens", amount(s.total_input_tokens)),
                ("Total Output Tokens", amount(s.total_output_tokens)),
                ("Total Tokens", amount(s.total_tokens)),
                ("Total Cost", amount(s.total_cost)),
                ("Total Turns", count(s.total_turns)),
                ("Total Assistant Messages", count(s.total_assistant_messages)),
                ("Avg Tokens Per Conversation", amount(s.avg_tokens_per_conversation)),
                ("Avg Cost Per Conversation", amount(s.avg_cost_per_conversation)),
                ("Avg Turns Per Conversation", amount(s.avg_turns_per_conversation)),
                ("Avg Messages Per Conversation", amount(s.avg_messages_per_conversation)),
            ],
            Summary::Simple(s) => vec![
                ("Total User Tokens", format_tokens(s.total_user_tokens as f64)),
                ("Total Assistant Tokens", amount(s.total_assistant_tokens)),
                ("Total System Tokens", format_tokens(s.total_system_tokens as f64)),
                ("Total Input Tokens", amount(s.total_input_tokens)),
                ("Total Output Tokens", amount(s.total_output_tokens)),
                ("Total Tokens", amount(s.total_tokens)),
                ("Total Input Cost", amount(s.total_input_cost)),
                ("Total Output Cost", amount(s.total_output_cost)),
                ("Total Cost", amount(s.total_cost)),
                ("Total Turns", count(s.total_turns)),
                ("Avg Tokens Per Conversation", amount(s.avg_tokens_per_conversation)),
                ("Avg Cost Per Conversation", amount(s.avg_cost_per_conversation)),
                ("Avg Turns Per Conversation", amount(s.avg_turns_per_conversation)),
            ],
        }
    }
}

/// Usage attributed to one model key.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ModelBreakdown {
    /// Assistant messages (detailed) or conversations (simple)
    pub message_count: usize,
    pub total_input_tokens: f64,
    pub total_output_tokens: f64,
    pub total_tokens: f64,
    pub total_cost: f64,
    /// Configured rate for this key, 0 when the key has no table entry
    pub input_cost_rate: f64,
    pub output_cost_rate: f64,
    pub percentage_of_total_cost: f64,
    pub avg_tokens_per_message: f64,
    pub avg_cost_per_message: f64,
    /// Some message under this key had no configured rates
    pub rates_missing: bool,
}

/// Usage of conversations created on one local day.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DayStats {
    pub conversation_count: usize,
    pub total_input_tokens: f64,
    pub total_output_tokens: f64,
    pub total_tokens: f64,
    pub total_cost: f64,
    pub total_turns: usize,
    /// Detailed mode only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_assistant_messages: Option<usize>,
    pub avg_tokens_per_conversation: f64,
    pub avg_cost_per_conversation: f64,
    pub avg_turns_per_conversation: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportError {
    pub conversation_id: Option<String>,
    pub title: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub metadata: ReportMetadata,
    pub summary: Summary,
    pub model_breakdown: BTreeMap<String, ModelBreakdown>,
    pub temporal_analysis: BTreeMap<String, DayStats>,
    /// Per-conversation results, kept only for verbose reports
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_details: Option<Vec<AnalysisResult>>,
    pub errors: Vec<ReportError>,
}

// ============================================
// Aggregation
// ============================================

fn ratio(numerator: f64, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator / denominator as f64
    }
}

/// Running totals over valid results. Every field is a plain sum, so the
/// fold does not depend on result order.
#[derive(Debug, Default)]
struct Totals {
    conversations: usize,
    input_tokens: f64,
    output_tokens: f64,
    cost: f64,
    turns: usize,
    assistant_messages: usize,
    user_tokens: u64,
    assistant_tokens: f64,
    system_tokens: u64,
    input_cost: f64,
    output_cost: f64,
    models: BTreeMap<String, ModelBreakdown>,
    days: BTreeMap<String, DayStats>,
}

impl Totals {
    fn add(mut self, result: &AnalysisResult) -> Self {
        self.conversations += 1;
        self.input_tokens += result.input_tokens();
        self.output_tokens += result.output_tokens();
        self.cost += result.total_cost();
        self.turns += result.real_turns_count();

        match &result.outcome {
            Outcome::Detailed(d) => {
                self.assistant_messages += d.assistant_messages_count;
                for turn in &d.turns_details {
                    let entry = self.models.entry(turn.model_slug.clone()).or_default();
                    entry.message_count += 1;
                    entry.total_input_tokens += turn.input_tokens as f64;
                    entry.total_output_tokens += turn.output_tokens;
                    entry.total_cost += turn.turn_total_cost;
                    entry.rates_missing |= turn.rates_missing;
                }
            }
            Outcome::Simple(s) => {
                self.user_tokens += s.simple_total_user_tokens;
                self.assistant_tokens += s.simple_total_assistant_tokens;
                self.system_tokens += s.simple_total_system_tokens;
                self.input_cost += s.simple_input_cost;
                self.output_cost += s.simple_output_cost;

                let entry = self.models.entry(s.simple_cost_model_key.clone()).or_default();
                entry.message_count += 1;
                entry.total_input_tokens += s.simple_total_input_tokens as f64;
                entry.total_output_tokens += s.simple_total_output_tokens;
                entry.total_cost += s.simple_total_cost;
                entry.rates_missing |= s.rates_missing;
            }
            Outcome::Failed { .. } => {}
        }

        if let Some(day) = result.created_on() {
            let entry = self.days.entry(day.format("%Y-%m-%d").to_string()).or_default();
            entry.conversation_count += 1;
            entry.total_input_tokens += result.input_tokens();
            entry.total_output_tokens += result.output_tokens();
            entry.total_cost += result.total_cost();
            entry.total_turns += result.real_turns_count();
            if let Some(d) = result.detailed() {
                *entry.total_assistant_messages.get_or_insert(0) += d.assistant_messages_count;
            }
        }

        self
    }

    fn summary(&self, mode: CalculationMode) -> Summary {
        let n = self.conversations;
        let total_tokens = self.input_tokens + self.output_tokens;
        match mode {
            CalculationMode::Detailed => Summary::Detailed(DetailedSummary {
                total_input_tokens: self.input_tokens,
                total_output_tokens: self.output_tokens,
                total_tokens,
                total_cost: self.cost,
                total_turns: self.turns,
                total_assistant_messages: self.assistant_messages,
                avg_tokens_per_conversation: ratio(total_tokens, n),
                avg_cost_per_conversation: ratio(self.cost, n),
                avg_turns_per_conversation: ratio(self.turns as f64, n),
                avg_messages_per_conversation: ratio(self.assistant_messages as f64, n),
            }),
            CalculationMode::Simple => Summary::Simple(SimpleSummary {
                total_user_tokens: self.user_tokens,
                total_assistant_tokens: self.assistant_tokens,
                total_system_tokens: self.system_tokens,
                total_input_tokens: self.input_tokens,
                total_output_tokens: self.output_tokens,
                total_tokens,
                total_input_cost: self.input_cost,
                total_output_cost: self.output_cost,
                total_cost: self.cost,
                total_turns: self.turns,
                avg_tokens_per_conversation: ratio(total_tokens, n),
                avg_cost_per_conversation: ratio(self.cost, n),
                avg_turns_per_conversation: ratio(self.turns as f64, n),
            }),
        }
    }
}

/// Aggregate analysis results into a report.
///
/// `rates` supplies the per-model rates shown in the model breakdown.
pub fn build_report(
    results: &[AnalysisResult],
    mode: CalculationMode,
    filters: &Filters,
    rates: &CostTable,
    verbose: bool,
) -> Report {
    let errors: Vec<ReportError> = results
        .iter()
        .filter_map(|r| {
            r.error().map(|error| ReportError {
                conversation_id: r.conversation_id.clone(),
                title: r.title.clone(),
                error: error.to_string(),
            })
        })
        .collect();

    let totals = results
        .iter()
        .filter(|r| !r.is_error())
        .fold(Totals::default(), Totals::add);
    let summary = totals.summary(mode);

    let conversations_missing_rates: Vec<String> = results
        .iter()
        .filter(|r| r.rates_missing())
        .map(|r| r.title.clone())
        .collect();

    let mut model_breakdown = totals.models;
    let all_models_cost: f64 = model_breakdown.values().map(|m| m.total_cost).sum();
    for (key, stats) in model_breakdown.iter_mut() {
        if let Some(r) = rates.get(key) {
            stats.input_cost_rate = r.input_cost_per_million_tokens;
            stats.output_cost_rate = r.output_cost_per_million_tokens;
        }
        stats.total_tokens = stats.total_input_tokens + stats.total_output_tokens;
        stats.percentage_of_total_cost = if all_models_cost > 0.0 {
            stats.total_cost / all_models_cost * 100.0
        } else {
            0.0
        };
        stats.avg_tokens_per_message = ratio(stats.total_tokens, stats.message_count);
        stats.avg_cost_per_message = ratio(stats.total_cost, stats.message_count);
    }

    let mut temporal_analysis = totals.days;
    for stats in temporal_analysis.values_mut() {
        let n = stats.conversation_count;
        stats.total_tokens = stats.total_input_tokens + stats.total_output_tokens;
        stats.avg_tokens_per_conversation = ratio(stats.total_tokens, n);
        stats.avg_cost_per_conversation = ratio(stats.total_cost, n);
        stats.avg_turns_per_conversation = ratio(stats.total_turns as f64, n);
    }

    tracing::info!(
        conversations = results.len(),
        failed = errors.len(),
        missing_rates = conversations_missing_rates.len(),
        models = model_breakdown.len(),
        days = temporal_analysis.len(),
        "Built report"
    );

    Report {
        metadata: ReportMetadata {
            generated_at: Local::now(),
            calculation_mode: mode,
            filters: filters.clone(),
            total_conversations: results.len(),
            verbose,
            conversations_missing_rates,
        },
        summary,
        model_breakdown,
        temporal_analysis,
        conversation_details: verbose.then(|| results.to_vec()),
        errors,
    }
}

// ============================================
// Text rendering
// ============================================

fn dollars(value: f64) -> String {
    format!("${}", format_decimal(value, 2))
}

/// Grid table with the first column left-aligned and the rest right-aligned.
fn grid(headers: Vec<&'static str>, rows: Vec<Vec<String>>) -> Table {
    let mut table = Table::new();
    table.load_preset(ASCII_FULL).set_header(headers);
    for row in rows {
        table.add_row(row);
    }
    for column in table.column_iter_mut().skip(1) {
        column.set_cell_alignment(CellAlignment::Right);
    }
    table
}

impl Report {
    /// Model keys, costliest first
    fn models_by_cost(&self) -> Vec<(&String, &ModelBreakdown)> {
        let mut entries: Vec<(&String, &ModelBreakdown)> = self.model_breakdown.iter().collect();
        entries.sort_by(|a, b| b.1.total_cost.total_cmp(&a.1.total_cost));
        entries
    }

    fn model_table(&self) -> Table {
        let verbose = self.metadata.verbose;
        let rows = self
            .models_by_cost()
            .into_iter()
            .map(|(model, s)| {
                let name = if s.rates_missing && !model.ends_with(RATES_NOT_FOUND) {
                    format!("{} {}", model, RATES_NOT_FOUND)
                } else {
                    model.clone()
                };
                if verbose {
                    vec![
                        name,
                        s.message_count.to_string(),
                        format_tokens(s.total_input_tokens),
                        format_tokens(s.total_output_tokens),
                        format_tokens(s.total_tokens),
                        dollars(s.input_cost_rate),
                        dollars(s.output_cost_rate),
                        dollars(s.total_cost),
                        format!("{:.2}%", s.percentage_of_total_cost),
                        format_decimal(s.avg_tokens_per_message, 2),
                        dollars(s.avg_cost_per_message),
                    ]
                } else {
                    vec![
                        name,
                        s.message_count.to_string(),
                        format_tokens(s.total_tokens),
                        dollars(s.total_cost),
                        format!("{:.2}%", s.percentage_of_total_cost),
                        dollars(s.avg_cost_per_message),
                    ]
                }
            })
            .collect();

        let headers = if verbose {
            vec![
                "Model",
                "Messages",
                "Input Tokens",
                "Output Tokens",
                "Total Tokens",
                "Input$/M",
                "Output$/M",
                "Total Cost",
                "% of Cost",
                "Avg Tokens/Msg",
                "Avg Cost/Msg",
            ]
        } else {
            vec!["Model", "Messages", "Total Tokens", "Total Cost", "% of Cost", "Avg Cost/Msg"]
        };
        grid(headers, rows)
    }

    /// Days in date order, or the costliest days when there are too many.
    fn day_table(&self) -> Table {
        let verbose = self.metadata.verbose;
        let mut days: Vec<(&String, &DayStats)> = self.temporal_analysis.iter().collect();
        if days.len() > MAX_DAY_ROWS {
            days.sort_by(|a, b| b.1.total_cost.total_cmp(&a.1.total_cost));
            days.truncate(MAX_DAY_ROWS);
        }

        let rows = days
            .into_iter()
            .map(|(day, s)| {
                if verbose {
                    vec![
                        day.clone(),
                        s.conversation_count.to_string(),
                        s.total_turns.to_string(),
                        s.total_assistant_messages.unwrap_or(0).to_string(),
                        format_tokens(s.total_input_tokens),
                        format_tokens(s.total_output_tokens),
                        format_tokens(s.total_tokens),
                        dollars(s.total_cost),
                        format_decimal(s.avg_tokens_per_conversation, 2),
                        format_decimal(s.avg_turns_per_conversation, 2),
                        dollars(s.avg_cost_per_conversation),
                    ]
                } else {
                    vec![
                        day.clone(),
                        s.conversation_count.to_string(),
                        s.total_turns.to_string(),
                        format_tokens(s.total_tokens),
                        dollars(s.total_cost),
                        format_decimal(s.avg_turns_per_conversation, 2),
                        dollars(s.avg_cost_per_conversation),
                    ]
                }
            })
            .collect();

        let headers = if verbose {
            vec![
                "Date",
                "Convs",
                "Turns",
                "Msgs",
                "Input Tokens",
                "Output Tokens",
                "Total Tokens",
                "Total Cost",
                "Avg Tokens/Conv",
                "Avg Turns/Conv",
                "Avg Cost/Conv",
            ]
        } else {
            vec![
                "Date",
                "Convs",
                "Turns",
                "Total Tokens",
                "Total Cost",
                "Avg Turns/Conv",
                "Avg Cost/Conv",
            ]
        };
        grid(headers, rows)
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let heavy = "=".repeat(RULE_WIDTH);
        let light = "-".repeat(RULE_WIDTH);
        let meta = &self.metadata;

        writeln!(f, "{}", heavy)?;
        writeln!(
            f,
            "TOKEN USAGE ANALYSIS REPORT - {}",
            meta.generated_at.format("%Y-%m-%d %H:%M:%S")
        )?;
        writeln!(f, "{}", heavy)?;
        writeln!(f)?;

        writeln!(f, "ANALYSIS PARAMETERS:")?;
        writeln!(f, "Calculation Mode: {}", meta.calculation_mode)?;
        writeln!(f, "Total Conversations Analyzed: {}", meta.total_conversations)?;
        writeln!(
            f,
            "Verbose Mode: {}",
            if meta.verbose { "Enabled" } else { "Disabled" }
        )?;
        if !meta.filters.is_empty() {
            writeln!(f, "Filters Applied:")?;
            if let Some(start) = meta.filters.start_date {
                writeln!(f, "  start_date: {}", start)?;
            }
            if let Some(end) = meta.filters.end_date {
                writeln!(f, "  end_date: {}", end)?;
            }
            if let Some(model) = &meta.filters.model {
                writeln!(f, "  model: {}", model)?;
            }
        }
        writeln!(f)?;

        writeln!(f, "SUMMARY STATISTICS:")?;
        writeln!(f, "{}", light)?;
        for (label, value) in self.summary.rows() {
            writeln!(f, "{}: {}", label, value)?;
        }
        writeln!(
            f,
            "Conversations Missing Rates: {}",
            meta.conversations_missing_rates.len()
        )?;
        writeln!(f)?;

        writeln!(f, "MODEL BREAKDOWN:")?;
        writeln!(f, "{}", light)?;
        writeln!(f, "Note: Model identifiers explanation:")?;
        writeln!(
            f,
            "  - Standard model names (o3, gpt-4-5, etc.) are direct model identifiers"
        )?;
        writeln!(
            f,
            "  - 'N/A' indicates messages where no model was specified in metadata"
        )?;
        writeln!(f, "  - 'Tool: X' indicates messages sent to tool endpoints")?;
        writeln!(
            f,
            "  - Models with '(default)' suffix were not directly specified but inferred from defaults"
        )?;
        writeln!(
            f,
            "  - Models with '{}' were costed at $0.00 for lack of configured rates",
            RATES_NOT_FOUND
        )?;
        writeln!(f)?;
        writeln!(f, "{}", self.model_table())?;
        writeln!(f)?;

        if !meta.conversations_missing_rates.is_empty() {
            writeln!(f, "MISSING RATES:")?;
            writeln!(f, "{}", light)?;
            writeln!(
                f,
                "{} conversation(s) include messages with no configured rates; their costs are understated:",
                meta.conversations_missing_rates.len()
            )?;
            for title in &meta.conversations_missing_rates {
                writeln!(f, "  - '{}'", title)?;
            }
            writeln!(f)?;
        }

        if !self.temporal_analysis.is_empty() {
            writeln!(f, "DAILY BREAKDOWN:")?;
            writeln!(f, "{}", light)?;
            if self.temporal_analysis.len() > MAX_DAY_ROWS {
                writeln!(
                    f,
                    "(Showing top {} of {} days)",
                    MAX_DAY_ROWS,
                    self.temporal_analysis.len()
                )?;
            }
            writeln!(f, "{}", self.day_table())?;
            writeln!(f)?;
        }

        if !self.errors.is_empty() {
            writeln!(f, "ERRORS:")?;
            writeln!(f, "{}", light)?;
            for error in &self.errors {
                writeln!(f, "Conversation: '{}' - Error: {}", error.title, error.error)?;
            }
            writeln!(f)?;
        }

        writeln!(f, "{}", heavy)?;
        writeln!(f, "End of Report")?;
        writeln!(f, "{}", heavy)
    }
}

// ============================================
// Export
// ============================================

/// File name for a report generated at `at`.
pub fn report_file_name(at: &DateTime<Local>, format: ReportFormat) -> String {
    format!(
        "token_report_{}.{}",
        at.format("%Y%m%d_%H%M%S"),
        format.extension()
    )
}

/// File name for one CSV table (`summary`, `models` or `daily`).
pub fn csv_file_name(at: &DateTime<Local>, table: &str) -> String {
    format!("token_report_{}_{}.csv", at.format("%Y%m%d_%H%M%S"), table)
}

/// Write the report into `dir` (created if missing). Returns the written
/// paths: one file for text and JSON, three tables for CSV.
pub fn export(report: &Report, format: ReportFormat, dir: &Path) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)?;

    let paths = match format {
        ReportFormat::Json => {
            vec![write_single(report, format, dir, serde_json::to_string_pretty(report)?)?]
        }
        ReportFormat::Text => vec![write_single(report, format, dir, report.to_string())?],
        ReportFormat::Csv => export_csv(report, dir)?,
    };

    tracing::info!(files = paths.len(), dir = %dir.display(), format = ?format, "Exported report");
    Ok(paths)
}

fn write_single(report: &Report, format: ReportFormat, dir: &Path, body: String) -> Result<PathBuf> {
    let path = dir.join(report_file_name(&report.metadata.generated_at, format));
    std::fs::write(&path, body)?;
    Ok(path)
}

fn write_csv(path: &Path, headers: &[&str], rows: Vec<Vec<String>>) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(headers)?;
    for row in rows {
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(())
}

fn csv_amount(value: f64) -> String {
    format!("{:.2}", value)
}

fn export_csv(report: &Report, dir: &Path) -> Result<Vec<PathBuf>> {
    let at = &report.metadata.generated_at;
    let verbose = report.metadata.verbose;

    // Summary: one row per serialized field, in field order
    let mut summary_rows = Vec::new();
    if let serde_json::Value::Object(fields) = serde_json::to_value(&report.summary)? {
        for (key, value) in fields {
            let value = match value.as_u64() {
                Some(n) => n.to_string(),
                None => value.as_f64().map(csv_amount).unwrap_or_default(),
            };
            summary_rows.push(vec![key, value]);
        }
    }
    summary_rows.push(vec![
        "conversations_missing_rates".to_string(),
        report.metadata.conversations_missing_rates.len().to_string(),
    ]);
    let summary_path = dir.join(csv_file_name(at, "summary"));
    write_csv(&summary_path, &["Metric", "Value"], summary_rows)?;

    let model_rows = report
        .models_by_cost()
        .into_iter()
        .map(|(model, s)| {
            if verbose {
                vec![
                    model.clone(),
                    s.message_count.to_string(),
                    s.total_input_tokens.to_string(),
                    s.total_output_tokens.to_string(),
                    s.total_tokens.to_string(),
                    format!("${:.2}", s.input_cost_rate),
                    format!("${:.2}", s.output_cost_rate),
                    csv_amount(s.total_cost),
                    format!("{:.2}%", s.percentage_of_total_cost),
                    csv_amount(s.avg_tokens_per_message),
                    csv_amount(s.avg_cost_per_message),
                ]
            } else {
                vec![
                    model.clone(),
                    s.message_count.to_string(),
                    s.total_tokens.to_string(),
                    csv_amount(s.total_cost),
                    format!("{:.2}%", s.percentage_of_total_cost),
                    csv_amount(s.avg_cost_per_message),
                ]
            }
        })
        .collect();
    let model_headers: &[&str] = if verbose {
        &[
            "Model",
            "Messages",
            "Input Tokens",
            "Output Tokens",
            "Total Tokens",
            "Input Cost Rate",
            "Output Cost Rate",
            "Total Cost ($)",
            "% of Total Cost",
            "Avg Tokens/Msg",
            "Avg Cost/Msg",
        ]
    } else {
        &[
            "Model",
            "Messages",
            "Total Tokens",
            "Total Cost ($)",
            "% of Total Cost",
            "Avg Cost/Msg",
        ]
    };
    let models_path = dir.join(csv_file_name(at, "models"));
    write_csv(&models_path, model_headers, model_rows)?;

    // Every day, in date order
    let day_rows = report
        .temporal_analysis
        .iter()
        .map(|(day, s)| {
            if verbose {
                vec![
                    day.clone(),
                    s.conversation_count.to_string(),
                    s.total_turns.to_string(),
                    s.total_assistant_messages.unwrap_or(0).to_string(),
                    s.total_input_tokens.to_string(),
                    s.total_output_tokens.to_string(),
                    s.total_tokens.to_string(),
                    csv_amount(s.total_cost),
                    csv_amount(s.avg_tokens_per_conversation),
                    csv_amount(s.avg_turns_per_conversation),
                    csv_amount(s.avg_cost_per_conversation),
                ]
            } else {
                vec![
                    day.clone(),
                    s.conversation_count.to_string(),
                    s.total_turns.to_string(),
                    s.total_tokens.to_string(),
                    csv_amount(s.total_cost),
                    csv_amount(s.avg_turns_per_conversation),
                    csv_amount(s.avg_cost_per_conversation),
                ]
            }
        })
        .collect();
    let day_headers: &[&str] = if verbose {
        &[
            "Date",
            "Conversations",
            "Turns",
            "Assistant Messages",
            "Input Tokens",
            "Output Tokens",
            "Total Tokens",
            "Total Cost ($)",
            "Avg Tokens/Conv",
            "Avg Turns/Conv",
            "Avg Cost/Conv",
        ]
    } else {
        &[
            "Date",
            "Conversations",
            "Turns",
            "Total Tokens",
            "Total Cost ($)",
            "Avg Turns/Conv",
            "Avg Cost/Conv",
        ]
    };
    let daily_path = dir.join(csv_file_name(at, "daily"));
    write_csv(&daily_path, day_headers, day_rows)?;

    Ok(vec![summary_path, models_path, daily_path])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::engine::{AnalysisFailure, DetailedAnalysis, SimpleAnalysis, TurnRecord};
    use chrono::{NaiveDate, TimeZone};
    use tempfile::TempDir;

    fn noon(date: &str) -> f64 {
        let naive = NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        Local.from_local_datetime(&naive).earliest().unwrap().timestamp() as f64
    }

    fn turn(label: &str, input: u64, output: f64, cost: f64) -> TurnRecord {
        TurnRecord {
            assistant_message_id: "a".to_string(),
            turn_index: 0,
            input_tokens: input,
            output_tokens: output,
            input_cost: cost / 2.0,
            output_cost: cost / 2.0,
            turn_total_cost: cost,
            model_slug: label.to_string(),
            cost_model_key: label.to_string(),
            input_discounted: false,
            is_turn_end: true,
            rates_missing: false,
        }
    }

    fn detailed(title: &str, day: Option<&str>, turns: Vec<TurnRecord>) -> AnalysisResult {
        let input: u64 = turns.iter().map(|t| t.input_tokens).sum();
        let output: f64 = turns.iter().map(|t| t.output_tokens).sum();
        let cost: f64 = turns.iter().map(|t| t.turn_total_cost).sum();
        AnalysisResult {
            conversation_id: Some(title.to_lowercase()),
            title: title.to_string(),
            create_time: day.map(noon),
            update_time: None,
            mode: CalculationMode::Detailed,
            outcome: Outcome::Detailed(DetailedAnalysis {
                real_turns_count: turns.len(),
                message_count: turns.len() * 2,
                assistant_messages_count: turns.len(),
                total_input_tokens_across_turns: input,
                total_output_tokens_for_all_assistant_msgs: output,
                total_cost: cost,
                turns_details: turns,
                rates_missing: false,
            }),
        }
    }

    fn failed(title: &str) -> AnalysisResult {
        AnalysisResult {
            conversation_id: None,
            title: title.to_string(),
            create_time: Some(noon("2024-01-01")),
            update_time: None,
            mode: CalculationMode::Detailed,
            outcome: Outcome::Failed {
                error: AnalysisFailure::NoMapping,
            },
        }
    }

    fn sample() -> Vec<AnalysisResult> {
        vec![
            detailed(
                "First",
                Some("2024-03-01"),
                vec![turn("o3", 100, 50.0, 1.0), turn("gpt-4o", 200, 25.0, 0.5)],
            ),
            failed("Broken"),
            detailed("Second", Some("2024-03-01"), vec![turn("o3", 10, 5.0, 0.5)]),
            detailed("Undated", None, vec![turn("N/A", 1, 1.0, 0.0)]),
        ]
    }

    fn build(results: &[AnalysisResult], verbose: bool) -> Report {
        build_report(
            results,
            CalculationMode::Detailed,
            &Filters::default(),
            &CostTable::builtin(),
            verbose,
        )
    }

    #[test]
    fn test_errors_listed_and_excluded() {
        let report = build(&sample(), false);
        assert_eq!(report.metadata.total_conversations, 4);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].title, "Broken");
        assert_eq!(report.errors[0].error, "No message mapping found");

        let Summary::Detailed(s) = &report.summary else {
            panic!("expected detailed summary");
        };
        assert_eq!(s.total_input_tokens, 311.0);
        assert_eq!(s.total_output_tokens, 81.0);
        assert_eq!(s.total_tokens, 392.0);
        assert!((s.total_cost - 2.0).abs() < 1e-9);
        assert_eq!(s.total_turns, 4);
        assert_eq!(s.total_assistant_messages, 4);
        assert!((s.avg_cost_per_conversation - 2.0 / 3.0).abs() < 1e-9);
        assert!((s.avg_turns_per_conversation - 4.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_model_breakdown() {
        let report = build(&sample(), false);
        let o3 = &report.model_breakdown["o3"];
        assert_eq!(o3.message_count, 2);
        assert_eq!(o3.total_input_tokens, 110.0);
        assert_eq!(o3.total_tokens, 165.0);
        assert!((o3.total_cost - 1.5).abs() < 1e-9);
        assert_eq!(o3.input_cost_rate, 10.0);
        assert_eq!(o3.output_cost_rate, 40.0);
        assert!((o3.percentage_of_total_cost - 75.0).abs() < 1e-9);
        assert!((o3.avg_cost_per_message - 0.75).abs() < 1e-9);

        let na = &report.model_breakdown["N/A"];
        assert_eq!(na.input_cost_rate, 0.0);
        assert_eq!(na.percentage_of_total_cost, 0.0);

        let pct: f64 = report
            .model_breakdown
            .values()
            .map(|m| m.percentage_of_total_cost)
            .sum();
        assert!((pct - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_temporal_analysis_skips_undated() {
        let report = build(&sample(), false);
        assert_eq!(report.temporal_analysis.len(), 1);
        let day = &report.temporal_analysis["2024-03-01"];
        assert_eq!(day.conversation_count, 2);
        assert_eq!(day.total_turns, 3);
        assert_eq!(day.total_assistant_messages, Some(3));
        assert!((day.total_cost - 2.0).abs() < 1e-9);
        assert!((day.avg_turns_per_conversation - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_aggregation_is_order_independent() {
        let mut reversed = sample();
        reversed.reverse();
        let a = build(&sample(), false);
        let b = build(&reversed, false);
        assert_eq!(a.summary, b.summary);
        assert_eq!(a.model_breakdown, b.model_breakdown);
        assert_eq!(a.temporal_analysis, b.temporal_analysis);
    }

    #[test]
    fn test_simple_mode_report() {
        let result = AnalysisResult {
            conversation_id: None,
            title: "Simple".to_string(),
            create_time: Some(noon("2024-05-02")),
            update_time: None,
            mode: CalculationMode::Simple,
            outcome: Outcome::Simple(SimpleAnalysis {
                real_turns_count: 2,
                message_count: 5,
                simple_total_user_tokens: 30,
                simple_total_assistant_tokens: 12.5,
                simple_total_system_tokens: 10,
                simple_total_input_tokens: 40,
                simple_total_output_tokens: 12.5,
                simple_input_cost: 0.4,
                simple_output_cost: 0.5,
                simple_total_cost: 0.9,
                simple_cost_model_key: "o3".to_string(),
                rates_missing: false,
            }),
        };
        let report = build_report(
            &[result.clone(), result],
            CalculationMode::Simple,
            &Filters::default(),
            &CostTable::builtin(),
            false,
        );

        let Summary::Simple(s) = &report.summary else {
            panic!("expected simple summary");
        };
        assert_eq!(s.total_user_tokens, 60);
        assert_eq!(s.total_system_tokens, 20);
        assert_eq!(s.total_input_tokens, 80.0);
        assert!((s.total_cost - 1.8).abs() < 1e-9);
        assert_eq!(s.total_turns, 4);

        let o3 = &report.model_breakdown["o3"];
        assert_eq!(o3.message_count, 2);
        assert_eq!(report.temporal_analysis["2024-05-02"].total_assistant_messages, None);
    }

    #[test]
    fn test_empty_results() {
        let report = build(&[], false);
        assert_eq!(report.summary.total_cost(), 0.0);
        assert_eq!(report.summary.total_tokens(), 0.0);
        assert!(report.model_breakdown.is_empty());
        assert!(report.to_string().contains("End of Report"));
    }

    #[test]
    fn test_text_layout() {
        let filters = Filters::parse(Some("2024-03-01"), None, Some("o3")).unwrap();
        let report = build_report(
            &sample(),
            CalculationMode::Detailed,
            &filters,
            &CostTable::builtin(),
            false,
        );
        let text = report.to_string();

        assert!(text.starts_with(&"=".repeat(80)));
        assert!(text.contains("TOKEN USAGE ANALYSIS REPORT - "));
        assert!(text.contains("Calculation Mode: detailed"));
        assert!(text.contains("Verbose Mode: Disabled"));
        assert!(text.contains("  start_date: 2024-03-01"));
        assert!(text.contains("  model: o3"));
        assert!(text.contains("Total Cost: 2.00"));
        assert!(text.contains("Total Turns: 4"));
        assert!(text.contains("| Model "));
        assert!(text.contains("'Tool: X' indicates"));
        assert!(text.contains("DAILY BREAKDOWN:"));
        assert!(text.contains("Conversation: 'Broken' - Error: No message mapping found"));

        // Costliest model first
        let o3 = text.find("| o3").unwrap();
        let gpt = text.find("| gpt-4o").unwrap();
        assert!(o3 < gpt);
    }

    #[test]
    fn test_day_table_truncates_to_costliest() {
        let results: Vec<AnalysisResult> = (1..=12)
            .map(|d| {
                let date = format!("2024-01-{:02}", d);
                detailed(&date, Some(&date), vec![turn("o3", 1, 1.0, d as f64)])
            })
            .collect();
        let report = build(&results, true);
        let text = report.to_string();
        assert!(text.contains("(Showing top 10 of 12 days)"));
        assert!(text.contains("| 2024-01-12"));
        assert!(!text.contains("| 2024-01-01"));
        assert!(text.contains("Input$/M"));
    }

    #[test]
    fn test_verbose_keeps_conversation_details() {
        let quiet = serde_json::to_value(build(&sample(), false)).unwrap();
        assert!(quiet.get("conversation_details").is_none());

        let loud = serde_json::to_value(build(&sample(), true)).unwrap();
        assert_eq!(loud["conversation_details"].as_array().unwrap().len(), 4);
        assert_eq!(loud["metadata"]["calculation_mode"], "detailed");
        assert_eq!(loud["summary"]["total_turns"], 4);
    }

    #[test]
    fn test_export_writes_both_formats() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("nested").join("reports");
        let report = build(&sample(), false);

        let json_paths = export(&report, ReportFormat::Json, &out).unwrap();
        assert_eq!(json_paths.len(), 1);
        let name = json_paths[0].file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("token_report_"));
        assert!(name.ends_with(".json"));
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&json_paths[0]).unwrap()).unwrap();
        assert_eq!(value["errors"][0]["title"], "Broken");

        let text_paths = export(&report, ReportFormat::Text, &out).unwrap();
        assert!(text_paths[0].extension().is_some_and(|e| e == "txt"));
        let text = std::fs::read_to_string(&text_paths[0]).unwrap();
        assert!(text.contains("SUMMARY STATISTICS:"));
    }

    #[test]
    fn test_export_csv_tables() {
        let dir = TempDir::new().unwrap();
        let report = build(&sample(), false);

        let paths = export(&report, ReportFormat::Csv, dir.path()).unwrap();
        let names: Vec<String> = paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names.len(), 3);
        assert!(names[0].starts_with("token_report_") && names[0].ends_with("_summary.csv"));
        assert!(names[1].ends_with("_models.csv"));
        assert!(names[2].ends_with("_daily.csv"));

        let summary = std::fs::read_to_string(&paths[0]).unwrap();
        let mut lines = summary.lines();
        assert_eq!(lines.next(), Some("Metric,Value"));
        assert_eq!(lines.next(), Some("total_input_tokens,311.00"));
        assert!(summary.lines().any(|l| l == "total_turns,4"));
        assert!(summary.contains("conversations_missing_rates,0"));

        let models = std::fs::read_to_string(&paths[1]).unwrap();
        let rows: Vec<&str> = models.lines().collect();
        assert_eq!(
            rows[0],
            "Model,Messages,Total Tokens,Total Cost ($),% of Total Cost,Avg Cost/Msg"
        );
        assert_eq!(rows[1], "o3,2,165,1.50,75.00%,0.75");
        assert_eq!(rows.len(), 4);

        let daily = std::fs::read_to_string(&paths[2]).unwrap();
        let rows: Vec<&str> = daily.lines().collect();
        assert_eq!(rows[1], "2024-03-01,2,3,390,2.00,1.50,1.00");
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_verbose_csv_has_rate_columns() {
        let dir = TempDir::new().unwrap();
        let report = build(&sample(), true);
        let paths = export(&report, ReportFormat::Csv, dir.path()).unwrap();

        let models = std::fs::read_to_string(&paths[1]).unwrap();
        assert!(models.starts_with(
            "Model,Messages,Input Tokens,Output Tokens,Total Tokens,Input Cost Rate,"
        ));
        assert!(models.contains("o3,2,110,55,165,$10.00,$40.00,1.50,75.00%,82.50,0.75"));

        let daily = std::fs::read_to_string(&paths[2]).unwrap();
        assert!(daily.contains("Assistant Messages"));
        assert!(daily.contains("2024-03-01,2,3,3,"));
    }

    #[test]
    fn test_missing_rates_surfaced() {
        let mut gap = turn("house-model", 10, 5.0, 0.0);
        gap.cost_model_key = "house-model (rates not found)".to_string();
        gap.rates_missing = true;
        let mut uncosted = detailed("Uncosted", Some("2024-03-02"), vec![gap]);
        if let Outcome::Detailed(d) = &mut uncosted.outcome {
            d.rates_missing = true;
        }
        let mut results = sample();
        results.push(uncosted);

        let report = build(&results, false);
        assert_eq!(report.metadata.conversations_missing_rates, vec!["Uncosted"]);
        assert!(report.model_breakdown["house-model"].rates_missing);
        assert!(!report.model_breakdown["o3"].rates_missing);

        let text = report.to_string();
        assert!(text.contains("Conversations Missing Rates: 1"));
        assert!(text.contains("MISSING RATES:"));
        assert!(text.contains("  - 'Uncosted'"));
        assert!(text.contains("| house-model (rates not found)"));

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["metadata"]["conversations_missing_rates"][0], "Uncosted");
        assert_eq!(json["model_breakdown"]["house-model"]["rates_missing"], true);
    }

    #[test]
    fn test_no_missing_rates_section_when_fully_costed() {
        let text = build(&sample(), false).to_string();
        assert!(text.contains("Conversations Missing Rates: 0"));
        assert!(!text.contains("MISSING RATES:"));
    }

    #[test]
    fn test_report_file_name() {
        let at = Local.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).unwrap();
        assert_eq!(
            report_file_name(&at, ReportFormat::Json),
            "token_report_20240305_140709.json"
        );
        assert_eq!(
            csv_file_name(&at, "daily"),
            "token_report_20240305_140709_daily.csv"
        );
    }
}
