//! Plain-text rendering for the browse commands.

use std::fmt::Write;

use chrono::NaiveDate;
use comfy_table::{
    modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Cell, CellAlignment, Table,
};
use convcost_core::analytics::browse::{ModelDetails, Transcript};
use convcost_core::analytics::AnalysisResult;
use convcost_core::format::{format_cost, format_timestamp_opt, format_tokens, truncate};
use convcost_core::types::local_datetime;

const RULE_WIDTH: usize = 80;

fn heavy_rule() -> String {
    "=".repeat(RULE_WIDTH)
}

fn created_day(result: &AnalysisResult) -> String {
    result
        .create_time
        .and_then(local_datetime)
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}

fn created_time(result: &AnalysisResult) -> String {
    result
        .create_time
        .and_then(local_datetime)
        .map(|dt| dt.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "N/A".to_string())
}

/// Numbered list for `top`.
pub fn most_turns(results: &[&AnalysisResult]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "=== Conversations with Most Turns ===");
    if results.is_empty() {
        let _ = writeln!(out, "No analyzed conversations.");
        return out;
    }
    for (i, result) in results.iter().enumerate() {
        let _ = writeln!(out, "{}. {} ({})", i + 1, result.title, created_day(result));
        let _ = writeln!(out, "   Actual Turns: {}", result.real_turns_count());
        let _ = writeln!(
            out,
            "   Assistant Messages: {}",
            result.assistant_messages_count()
        );
        let _ = writeln!(out, "   Total Tokens: {}", format_tokens(result.total_tokens()));
        let _ = writeln!(out, "   Cost: {}", format_cost(result.total_cost()));
        let _ = writeln!(out);
    }
    out
}

/// Short list of search hits.
pub fn matches(query: &str, results: &[&AnalysisResult]) -> String {
    let mut out = String::new();
    if results.is_empty() {
        let _ = writeln!(out, "No conversations found with title containing '{}'", query);
        return out;
    }
    let _ = writeln!(
        out,
        "Found {} conversations matching '{}':",
        results.len(),
        query
    );
    for (i, result) in results.iter().enumerate() {
        let _ = writeln!(out, "{}. {} ({})", i + 1, result.title, created_day(result));
        if let Some(id) = &result.conversation_id {
            let _ = writeln!(out, "   Id: {}", id);
        }
        let _ = writeln!(out, "   Actual Turns: {}", result.real_turns_count());
    }
    out
}

/// Per-conversation figures, including each assistant message in detailed mode.
pub fn conversation_details(result: &AnalysisResult) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "=== Conversation Details: {} ===", result.title);
    if let Some(id) = &result.conversation_id {
        let _ = writeln!(out, "Id: {}", id);
    }
    if result.create_time.is_some() {
        let _ = writeln!(out, "Created: {}", format_timestamp_opt(result.create_time));
    }
    if result.update_time.is_some() {
        let _ = writeln!(out, "Updated: {}", format_timestamp_opt(result.update_time));
    }

    if let Some(error) = result.error() {
        let _ = writeln!(out, "Error: {}", error);
        return out;
    }

    let _ = writeln!(out, "Actual Turn Count: {}", result.real_turns_count());

    if let Some(detailed) = result.detailed() {
        let _ = writeln!(out, "Assistant Messages: {}", detailed.assistant_messages_count);
        let _ = writeln!(out, "Total Messages: {}", detailed.message_count);
        let _ = writeln!(out, "Input Tokens: {}", format_tokens(result.input_tokens()));
        let _ = writeln!(out, "Output Tokens: {}", format_tokens(result.output_tokens()));
        let _ = writeln!(out, "Total Tokens: {}", format_tokens(result.total_tokens()));
        let _ = writeln!(out, "Estimated Cost: {}", format_cost(detailed.total_cost));

        if !detailed.turns_details.is_empty() {
            let _ = writeln!(out, "\nAssistant Message Details:");
            for (i, turn) in detailed.turns_details.iter().enumerate() {
                let marker = if turn.is_turn_end { " (End of Turn)" } else { "" };
                let _ = writeln!(out, "  Message {}{}:", i + 1, marker);
                let _ = writeln!(out, "    Turn Index: {}", turn.turn_index);
                let _ = writeln!(out, "    Model: {}", turn.model_slug);
                let _ = writeln!(out, "    Rates: {}", turn.cost_model_key);
                let _ = writeln!(
                    out,
                    "    Input Tokens: {}",
                    format_tokens(turn.input_tokens as f64)
                );
                let _ = writeln!(
                    out,
                    "    Output Tokens: {}",
                    format_tokens(turn.output_tokens)
                );
                let _ = writeln!(out, "    Cost: {}", format_cost(turn.turn_total_cost));
            }
        }
    } else if let Some(simple) = result.simple() {
        let _ = writeln!(out, "Total Messages: {}", simple.message_count);
        let _ = writeln!(
            out,
            "User Tokens: {}",
            format_tokens(simple.simple_total_user_tokens as f64)
        );
        let _ = writeln!(
            out,
            "Assistant Tokens: {}",
            format_tokens(simple.simple_total_assistant_tokens)
        );
        let _ = writeln!(
            out,
            "System Tokens: {}",
            format_tokens(simple.simple_total_system_tokens as f64)
        );
        let _ = writeln!(out, "Total Tokens: {}", format_tokens(result.total_tokens()));
        let _ = writeln!(out, "Rates: {}", simple.simple_cost_model_key);
        let _ = writeln!(out, "Estimated Cost: {}", format_cost(simple.simple_total_cost));
    }
    out
}

/// Dates that have conversations, with counts.
pub fn dates(dates: &[(NaiveDate, usize)]) -> String {
    let mut out = String::new();
    if dates.is_empty() {
        let _ = writeln!(out, "No conversations with date information found.");
        return out;
    }
    let _ = writeln!(out, "=== Conversation Calendar ===");
    for (date, count) in dates {
        let noun = if *count == 1 { "conversation" } else { "conversations" };
        let _ = writeln!(out, "{}  {:>4} {}", date.format("%Y-%m-%d"), count, noun);
    }
    out
}

/// One row of the per-day table.
pub struct DayRow<'a> {
    pub result: &'a AnalysisResult,
    pub first_model: String,
}

/// Table of the conversations created on `date`.
pub fn day(date: NaiveDate, rows: &[DayRow<'_>]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Date: {}", date.format("%Y-%m-%d"));
    let _ = writeln!(out, "Conversations: {}", rows.len());
    if rows.is_empty() {
        return out;
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec!["#", "Title", "Time", "Turns", "First Model", "Tokens", "Cost"]);
    for (i, row) in rows.iter().enumerate() {
        table.add_row(vec![
            Cell::new(i + 1),
            Cell::new(truncate(&row.result.title, 37)),
            Cell::new(created_time(row.result)).set_alignment(CellAlignment::Center),
            Cell::new(row.result.real_turns_count()),
            Cell::new(truncate(&row.first_model, 12)),
            Cell::new(format_tokens(row.result.total_tokens())),
            Cell::new(format_cost(row.result.total_cost())),
        ]);
    }
    for index in [0, 3, 5, 6] {
        if let Some(column) = table.column_mut(index) {
            column.set_cell_alignment(CellAlignment::Right);
        }
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "{}", table);
    out
}

/// Readable thread with speaker headers and turn boundaries.
pub fn transcript(transcript: &Transcript) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", heavy_rule());
    let _ = writeln!(out, "CONVERSATION: {}", transcript.title);
    let _ = writeln!(out, "{}", heavy_rule());

    for entry in &transcript.entries {
        let header = match &entry.model {
            Some(model) => format!("[{} [Model: {}]]", entry.speaker, model),
            None => format!("[{}]", entry.speaker),
        };
        let _ = writeln!(out, "\n{}", header);
        let _ = writeln!(out, "{}", "-".repeat(header.chars().count()));
        let _ = writeln!(out, "{}", entry.text);
        if let Some(turn) = entry.turn_end {
            let _ = writeln!(out, "\n----- End of Turn {} -----", turn);
        }
    }

    let _ = writeln!(out, "\n{}", heavy_rule());
    let _ = writeln!(out, "Total turns: {}", transcript.total_turns);
    let _ = writeln!(out, "{}", heavy_rule());
    out
}

/// Breakdown of the messages carrying one model label.
pub fn model_details(details: &ModelDetails) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", heavy_rule());
    let _ = writeln!(out, "DETAILED ANALYSIS FOR MODEL: {}", details.label);
    let _ = writeln!(out, "{}", heavy_rule());
    let _ = writeln!(
        out,
        "Total messages with model '{}': {}",
        details.label, details.message_count
    );

    let sections = [
        ("Message recipients", &details.recipients),
        ("Content types", &details.content_types),
        ("Author roles", &details.roles),
    ];
    for (heading, counts) in sections {
        if counts.is_empty() {
            continue;
        }
        let _ = writeln!(out, "\n{}:", heading);
        for (name, count) in ModelDetails::ranked(counts) {
            let _ = writeln!(
                out,
                "  - {}: {} messages ({:.1}%)",
                name,
                count,
                details.share(count)
            );
        }
    }

    if !details.samples.is_empty() {
        let _ = writeln!(out, "\nSample messages:");
        for (i, sample) in details.samples.iter().enumerate() {
            let _ = writeln!(out, "\nSample {}:", i + 1);
            let _ = writeln!(out, "  Conversation: {}", sample.conversation);
            let _ = writeln!(out, "  Author: {}", sample.author);
            let _ = writeln!(out, "  Recipient: {}", sample.recipient);
            let _ = writeln!(out, "  Content: {}", sample.content_preview);
        }
    }

    let _ = writeln!(out, "\n{}", heavy_rule());
    out
}
