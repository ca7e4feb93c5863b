//! Integration tests for the convcost load → analyze → report pipeline
//!
//! These tests use fixture files in `tests/fixtures/chatgpt/`. Token counts
//! use the whitespace counter so expected costs can be worked out by hand.

use convcost_core::analytics::browse::{
    find_conversation, first_model_used, model_details, most_turns, transcript,
};
use convcost_core::analytics::filter::Filters;
use convcost_core::analytics::report::{build_report, export, Summary};
use convcost_core::analytics::{
    AccrualEngine, AnalysisFailure, CostTable, RateResolver, TiktokenCounter, WordCounter,
};
use convcost_core::config::{PricingConfig, ReportFormat};
use convcost_core::{local_datetime, CalculationMode, Conversation, ExportLoader};
use std::path::PathBuf;
use tempfile::TempDir;

const EPS: f64 = 1e-12;

/// Get the path to a fixture file
fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures/chatgpt")
        .join(name)
}

fn load_fixture() -> Vec<Conversation> {
    convcost_core::logging::init_test();
    ExportLoader::new()
        .load(&fixture_path("conversations.json"))
        .expect("fixture should load")
        .conversations
}

fn word_engine() -> AccrualEngine {
    AccrualEngine::new(Box::new(WordCounter), RateResolver::default())
}

fn by_title<'a>(conversations: &'a [Conversation], title: &str) -> &'a Conversation {
    conversations
        .iter()
        .find(|c| c.title == title)
        .unwrap_or_else(|| panic!("fixture has no conversation titled {title}"))
}

// ============================================
// Loading
// ============================================

#[test]
fn test_load_fixture_skips_malformed_record() {
    let result = ExportLoader::new()
        .load(&fixture_path("conversations.json"))
        .expect("fixture should load");

    assert_eq!(result.files_processed, 1);
    assert!(result.errors.is_empty());
    assert_eq!(result.warnings.len(), 1);
    assert!(result.warnings[0].contains("record 3"));

    let titles: Vec<&str> = result.conversations.iter().map(|c| c.title.as_str()).collect();
    assert_eq!(
        titles,
        vec!["Rust lifetimes", "Python tool session", "Lost mapping", "Undated chat"]
    );
    assert_eq!(result.conversations[3].id.as_deref(), Some("conv-undated"));
}

#[test]
fn test_load_fixture_directory() {
    let result = ExportLoader::new()
        .load(&fixture_path(""))
        .expect("fixture directory should load");
    assert_eq!(result.files_processed, 1);
    assert_eq!(result.conversations.len(), 4);
}

// ============================================
// Detailed mode
// ============================================

#[test]
fn test_detailed_branching_conversation() {
    let conversations = load_fixture();
    let result = word_engine().analyze(
        by_title(&conversations, "Rust lifetimes"),
        CalculationMode::Detailed,
    );
    let d = result.detailed().expect("detailed outcome");

    // sys, u1, a1, u2, a2, a3; the regenerated branch is not followed
    assert_eq!(d.message_count, 6);
    assert_eq!(d.real_turns_count, 2);
    assert_eq!(d.assistant_messages_count, 3);
    assert!(d.turns_details.iter().all(|t| t.assistant_message_id != "a1-regen"));

    let a1 = &d.turns_details[0];
    assert_eq!(a1.input_tokens, 6);
    assert_eq!(a1.output_tokens, 3.0);
    assert!(!a1.input_discounted);
    assert!((a1.input_cost - 6.0 * 2.5 / 1e6).abs() < EPS);

    // Thoughts: 1 summary token + 5 content tokens at 1.2
    let a2 = &d.turns_details[1];
    assert_eq!(a2.input_tokens, 12);
    assert!((a2.output_tokens - 7.0).abs() < 1e-9);
    assert!(a2.input_discounted);
    assert!((a2.input_cost - 12.0 * 5.0 / 1e6).abs() < EPS);

    // a2's thoughts never enter later history
    let a3 = &d.turns_details[2];
    assert_eq!(a3.input_tokens, 12);
    assert_eq!(a3.output_tokens, 4.0);

    assert_eq!(d.total_input_tokens_across_turns, 30);
    assert!((d.total_output_tokens_for_all_assistant_msgs - 14.0).abs() < 1e-9);
    assert!((d.total_cost - 6.05e-4).abs() < 1e-10);
}

#[test]
fn test_detailed_tool_session_labels_and_fallback() {
    let conversations = load_fixture();
    let result = word_engine().analyze(
        by_title(&conversations, "Python tool session"),
        CalculationMode::Detailed,
    );
    let d = result.detailed().expect("detailed outcome");

    assert_eq!(d.real_turns_count, 1);
    assert_eq!(d.turns_details.len(), 2);

    let call = &d.turns_details[0];
    assert_eq!(call.model_slug, "gpt-9-turbo");
    assert_eq!(call.cost_model_key, "o3");
    // code content is not counted
    assert_eq!(call.output_tokens, 0.0);

    let answer = &d.turns_details[1];
    assert_eq!(answer.model_slug, "gpt-4o (default)");
    assert_eq!(answer.cost_model_key, "o3");
    assert_eq!(answer.input_tokens, 4);
    assert!(!answer.input_discounted);

    assert!((d.total_cost - 2.3e-4).abs() < 1e-10);
}

#[test]
fn test_missing_mapping_is_reported_not_raised() {
    let conversations = load_fixture();
    let results = word_engine().analyze_all(&conversations, CalculationMode::Detailed);
    assert_eq!(results.len(), 4);
    assert_eq!(results[2].error(), Some(AnalysisFailure::NoMapping));
    assert!(results.iter().filter(|r| r.is_error()).count() == 1);
}

// ============================================
// Simple mode
// ============================================

#[test]
fn test_simple_mode_fixture() {
    let conversations = load_fixture();
    let rust = by_title(&conversations, "Rust lifetimes");
    let simple = word_engine().analyze(rust, CalculationMode::Simple);
    let s = simple.simple().expect("simple outcome");

    assert_eq!(s.simple_total_user_tokens, 6);
    assert_eq!(s.simple_total_system_tokens, 3);
    assert_eq!(s.simple_total_input_tokens, 9);
    assert!((s.simple_total_assistant_tokens - 14.0).abs() < 1e-9);
    assert!((s.simple_total_cost - 6.5e-4).abs() < 1e-10);

    let detailed = word_engine().analyze(rust, CalculationMode::Detailed);
    assert!((detailed.output_tokens() - s.simple_total_output_tokens).abs() < 1e-9);
}

// ============================================
// Pricing configuration
// ============================================

#[test]
fn test_cost_file_replaces_builtin_table() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("costs.json");
    std::fs::write(
        &path,
        r#"{
            "house-model": {"input_cost_per_million_tokens": 1.0, "output_cost_per_million_tokens": 2.0},
            "gpt-4o": {"input_cost_per_million_tokens": 3.0, "output_cost_per_million_tokens": 6.0}
        }"#,
    )
    .unwrap();

    let pricing = PricingConfig {
        models: Some(CostTable::from_json_file(&path).unwrap()),
        builtin_fallback: false,
        ..Default::default()
    };
    let engine = AccrualEngine::new(Box::new(WordCounter), pricing.resolver());

    let conversations = load_fixture();
    let result = engine.analyze(
        by_title(&conversations, "Undated chat"),
        CalculationMode::Detailed,
    );
    // o3 is not in the file, so the first entry is charged
    let turn = &result.detailed().unwrap().turns_details[0];
    assert_eq!(turn.cost_model_key, "house-model");
    assert!((turn.turn_total_cost - (1.0 * 1.0 + 1.0 * 2.0) / 1e6).abs() < EPS);
}

#[test]
fn test_empty_cost_table_reports_uncosted_conversations() {
    let pricing = PricingConfig {
        models: Some(CostTable::empty()),
        builtin_fallback: false,
        ..Default::default()
    };
    let engine = AccrualEngine::new(Box::new(WordCounter), pricing.resolver());
    let results = engine.analyze_all(&load_fixture(), CalculationMode::Detailed);

    let uncosted: Vec<&str> = results
        .iter()
        .filter(|r| r.rates_missing())
        .map(|r| r.title.as_str())
        .collect();
    assert!(uncosted.contains(&"Rust lifetimes"));

    let report = build_report(
        &results,
        CalculationMode::Detailed,
        &Filters::default(),
        engine.resolver().table(),
        false,
    );
    assert_eq!(report.summary.total_cost(), 0.0);
    assert_eq!(report.metadata.conversations_missing_rates, uncosted);

    let text = report.to_string();
    assert!(text.contains(&format!("Conversations Missing Rates: {}", uncosted.len())));
    assert!(text.contains("  - 'Rust lifetimes'"));

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(
        json["metadata"]["conversations_missing_rates"]
            .as_array()
            .map(Vec::len),
        Some(uncosted.len())
    );
}

#[test]
fn test_invalid_cost_file_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("costs.json");
    std::fs::write(
        &path,
        r#"{"o3": {"input_cost_per_million_tokens": -1.0, "output_cost_per_million_tokens": 2.0}}"#,
    )
    .unwrap();
    assert!(CostTable::from_json_file(&path).is_err());
    assert!(CostTable::from_json_file(&dir.path().join("missing.json")).is_err());
}

// ============================================
// Reports
// ============================================

#[test]
fn test_report_from_fixture() {
    let conversations = load_fixture();
    let engine = word_engine();
    let results = engine.analyze_all(&conversations, CalculationMode::Detailed);
    let report = build_report(
        &results,
        CalculationMode::Detailed,
        &Filters::default(),
        engine.resolver().table(),
        false,
    );

    assert_eq!(report.metadata.total_conversations, 4);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].title, "Lost mapping");

    let Summary::Detailed(s) = &report.summary else {
        panic!("expected detailed summary");
    };
    assert_eq!(s.total_input_tokens, 38.0);
    assert_eq!(s.total_output_tokens, 19.0);
    assert_eq!(s.total_turns, 4);
    assert_eq!(s.total_assistant_messages, 6);
    assert!((s.total_cost - 8.85e-4).abs() < 1e-10);

    let keys: Vec<&str> = report.model_breakdown.keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["gpt-4o", "gpt-4o (default)", "gpt-9-turbo", "o3"]);
    assert_eq!(report.model_breakdown["o3"].message_count, 3);
    assert_eq!(report.model_breakdown["gpt-4o"].input_cost_rate, 2.5);
    assert_eq!(report.model_breakdown["gpt-9-turbo"].input_cost_rate, 0.0);

    // Two dated conversations two days apart; the undated one is skipped
    assert_eq!(report.temporal_analysis.len(), 2);
    let counted: usize = report
        .temporal_analysis
        .values()
        .map(|d| d.conversation_count)
        .sum();
    assert_eq!(counted, 2);
}

#[test]
fn test_report_export_round_trip() {
    let conversations = load_fixture();
    let engine = word_engine();
    let results = engine.analyze_all(&conversations, CalculationMode::Simple);
    let report = build_report(
        &results,
        CalculationMode::Simple,
        &Filters::default(),
        engine.resolver().table(),
        true,
    );

    let dir = TempDir::new().unwrap();
    let paths = export(&report, ReportFormat::Json, dir.path()).unwrap();
    assert_eq!(paths.len(), 1);
    let value: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&paths[0]).unwrap()).unwrap();

    assert_eq!(value["metadata"]["calculation_mode"], "simple");
    assert_eq!(value["metadata"]["verbose"], true);
    assert_eq!(value["conversation_details"].as_array().unwrap().len(), 4);
    assert_eq!(value["summary"]["total_turns"], 4);
    assert_eq!(value["model_breakdown"]["o3"]["message_count"], 3);
    assert_eq!(value["errors"][0]["error"], "No message mapping found");
}

// ============================================
// Filters
// ============================================

#[test]
fn test_model_filter_on_fixture() {
    let filters = Filters::parse(None, None, Some("gpt-9-turbo")).unwrap();
    let kept = filters.apply(load_fixture());
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].title, "Python tool session");

    // Matches the regenerated branch too
    let filters = Filters::parse(None, None, Some("gpt-4o")).unwrap();
    let kept = filters.apply(load_fixture());
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].title, "Rust lifetimes");
}

#[test]
fn test_date_filter_on_fixture() {
    let tool_day = local_datetime(1709467200.0).unwrap().date_naive();
    let day = tool_day.format("%Y-%m-%d").to_string();

    let filters = Filters::parse(Some(&day), Some(&day), None).unwrap();
    let kept = filters.apply(load_fixture());
    let titles: Vec<&str> = kept.iter().map(|c| c.title.as_str()).collect();
    assert_eq!(titles, vec!["Python tool session"]);

    let filters = Filters::parse(None, Some(&day), None).unwrap();
    let kept = filters.apply(load_fixture());
    // Everything dated; the undated chat is dropped
    assert_eq!(kept.len(), 3);
}

// ============================================
// Browse
// ============================================

#[test]
fn test_browse_on_fixture() {
    let conversations = load_fixture();
    let results = word_engine().analyze_all(&conversations, CalculationMode::Detailed);

    let top = most_turns(&results, 1);
    assert_eq!(top[0].title, "Rust lifetimes");

    let rust = find_conversation(&conversations, "conv-rust").unwrap();
    assert_eq!(first_model_used(rust), "gpt-4o");

    let t = transcript(rust);
    assert_eq!(t.entries.len(), 6);
    assert_eq!(t.total_turns, 2);
    assert!(t.entries.iter().all(|e| e.text != "Alternate answer here"));

    let unknown = model_details(&conversations, "gpt-9-turbo");
    assert_eq!(unknown.message_count, 1);
    assert_eq!(unknown.recipients.get("python"), Some(&1));
    assert_eq!(unknown.content_types.get("code"), Some(&1));
    assert_eq!(unknown.samples[0].content_preview, "[No content]");
}

// ============================================
// Real tokenizer
// ============================================

#[test]
fn test_tiktoken_pipeline() {
    let conversations = load_fixture();
    let engine = AccrualEngine::new(Box::new(TiktokenCounter::default()), RateResolver::default());
    let results = engine.analyze_all(&conversations, CalculationMode::Detailed);

    let rust = results[0].detailed().expect("detailed outcome");
    assert_eq!(rust.real_turns_count, 2);
    assert!(rust.total_input_tokens_across_turns > 0);
    assert!(rust.total_output_tokens_for_all_assistant_msgs > 0.0);
    assert!(rust.total_cost > 0.0);
    assert!(rust
        .turns_details
        .windows(2)
        .all(|w| w[0].input_tokens <= w[1].input_tokens));
}
