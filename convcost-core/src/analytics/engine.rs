//! Turn and cost accrual
//!
//! The engine linearizes each conversation, then folds an explicit
//! accumulator over the thread to produce per-message token counts and
//! costs.
//!
//! ```text
//! Conversation ──► linearize ──► [node ids] ──► fold(Accrual) ──► AnalysisResult
//!                                                  │
//!                                                  ├─ ContentExtractor ─► TokenCounter
//!                                                  └─ RateResolver
//! ```
//!
//! ## Detailed mode
//!
//! Each assistant message is charged:
//! - **input**: tokens of every earlier thread message, thoughts excluded,
//!   at half the input rate once the first turn has closed
//! - **output**: its own tokens, thoughts included at the multiplier
//!
//! ## Simple mode
//!
//! Per-role totals priced at the representative model's rates, no discount.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use convcost_core::analytics::AccrualEngine;
//! use convcost_core::{CalculationMode, Config};
//!
//! let config = Config::load().expect("failed to load config");
//! let engine = AccrualEngine::from_config(&config);
//! # let conversations = vec![];
//! let results = engine.analyze_all(&conversations, CalculationMode::Detailed);
//! ```

use super::extract::ContentExtractor;
use super::pricing::{cost_for, ModelRates, RateResolver};
use super::thread::{count_real_turns, linearize};
use super::tokenizer::TokenCounter;
use crate::config::{Config, DEFAULT_THOUGHT_MULTIPLIER};
use crate::types::{local_datetime, CalculationMode, Conversation, Message, Role};
use chrono::NaiveDate;
use rayon::prelude::*;
use serde::{Serialize, Serializer};
use std::sync::atomic::{AtomicUsize, Ordering};

// ============================================
// Results
// ============================================

/// Costing of one assistant message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnRecord {
    pub assistant_message_id: String,
    /// Turns closed before this message
    pub turn_index: usize,
    /// Tokens of all earlier thread messages, thoughts excluded
    pub input_tokens: u64,
    /// This message's tokens, thoughts weighted
    pub output_tokens: f64,
    pub input_cost: f64,
    pub output_cost: f64,
    pub turn_total_cost: f64,
    /// Display label, see [`model_label`](super::pricing::model_label)
    pub model_slug: String,
    /// Rate key actually charged
    pub cost_model_key: String,
    pub input_discounted: bool,
    pub is_turn_end: bool,
    pub rates_missing: bool,
}

/// Detailed-mode totals for one conversation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetailedAnalysis {
    pub real_turns_count: usize,
    pub message_count: usize,
    pub assistant_messages_count: usize,
    pub total_input_tokens_across_turns: u64,
    pub total_output_tokens_for_all_assistant_msgs: f64,
    pub total_cost: f64,
    pub turns_details: Vec<TurnRecord>,
    pub rates_missing: bool,
}

/// Simple-mode totals for one conversation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimpleAnalysis {
    pub real_turns_count: usize,
    pub message_count: usize,
    pub simple_total_user_tokens: u64,
    pub simple_total_assistant_tokens: f64,
    pub simple_total_system_tokens: u64,
    pub simple_total_input_tokens: u64,
    pub simple_total_output_tokens: f64,
    pub simple_input_cost: f64,
    pub simple_output_cost: f64,
    pub simple_total_cost: f64,
    pub simple_cost_model_key: String,
    pub rates_missing: bool,
}

/// Why a conversation could not be analyzed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AnalysisFailure {
    #[error("No message mapping found")]
    NoMapping,
    #[error("Could not determine message order or no messages")]
    NoMessages,
}

impl Serialize for AnalysisFailure {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Mode-specific body of an [`AnalysisResult`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Outcome {
    Detailed(DetailedAnalysis),
    Simple(SimpleAnalysis),
    Failed { error: AnalysisFailure },
}

/// Analysis of one conversation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisResult {
    pub conversation_id: Option<String>,
    pub title: String,
    #[serde(rename = "create_time_ts")]
    pub create_time: Option<f64>,
    #[serde(rename = "update_time_ts")]
    pub update_time: Option<f64>,
    pub mode: CalculationMode,
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl AnalysisResult {
    pub fn is_error(&self) -> bool {
        matches!(self.outcome, Outcome::Failed { .. })
    }

    pub fn error(&self) -> Option<AnalysisFailure> {
        match self.outcome {
            Outcome::Failed { error } => Some(error),
            _ => None,
        }
    }

    pub fn detailed(&self) -> Option<&DetailedAnalysis> {
        match &self.outcome {
            Outcome::Detailed(d) => Some(d),
            _ => None,
        }
    }

    pub fn simple(&self) -> Option<&SimpleAnalysis> {
        match &self.outcome {
            Outcome::Simple(s) => Some(s),
            _ => None,
        }
    }

    /// Turns closed on the thread; 0 for failed analyses
    pub fn real_turns_count(&self) -> usize {
        match &self.outcome {
            Outcome::Detailed(d) => d.real_turns_count,
            Outcome::Simple(s) => s.real_turns_count,
            Outcome::Failed { .. } => 0,
        }
    }

    pub fn message_count(&self) -> usize {
        match &self.outcome {
            Outcome::Detailed(d) => d.message_count,
            Outcome::Simple(s) => s.message_count,
            Outcome::Failed { .. } => 0,
        }
    }

    /// Assistant messages costed (detailed mode only)
    pub fn assistant_messages_count(&self) -> usize {
        self.detailed().map_or(0, |d| d.assistant_messages_count)
    }

    pub fn total_cost(&self) -> f64 {
        match &self.outcome {
            Outcome::Detailed(d) => d.total_cost,
            Outcome::Simple(s) => s.simple_total_cost,
            Outcome::Failed { .. } => 0.0,
        }
    }

    pub fn input_tokens(&self) -> f64 {
        match &self.outcome {
            Outcome::Detailed(d) => d.total_input_tokens_across_turns as f64,
            Outcome::Simple(s) => s.simple_total_input_tokens as f64,
            Outcome::Failed { .. } => 0.0,
        }
    }

    pub fn output_tokens(&self) -> f64 {
        match &self.outcome {
            Outcome::Detailed(d) => d.total_output_tokens_for_all_assistant_msgs,
            Outcome::Simple(s) => s.simple_total_output_tokens,
            Outcome::Failed { .. } => 0.0,
        }
    }

    pub fn total_tokens(&self) -> f64 {
        self.input_tokens() + self.output_tokens()
    }

    /// Whether some message was costed at 0 for lack of rates
    pub fn rates_missing(&self) -> bool {
        match &self.outcome {
            Outcome::Detailed(d) => d.rates_missing,
            Outcome::Simple(s) => s.rates_missing,
            Outcome::Failed { .. } => false,
        }
    }

    /// Local calendar date of the conversation's creation
    pub fn created_on(&self) -> Option<NaiveDate> {
        self.create_time
            .and_then(local_datetime)
            .map(|dt| dt.date_naive())
    }
}

// ============================================
// Accumulator
// ============================================

/// Running state of a detailed-mode walk.
#[derive(Debug, Default)]
struct Accrual {
    /// Sum of thought-free tokens of every message seen so far
    history_tokens: u64,
    /// Turns closed so far
    turn_index: usize,
    assistant_messages: usize,
    total_input: u64,
    total_output: f64,
    total_cost: f64,
    rates_missing: bool,
    turns: Vec<TurnRecord>,
}

/// Rates to charge one message, after fallback.
struct Charge {
    key: String,
    rates: ModelRates,
    missing: bool,
}

// ============================================
// Engine
// ============================================

/// Computes token usage and cost per conversation.
pub struct AccrualEngine {
    counter: Box<dyn TokenCounter>,
    resolver: RateResolver,
    thought_multiplier: f64,
}

impl AccrualEngine {
    pub fn new(counter: Box<dyn TokenCounter>, resolver: RateResolver) -> Self {
        Self {
            counter,
            resolver,
            thought_multiplier: DEFAULT_THOUGHT_MULTIPLIER,
        }
    }

    /// Engine wired from the `[analysis]` and `[pricing]` config sections.
    pub fn from_config(config: &Config) -> Self {
        let counter = config
            .analysis
            .tokenizer
            .build(config.analysis.default_encoding);
        Self::new(counter, config.pricing.resolver())
            .with_thought_multiplier(config.analysis.thought_multiplier)
    }

    pub fn with_thought_multiplier(mut self, multiplier: f64) -> Self {
        self.thought_multiplier = multiplier;
        self
    }

    pub fn resolver(&self) -> &RateResolver {
        &self.resolver
    }

    pub fn thought_multiplier(&self) -> f64 {
        self.thought_multiplier
    }

    /// Analyze one conversation. Never fails; structural problems become
    /// an [`Outcome::Failed`].
    pub fn analyze(&self, conversation: &Conversation, mode: CalculationMode) -> AnalysisResult {
        let outcome = self.outcome(conversation, mode);
        if let Outcome::Failed { error } = &outcome {
            tracing::debug!(title = %conversation.title, error = %error, "Conversation not analyzable");
        }
        AnalysisResult {
            conversation_id: conversation.id.clone(),
            title: conversation.title.clone(),
            create_time: conversation.create_time,
            update_time: conversation.update_time,
            mode,
            outcome,
        }
    }

    /// Analyze conversations in parallel; results keep input order.
    pub fn analyze_all(
        &self,
        conversations: &[Conversation],
        mode: CalculationMode,
    ) -> Vec<AnalysisResult> {
        self.analyze_all_with_progress(conversations, mode, |_, _| {})
    }

    /// Like [`Self::analyze_all`], calling `on_progress(done, total)` as each
    /// conversation finishes. The callback may run on any worker thread.
    pub fn analyze_all_with_progress<F>(
        &self,
        conversations: &[Conversation],
        mode: CalculationMode,
        on_progress: F,
    ) -> Vec<AnalysisResult>
    where
        F: Fn(usize, usize) + Sync + Send,
    {
        let total = conversations.len();
        let done = AtomicUsize::new(0);

        tracing::info!(conversations = total, mode = %mode, "Analyzing conversations");

        let results: Vec<AnalysisResult> = conversations
            .par_iter()
            .map(|conversation| {
                let result = self.analyze(conversation, mode);
                let finished = done.fetch_add(1, Ordering::Relaxed) + 1;
                on_progress(finished, total);
                result
            })
            .collect();

        let failed = results.iter().filter(|r| r.is_error()).count();
        tracing::info!(analyzed = total - failed, failed, "Analysis complete");
        results
    }

    fn outcome(&self, conversation: &Conversation, mode: CalculationMode) -> Outcome {
        let mapping = &conversation.mapping;
        if mapping.is_empty() {
            return Outcome::Failed {
                error: AnalysisFailure::NoMapping,
            };
        }

        let thread = linearize(mapping);
        if thread.is_empty() {
            return Outcome::Failed {
                error: AnalysisFailure::NoMessages,
            };
        }

        let real_turns_count = count_real_turns(mapping, &thread);
        let messages: Vec<(&str, &Message)> = thread
            .iter()
            .filter_map(|id| mapping.message(id).map(|msg| (id.as_str(), msg)))
            .collect();

        match mode {
            CalculationMode::Detailed => Outcome::Detailed(self.detailed(
                &conversation.title,
                &messages,
                real_turns_count,
            )),
            CalculationMode::Simple => {
                Outcome::Simple(self.simple(&conversation.title, &messages, real_turns_count))
            }
        }
    }

    fn detailed(
        &self,
        title: &str,
        messages: &[(&str, &Message)],
        real_turns_count: usize,
    ) -> DetailedAnalysis {
        let extractor = ContentExtractor::new(self.counter.as_ref(), self.thought_multiplier);

        let acc = messages
            .iter()
            .fold(Accrual::default(), |mut acc, &(id, message)| {
                let history_tokens = extractor.extract_message(message, false).plain_tokens;
                let prior_tokens = acc.history_tokens;
                acc.history_tokens += history_tokens;

                if *message.role() == Role::Assistant {
                    acc.assistant_messages += 1;

                    let output_tokens = extractor.extract_message(message, true).total();
                    let charge = self.charge(message.model_slug(), title);
                    let input_discounted = acc.turn_index > 0;
                    let input_rate = if input_discounted {
                        charge.rates.input_cost_per_million_tokens / 2.0
                    } else {
                        charge.rates.input_cost_per_million_tokens
                    };
                    let input_cost = cost_for(prior_tokens as f64, input_rate);
                    let output_cost =
                        cost_for(output_tokens, charge.rates.output_cost_per_million_tokens);

                    acc.total_input += prior_tokens;
                    acc.total_output += output_tokens;
                    acc.total_cost += input_cost + output_cost;
                    acc.rates_missing |= charge.missing;
                    acc.turns.push(TurnRecord {
                        assistant_message_id: id.to_string(),
                        turn_index: acc.turn_index,
                        input_tokens: prior_tokens,
                        output_tokens,
                        input_cost,
                        output_cost,
                        turn_total_cost: input_cost + output_cost,
                        model_slug: super::pricing::model_label(message),
                        cost_model_key: charge.key,
                        input_discounted,
                        is_turn_end: message.is_turn_end(),
                        rates_missing: charge.missing,
                    });
                }

                if message.is_turn_end() {
                    acc.turn_index += 1;
                }
                acc
            });

        DetailedAnalysis {
            real_turns_count,
            message_count: messages.len(),
            assistant_messages_count: acc.assistant_messages,
            total_input_tokens_across_turns: acc.total_input,
            total_output_tokens_for_all_assistant_msgs: acc.total_output,
            total_cost: acc.total_cost,
            turns_details: acc.turns,
            rates_missing: acc.rates_missing,
        }
    }

    fn simple(
        &self,
        title: &str,
        messages: &[(&str, &Message)],
        real_turns_count: usize,
    ) -> SimpleAnalysis {
        let extractor = ContentExtractor::new(self.counter.as_ref(), self.thought_multiplier);

        let mut user_tokens = 0u64;
        let mut assistant_tokens = 0f64;
        let mut system_tokens = 0u64;
        for &(_, message) in messages {
            match message.role() {
                Role::User => user_tokens += extractor.extract_message(message, false).plain_tokens,
                Role::System => {
                    system_tokens += extractor.extract_message(message, false).plain_tokens
                }
                Role::Assistant => assistant_tokens += extractor.extract_message(message, true).total(),
                _ => {}
            }
        }

        let input_tokens = user_tokens + system_tokens;
        let charge = self.charge(None, title);
        let input_cost = cost_for(
            input_tokens as f64,
            charge.rates.input_cost_per_million_tokens,
        );
        let output_cost = cost_for(assistant_tokens, charge.rates.output_cost_per_million_tokens);

        SimpleAnalysis {
            real_turns_count,
            message_count: messages.len(),
            simple_total_user_tokens: user_tokens,
            simple_total_assistant_tokens: assistant_tokens,
            simple_total_system_tokens: system_tokens,
            simple_total_input_tokens: input_tokens,
            simple_total_output_tokens: assistant_tokens,
            simple_input_cost: input_cost,
            simple_output_cost: output_cost,
            simple_total_cost: input_cost + output_cost,
            simple_cost_model_key: charge.key,
            rates_missing: charge.missing,
        }
    }

    /// Rates for a message, or zero rates plus an annotation on a gap.
    fn charge(&self, model_slug: Option<&str>, title: &str) -> Charge {
        match self.resolver.resolve(model_slug) {
            Some(resolved) => Charge {
                key: resolved.key,
                rates: resolved.rates,
                missing: false,
            },
            None => {
                let key = self.resolver.attempted_key(model_slug);
                tracing::warn!(
                    title,
                    model = model_slug.unwrap_or("-"),
                    key = %key,
                    "No cost rates found, charging zero"
                );
                Charge {
                    key: format!("{} (rates not found)", key),
                    rates: ModelRates::new(0.0, 0.0),
                    missing: true,
                }
            }
        }
    }
}
