//! Context window builder.
//!
//! Turns recent history, the system prompt, and the current message into a
//! [`PromptSequence`] whose estimated cost fits the token budget. History is
//! filled newest first and stops at the first unit that does not fit, so the
//! window is always a contiguous recent slice of the conversation.
//!
//! # Determinism
//!
//! Identical inputs always produce identical outputs. History is ordered by
//! `(timestamp, id)` before selection, so the caller may pass it newest-first
//! or oldest-first.

use super::token::TokenEstimator;
use banter_config::ContextConfig;
use banter_core::message::{ConversationEntry, PromptSequence, Role, WindowUnit};
use std::sync::Arc;
use tracing::debug;

/// A unit of history that is kept or dropped as a whole.
type Unit<'a> = Vec<&'a ConversationEntry>;

pub struct ContextWindowBuilder {
    estimator: Arc<dyn TokenEstimator>,
    per_unit_overhead: usize,
    unit: WindowUnit,
}

impl ContextWindowBuilder {
    pub fn new(estimator: Arc<dyn TokenEstimator>) -> Self {
        Self {
            estimator,
            per_unit_overhead: 15,
            unit: WindowUnit::Entry,
        }
    }

    pub fn from_config(estimator: Arc<dyn TokenEstimator>, config: &ContextConfig) -> Self {
        Self::new(estimator)
            .with_overhead(config.per_unit_overhead)
            .with_unit(config.unit)
    }

    pub fn with_overhead(mut self, per_unit_overhead: usize) -> Self {
        self.per_unit_overhead = per_unit_overhead;
        self
    }

    pub fn with_unit(mut self, unit: WindowUnit) -> Self {
        self.unit = unit;
        self
    }

    pub fn estimator(&self) -> &Arc<dyn TokenEstimator> {
        &self.estimator
    }

    /// Cost of one history unit, framing overhead included.
    pub fn unit_cost(&self, entries: &[&ConversationEntry]) -> usize {
        entries
            .iter()
            .map(|e| self.estimator.estimate(&e.content))
            .sum::<usize>()
            + self.per_unit_overhead
    }

    /// Assemble the prompt for `current`.
    ///
    /// Layout: system entry (omitted when `system_prompt` is blank), accepted
    /// history oldest to newest, `current` last. When the system prompt and
    /// current message alone exceed `budget` the history is empty and the
    /// sequence reports [`PromptSequence::is_over_budget`].
    pub fn build(
        &self,
        history: &[ConversationEntry],
        system_prompt: &str,
        current: ConversationEntry,
        budget: usize,
    ) -> PromptSequence {
        let units = self.units(history);
        let total_units = units.len();

        let has_system = !system_prompt.trim().is_empty();
        let system_tokens = if has_system {
            self.estimator.estimate(system_prompt)
        } else {
            0
        };
        let current_tokens = self.estimator.estimate(&current.content);
        let fixed = system_tokens + current_tokens;
        let available = budget.saturating_sub(fixed);

        let mut used = 0;
        let mut accepted: Vec<&Unit<'_>> = Vec::new();
        // Sliding window: newest → oldest, stop at the first miss.
        for unit in units.iter().rev() {
            let cost = self.unit_cost(unit);
            if used + cost > available {
                break;
            }
            used += cost;
            accepted.push(unit);
        }
        // Restore chronological order.
        accepted.reverse();

        let history_units = accepted.len();
        let mut entries = Vec::with_capacity(accepted.iter().map(|u| u.len()).sum::<usize>() + 2);
        if has_system {
            entries.push(ConversationEntry::system(system_prompt, current.timestamp));
        }
        entries.extend(accepted.into_iter().flatten().map(|e| ConversationEntry::clone(e)));
        entries.push(current);

        let estimated = fixed + used;
        debug!(
            tokens = estimated,
            budget,
            history_units,
            dropped_units = total_units - history_units,
            "Built context window"
        );

        PromptSequence::from_parts(
            entries,
            estimated,
            budget,
            history_units,
            total_units - history_units,
        )
    }

    /// Well-formed history grouped into units, oldest first.
    fn units<'a>(&self, history: &'a [ConversationEntry]) -> Vec<Unit<'a>> {
        let mut ordered: Vec<&ConversationEntry> = history
            .iter()
            .filter(|e| e.role != Role::System && e.is_well_formed())
            .collect();
        ordered.sort_by_key(|e| (e.timestamp, e.id));

        match self.unit {
            WindowUnit::Entry => ordered.into_iter().map(|e| vec![e]).collect(),
            WindowUnit::Exchange => pair_exchanges(&ordered),
        }
    }
}

/// A user turn directly followed by an assistant turn forms an exchange.
/// Anything unpaired is dropped.
fn pair_exchanges<'a>(ordered: &[&'a ConversationEntry]) -> Vec<Unit<'a>> {
    let mut units = Vec::new();
    let mut i = 0;
    while i < ordered.len() {
        match (ordered[i].role, ordered.get(i + 1).map(|e| e.role)) {
            (Role::User, Some(Role::Assistant)) => {
                units.push(vec![ordered[i], ordered[i + 1]]);
                i += 2;
            }
            _ => i += 1,
        }
    }
    units
}
