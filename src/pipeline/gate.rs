//! Confidence gate: decide, per page, what the local pass is worth.
//!
//! This is a pure decision function — no I/O, no clock, no randomness —
//! so threshold boundaries can be pinned by unit tests. What used to be an
//! implicit try/except fallback in ad-hoc extraction scripts is a declared
//! three-way transition here:
//!
//! * **Accept** — the local text is trusted as-is; no AI call.
//! * **EscalateWithHint** — call the AI extractor and forward the raw
//!   local text as an untrusted hint.
//! * **Escalate** — call the AI extractor with the image alone.
//!
//! Both thresholds are **inclusive** (`>=`): a page sitting exactly at
//! `accept_threshold` is accepted, exactly at `hint_threshold` escalates
//! with hint. Tests cover both sides of each boundary.

use crate::record::AttemptStatus;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// The gate's verdict for one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateDecision {
    /// Local text is trusted; resolve the page from it.
    Accept,
    /// Call the AI extractor with the image alone.
    Escalate,
    /// Call the AI extractor, forwarding the local text as a hint.
    EscalateWithHint,
}

/// The gate's inputs that come from configuration.
#[derive(Debug, Clone, Copy)]
pub struct GateConfig {
    pub accept_threshold: f32,
    pub hint_threshold: f32,
    /// Skip the local pass outcome entirely and always escalate plain.
    pub force_ai: bool,
}

impl From<&crate::config::ExtractionConfig> for GateConfig {
    fn from(c: &crate::config::ExtractionConfig) -> Self {
        GateConfig {
            accept_threshold: c.accept_threshold,
            hint_threshold: c.hint_threshold,
            force_ai: c.force_ai,
        }
    }
}

/// An amount-like token: either a number with two decimals (1,234.56 /
/// 1.234,56 / 42.00) or a bare run of three or more digits.
static RE_AMOUNT_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d+[.,]\d{2}(?:\D|$)|\d{3,}").unwrap());

/// Minimal structural sanity for accepting local text: non-empty and
/// containing at least one numeric token plausible as an amount. An
/// invoice page with no amount anywhere was not read — whatever the
/// engine's confidence says.
pub fn text_is_sane(text: &str) -> bool {
    let trimmed = text.trim();
    !trimmed.is_empty() && RE_AMOUNT_TOKEN.is_match(trimmed)
}

/// Decide what to do with a local extraction attempt.
pub fn decide(
    config: &GateConfig,
    status: AttemptStatus,
    confidence: f32,
    text: &str,
) -> GateDecision {
    if config.force_ai || status == AttemptStatus::Failed {
        return GateDecision::Escalate;
    }
    if confidence >= config.accept_threshold && text_is_sane(text) {
        return GateDecision::Accept;
    }
    if confidence >= config.hint_threshold && !text.trim().is_empty() {
        return GateDecision::EscalateWithHint;
    }
    GateDecision::Escalate
}
