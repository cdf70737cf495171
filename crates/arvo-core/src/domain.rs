//! The domain resolver (C5, spec §4.4): maps symbolic domain tokens to
//! concrete strings-or-null, plus the multi-domain broadcast expansion.
//!
//! Grounded on `chem-core::step::definition::StepKind` (a small closed
//! tagged union the engine matches on) and
//! `chem-core::injection::merge::merge_json` (small deterministic
//! pure-function style) — per §9's "dynamic dispatch -> tagged variants"
//! guidance, `DomainToken` is a tagged union rather than a trait object.

use serde::{Deserialize, Serialize};

/// A symbolic domain token as it appears on a raw machine emit (§4.4/§9).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainToken {
    Local,
    FromSelfContract,
    FromEventContract,
    FromTriggeringEvent,
    Literal(String),
}

/// The context a token is resolved against (§4.4:
/// `{handlerSelfContract, eventContract?, triggeringEvent}`).
#[derive(Debug, Clone, Default)]
pub struct DomainContext {
    pub self_contract_domain: Option<String>,
    pub event_contract_domain: Option<String>,
    pub triggering_event_domain: Option<String>,
}

/// Resolves one token to a concrete domain string, or `None` (§4.4 table).
pub fn resolve(token: &DomainToken, ctx: &DomainContext) -> Option<String> {
    match token {
        DomainToken::Local => None,
        DomainToken::FromSelfContract => ctx.self_contract_domain.clone(),
        DomainToken::FromEventContract => ctx.event_contract_domain.clone(),
        DomainToken::FromTriggeringEvent => ctx.triggering_event_domain.clone(),
        DomainToken::Literal(s) => Some(s.clone()),
    }
}

/// Multi-domain broadcast expansion (§4.4): one emittable event per unique
/// resolved value, duplicates collapsed, first-occurrence order preserved.
/// An empty or absent token list resolves to `[None]` (spec §8 boundary:
/// "Empty `domain: []` is treated as `[null]`").
pub fn resolve_many(tokens: &[DomainToken], ctx: &DomainContext) -> Vec<Option<String>> {
    if tokens.is_empty() {
        return vec![None];
    }
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for token in tokens {
        let resolved = resolve(token, ctx);
        if seen.insert(resolved.clone()) {
            out.push(resolved);
        }
    }
    out
}
