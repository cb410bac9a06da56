//! Selector resolution against a document's node tree.
//!
//! A selector is either an exact node id or a wildcard pattern. Wildcards
//! use `*` (any run of characters) and `?` (any single character), are
//! matched case-insensitively against node *names*, and a backslash
//! escapes the following character so literal `*`/`?` stay matchable.
//! Exact selectors are looked up by node *id*.

use std::collections::HashMap;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use motif_core::{ContentElement, DocumentIndex, Error, Result, SelectorMatch};

/// One replacement rule: a selector plus the payload applied to every
/// target it matches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectorRule {
    pub selector: String,
    pub payload: ContentElement,
}

/// The outcome of resolving a rule set against a document.
#[derive(Debug, Clone)]
pub struct ResolvedTargets {
    /// Target ids in document order, each appearing once.
    pub order: Vec<String>,
    /// Payload per target. When several rules match the same target, the
    /// later rule wins.
    pub payloads: HashMap<String, ContentElement>,
    /// Per-selector match report, in rule order.
    pub matches: Vec<SelectorMatch>,
}

/// Resolves selectors against an indexed document tree.
pub struct PatternResolver {
    index: DocumentIndex,
}

impl PatternResolver {
    pub fn new(index: DocumentIndex) -> Self {
        Self { index }
    }

    pub fn index(&self) -> &DocumentIndex {
        &self.index
    }

    /// Resolve a single selector to target ids, in document order.
    pub fn resolve(&self, selector: &str) -> Result<Vec<String>> {
        if selector.is_empty() {
            return Err(Error::InvalidSelector {
                selector: selector.to_string(),
                reason: "selector is empty".to_string(),
            });
        }
        if is_wildcard(selector) {
            let pattern = compile_wildcard(selector)?;
            Ok(self
                .index
                .iter()
                .filter(|(_, name)| pattern.is_match(name))
                .map(|(id, _)| id.to_string())
                .collect())
        } else {
            // Escapes only guard metacharacters from wildcard detection;
            // the id itself never contains a backslash escape.
            let literal = unescape(selector)?;
            if self.index.contains_id(&literal) {
                Ok(vec![literal])
            } else {
                Ok(Vec::new())
            }
        }
    }

    /// Resolve a whole rule set. Selectors that match nothing are reported
    /// in `matches` with a zero count but do not fail resolution; callers
    /// decide whether an entirely empty result is an error.
    pub fn resolve_rules(&self, rules: &[SelectorRule]) -> Result<ResolvedTargets> {
        let mut order: Vec<String> = Vec::new();
        let mut payloads: HashMap<String, ContentElement> = HashMap::new();
        let mut matches = Vec::with_capacity(rules.len());

        for rule in rules {
            let targets = self.resolve(&rule.selector)?;
            if targets.is_empty() {
                warn!(selector = %rule.selector, "selector matched no targets");
            } else {
                debug!(
                    selector = %rule.selector,
                    count = targets.len(),
                    "selector resolved"
                );
            }
            for id in &targets {
                if !payloads.contains_key(id) {
                    order.push(id.clone());
                }
                payloads.insert(id.clone(), rule.payload.clone());
            }
            matches.push(SelectorMatch {
                selector: rule.selector.clone(),
                count: targets.len(),
                matched_targets: targets,
            });
        }

        Ok(ResolvedTargets {
            order,
            payloads,
            matches,
        })
    }
}

/// Whether a selector contains an unescaped wildcard metacharacter.
pub fn is_wildcard(selector: &str) -> bool {
    let mut chars = selector.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                chars.next();
            }
            '*' | '?' => return true,
            _ => {}
        }
    }
    false
}

/// Strip escape backslashes from a selector with no unescaped wildcard.
fn unescape(selector: &str) -> Result<String> {
    let mut out = String::with_capacity(selector.len());
    let mut chars = selector.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some(escaped) => out.push(escaped),
                None => {
                    return Err(Error::InvalidSelector {
                        selector: selector.to_string(),
                        reason: "trailing backslash".to_string(),
                    })
                }
            }
        } else {
            out.push(c);
        }
    }
    Ok(out)
}

/// Compile a wildcard selector into an anchored, case-insensitive regex.
fn compile_wildcard(selector: &str) -> Result<Regex> {
    let mut pattern = String::with_capacity(selector.len() + 8);
    pattern.push_str("(?i)^");
    let mut chars = selector.chars();
    while let Some(c) = chars.next() {
        match c {
            '*' => pattern.push_str(".*"),
            '?' => pattern.push('.'),
            '\\' => match chars.next() {
                Some(escaped) => pattern.push_str(&regex::escape(&escaped.to_string())),
                None => {
                    return Err(Error::InvalidSelector {
                        selector: selector.to_string(),
                        reason: "trailing backslash".to_string(),
                    })
                }
            },
            other => pattern.push_str(&regex::escape(&other.to_string())),
        }
    }
    pattern.push('$');
    Regex::new(&pattern).map_err(|e| Error::InvalidSelector {
        selector: selector.to_string(),
        reason: e.to_string(),
    })
}
