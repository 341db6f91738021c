//! Routing policy: which specialist handles an utterance.
//!
//! The policy is deterministic. Explicit destinations win, ingestion routes
//! by the file's source, local paths go to the local PDF specialist, and the
//! rest is keyword scoring. Ties and misses produce a clarifying question.

use docrelay_common::{Request, SourceSystem};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Where a turn goes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Route {
    /// Hand the turn to the specialist for this system
    Delegate { system: SourceSystem },
    /// Ask the user instead of guessing
    Clarify { question: String },
}

/// Routing decision with reasoning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteDecision {
    pub route: Route,
    pub rationale: String,
    pub confidence: f32,
}

impl RouteDecision {
    pub fn delegate(system: SourceSystem, rationale: impl Into<String>, confidence: f32) -> Self {
        Self {
            route: Route::Delegate { system },
            rationale: rationale.into(),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    pub fn clarify(question: impl Into<String>, rationale: impl Into<String>) -> Self {
        Self {
            route: Route::Clarify {
                question: question.into(),
            },
            rationale: rationale.into(),
            confidence: 0.0,
        }
    }

    /// The chosen specialist, if any.
    pub fn chosen(&self) -> Option<SourceSystem> {
        match self.route {
            Route::Delegate { system } => Some(system),
            Route::Clarify { .. } => None,
        }
    }
}

static DESTINATION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:to|in|into|on|onto|under)\s+(?:the\s+|my\s+|our\s+)?(confluence|jira|sharepoint|share\s+point|google\s+drive|gdrive)\b")
        .expect("destination regex")
});

static SOURCE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:from|of)\s+(?:the\s+|my\s+|our\s+)?(confluence|jira|sharepoint|share\s+point|google\s+drive|gdrive|drive)\b|\b(confluence|jira|sharepoint|gdrive)\s+(?:attachments?|files?|documents?|pages?|issues?|tickets?)\b")
        .expect("source regex")
});

static INGEST_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:ingest\w*|index(?:ing)?|vectori[sz]e|embed)\b|\bvector\s+(?:db|database|store)\b").expect("ingest regex"));

static ISSUE_KEY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[A-Z][A-Z0-9]+-\d+\b").expect("issue key regex"));

static LOCAL_PATH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?:^|[\s"'(])(?:~/|\./|\.\./|/[\w.\-]+/|[A-Za-z]:\\)"#).expect("local path regex")
});

/// Keyword weights per destination vocabulary.
const VOCABULARY: &[(SourceSystem, &[(&str, u32)])] = &[
    (
        SourceSystem::Confluence,
        &[
            ("confluence", 3),
            ("wiki", 2),
            ("knowledge base", 2),
            ("page", 1),
            ("space", 1),
            ("article", 1),
        ],
    ),
    (
        SourceSystem::Jira,
        &[
            ("jira", 3),
            ("ticket", 2),
            ("bug", 2),
            ("epic", 2),
            ("sprint", 2),
            ("issue", 1),
            ("project", 1),
            ("story", 1),
        ],
    ),
    (
        SourceSystem::SharePoint,
        &[
            ("sharepoint", 3),
            ("share point", 3),
            ("document library", 2),
            ("file share", 2),
            ("library", 1),
            ("site", 1),
        ],
    ),
    (
        SourceSystem::GDrive,
        &[("google drive", 3), ("gdrive", 3), ("my drive", 2), ("drive", 1)],
    ),
    (
        SourceSystem::LocalPdf,
        &[
            ("local", 1),
            ("my computer", 2),
            ("this machine", 2),
            ("disk", 1),
            ("folder on", 1),
        ],
    ),
];

fn system_from_name(name: &str) -> Option<SourceSystem> {
    let squashed: String = name.to_lowercase().split_whitespace().collect::<Vec<_>>().join("");
    match squashed.as_str() {
        "confluence" => Some(SourceSystem::Confluence),
        "jira" => Some(SourceSystem::Jira),
        "sharepoint" => Some(SourceSystem::SharePoint),
        "googledrive" | "gdrive" | "drive" => Some(SourceSystem::GDrive),
        _ => None,
    }
}

/// Count whole-phrase occurrences of `phrase` in already-lowercased `text`.
fn count_phrase(text: &str, phrase: &str) -> u32 {
    let mut count = 0;
    let mut rest = text;
    while let Some(pos) = rest.find(phrase) {
        let before_ok = rest[..pos].chars().next_back().map_or(true, |c| !c.is_alphanumeric());
        let after = &rest[pos + phrase.len()..];
        // Allow simple plurals ("tickets", "pages").
        let after_trimmed = after.strip_prefix('s').unwrap_or(after);
        let after_ok = after_trimmed.chars().next().map_or(true, |c| !c.is_alphanumeric());
        if before_ok && after_ok {
            count += 1;
        }
        rest = &rest[pos + phrase.len()..];
    }
    count
}

/// Fixed, inspectable routing policy over the enabled specialists.
#[derive(Debug, Clone)]
pub struct RoutingPolicy {
    enabled: Vec<SourceSystem>,
}

impl Default for RoutingPolicy {
    fn default() -> Self {
        Self::new(SourceSystem::ALL.to_vec())
    }
}

impl RoutingPolicy {
    pub fn new(enabled: Vec<SourceSystem>) -> Self {
        Self { enabled }
    }

    pub fn enabled(&self) -> &[SourceSystem] {
        &self.enabled
    }

    fn offer(&self, system: SourceSystem, rationale: String, confidence: f32) -> RouteDecision {
        if self.enabled.contains(&system) {
            RouteDecision::delegate(system, rationale, confidence)
        } else {
            RouteDecision::clarify(
                format!(
                    "{} is not available right now. Which other system should I use?",
                    system.display_name()
                ),
                format!("{rationale}, but {system} is disabled"),
            )
        }
    }

    /// Keyword scores for every enabled system, highest first.
    pub fn scores(&self, utterance: &str) -> Vec<(SourceSystem, u32)> {
        let lower = utterance.to_lowercase();
        let mut scores: BTreeMap<SourceSystem, u32> = BTreeMap::new();
        for (system, words) in VOCABULARY {
            if !self.enabled.contains(system) {
                continue;
            }
            let score: u32 = words.iter().map(|(w, weight)| count_phrase(&lower, w) * weight).sum();
            scores.insert(*system, score);
        }
        if let Some(jira) = scores.get_mut(&SourceSystem::Jira) {
            if ISSUE_KEY_RE.is_match(utterance) {
                *jira += 2;
            }
        }
        let mut ranked: Vec<(SourceSystem, u32)> = scores.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        ranked
    }

    pub fn route(&self, request: &Request) -> RouteDecision {
        let decision = self.decide(&request.utterance);
        debug!(
            session_id = %request.session_id,
            route = ?decision.route,
            confidence = decision.confidence,
            rationale = %decision.rationale,
            "Routing decision"
        );
        decision
    }

    fn decide(&self, utterance: &str) -> RouteDecision {
        let trimmed = utterance.trim();
        if trimmed.is_empty() {
            return RouteDecision::clarify("What would you like me to do?", "empty request");
        }

        let destinations: Vec<SourceSystem> = dedup(
            DESTINATION_RE
                .captures_iter(trimmed)
                .filter_map(|c| system_from_name(&c[1])),
        );
        let sources: Vec<SourceSystem> = dedup(
            SOURCE_RE
                .captures_iter(trimmed)
                .filter_map(|c| c.get(1).or_else(|| c.get(2)))
                .filter_map(|m| system_from_name(m.as_str())),
        );
        let ingest = INGEST_RE.is_match(trimmed);

        // Ingestion routes by where the file comes from.
        if ingest {
            if let [source] = sources.as_slice() {
                return self.offer(*source, format!("ingestion of {} content", source.display_name()), 0.9);
            }
        }

        match destinations.as_slice() {
            [only] => {
                return self.offer(*only, format!("explicit destination {}", only.display_name()), 0.95);
            }
            [] => {}
            several => {
                return RouteDecision::clarify(
                    format!("Should I use {}?", join_or(several)),
                    "several explicit destinations",
                );
            }
        }

        if let [source] = sources.as_slice() {
            return self.offer(*source, format!("request about {} content", source.display_name()), 0.85);
        }

        let ranked = self.scores(trimmed);
        let named_system = ranked
            .iter()
            .any(|(s, score)| *s != SourceSystem::LocalPdf && *score >= 3);
        if !named_system && LOCAL_PATH_RE.is_match(trimmed) {
            return self.offer(SourceSystem::LocalPdf, "local filesystem path".to_string(), 0.85);
        }

        match ranked.as_slice() {
            [(best, top), rest @ ..] if *top > 0 => {
                let runner_up = rest.first().map(|(_, s)| *s).unwrap_or(0);
                if *top > runner_up {
                    let confidence = (0.5 + 0.1 * (top - runner_up) as f32).min(0.9);
                    return RouteDecision::delegate(
                        *best,
                        format!("keyword score {top} for {}", best.display_name()),
                        confidence,
                    );
                }
                let tied: Vec<SourceSystem> =
                    ranked.iter().filter(|(_, s)| s == top).map(|(system, _)| *system).collect();
                RouteDecision::clarify(
                    format!("Should I use {} for this?", join_or(&tied)),
                    format!("tied keyword score {top}"),
                )
            }
            _ => RouteDecision::clarify(
                format!(
                    "Which system should I use: {}?",
                    join_or(&self.enabled)
                ),
                "no destination recognised",
            ),
        }
    }
}

fn dedup(systems: impl Iterator<Item = SourceSystem>) -> Vec<SourceSystem> {
    let mut out = Vec::new();
    for system in systems {
        if !out.contains(&system) {
            out.push(system);
        }
    }
    out
}

fn join_or(systems: &[SourceSystem]) -> String {
    let names: Vec<&str> = systems.iter().map(|s| s.display_name()).collect();
    match names.as_slice() {
        [] => String::new(),
        [one] => one.to_string(),
        [init @ .., last] => format!("{} or {}", init.join(", "), last),
    }
}
