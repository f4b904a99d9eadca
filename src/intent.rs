//! Intent classifier (§4.4, Open Question 2).
//!
//! Resolved as a pure rule-based classifier rather than an LLM call: the
//! spec's latency budget for classification (`ORCHESTRATOR_CLASSIFIER_DEADLINE_MS`,
//! default 150ms) is tight enough that a network round-trip to a model
//! provider would routinely blow it, and the input signals (explicit tool
//! mentions, message length, presence of a scenario keyword) are cheap to
//! evaluate locally. See DESIGN.md for the full tradeoff.

use crate::models::{IntentClassification, IntentPath};

const TOOL_MARKERS: &[&str] = &["search", "lookup", "calculate", "fetch", "run", "execute", "query"];
const MULTI_AGENT_MARKERS: &[(&str, &str)] = &[
    ("simulate", "simulation"),
    ("roleplay", "roleplay"),
    ("debate", "debate"),
    ("brainstorm", "brainstorm"),
];
const LONG_MESSAGE_THRESHOLD: usize = 600;

/// Classifies a single user turn in isolation. Pure function: no I/O, no
/// shared state, safe to call inline on the request-handling task.
pub fn classify(message: &str) -> IntentClassification {
    let lowered = message.to_ascii_lowercase();

    for (marker, scenario) in MULTI_AGENT_MARKERS {
        if lowered.contains(marker) {
            return IntentClassification {
                path: IntentPath::MultiAgent,
                confidence: 0.7,
                tools_hint: Vec::new(),
                scenario: Some((*scenario).to_string()),
            };
        }
    }

    let matched_tools: Vec<String> = TOOL_MARKERS
        .iter()
        .filter(|m| lowered.contains(*m))
        .map(|m| m.to_string())
        .collect();

    if !matched_tools.is_empty() {
        return IntentClassification {
            path: IntentPath::Tool,
            confidence: 0.6 + 0.1 * matched_tools.len().min(3) as f32,
            tools_hint: matched_tools,
            scenario: None,
        };
    }

    if message.len() > LONG_MESSAGE_THRESHOLD {
        return IntentClassification {
            path: IntentPath::Tool,
            confidence: 0.4,
            tools_hint: Vec::new(),
            scenario: None,
        };
    }

    IntentClassification {
        path: IntentPath::Fast,
        confidence: 0.9,
        tools_hint: Vec::new(),
        scenario: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_plain_message_is_fast_path() {
        let c = classify("hello, how are you?");
        assert_eq!(c.path, IntentPath::Fast);
    }

    #[test]
    fn tool_marker_routes_to_tool_path() {
        let c = classify("please search the web for the latest release notes");
        assert_eq!(c.path, IntentPath::Tool);
        assert!(c.tools_hint.contains(&"search".to_string()));
    }

    #[test]
    fn scenario_marker_routes_to_multi_agent() {
        let c = classify("let's roleplay a negotiation between two diplomats");
        assert_eq!(c.path, IntentPath::MultiAgent);
        assert_eq!(c.scenario.as_deref(), Some("roleplay"));
    }

    #[test]
    fn very_long_plain_message_prefers_tool_path() {
        let long = "a".repeat(700);
        let c = classify(&long);
        assert_eq!(c.path, IntentPath::Tool);
    }

    #[test]
    fn multi_agent_marker_takes_priority_over_tool_marker() {
        let c = classify("simulate a debate where we search for facts");
        assert_eq!(c.path, IntentPath::MultiAgent);
    }
}
