//! Per-event agent selection.
//!
//! The classifier asks the reasoning service which agents must act on an
//! event. Its output contract is strict: `{"selected_agents": [..],
//! "reason": ".."}`. Anything else degrades to monitoring only. Monitoring
//! is appended to every selection so no event goes unrecorded.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::adapters::ReasoningRequest;
use crate::domain::{AgentKind, DisruptionEvent, RoutingDecision};

use super::gateway::ReasoningGateway;

/// Reason recorded when the classifier output is unusable
pub const FALLBACK_REASON: &str = "fallback — invalid output";

const ROUTING_MAX_TOKENS: u32 = 200;

/// Operator-supplied routing hint embedded in the classifier prompt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingRule {
    pub name: String,
    pub description: String,
}

/// Model-backed routing classifier
#[derive(Clone)]
pub struct RoutingClassifier {
    gateway: ReasoningGateway,
    model: String,
    rules: Vec<RoutingRule>,
}

impl RoutingClassifier {
    pub fn new(gateway: ReasoningGateway, model: impl Into<String>) -> Self {
        Self {
            gateway,
            model: model.into(),
            rules: Vec::new(),
        }
    }

    pub fn with_rules(mut self, rules: Vec<RoutingRule>) -> Self {
        self.rules = rules;
        self
    }

    /// Decide which agents handle `event`. Never fails.
    #[instrument(skip(self, event), fields(event_id = %event.event_id))]
    pub async fn classify(&self, event: &DisruptionEvent) -> RoutingDecision {
        let user = match routing_input(event, &self.rules) {
            Ok(user) => user,
            Err(e) => {
                warn!(error = %e, "Could not serialize event for routing");
                return fallback_decision();
            }
        };

        let request =
            ReasoningRequest::new(&self.model, routing_contract(), user).with_max_tokens(ROUTING_MAX_TOKENS);

        // Fallback output is rejected so it is not cached
        let accept = |raw: &str| {
            let decision = parse_routing(raw);
            if decision.fallback {
                Err(decision)
            } else {
                Ok(decision)
            }
        };

        let decision = match self.gateway.complete(&request, accept).await {
            Ok(Ok(decision)) | Ok(Err(decision)) => decision,
            Err(e) => {
                warn!(error = %format!("{:#}", e), "Routing call failed");
                fallback_decision()
            }
        };

        if decision.fallback {
            warn!("Routing fell back to monitoring");
        } else {
            debug!(agents = ?decision.selected_agents, "Routed");
        }
        decision
    }
}

/// Interpret raw classifier output.
///
/// Unknown agent names are dropped (and logged), a missing reason is
/// allowed. Output that is not a JSON object with a `selected_agents`
/// list yields the monitoring fallback. The result always contains
/// monitoring exactly once.
pub fn parse_routing(raw: &str) -> RoutingDecision {
    let Some(value) = parse_object(raw) else {
        return fallback_decision();
    };

    let Some(names) = value.get("selected_agents").and_then(Value::as_array) else {
        return fallback_decision();
    };

    let mut selected = Vec::with_capacity(names.len() + 1);
    for name in names {
        let Some(name) = name.as_str() else {
            warn!(value = %name, "Non-string agent in routing output");
            continue;
        };
        match name.parse::<AgentKind>() {
            Ok(kind) => selected.push(kind),
            Err(e) => warn!(error = %e, "Rejected agent from routing output"),
        }
    }

    let reason = value
        .get("reason")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    RoutingDecision {
        selected_agents: with_monitoring(selected),
        reason,
        fallback: false,
    }
}

pub fn fallback_decision() -> RoutingDecision {
    RoutingDecision {
        selected_agents: vec![AgentKind::Monitoring],
        reason: FALLBACK_REASON.to_string(),
        fallback: true,
    }
}

/// Dedupe preserving first occurrence, then make sure monitoring is present
fn with_monitoring(agents: Vec<AgentKind>) -> Vec<AgentKind> {
    let mut out: Vec<AgentKind> = Vec::with_capacity(agents.len() + 1);
    for agent in agents {
        if !out.contains(&agent) {
            out.push(agent);
        }
    }
    if !out.contains(&AgentKind::Monitoring) {
        out.push(AgentKind::Monitoring);
    }
    out
}

/// Parse a JSON object, tolerating prose or code fences around it
fn parse_object(raw: &str) -> Option<Value> {
    let raw = raw.trim();
    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(raw) {
        return Some(value);
    }

    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<Value>(&raw[start..=end]) {
        Ok(value @ Value::Object(_)) => Some(value),
        _ => None,
    }
}

fn routing_input(event: &DisruptionEvent, rules: &[RoutingRule]) -> serde_json::Result<String> {
    Ok(format!(
        "EVENT:\n{}\n\nROUTING_RULES:\n{}\n\nRespond with JSON only.",
        serde_json::to_string_pretty(event)?,
        serde_json::to_string_pretty(rules)?
    ))
}

fn routing_contract() -> String {
    let categories = AgentKind::ALL
        .iter()
        .map(|kind| format!("- {}: {}", kind.as_str(), kind.description()))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"You route airline irregular-operations events to operational agents.

Agents:
{categories}

Respond with exactly this JSON shape and nothing else:
{{"selected_agents": ["agent_name", ...], "reason": "short explanation"}}

Use only the agent names listed above. Select every agent the event gives a
signal for. When unsure include "monitoring". Follow any ROUTING_RULES given
with the event."#,
        categories = categories
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{Reasoner, ReasoningOutput};
    use crate::core::cache::ResponseCache;
    use crate::core::limiter::{RateGuard, TokenBucket};
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    struct FixedReasoner {
        reply: Result<String, String>,
        last_user: Mutex<Option<String>>,
    }

    #[async_trait]
    impl Reasoner for FixedReasoner {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn complete(&self, request: &ReasoningRequest) -> Result<ReasoningOutput> {
            *self.last_user.lock().unwrap() = Some(request.user.clone());
            match &self.reply {
                Ok(reply) => Ok(ReasoningOutput::new(reply.clone())),
                Err(e) => anyhow::bail!("{}", e),
            }
        }
    }

    fn classifier(reply: Result<&str, &str>) -> (RoutingClassifier, Arc<FixedReasoner>) {
        let reasoner = Arc::new(FixedReasoner {
            reply: reply.map(str::to_string).map_err(str::to_string),
            last_user: Mutex::new(None),
        });
        let gateway = ReasoningGateway::new(
            reasoner.clone(),
            Arc::new(RateGuard::new(TokenBucket::new(10.0, 10.0), 2, Duration::from_millis(1))),
            Arc::new(ResponseCache::new()),
        );
        (RoutingClassifier::new(gateway, "gpt-4o-mini"), reasoner)
    }

    fn fog_event() -> DisruptionEvent {
        DisruptionEvent::from_value(&serde_json::json!({
            "event_id": "FOG-1",
            "event_type": ["Weather"],
            "severity": ["High"],
            "airport_code": ["DEL"]
        }))
        .unwrap()
    }

    #[test]
    fn test_missing_reason_appends_monitoring() {
        let decision = parse_routing(r#"{"selected_agents": ["weather_agent"]}"#);
        assert_eq!(
            decision.selected_agents,
            vec![AgentKind::WeatherAgent, AgentKind::Monitoring]
        );
        assert_eq!(decision.reason, "");
        assert!(!decision.fallback);
    }

    #[test]
    fn test_unparseable_output_falls_back() {
        for raw in ["", "weather_agent please", "[\"weather_agent\"]", r#"{"agents": []}"#] {
            let decision = parse_routing(raw);
            assert_eq!(decision.selected_agents, vec![AgentKind::Monitoring], "{}", raw);
            assert_eq!(decision.reason, FALLBACK_REASON);
            assert!(decision.fallback);
        }
    }

    #[test]
    fn test_unknown_agents_rejected_and_aliases_mapped() {
        let decision = parse_routing(
            r#"{"selected_agents": ["catering_agent", "crew_agent", "monitoring_agent", 7], "reason": "crew"}"#,
        );
        assert_eq!(decision.selected_agents, vec![AgentKind::CrewAgent, AgentKind::Monitoring]);
        assert_eq!(decision.reason, "crew");
    }

    #[test]
    fn test_duplicates_collapsed() {
        let decision = parse_routing(
            r#"{"selected_agents": ["monitoring", "traffic_agent", "traffic_agent"], "reason": "r"}"#,
        );
        assert_eq!(
            decision.selected_agents,
            vec![AgentKind::Monitoring, AgentKind::TrafficAgent]
        );
    }

    #[test]
    fn test_fenced_output_accepted() {
        let decision =
            parse_routing("```json\n{\"selected_agents\": [\"weather_agent\"], \"reason\": \"fog\"}\n```");
        assert_eq!(
            decision.selected_agents,
            vec![AgentKind::WeatherAgent, AgentKind::Monitoring]
        );
    }

    #[tokio::test]
    async fn test_classify_embeds_rules() {
        let (classifier, reasoner) =
            classifier(Ok(r#"{"selected_agents": ["weather_agent"], "reason": "fog"}"#));
        let classifier = classifier.with_rules(vec![RoutingRule {
            name: "fog".to_string(),
            description: "RVR below 200m goes to weather_agent".to_string(),
        }]);

        let decision = classifier.classify(&fog_event()).await;
        assert_eq!(decision.reason, "fog");

        let sent = reasoner.last_user.lock().unwrap().clone().unwrap();
        assert!(sent.contains("FOG-1"));
        assert!(sent.contains("RVR below 200m"));
    }

    #[tokio::test]
    async fn test_reasoning_failure_falls_back() {
        let (classifier, _) = classifier(Err("endpoint down"));
        let decision = classifier.classify(&fog_event()).await;
        assert!(decision.fallback);
        assert_eq!(decision.selected_agents, vec![AgentKind::Monitoring]);
    }

    /// Replies from `replies` in order, repeating the last one
    struct SequenceReasoner {
        replies: Vec<&'static str>,
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl Reasoner for SequenceReasoner {
        fn name(&self) -> &str {
            "sequence"
        }

        async fn complete(&self, _request: &ReasoningRequest) -> Result<ReasoningOutput> {
            let mut calls = self.calls.lock().unwrap();
            let reply = self.replies[(*calls).min(self.replies.len() - 1)];
            *calls += 1;
            Ok(ReasoningOutput::new(reply.to_string()))
        }
    }

    #[tokio::test]
    async fn test_fallback_reply_is_not_cached() {
        let reasoner = Arc::new(SequenceReasoner {
            replies: vec!["no idea", r#"{"selected_agents": ["weather_agent"], "reason": "fog"}"#],
            calls: Mutex::new(0),
        });
        let gateway = ReasoningGateway::new(
            reasoner.clone(),
            Arc::new(RateGuard::new(TokenBucket::new(10.0, 10.0), 2, Duration::from_millis(1))),
            Arc::new(ResponseCache::new()),
        );
        let classifier = RoutingClassifier::new(gateway, "gpt-4o-mini");

        assert!(classifier.classify(&fog_event()).await.fallback);

        let retry = classifier.classify(&fog_event()).await;
        assert!(!retry.fallback);
        assert_eq!(retry.selected_agents, vec![AgentKind::WeatherAgent, AgentKind::Monitoring]);

        // The good answer is cached
        classifier.classify(&fog_event()).await;
        assert_eq!(*reasoner.calls.lock().unwrap(), 2);
    }

    #[test]
    fn test_contract_lists_every_agent() {
        let contract = routing_contract();
        for kind in AgentKind::ALL {
            assert!(contract.contains(kind.as_str()));
        }
    }
}
