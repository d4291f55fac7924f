//! Chunked event extraction.
//!
//! The report text is split into paragraph-bounded chunks and every chunk
//! is sent to the reasoning service concurrently (the gateway's limiter
//! bounds the actual fan-out). A chunk whose output cannot be repaired is
//! dropped and reported; its siblings are unaffected.

use chrono::{Local, NaiveDate};
use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::adapters::ReasoningRequest;
use crate::config::ExtractionSettings;
use crate::core::gateway::ReasoningGateway;
use crate::domain::DisruptionEvent;

use super::chunker::chunk_text;
use super::repair::{repair_json, RepairError, RepairStrategy};

/// Why a single chunk produced no events
#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("Reasoning call failed: {0}")]
    Reasoning(String),

    #[error(transparent)]
    Repair(#[from] RepairError),
}

/// A chunk that was dropped
#[derive(Debug, Clone, Serialize)]
pub struct ChunkFailure {
    pub chunk_index: usize,
    pub error: String,
}

/// Result of extracting one document
#[derive(Debug, Clone, Default)]
pub struct ExtractionReport {
    /// Events in chunk order
    pub events: Vec<DisruptionEvent>,
    /// Number of chunks sent
    pub chunks: usize,
    pub failures: Vec<ChunkFailure>,
}

/// Turns report text into [`DisruptionEvent`]s
#[derive(Clone)]
pub struct EventExtractor {
    gateway: ReasoningGateway,
    model: String,
    chunk_chars: usize,
    max_tokens: u32,
    ingestion_date: Option<NaiveDate>,
}

impl EventExtractor {
    pub fn new(gateway: ReasoningGateway, model: impl Into<String>, settings: &ExtractionSettings) -> Self {
        Self {
            gateway,
            model: model.into(),
            chunk_chars: settings.chunk_chars.max(1),
            max_tokens: settings.max_tokens,
            ingestion_date: None,
        }
    }

    /// Pin the date used for events that carry no date of their own
    pub fn with_ingestion_date(mut self, date: NaiveDate) -> Self {
        self.ingestion_date = Some(date);
        self
    }

    fn system_prompt(&self) -> String {
        let today = self
            .ingestion_date
            .unwrap_or_else(|| Local::now().date_naive())
            .format("%Y-%m-%d");
        extraction_contract(&today.to_string())
    }

    /// Extract events from the full report text
    #[instrument(skip(self, text), fields(chars = text.len()))]
    pub async fn extract(&self, text: &str) -> ExtractionReport {
        let chunks = chunk_text(text, self.chunk_chars);
        if chunks.is_empty() {
            return ExtractionReport::default();
        }

        let system = self.system_prompt();
        let calls = chunks
            .iter()
            .enumerate()
            .map(|(index, chunk)| self.extract_chunk(index, &system, chunk));
        let results = join_all(calls).await;

        let mut report = ExtractionReport {
            chunks: chunks.len(),
            ..Default::default()
        };

        for (chunk_index, result) in results.into_iter().enumerate() {
            match result {
                Ok(events) => report.events.extend(events),
                Err(e) => {
                    warn!(chunk_index, error = %e, "Chunk dropped");
                    report.failures.push(ChunkFailure {
                        chunk_index,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            chunks = report.chunks,
            events = report.events.len(),
            failed = report.failures.len(),
            "Extraction complete"
        );
        report
    }

    async fn extract_chunk(
        &self,
        index: usize,
        system: &str,
        chunk: &str,
    ) -> Result<Vec<DisruptionEvent>, ChunkError> {
        let request = ReasoningRequest::new(&self.model, system, format!("REPORT_CHUNK:\n{}", chunk))
            .with_max_tokens(self.max_tokens);

        let repaired = self
            .gateway
            .complete(&request, |raw| repair_json(raw.trim()))
            .await
            .map_err(|e| ChunkError::Reasoning(format!("{:#}", e)))??;
        if repaired.strategy != RepairStrategy::AsIs {
            debug!(chunk_index = index, strategy = repaired.strategy.name(), "Chunk output repaired");
        }

        Ok(events_from_value(&repaired.value))
    }
}

/// Pull events out of a repaired model response.
///
/// Accepts a bare array, an object wrapping an `events` array, or a single
/// event object. Non-object array elements are skipped.
pub fn events_from_value(value: &Value) -> Vec<DisruptionEvent> {
    match value {
        Value::Array(items) => items.iter().filter_map(DisruptionEvent::from_value).collect(),
        Value::Object(obj) => match obj.get("events") {
            Some(Value::Array(items)) => items.iter().filter_map(DisruptionEvent::from_value).collect(),
            _ => DisruptionEvent::from_value(value).into_iter().collect(),
        },
        _ => Vec::new(),
    }
}

fn extraction_contract(today: &str) -> String {
    format!(
        r#"You extract airline irregular-operations (IROPS) disruption events from report text.

Respond with a JSON array of event objects and nothing else.

Each event object has:
- event_id: string
- event_type: list drawn from Weather, Threat, Crew, Traffic, MechanicalFailure, Other
- severity: list drawn from Low, Medium, High, Critical
- impact_description: list of short factual phrases
- airport_code: list of IATA codes
- start_time: "YYYY-MM-DD HH:MM"
- end_time: "YYYY-MM-DD HH:MM"
- actions: list of realistic operational actions

Times:
- "between X and Y" or "from X to Y": start_time X, end_time Y
- "from X onwards": start_time X, end_time ""
- "until Y": end_time Y
- When no date is given use {today}
- Keep local times as written
- Missing times are "", never null and never "Unknown"

List fields are always lists, even with one entry. Use double quotes and no trailing commas."#,
        today = today
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
    use std::sync::Arc;
    use std::time::Duration;

    /// Answers by looking for a marker word in the chunk
    struct ScriptedReasoner {
        script: Vec<(&'static str, &'static str)>,
    }

    #[async_trait]
    impl Reasoner for ScriptedReasoner {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, request: &ReasoningRequest) -> Result<ReasoningOutput> {
            for (marker, reply) in &self.script {
                if request.user.contains(marker) {
                    return Ok(ReasoningOutput::new(reply.to_string()));
                }
            }
            anyhow::bail!("no scripted reply")
        }
    }

    fn extractor(script: Vec<(&'static str, &'static str)>, chunk_chars: usize) -> EventExtractor {
        let gateway = ReasoningGateway::new(
            Arc::new(ScriptedReasoner { script }),
            Arc::new(RateGuard::new(TokenBucket::new(100.0, 100.0), 2, Duration::from_millis(1))),
            Arc::new(ResponseCache::new()),
        );
        let settings = ExtractionSettings {
            chunk_chars,
            max_tokens: 1200,
        };
        EventExtractor::new(gateway, "gpt-4", &settings)
            .with_ingestion_date(NaiveDate::from_ymd_opt(2025, 1, 14).unwrap())
    }

    #[tokio::test]
    async fn test_truncated_middle_chunk_keeps_leading_objects() {
        let text = "ALPHA fog at DEL\n\nBRAVO crew shortage at BOM\n\nCHARLIE runway closure at BLR";
        let ex = extractor(
            vec![
                ("ALPHA", r#"[{"event_id":"A1","event_type":["Weather"]}]"#),
                (
                    "BRAVO",
                    r#"[{"event_id":"B1","event_type":["Crew"]},{"event_id":"B2","event_type":["Cr"#,
                ),
                ("CHARLIE", r#"[{"event_id":"C1","event_type":"Traffic"}]"#),
            ],
            20,
        );

        let report = ex.extract(text).await;
        assert_eq!(report.chunks, 3);
        assert!(report.failures.is_empty());

        let ids: Vec<&str> = report.events.iter().map(|e| e.event_id.as_str()).collect();
        assert_eq!(ids.first(), Some(&"A1"));
        assert!(ids.contains(&"B1"));
        assert_eq!(ids.last(), Some(&"C1"));
        assert_eq!(report.events.last().unwrap().event_type, vec!["Traffic"]);
    }

    #[tokio::test]
    async fn test_unrepairable_chunk_is_reported() {
        let text = "ALPHA fog at DEL\n\nBRAVO nothing useful";
        let ex = extractor(
            vec![
                ("ALPHA", r#"[{"event_id":"A1"}]"#),
                ("BRAVO", "Sorry, I cannot help with that."),
            ],
            20,
        );

        let report = ex.extract(text).await;
        assert_eq!(report.events.len(), 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].chunk_index, 1);
    }

    #[tokio::test]
    async fn test_reasoning_error_drops_only_that_chunk() {
        let text = "ALPHA fog at DEL\n\nZULU unscripted";
        let ex = extractor(vec![("ALPHA", r#"[{"event_id":"A1"}]"#)], 20);

        let report = ex.extract(text).await;
        assert_eq!(report.events.len(), 1);
        assert!(report.failures[0].error.contains("no scripted reply"));
    }

    /// Apologizes on the first call, answers properly after that
    struct FlakyReasoner {
        calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl Reasoner for FlakyReasoner {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn complete(&self, _request: &ReasoningRequest) -> Result<ReasoningOutput> {
            let reply = match self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst) {
                0 => "Sorry, temporarily unable.",
                _ => r#"[{"event_id":"E1"}]"#,
            };
            Ok(ReasoningOutput::new(reply.to_string()))
        }
    }

    #[tokio::test]
    async fn test_retry_after_unrepairable_reply_reaches_backend() {
        let reasoner = Arc::new(FlakyReasoner {
            calls: std::sync::atomic::AtomicUsize::new(0),
        });
        let gateway = ReasoningGateway::new(
            reasoner.clone(),
            Arc::new(RateGuard::new(TokenBucket::new(100.0, 100.0), 2, Duration::from_millis(1))),
            Arc::new(ResponseCache::new()),
        );
        let settings = ExtractionSettings {
            chunk_chars: 3000,
            max_tokens: 1200,
        };
        let ex = EventExtractor::new(gateway, "gpt-4", &settings);

        let first = ex.extract("fog at DEL").await;
        assert_eq!(first.failures.len(), 1);
        assert!(first.events.is_empty());

        let retry = ex.extract("fog at DEL").await;
        assert!(retry.failures.is_empty());
        assert_eq!(retry.events.len(), 1);
        assert_eq!(retry.events[0].event_id, "E1");
        assert_eq!(reasoner.calls.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_empty_text_sends_nothing() {
        let ex = extractor(vec![], 3000);
        let report = ex.extract("  \n\n ").await;
        assert_eq!(report.chunks, 0);
        assert!(report.events.is_empty());
    }

    #[test]
    fn test_events_from_wrapped_object() {
        let value = serde_json::json!({"events": [{"event_id": "E1"}, "junk", {"event_id": "E2"}]});
        let events = events_from_value(&value);
        assert_eq!(events.len(), 2);

        let single = serde_json::json!({"event_id": "E3"});
        assert_eq!(events_from_value(&single)[0].event_id, "E3");
        assert!(events_from_value(&serde_json::json!("text")).is_empty());
    }

    #[test]
    fn test_contract_carries_ingestion_date() {
        let ex = extractor(vec![], 3000);
        let prompt = ex.system_prompt();
        assert!(prompt.contains("2025-01-14"));
        assert!(prompt.contains("end_time \"\""));
    }
}
