//! Scripted model providers shared by the integration tests.

#![allow(dead_code, clippy::unwrap_used)]

use neuroprompt::llm::{
    AvailabilityConfig, AvailabilityTable, CallFailureKind, CompletionRequest, LlmProvider,
    ModelAccessLayer, ProviderFailure,
};
use neuroprompt::models::{ModelSpec, ProviderKind};
use regex::Regex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock, Mutex};
use std::time::Duration;

pub const EXECUTIVE_REQUEST: &str = "summarize a technical document for executives";

static SECTION_SLOT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""([^"]+)": "<text>""#).unwrap());
static ROLE_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<role>(\w+)</role>").unwrap());

/// Answers each role the way a cooperative model would.
///
/// Critic scores are taken from a queue; once it is empty every critique
/// scores `default_score`.
pub struct RoleProvider {
    scores: Mutex<VecDeque<u32>>,
    default_score: u32,
    roles: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl RoleProvider {
    pub fn new(scores: impl IntoIterator<Item = u32>, default_score: u32) -> Arc<Self> {
        Arc::new(Self {
            scores: Mutex::new(scores.into_iter().collect()),
            default_score,
            roles: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        })
    }

    /// Always accepts the first draft.
    pub fn accepting() -> Arc<Self> {
        Self::new([], 92)
    }

    /// Roles answered so far, in call order.
    pub fn roles(&self) -> Vec<String> {
        self.roles.lock().unwrap().clone()
    }

    fn sections(prompt: &str, call: usize) -> String {
        let sections: serde_json::Map<String, serde_json::Value> = SECTION_SLOT
            .captures_iter(prompt)
            .map(|c| {
                let name = c[1].to_string();
                let text = format!("{name} written for the request, pass {call}.");
                (name, serde_json::Value::String(text))
            })
            .collect();
        serde_json::json!({ "sections": sections }).to_string()
    }

    fn critique(&self) -> String {
        let score = self
            .scores
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.default_score);
        serde_json::json!({
            "score": score,
            "findings": [
                {"severity": "high", "section": "Situation", "suggestion": "Name the document"},
                {"severity": "high", "section": "Answer", "suggestion": "Bound the length"}
            ],
            "summary": "scripted critique"
        })
        .to_string()
    }
}

impl LlmProvider for RoleProvider {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderFailure> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let system = request.system.as_deref().unwrap_or_default();
        let role = ROLE_TAG
            .captures(system)
            .map_or_else(String::new, |c| c[1].to_string());
        self.roles.lock().unwrap().push(role.clone());

        match role.as_str() {
            "researcher" => Ok(
                r#"{"techniques": ["Lead with the conclusion", "Bound the output length"], "rationale": "executive audience"}"#
                    .to_string(),
            ),
            "critic" => Ok(self.critique()),
            "generator" | "optimizer" => Ok(Self::sections(&request.prompt, call)),
            other => Err(ProviderFailure::new(
                CallFailureKind::InvalidRequest,
                format!("unexpected role '{other}'"),
            )),
        }
    }
}

/// Fails every call the same way, optionally after a delay.
pub struct FailingProvider {
    kind: CallFailureKind,
    delay: Duration,
    calls: AtomicUsize,
}

impl FailingProvider {
    pub fn new(kind: CallFailureKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl LlmProvider for FailingProvider {
    fn name(&self) -> &'static str {
        "failing"
    }

    fn complete(&self, _request: &CompletionRequest) -> Result<String, ProviderFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        Err(ProviderFailure::new(self.kind, format!("scripted {}", self.kind)))
    }
}

/// Answers correctly, but only after `delay`.
pub struct SlowProvider {
    delay: Duration,
    calls: AtomicUsize,
}

impl SlowProvider {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl LlmProvider for SlowProvider {
    fn name(&self) -> &'static str {
        "slow"
    }

    fn complete(&self, _request: &CompletionRequest) -> Result<String, ProviderFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        Ok(r#"{"techniques": []}"#.to_string())
    }
}

/// Builds a chain where the first entry gets the highest tier.
pub fn chain(providers: Vec<Arc<dyn LlmProvider>>) -> ModelAccessLayer {
    let count = u32::try_from(providers.len()).unwrap();
    let models = providers
        .into_iter()
        .enumerate()
        .map(|(i, provider)| {
            let rank = u32::try_from(i).unwrap();
            let spec = ModelSpec::new(format!("model-{rank}"), ProviderKind::OpenRouter, count - rank);
            (spec, provider)
        })
        .collect();
    ModelAccessLayer::new(
        models,
        Arc::new(AvailabilityTable::new(AvailabilityConfig::default())),
    )
    .unwrap()
}
