//! Fallback-aware access to the model chain.

use super::{
    Availability, AvailabilityTable, CallFailureKind, CompletionRequest, GenerateOptions,
    LlmProvider, ModelCallResult, ProviderFailure, TextGenerator,
};
use crate::Result;
use crate::models::{ModelSpec, validate_fallback_order};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct ModelSlot {
    spec: ModelSpec,
    provider: Arc<dyn LlmProvider>,
}

/// Resilient client over an ordered chain of models.
///
/// Models are tried from the highest capability tier down. A retriable
/// failure moves on to the next model; the same model is never retried
/// within one call. Non-retriable failures surface immediately.
pub struct ModelAccessLayer {
    chain: Vec<ModelSlot>,
    availability: Arc<AvailabilityTable>,
}

impl ModelAccessLayer {
    /// Creates an access layer.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidInput`] if the chain is empty or two
    /// models share a tier or an id.
    pub fn new(
        models: Vec<(ModelSpec, Arc<dyn LlmProvider>)>,
        availability: Arc<AvailabilityTable>,
    ) -> Result<Self> {
        let specs: Vec<ModelSpec> = models.iter().map(|(spec, _)| spec.clone()).collect();
        validate_fallback_order(&specs)?;

        let mut chain: Vec<ModelSlot> = models
            .into_iter()
            .map(|(spec, provider)| ModelSlot { spec, provider })
            .collect();
        chain.sort_by(|a, b| b.spec.tier.cmp(&a.spec.tier));

        Ok(Self {
            chain,
            availability,
        })
    }

    /// Iterates over the chain, primary first.
    pub fn chain(&self) -> impl Iterator<Item = &ModelSpec> {
        self.chain.iter().map(|slot| &slot.spec)
    }

    /// Shared availability table.
    #[must_use]
    pub const fn availability(&self) -> &Arc<AvailabilityTable> {
        &self.availability
    }

    fn attempt(
        slot: &ModelSlot,
        prompt: &str,
        options: &GenerateOptions,
    ) -> (std::result::Result<String, ProviderFailure>, Duration) {
        let request = CompletionRequest {
            prompt: prompt.to_string(),
            system: options.system.clone(),
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            timeout: options.deadline,
        };
        let start = Instant::now();
        let outcome = slot.provider.complete(&request);
        let latency = start.elapsed();
        let outcome = outcome.and_then(|text| check_response(text, &slot.spec, latency, options.deadline));
        (outcome, latency)
    }
}

fn check_response(
    text: String,
    spec: &ModelSpec,
    latency: Duration,
    deadline: Duration,
) -> std::result::Result<String, ProviderFailure> {
    if latency > deadline {
        return Err(ProviderFailure::new(
            CallFailureKind::Timeout,
            format!(
                "response arrived after {}ms, deadline {}ms",
                latency.as_millis(),
                deadline.as_millis()
            ),
        ));
    }
    if text.trim().is_empty() {
        return Err(ProviderFailure::new(
            CallFailureKind::MalformedResponse,
            "empty response",
        ));
    }
    let chars = text.chars().count();
    if chars > spec.max_response_chars {
        return Err(ProviderFailure::new(
            CallFailureKind::MalformedResponse,
            format!(
                "response of {chars} chars exceeds limit of {}",
                spec.max_response_chars
            ),
        ));
    }
    Ok(text)
}

impl TextGenerator for ModelAccessLayer {
    fn generate(&self, prompt: &str, options: &GenerateOptions) -> ModelCallResult {
        let prompt_chars = prompt.chars().count();
        let span = tracing::info_span!(
            "llm.generate",
            prompt_chars,
            model_used = tracing::field::Empty,
            attempts = tracing::field::Empty,
            status = tracing::field::Empty
        );
        let _enter = span.enter();

        let eligible: Vec<&ModelSlot> = self
            .chain
            .iter()
            .filter(|slot| {
                let fits = slot.spec.accepts_prompt(prompt_chars);
                if !fits {
                    tracing::debug!(
                        model = %slot.spec.id,
                        prompt_chars,
                        limit = slot.spec.max_request_chars,
                        "Skipping model: prompt exceeds request limit"
                    );
                }
                fits
            })
            .collect();

        if eligible.is_empty() {
            span.record("status", "invalid_request");
            tracing::warn!(prompt_chars, "No configured model accepts a prompt of this size");
            return ModelCallResult::Failure {
                kind: CallFailureKind::InvalidRequest,
                retriable: false,
                message: format!("no configured model accepts a prompt of {prompt_chars} chars"),
                attempted: Vec::new(),
            };
        }

        let mut attempted: Vec<String> = Vec::new();
        let mut last_failure: Option<ProviderFailure> = None;

        for slot in eligible {
            let model_id = slot.spec.id.as_str();
            match self.availability.check(model_id) {
                Availability::CoolingDown { remaining } => {
                    metrics::counter!("model_cooldown_skips_total", "model" => model_id.to_string())
                        .increment(1);
                    tracing::debug!(
                        model = %model_id,
                        remaining_ms = u64::try_from(remaining.as_millis()).unwrap_or(u64::MAX),
                        "Skipping model in cooldown"
                    );
                    continue;
                },
                Availability::HalfOpen => {
                    tracing::debug!(model = %model_id, "Trying model after cooldown");
                },
                Availability::Available => {},
            }

            if let Some(previous) = attempted.last() {
                metrics::counter!(
                    "model_fallbacks_total",
                    "from" => previous.clone(),
                    "to" => model_id.to_string()
                )
                .increment(1);
            }
            attempted.push(model_id.to_string());

            let (outcome, latency) = Self::attempt(slot, prompt, options);
            #[allow(clippy::cast_precision_loss)]
            metrics::histogram!("model_call_duration_ms", "model" => model_id.to_string())
                .record(latency.as_millis() as f64);

            match outcome {
                Ok(text) => {
                    self.availability.record_success(model_id);
                    metrics::counter!(
                        "model_calls_total",
                        "model" => model_id.to_string(),
                        "status" => "success"
                    )
                    .increment(1);
                    span.record("model_used", model_id);
                    span.record("attempts", attempted.len());
                    span.record("status", "success");
                    return ModelCallResult::Success {
                        text,
                        latency,
                        model_used: model_id.to_string(),
                    };
                },
                Err(failure) => {
                    metrics::counter!(
                        "model_calls_total",
                        "model" => model_id.to_string(),
                        "status" => failure.kind.as_str()
                    )
                    .increment(1);

                    if !failure.kind.is_retriable() {
                        tracing::warn!(
                            model = %model_id,
                            kind = %failure.kind,
                            error = %failure.message,
                            "Model call failed permanently"
                        );
                        span.record("attempts", attempted.len());
                        span.record("status", failure.kind.as_str());
                        return ModelCallResult::Failure {
                            kind: failure.kind,
                            retriable: false,
                            message: failure.message,
                            attempted,
                        };
                    }

                    if self.availability.record_failure(model_id) {
                        tracing::warn!(
                            model = %model_id,
                            cooldown_ms = u64::try_from(
                                self.availability.config().cooldown.as_millis()
                            )
                            .unwrap_or(u64::MAX),
                            "Model entered cooldown"
                        );
                    }
                    tracing::warn!(
                        model = %model_id,
                        kind = %failure.kind,
                        error = %failure.message,
                        "Model call failed, falling back"
                    );
                    last_failure = Some(failure);
                },
            }
        }

        metrics::counter!("model_chain_exhausted_total").increment(1);
        span.record("attempts", attempted.len());
        span.record("status", "exhausted");
        let message = last_failure.map_or_else(
            || "every model is cooling down".to_string(),
            |f| format!("all models failed; last: {f}"),
        );
        tracing::warn!(attempted = ?attempted, "Model chain exhausted");
        ModelCallResult::Failure {
            kind: CallFailureKind::Exhausted,
            retriable: true,
            message,
            attempted,
        }
    }
}
