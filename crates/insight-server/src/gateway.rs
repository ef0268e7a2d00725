use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use insight_config::Config;
use insight_contracts::{
    CompletionRequest, ContactSummaryRequest, ContactSummaryResult, DigestRequest, DigestResult,
    InvocationLogRecord, InvocationStatus, JobType, Metadata, NextStepRequest, NextStepResult,
    ResponseFormat, Timeframe, TokenUsage, PROVIDER_FALLBACK, PROVIDER_FALLBACK_ERROR,
};
use insight_kernel::{
    contact_summary_prompt, digest_cache_key, digest_fingerprint, digest_prompt,
    next_step_prompt, parse_contact_summary, parse_digest, parse_next_step, NormalizeError,
    Prompt,
};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::cache::InsightCache;
use crate::client::{ClientError, CompletionClient};
use crate::invocation_log::InvocationLogger;

#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub model: String,
    pub max_tokens: u32,
    /// Zero disables the digest cache.
    pub digest_ttl: Duration,
    pub max_items: usize,
}

impl GatewaySettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            model: cfg.llm.model.clone(),
            max_tokens: cfg.llm.max_tokens,
            digest_ttl: Duration::from_millis(cfg.cache.digest_ttl_ms),
            max_items: cfg.prompt.max_items.max(1),
        }
    }
}

#[derive(Debug)]
enum Failure {
    MissingCredential,
    Upstream(String),
    Content(String),
}

impl Failure {
    fn provider(&self) -> &'static str {
        match self {
            Failure::Upstream(_) => PROVIDER_FALLBACK_ERROR,
            Failure::MissingCredential | Failure::Content(_) => PROVIDER_FALLBACK,
        }
    }

    fn message(&self) -> String {
        match self {
            Failure::MissingCredential => ClientError::MissingCredential.to_string(),
            Failure::Upstream(msg) | Failure::Content(msg) => msg.clone(),
        }
    }
}

impl From<ClientError> for Failure {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::MissingCredential => Failure::MissingCredential,
            other => Failure::Upstream(other.to_string()),
        }
    }
}

impl From<NormalizeError> for Failure {
    fn from(err: NormalizeError) -> Self {
        Failure::Content(err.to_string())
    }
}

/// What a single live attempt produced before job-specific shaping.
struct Attempt<T> {
    usage: Option<TokenUsage>,
    outcome: Result<(String, T), Failure>,
}

struct Outcome<'a> {
    job: JobType,
    status: InvocationStatus,
    provider: &'a str,
    used_fallback: bool,
    usage: Option<TokenUsage>,
    payload_hash: Option<String>,
    metadata: Metadata,
    error: Option<String>,
}

pub struct InsightGateway {
    client: Arc<dyn CompletionClient>,
    cache: Arc<InsightCache>,
    log: InvocationLogger,
    settings: GatewaySettings,
}

impl InsightGateway {
    pub fn new(
        client: Arc<dyn CompletionClient>,
        cache: Arc<InsightCache>,
        log: InvocationLogger,
        settings: GatewaySettings,
    ) -> Self {
        Self {
            client,
            cache,
            log,
            settings,
        }
    }

    pub fn logger(&self) -> &InvocationLogger {
        &self.log
    }

    pub async fn generate_digest(&self, req: &DigestRequest) -> DigestResult {
        let started = Instant::now();
        let mut metadata = req.metadata.clone();
        metadata.insert(
            "timeframe".to_string(),
            Value::String(req.timeframe.as_str().to_string()),
        );

        let payload_hash = match digest_fingerprint(req, self.settings.max_items) {
            Ok(hash) => Some(hash),
            Err(e) => {
                warn!(error = %e, "digest fingerprint failed; cache bypassed");
                None
            }
        };
        let cache_key = if self.settings.digest_ttl.is_zero() {
            None
        } else {
            payload_hash
                .as_deref()
                .map(|hash| digest_cache_key(req.timeframe, hash))
        };

        if let Some(key) = &cache_key {
            if let Some(hit) = self.cache.get(key).await {
                debug!(cache_key = %key, "digest cache hit");
                self.emit(
                    started,
                    Outcome {
                        job: JobType::Digest,
                        status: InvocationStatus::CacheHit,
                        provider: &hit.provider,
                        used_fallback: hit.used_fallback,
                        usage: None,
                        payload_hash: payload_hash.clone(),
                        metadata,
                        error: None,
                    },
                );
                return hit;
            }
            debug!(cache_key = %key, "digest cache miss");
        }

        let prompt = digest_prompt(req, self.settings.max_items);
        let attempt = self
            .attempt(JobType::Digest, prompt, &metadata, parse_digest)
            .await;

        let shaped = attempt.outcome.and_then(|(provider, fields)| {
            let content = fields
                .content
                .clone()
                .unwrap_or_else(|| fields.flattened());
            if content.trim().is_empty() {
                return Err(Failure::from(NormalizeError::ContentEmpty));
            }
            Ok(DigestResult {
                headline: fields.headline,
                summary: fields.summary,
                actions: fields.actions,
                content: Some(content),
                provider,
                used_fallback: false,
                error: None,
            })
        });

        let result = match shaped {
            Ok(result) => {
                if let (Some(key), Some(hash)) = (cache_key, payload_hash.clone()) {
                    self.cache
                        .put(key, hash, result.clone(), self.settings.digest_ttl)
                        .await;
                }
                result
            }
            Err(failure) => DigestResult {
                headline: None,
                summary: None,
                actions: None,
                content: Some(fallback_content(&req.fallback_text, || {
                    derived_digest_fallback(req)
                })),
                provider: failure.provider().to_string(),
                used_fallback: true,
                error: Some(failure.message()),
            },
        };

        self.emit(
            started,
            Outcome {
                job: JobType::Digest,
                status: status_of(result.used_fallback, result.provider.as_str()),
                provider: &result.provider,
                used_fallback: result.used_fallback,
                usage: attempt.usage,
                payload_hash,
                metadata,
                error: result.error.clone(),
            },
        );
        result
    }

    pub async fn generate_next_step(&self, req: &NextStepRequest) -> NextStepResult {
        let started = Instant::now();
        let mut metadata = req.metadata.clone();
        metadata.insert("dealId".to_string(), Value::String(req.deal.id.clone()));

        let prompt = next_step_prompt(req, self.settings.max_items);
        let attempt = self
            .attempt(JobType::NextStep, prompt, &metadata, parse_next_step)
            .await;

        let result = match attempt.outcome.and_then(|(provider, fields)| {
            let content = fields
                .content
                .clone()
                .unwrap_or_else(|| fields.flattened());
            if content.trim().is_empty() {
                return Err(Failure::from(NormalizeError::ContentEmpty));
            }
            Ok(NextStepResult {
                recommendation: fields.recommendation,
                rationale: fields.rationale,
                content: Some(content),
                provider,
                used_fallback: false,
                error: None,
            })
        }) {
            Ok(result) => result,
            Err(failure) => NextStepResult {
                recommendation: None,
                rationale: None,
                content: Some(fallback_content(&req.fallback_text, || {
                    derived_next_step_fallback(req)
                })),
                provider: failure.provider().to_string(),
                used_fallback: true,
                error: Some(failure.message()),
            },
        };

        self.emit(
            started,
            Outcome {
                job: JobType::NextStep,
                status: status_of(result.used_fallback, result.provider.as_str()),
                provider: &result.provider,
                used_fallback: result.used_fallback,
                usage: attempt.usage,
                payload_hash: None,
                metadata,
                error: result.error.clone(),
            },
        );
        result
    }

    pub async fn generate_contact_summary(
        &self,
        req: &ContactSummaryRequest,
    ) -> ContactSummaryResult {
        let started = Instant::now();
        let mut metadata = req.metadata.clone();
        metadata.insert(
            "contactId".to_string(),
            Value::String(req.contact.id.clone()),
        );

        let prompt = contact_summary_prompt(req, self.settings.max_items);
        let attempt = self
            .attempt(
                JobType::ContactSummary,
                prompt,
                &metadata,
                parse_contact_summary,
            )
            .await;

        let result = match attempt.outcome.and_then(|(provider, fields)| {
            let content = fields
                .content
                .clone()
                .unwrap_or_else(|| fields.flattened());
            if content.trim().is_empty() {
                return Err(Failure::from(NormalizeError::ContentEmpty));
            }
            Ok(ContactSummaryResult {
                summary: fields.summary,
                highlights: fields.highlights,
                content: Some(content),
                provider,
                used_fallback: false,
                error: None,
            })
        }) {
            Ok(result) => result,
            Err(failure) => ContactSummaryResult {
                summary: None,
                highlights: None,
                content: Some(fallback_content(&req.fallback_text, || {
                    derived_contact_fallback(req)
                })),
                provider: failure.provider().to_string(),
                used_fallback: true,
                error: Some(failure.message()),
            },
        };

        self.emit(
            started,
            Outcome {
                job: JobType::ContactSummary,
                status: status_of(result.used_fallback, result.provider.as_str()),
                provider: &result.provider,
                used_fallback: result.used_fallback,
                usage: attempt.usage,
                payload_hash: None,
                metadata,
                error: result.error.clone(),
            },
        );
        result
    }

    /// Credential check, one upstream call, then normalization.
    async fn attempt<T, P>(
        &self,
        job: JobType,
        prompt: Prompt,
        metadata: &Metadata,
        parse: P,
    ) -> Attempt<T>
    where
        P: FnOnce(&str) -> Result<T, NormalizeError>,
    {
        if !self.client.has_credential() {
            info!(job = job.as_str(), "no credential configured; using fallback");
            return Attempt {
                usage: None,
                outcome: Err(Failure::MissingCredential),
            };
        }

        let request = CompletionRequest {
            messages: prompt.into_messages(),
            response_format: ResponseFormat::Json,
            temperature: job.temperature(),
            max_tokens: self.settings.max_tokens,
            model: self.settings.model.clone(),
            metadata: metadata.clone(),
        };

        let completion = match self.client.call(&request).await {
            Ok(completion) => completion,
            Err(err) => {
                warn!(job = job.as_str(), error = %err, "completion call failed; using fallback");
                return Attempt {
                    usage: None,
                    outcome: Err(Failure::from(err)),
                };
            }
        };

        let provider = completion
            .model
            .clone()
            .unwrap_or_else(|| self.settings.model.clone());
        let outcome = match parse(completion.content.as_deref().unwrap_or_default()) {
            Ok(fields) => Ok((provider, fields)),
            Err(err) => {
                warn!(job = job.as_str(), error = %err, "model content unusable; using fallback");
                Err(Failure::from(err))
            }
        };
        Attempt {
            usage: completion.usage,
            outcome,
        }
    }

    fn emit(&self, started: Instant, outcome: Outcome<'_>) {
        self.log.record(InvocationLogRecord {
            id: format!("inv_{}", uuid::Uuid::new_v4().as_simple()),
            ts: Utc::now().to_rfc3339(),
            job: outcome.job,
            status: outcome.status,
            provider: outcome.provider.to_string(),
            elapsed_ms: started.elapsed().as_millis() as u64,
            prompt_tokens: outcome.usage.map(|u| u.prompt_tokens),
            completion_tokens: outcome.usage.map(|u| u.completion_tokens),
            total_tokens: outcome.usage.map(|u| u.total_tokens),
            used_fallback: outcome.used_fallback,
            payload_hash: outcome.payload_hash,
            metadata: outcome.metadata,
            error_message: outcome.error,
        });
    }
}

fn status_of(used_fallback: bool, provider: &str) -> InvocationStatus {
    match (used_fallback, provider) {
        (false, _) => InvocationStatus::Success,
        (true, PROVIDER_FALLBACK_ERROR) => InvocationStatus::Error,
        (true, _) => InvocationStatus::Fallback,
    }
}

fn fallback_content<F>(fallback_text: &str, derive: F) -> String
where
    F: FnOnce() -> String,
{
    let trimmed = fallback_text.trim();
    if trimmed.is_empty() {
        derive()
    } else {
        fallback_text.to_string()
    }
}

fn derived_digest_fallback(req: &DigestRequest) -> String {
    let period = match req.timeframe {
        Timeframe::Today => "de hoy",
        Timeframe::Week => "de la semana",
        Timeframe::Month => "del mes",
    };
    format!(
        "Resumen {period}: {} oportunidades calientes, {} en riesgo y {} tareas vencidas.",
        req.stats.hot_deals, req.stats.risk_deals, req.stats.overdue_tasks
    )
}

fn derived_next_step_fallback(req: &NextStepRequest) -> String {
    match req
        .deal
        .next_step
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        Some(step) => step.to_string(),
        None => format!(
            "Revisar la oportunidad {} y definir el próximo paso.",
            req.deal.title
        ),
    }
}

fn derived_contact_fallback(req: &ContactSummaryRequest) -> String {
    let contact = &req.contact;
    match contact
        .company
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        Some(company) => format!(
            "{} ({company}): {} oportunidades asociadas.",
            contact.name,
            req.deals.len()
        ),
        None => format!("{}: {} oportunidades asociadas.", contact.name, req.deals.len()),
    }
}
