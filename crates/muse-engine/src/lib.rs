use std::env;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use muse_contracts::events::{EventPayload, EventWriter};
use muse_contracts::models::{InputShape, InputSpec, ModelResolver, ProviderRoute};
use muse_contracts::requests::{
    ApiResponse, GenerationRequest, JobStatus, SubmissionFailure, SubmissionFailureReason,
};
use reqwest::blocking::Client as HttpClient;
use reqwest::header::CONTENT_TYPE;
use serde_json::{json, Map, Value};
use uuid::Uuid;

/// Fixed sleep between status polls.
pub const POLL_INTERVAL: Duration = Duration::from_secs(2);

const DEFAULT_JOBS_API_BASE: &str = "https://api.musejobs.dev/api/v1";

/// Candidate result-URL locations, most specific first. Providers and
/// response stages are not schema-stable; this order encodes observed
/// precedence so a thumbnail-ish field never shadows the final asset.
/// Numeric segments index into arrays.
const RESULT_URL_PATHS: &[&str] = &[
    "data/resultJson/resultUrls/0",
    "data/resultUrls/0",
    "data/resultImageUrl",
    "data/resultVideoUrl",
    "data/videoUrl",
    "data/imageUrl",
    "data/output/images/0/url",
    "data/output/url",
    "response/resultUrl",
    "output/images/0/url",
    "output/url",
    "data/result/url",
    "resultUrl",
];

/// Known locations of the opaque job handle in a creation response.
const TASK_ID_PATHS: &[&str] = &["data/taskId", "data/task_id", "taskId", "data/id", "id"];

const STATUS_PATHS: &[&str] = &["data/status", "data/state", "status", "state"];

const COMPLETE_TIME_PATHS: &[&str] = &["data/completeTime", "data/complete_time", "completeTime"];

const FAILURE_MESSAGE_PATHS: &[&str] = &[
    "data/failMsg",
    "data/failReason",
    "data/msg",
    "data/error",
    "msg",
    "message",
    "error",
];

const DONE_STATUS_VOCAB: &[&str] = &["completed", "complete", "success", "succeeded", "finished"];

const FAILED_STATUS_VOCAB: &[&str] = &["failed", "fail", "error", "canceled", "cancelled"];

// ---------------------------------------------------------------------------
// configuration

#[derive(Debug, Clone)]
pub struct JobApiConfig {
    pub api_base: String,
    pub api_key: String,
}

impl JobApiConfig {
    /// `None` means the bearer credential is missing, which is a fatal
    /// misconfiguration: the caller must answer 500 without touching
    /// the provider.
    pub fn from_env() -> Option<Self> {
        let api_key = non_empty_env("MUSE_JOBS_API_KEY")?;
        let api_base = non_empty_env("MUSE_JOBS_API_BASE")
            .map(|value| value.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_JOBS_API_BASE.to_string());
        Some(Self { api_base, api_key })
    }
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub upload_url: String,
    pub api_key: Option<String>,
}

impl StorageConfig {
    pub fn from_env() -> Option<Self> {
        let upload_url = non_empty_env("MUSE_STORAGE_UPLOAD_URL")?;
        Some(Self {
            upload_url,
            api_key: non_empty_env("MUSE_STORAGE_API_KEY"),
        })
    }
}

// ---------------------------------------------------------------------------
// collaborator seams

/// One provider HTTP exchange. `Err` is transport-level only
/// (connect/timeout/body read); any parsed response, success or not,
/// comes back as a reply.
#[derive(Debug, Clone)]
pub struct TransportReply {
    pub http_status: u16,
    pub payload: Value,
}

pub trait JobTransport: Send + Sync {
    fn create_task(&self, model: &str, input: &Map<String, Value>) -> Result<TransportReply>;
    fn get_task(&self, task_id: &str) -> Result<TransportReply>;
}

pub struct HttpJobTransport {
    api_base: String,
    api_key: String,
    http: HttpClient,
}

impl HttpJobTransport {
    pub fn new(config: JobApiConfig) -> Self {
        Self {
            api_base: config.api_base,
            api_key: config.api_key,
            http: HttpClient::new(),
        }
    }

    fn reply_from(&self, label: &str, response: reqwest::blocking::Response) -> Result<TransportReply> {
        let http_status = response.status().as_u16();
        let body = response
            .text()
            .with_context(|| format!("{label} response body read failed"))?;
        let payload = serde_json::from_str(&body).unwrap_or(Value::Null);
        Ok(TransportReply {
            http_status,
            payload,
        })
    }
}

impl JobTransport for HttpJobTransport {
    fn create_task(&self, model: &str, input: &Map<String, Value>) -> Result<TransportReply> {
        let endpoint = format!("{}/jobs/createTask", self.api_base);
        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(&self.api_key)
            .json(&json!({ "model": model, "input": input }))
            .send()
            .with_context(|| format!("job creation request failed ({endpoint})"))?;
        self.reply_from("job creation", response)
    }

    fn get_task(&self, task_id: &str) -> Result<TransportReply> {
        let endpoint = format!("{}/jobs/getTask", self.api_base);
        let response = self
            .http
            .get(&endpoint)
            .query(&[("taskId", task_id)])
            .bearer_auth(&self.api_key)
            .send()
            .with_context(|| format!("job status request failed ({endpoint})"))?;
        self.reply_from("job status", response)
    }
}

/// Rehosts raw bytes and returns a public URL. Only used to lift
/// inline (data-URI) reference assets before video submission.
pub trait ObjectStore: Send + Sync {
    fn put_object(&self, bytes: &[u8], content_type: &str) -> Result<String>;
}

pub struct HttpObjectStore {
    upload_url: String,
    api_key: Option<String>,
    http: HttpClient,
}

impl HttpObjectStore {
    pub fn new(config: StorageConfig) -> Self {
        Self {
            upload_url: config.upload_url,
            api_key: config.api_key,
            http: HttpClient::new(),
        }
    }
}

impl ObjectStore for HttpObjectStore {
    fn put_object(&self, bytes: &[u8], content_type: &str) -> Result<String> {
        let key = format!(
            "reference-assets/{}.{}",
            Uuid::new_v4(),
            extension_for_mime(content_type)
        );
        let mut request = self
            .http
            .post(&self.upload_url)
            .query(&[("key", key.as_str())])
            .header(CONTENT_TYPE, content_type)
            .body(bytes.to_vec());
        if let Some(api_key) = self.api_key.as_deref() {
            request = request.bearer_auth(api_key);
        }
        let response = request
            .send()
            .with_context(|| format!("asset upload failed ({})", self.upload_url))?;
        if !response.status().is_success() {
            let code = response.status().as_u16();
            let body = response.text().unwrap_or_default();
            bail!(
                "asset upload failed ({code}): {}",
                truncate_text(&body, 512)
            );
        }
        let payload: Value = response
            .json()
            .context("asset upload returned invalid JSON")?;
        let url = lookup_path(&payload, "data/url")
            .or_else(|| lookup_path(&payload, "url"))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| value.starts_with("http"))
            .map(str::to_string);
        url.ok_or_else(|| anyhow::anyhow!("asset upload response carried no public URL"))
    }
}

/// Stand-in when no storage collaborator is configured; every put
/// fails, which the orchestrator degrades to "proceed without the
/// reference asset".
pub struct NullObjectStore;

impl ObjectStore for NullObjectStore {
    fn put_object(&self, _bytes: &[u8], _content_type: &str) -> Result<String> {
        bail!("object store not configured (MUSE_STORAGE_UPLOAD_URL unset)")
    }
}

// ---------------------------------------------------------------------------
// result extraction and status classification

/// Walks `RESULT_URL_PATHS` in order and returns the first value that
/// is a string with an absolute-URL scheme. No reachability or
/// content-type validation happens here.
pub fn extract_result_url(payload: &Value) -> Option<String> {
    for path in RESULT_URL_PATHS {
        let Some(found) = lookup_path(payload, path) else {
            continue;
        };
        let Some(text) = found.as_str().map(str::trim) else {
            continue;
        };
        if text.starts_with("http://") || text.starts_with("https://") {
            return Some(text.to_string());
        }
    }
    None
}

/// Slash-separated field access; numeric segments index arrays.
fn lookup_path<'a>(payload: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = payload;
    for segment in path.split('/') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(rows) => rows.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Derives a `JobStatus` from one raw status payload. Two independent
/// completion signals are OR-combined, matching the provider's
/// observed behavior: an explicit done-vocabulary status string, or a
/// non-null completion timestamp.
pub fn classify_job_status(payload: &Value) -> JobStatus {
    let status_text = STATUS_PATHS
        .iter()
        .filter_map(|path| lookup_path(payload, path))
        .filter_map(Value::as_str)
        .map(|value| value.trim().to_ascii_lowercase())
        .find(|value| !value.is_empty());

    let complete_time_set = COMPLETE_TIME_PATHS
        .iter()
        .filter_map(|path| lookup_path(payload, path))
        .any(|value| !value.is_null());

    if let Some(status) = status_text.as_deref() {
        if DONE_STATUS_VOCAB.contains(&status) || complete_time_set {
            return JobStatus::Completed;
        }
        if FAILED_STATUS_VOCAB.contains(&status) {
            return JobStatus::Failed;
        }
        return JobStatus::Pending;
    }
    if complete_time_set {
        return JobStatus::Completed;
    }
    JobStatus::Unknown
}

fn provider_failure_message(payload: &Value) -> String {
    FAILURE_MESSAGE_PATHS
        .iter()
        .filter_map(|path| lookup_path(payload, path))
        .filter_map(Value::as_str)
        .map(str::trim)
        .find(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| "generation failed".to_string())
}

fn provider_code(payload: &Value) -> Option<i64> {
    lookup_path(payload, "code")
        .or_else(|| lookup_path(payload, "data/code"))
        .and_then(Value::as_i64)
}

fn find_task_id(payload: &Value) -> Option<String> {
    for path in TASK_ID_PATHS {
        let Some(found) = lookup_path(payload, path) else {
            continue;
        };
        match found {
            Value::String(text) => {
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    return Some(trimmed.to_string());
                }
            }
            Value::Number(number) => return Some(number.to_string()),
            _ => {}
        }
    }
    None
}

// ---------------------------------------------------------------------------
// task submission

#[derive(Debug, Clone)]
pub struct SubmittedJob {
    pub task_id: String,
    pub provider_model_id: String,
    pub submitted_at: DateTime<Utc>,
}

/// Outcome of one accepted creation call. Some providers answer
/// synchronously; a direct result URL skips polling entirely.
#[derive(Debug, Clone)]
pub enum Submission {
    Job(SubmittedJob),
    Completed(String),
}

pub fn submit_task(
    transport: &dyn JobTransport,
    route: &ProviderRoute,
    input: &Map<String, Value>,
) -> std::result::Result<Submission, SubmissionFailure> {
    let reply = transport
        .create_task(&route.provider_model_id, input)
        .map_err(|err| SubmissionFailure {
            http_status: None,
            provider_code: None,
            provider_message: Some(error_chain_text(&err, 400)),
            reason: SubmissionFailureReason::Transport,
        })?;

    if !(200..300).contains(&reply.http_status) {
        return Err(SubmissionFailure {
            http_status: Some(reply.http_status),
            provider_code: provider_code(&reply.payload),
            provider_message: message_if_any(&reply.payload),
            reason: SubmissionFailureReason::ProviderError,
        });
    }
    if let Some(code) = provider_code(&reply.payload) {
        if code != 200 && code != 0 {
            return Err(SubmissionFailure {
                http_status: Some(reply.http_status),
                provider_code: Some(code),
                provider_message: message_if_any(&reply.payload),
                reason: SubmissionFailureReason::ProviderError,
            });
        }
    }
    if let Some(task_id) = find_task_id(&reply.payload) {
        return Ok(Submission::Job(SubmittedJob {
            task_id,
            provider_model_id: route.provider_model_id.clone(),
            submitted_at: Utc::now(),
        }));
    }
    if let Some(url) = extract_result_url(&reply.payload) {
        return Ok(Submission::Completed(url));
    }
    Err(SubmissionFailure {
        http_status: Some(reply.http_status),
        provider_code: provider_code(&reply.payload),
        provider_message: None,
        reason: SubmissionFailureReason::NoHandle,
    })
}

fn message_if_any(payload: &Value) -> Option<String> {
    FAILURE_MESSAGE_PATHS
        .iter()
        .filter_map(|path| lookup_path(payload, path))
        .filter_map(Value::as_str)
        .map(str::trim)
        .find(|value| !value.is_empty())
        .map(str::to_string)
}

// ---------------------------------------------------------------------------
// fallback routing

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitTier {
    Primary,
    Secondary,
}

#[derive(Debug, Clone)]
pub struct RoutedSubmission {
    pub submission: Submission,
    pub tier: SubmitTier,
    pub primary_failure: Option<SubmissionFailure>,
}

#[derive(Debug, Clone)]
pub struct FallbackExhausted {
    pub primary: SubmissionFailure,
    pub secondary: SubmissionFailure,
}

// ---------------------------------------------------------------------------
// polling

#[derive(Debug, Clone, Copy)]
pub struct PollBudget {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl PollBudget {
    pub fn image(is_test: bool) -> Self {
        Self {
            max_attempts: if is_test { 20 } else { 60 },
            interval: POLL_INTERVAL,
        }
    }

    /// Video renders are slower than image renders, so the real-call
    /// budget is wider.
    pub fn video(is_test: bool) -> Self {
        Self {
            max_attempts: if is_test { 30 } else { 150 },
            interval: POLL_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Completed(String),
    Failed { message: String },
    TimedOut,
}

// ---------------------------------------------------------------------------
// orchestration

pub struct GenerationEngine {
    transport: Box<dyn JobTransport>,
    store: Box<dyn ObjectStore>,
    resolver: ModelResolver,
    events: EventWriter,
}

impl GenerationEngine {
    pub fn new(
        transport: Box<dyn JobTransport>,
        store: Box<dyn ObjectStore>,
        events: EventWriter,
    ) -> Self {
        Self {
            transport,
            store,
            resolver: ModelResolver::default(),
            events,
        }
    }

    pub fn generate_image(&self, request: &GenerationRequest) -> ApiResponse {
        self.image_flow(request, PollBudget::image(request.is_test))
    }

    pub fn generate_video(&self, request: &GenerationRequest) -> ApiResponse {
        self.video_flow(request, PollBudget::video(request.is_test))
    }

    fn image_flow(&self, request: &GenerationRequest, budget: PollBudget) -> ApiResponse {
        self.log_event(
            "request_received",
            payload(json!({ "media": "image", "is_test": request.is_test })),
        );
        let prompt = request.prompt.trim();
        if prompt.is_empty() {
            return self.respond(ApiResponse::failure(400, "prompt must not be empty"));
        }

        let resolved = self.resolver.resolve(&request.model, InputShape::Image);
        self.log_event(
            "model_resolved",
            payload(json!({
                "requested": resolved.requested,
                "canonical": resolved.canonical,
                "provider_model_id": resolved.route.provider_model_id,
                "fallback_reason": resolved.fallback_reason,
            })),
        );

        let mut prompt_text = prompt.to_string();
        if let Some(style) = request
            .style
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty() && !value.eq_ignore_ascii_case("none"))
        {
            prompt_text = format!("{prompt_text}, {style} style");
        }
        let spec = InputSpec {
            prompt: prompt_text,
            aspect_ratio: request
                .aspect_ratio
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .unwrap_or("1:1")
                .to_string(),
            ..InputSpec::default()
        };

        let routed = match self.submit_with_fallback(&resolved.route, &spec) {
            Ok(routed) => routed,
            Err(exhausted) => {
                return self.respond(ApiResponse::failure(
                    failure_status(&exhausted.secondary),
                    format!("image generation failed: {}", exhausted.secondary.detail()),
                ));
            }
        };

        match routed.submission {
            Submission::Completed(url) => self.respond(ApiResponse::image_success(&url)),
            Submission::Job(job) => match self.poll_task(&job.task_id, budget) {
                PollOutcome::Completed(url) => self.respond(ApiResponse::image_success(&url)),
                PollOutcome::TimedOut => self.respond(ApiResponse::failure(408, "timeout")),
                PollOutcome::Failed { message } => {
                    self.respond(ApiResponse::failure(502, message))
                }
            },
        }
    }

    fn video_flow(&self, request: &GenerationRequest, budget: PollBudget) -> ApiResponse {
        self.log_event(
            "request_received",
            payload(json!({ "media": "video", "is_test": request.is_test })),
        );
        let prompt = request.prompt.trim();
        if prompt.is_empty() {
            return self.respond(ApiResponse::failure(400, "prompt must not be empty"));
        }

        let resolved = self.resolver.resolve(&request.model, InputShape::Video);
        self.log_event(
            "model_resolved",
            payload(json!({
                "requested": resolved.requested,
                "canonical": resolved.canonical,
                "provider_model_id": resolved.route.provider_model_id,
                "fallback_reason": resolved.fallback_reason,
            })),
        );

        let spec = InputSpec {
            prompt: prompt.to_string(),
            duration_seconds: request.duration_seconds(),
            aspect_ratio: request
                .aspect_ratio
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .unwrap_or("16:9")
                .to_string(),
            image_url: self.reference_asset_url(request.reference_image.as_deref()),
            remove_watermark: request.remove_watermark,
        };
        let input = resolved.route.build_input(&spec);

        // Video has no secondary tier; a failed submission is terminal.
        let submission = match submit_task(self.transport.as_ref(), &resolved.route, &input) {
            Ok(submission) => {
                self.log_submission(&submission, SubmitTier::Primary, &resolved.route);
                submission
            }
            Err(failure) => {
                self.log_event(
                    "submission_failed",
                    payload(json!({
                        "tier": "primary",
                        "provider_model_id": resolved.route.provider_model_id,
                        "detail": failure.detail(),
                    })),
                );
                return self.respond(ApiResponse::failure(
                    failure_status(&failure),
                    format!("video generation failed: {}", failure.detail()),
                ));
            }
        };

        match submission {
            Submission::Completed(url) => self.respond(ApiResponse::video_success(&url)),
            Submission::Job(job) => match self.poll_task(&job.task_id, budget) {
                PollOutcome::Completed(url) => self.respond(ApiResponse::video_success(&url)),
                PollOutcome::TimedOut => self.respond(ApiResponse::failure(408, "timeout")),
                PollOutcome::Failed { message } => {
                    self.respond(ApiResponse::failure(502, message))
                }
            },
        }
    }

    /// Primary submission plus at most one retry via the process-wide
    /// known-good route. Never cascades to a third attempt: the jobs
    /// API is metered, and repeated resubmission has real cost.
    fn submit_with_fallback(
        &self,
        primary: &ProviderRoute,
        spec: &InputSpec,
    ) -> std::result::Result<RoutedSubmission, FallbackExhausted> {
        let input = primary.build_input(spec);
        let primary_failure = match submit_task(self.transport.as_ref(), primary, &input) {
            Ok(submission) => {
                self.log_submission(&submission, SubmitTier::Primary, primary);
                return Ok(RoutedSubmission {
                    submission,
                    tier: SubmitTier::Primary,
                    primary_failure: None,
                });
            }
            Err(failure) => failure,
        };

        let secondary = self.resolver.table().fallback_route().clone();
        self.log_event(
            "fallback_engaged",
            payload(json!({
                "primary_model_id": primary.provider_model_id,
                "secondary_model_id": secondary.provider_model_id,
                "primary_detail": primary_failure.detail(),
            })),
        );

        let secondary_input = secondary.build_input(spec);
        match submit_task(self.transport.as_ref(), &secondary, &secondary_input) {
            Ok(submission) => {
                self.log_submission(&submission, SubmitTier::Secondary, &secondary);
                Ok(RoutedSubmission {
                    submission,
                    tier: SubmitTier::Secondary,
                    primary_failure: Some(primary_failure),
                })
            }
            Err(secondary_failure) => {
                self.log_event(
                    "submission_failed",
                    payload(json!({
                        "tier": "secondary",
                        "provider_model_id": secondary.provider_model_id,
                        "detail": secondary_failure.detail(),
                    })),
                );
                Err(FallbackExhausted {
                    primary: primary_failure,
                    secondary: secondary_failure,
                })
            }
        }
    }

    /// Polls job status until a terminal state or budget exhaustion.
    /// A flaky single attempt (transport error, non-2xx, unparseable
    /// body) is logged and skipped, never fatal on its own. A payload
    /// that claims completion without an extractable URL keeps the
    /// loop alive: some providers publish the asset a beat after the
    /// status flips.
    fn poll_task(&self, task_id: &str, budget: PollBudget) -> PollOutcome {
        for attempt in 1..=budget.max_attempts {
            thread::sleep(budget.interval);
            let reply = match self.transport.get_task(task_id) {
                Ok(reply) => reply,
                Err(err) => {
                    self.log_event(
                        "poll_transport_error",
                        payload(json!({
                            "task_id": task_id,
                            "attempt": attempt,
                            "error": error_chain_text(&err, 400),
                        })),
                    );
                    continue;
                }
            };
            if !(200..300).contains(&reply.http_status) {
                self.log_event(
                    "poll_transport_error",
                    payload(json!({
                        "task_id": task_id,
                        "attempt": attempt,
                        "http_status": reply.http_status,
                    })),
                );
                continue;
            }
            match classify_job_status(&reply.payload) {
                JobStatus::Completed => {
                    if let Some(url) = extract_result_url(&reply.payload) {
                        self.log_event(
                            "job_completed",
                            payload(json!({
                                "task_id": task_id,
                                "attempt": attempt,
                                "result_url": url,
                            })),
                        );
                        return PollOutcome::Completed(url);
                    }
                }
                JobStatus::Failed => {
                    let message = provider_failure_message(&reply.payload);
                    self.log_event(
                        "job_failed",
                        payload(json!({
                            "task_id": task_id,
                            "attempt": attempt,
                            "message": message,
                        })),
                    );
                    return PollOutcome::Failed { message };
                }
                JobStatus::Pending | JobStatus::Unknown => {}
            }
        }
        self.log_event(
            "poll_timeout",
            payload(json!({
                "task_id": task_id,
                "max_attempts": budget.max_attempts,
            })),
        );
        PollOutcome::TimedOut
    }

    /// Lifts an inline data-URI reference asset into the object store
    /// and substitutes the public URL. A store failure degrades to
    /// "no reference asset"; the generation itself proceeds.
    fn reference_asset_url(&self, reference: Option<&str>) -> Option<String> {
        let reference = reference.map(str::trim).filter(|value| !value.is_empty())?;
        if reference.starts_with("http://") || reference.starts_with("https://") {
            return Some(reference.to_string());
        }
        if !reference.starts_with("data:") {
            self.log_event(
                "asset_rehost_failed",
                payload(json!({ "error": "unrecognized reference asset scheme" })),
            );
            return None;
        }
        let (bytes, content_type) = match decode_data_url(reference) {
            Ok(decoded) => decoded,
            Err(err) => {
                self.log_event(
                    "asset_rehost_failed",
                    payload(json!({ "error": error_chain_text(&err, 400) })),
                );
                return None;
            }
        };
        match self.store.put_object(&bytes, &content_type) {
            Ok(url) => {
                self.log_event(
                    "asset_rehosted",
                    payload(json!({ "url": url, "content_type": content_type })),
                );
                Some(url)
            }
            Err(err) => {
                self.log_event(
                    "asset_rehost_failed",
                    payload(json!({ "error": error_chain_text(&err, 400) })),
                );
                None
            }
        }
    }

    fn log_submission(&self, submission: &Submission, tier: SubmitTier, route: &ProviderRoute) {
        match submission {
            Submission::Job(job) => self.log_event(
                "task_submitted",
                payload(json!({
                    "task_id": job.task_id,
                    "tier": tier_name(tier),
                    "provider_model_id": route.provider_model_id,
                })),
            ),
            Submission::Completed(url) => self.log_event(
                "task_submitted",
                payload(json!({
                    "tier": tier_name(tier),
                    "provider_model_id": route.provider_model_id,
                    "synchronous_result": url,
                })),
            ),
        }
    }

    fn respond(&self, response: ApiResponse) -> ApiResponse {
        self.log_event(
            "response_ready",
            payload(json!({
                "status": response.status,
                "success": response.is_success(),
            })),
        );
        response
    }

    fn log_event(&self, event_type: &str, payload: EventPayload) {
        if let Err(err) = self.events.emit(event_type, payload) {
            eprintln!("muse event log write failed: {err:#}");
        }
    }
}

/// Env-wired boundary for the image endpoint.
pub fn handle_image_request(request: &GenerationRequest, events: &EventWriter) -> ApiResponse {
    match engine_from_env(events) {
        Ok(engine) => engine.generate_image(request),
        Err(response) => response,
    }
}

/// Env-wired boundary for the video endpoint.
pub fn handle_video_request(request: &GenerationRequest, events: &EventWriter) -> ApiResponse {
    match engine_from_env(events) {
        Ok(engine) => engine.generate_video(request),
        Err(response) => response,
    }
}

fn engine_from_env(events: &EventWriter) -> std::result::Result<GenerationEngine, ApiResponse> {
    let Some(config) = JobApiConfig::from_env() else {
        let response = ApiResponse::failure(500, "misconfiguration: MUSE_JOBS_API_KEY is not set");
        if let Err(err) = events.emit(
            "response_ready",
            payload(json!({ "status": 500, "success": false })),
        ) {
            eprintln!("muse event log write failed: {err:#}");
        }
        return Err(response);
    };
    let store: Box<dyn ObjectStore> = match StorageConfig::from_env() {
        Some(storage) => Box::new(HttpObjectStore::new(storage)),
        None => Box::new(NullObjectStore),
    };
    Ok(GenerationEngine::new(
        Box::new(HttpJobTransport::new(config)),
        store,
        events.clone(),
    ))
}

// ---------------------------------------------------------------------------
// helpers

pub fn decode_data_url(data_url: &str) -> Result<(Vec<u8>, String)> {
    let rest = data_url
        .strip_prefix("data:")
        .context("not a data URI")?;
    let (meta, encoded) = rest
        .split_once(',')
        .context("data URI missing ',' separator")?;
    let Some(content_type) = meta.strip_suffix(";base64") else {
        bail!("data URI is not base64-encoded");
    };
    let content_type = if content_type.trim().is_empty() {
        "application/octet-stream".to_string()
    } else {
        content_type.trim().to_string()
    };
    let bytes = BASE64
        .decode(encoded.trim())
        .context("data URI base64 decode failed")?;
    Ok((bytes, content_type))
}

fn failure_status(failure: &SubmissionFailure) -> u16 {
    if let Some(status) = failure.http_status.filter(|value| (400..600).contains(value)) {
        return status;
    }
    if let Some(code) = failure
        .provider_code
        .and_then(|value| u16::try_from(value).ok())
        .filter(|value| (400..600).contains(value))
    {
        return code;
    }
    502
}

fn tier_name(tier: SubmitTier) -> &'static str {
    match tier {
        SubmitTier::Primary => "primary",
        SubmitTier::Secondary => "secondary",
    }
}

fn extension_for_mime(content_type: &str) -> &'static str {
    match content_type.trim().to_ascii_lowercase().as_str() {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        _ => "png",
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts
            .last()
            .map(|existing| existing == trimmed)
            .unwrap_or(false)
        {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

fn payload(value: Value) -> EventPayload {
    value.as_object().cloned().unwrap_or_default()
}
