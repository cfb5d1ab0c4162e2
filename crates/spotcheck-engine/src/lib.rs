use std::collections::BTreeMap;
use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Map, Value};
use spotcheck_contracts::models::{ModelSelection, ModelSelector};
use spotcheck_contracts::{BuiltPrompt, InputMode, SpotError, SubmissionState};

mod session;

pub use session::SpotSession;

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
pub const DRYRUN_MODEL: &str = "dryrun-vision-1";
const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_REQUEST_TIMEOUT_S: f64 = 90.0;
const API_KEY_HEADER: &str = "x-goog-api-key";

/// Process-level settings, read once and handed to the client.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub api_key: Option<String>,
    pub api_base: String,
    pub model: Option<String>,
    pub request_timeout_s: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: DEFAULT_GEMINI_API_BASE.to_string(),
            model: None,
            request_timeout_s: DEFAULT_REQUEST_TIMEOUT_S,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self {
            api_key: non_empty_env("GEMINI_API_KEY")
                .or_else(|| non_empty_env("GOOGLE_API_KEY"))
                .or_else(|| non_empty_env("API_KEY")),
            api_base: non_empty_env("GEMINI_API_BASE")
                .map(|value| value.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_GEMINI_API_BASE.to_string()),
            model: non_empty_env("SPOTCHECK_MODEL"),
            request_timeout_s: clamp_timeout(
                non_empty_env("SPOTCHECK_REQUEST_TIMEOUT").and_then(|raw| raw.parse().ok()),
            ),
        }
    }
}

fn clamp_timeout(raw: Option<f64>) -> f64 {
    raw.filter(|value| value.is_finite())
        .unwrap_or(DEFAULT_REQUEST_TIMEOUT_S)
        .clamp(15.0, 300.0)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineMedia {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolCapability {
    WebSearch,
    MapSearch,
}

impl ToolCapability {
    fn wire_key(&self) -> &'static str {
        match self {
            Self::WebSearch => "googleSearch",
            Self::MapSearch => "googleMaps",
        }
    }
}

/// One analysis call: a text part, inline media parts, and request-level
/// configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceRequest {
    pub model: String,
    pub text: String,
    pub media: Vec<InlineMedia>,
    pub system_instruction: String,
    pub tools: Vec<ToolCapability>,
}

impl InferenceRequest {
    /// Media parts are only sent in upload mode, in submission order.
    pub fn from_submission(model: &str, prompt: &BuiltPrompt, state: &SubmissionState) -> Self {
        let media = match state.mode() {
            InputMode::Upload => state
                .media()
                .iter()
                .map(|item| InlineMedia {
                    mime_type: item.mime_type().to_string(),
                    data: item.encoded().to_string(),
                })
                .collect(),
            InputMode::VideoLink => Vec::new(),
        };
        Self {
            model: model.to_string(),
            text: prompt.text.clone(),
            media,
            system_instruction: prompt.system_instruction.to_string(),
            tools: vec![ToolCapability::WebSearch, ToolCapability::MapSearch],
        }
    }

    pub fn part_count(&self) -> usize {
        1 + self.media.len()
    }

    /// `generateContent` body. No `toolConfig` is sent, so search is not
    /// biased to any location.
    pub fn payload(&self) -> Value {
        let mut parts = vec![json!({ "text": self.text })];
        parts.extend(self.media.iter().map(|item| {
            json!({
                "inlineData": {
                    "mimeType": item.mime_type,
                    "data": item.data,
                }
            })
        }));
        json!({
            "contents": [{
                "role": "user",
                "parts": parts,
            }],
            "systemInstruction": {
                "parts": [{ "text": self.system_instruction }],
            },
            "tools": self
                .tools
                .iter()
                .map(|tool| {
                    let mut entry = Map::new();
                    entry.insert(tool.wire_key().to_string(), json!({}));
                    Value::Object(entry)
                })
                .collect::<Vec<Value>>(),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InferenceResponse {
    pub text: String,
    pub grounding_chunks: Vec<Value>,
    pub provider_response: Map<String, Value>,
}

pub trait InferenceProvider: Send + Sync {
    fn name(&self) -> &str;
    fn generate(&self, request: &InferenceRequest) -> Result<InferenceResponse>;
}

#[derive(Default)]
pub struct InferenceProviderRegistry {
    providers: BTreeMap<String, Box<dyn InferenceProvider>>,
}

impl InferenceProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registering a second provider under the same name replaces the first.
    pub fn register<P: InferenceProvider + 'static>(&mut self, provider: P) {
        self.providers
            .insert(provider.name().to_string(), Box::new(provider));
    }

    pub fn get(&self, name: &str) -> Option<&dyn InferenceProvider> {
        self.providers.get(name).map(|provider| provider.as_ref())
    }

    pub fn names(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }
}

/// Offline provider with a fixed, well-formed answer.
struct DryrunProvider;

impl InferenceProvider for DryrunProvider {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn generate(&self, request: &InferenceRequest) -> Result<InferenceResponse> {
        let text = format!(
            "*   **Spot Name**: Dry Run Plaza\n\
             *   **Location**: Intersection of Market St and 1st St\n\
             *   **City/Region**: San Francisco, CA, USA\n\
             *   **Context**: Offline response for {} part(s); no service was called.\n\
             *   **Confidence**: Approximate Area\n\
             COORDINATES: 37.789,-122.399",
            request.part_count()
        );
        Ok(InferenceResponse {
            text,
            grounding_chunks: vec![
                json!({"web": {"uri": "https://example.com/dryrun", "title": "Dry run source"}}),
                json!({"maps": {"uri": "https://maps.google.com/?cid=0", "title": "Dry Run Plaza"}}),
            ],
            provider_response: json_object(json!({
                "status": "ok",
                "model": request.model,
            })),
        })
    }
}

pub struct GeminiProvider {
    api_base: String,
    api_key: Option<String>,
    request_timeout_s: f64,
    http: HttpClient,
}

impl GeminiProvider {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            api_base: config.api_base.trim().trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            request_timeout_s: clamp_timeout(Some(config.request_timeout_s)),
            http: HttpClient::new(),
        }
    }

    fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    fn parse_response(payload: &Value) -> Result<InferenceResponse> {
        let candidates = payload
            .get("candidates")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let Some(candidate) = candidates.first() else {
            if let Some(reason) = payload
                .get("promptFeedback")
                .and_then(|feedback| feedback.get("blockReason"))
                .and_then(Value::as_str)
            {
                bail!("Gemini blocked the request ({reason})");
            }
            bail!("Gemini returned no candidates");
        };

        let text = candidate
            .get("content")
            .and_then(|content| content.get("parts"))
            .and_then(Value::as_array)
            .map(|parts| {
                parts
                    .iter()
                    .filter(|part| !part.get("thought").and_then(Value::as_bool).unwrap_or(false))
                    .filter_map(|part| part.get("text").and_then(Value::as_str))
                    .collect::<String>()
            })
            .unwrap_or_default();
        let grounding_chunks = candidate
            .get("groundingMetadata")
            .and_then(|metadata| metadata.get("groundingChunks"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        Ok(InferenceResponse {
            text,
            grounding_chunks,
            provider_response: json_object(json!({
                "candidates": candidates.len(),
                "finish_reason": candidate.get("finishReason").cloned().unwrap_or(Value::Null),
                "usage_metadata": payload.get("usageMetadata").cloned().unwrap_or(Value::Null),
            })),
        })
    }
}

impl InferenceProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn generate(&self, request: &InferenceRequest) -> Result<InferenceResponse> {
        let Some(api_key) = self.api_key.as_deref() else {
            bail!("GEMINI_API_KEY or GOOGLE_API_KEY not set");
        };
        let endpoint = self.endpoint_for_model(&request.model);
        // Keep the credential out of the URL and out of error text.
        let response = self
            .http
            .post(&endpoint)
            .header(API_KEY_HEADER, api_key)
            .timeout(Duration::from_secs_f64(self.request_timeout_s))
            .json(&request.payload())
            .send()
            .map_err(reqwest::Error::without_url)
            .with_context(|| format!("Gemini request failed ({endpoint})"))?;
        let payload = response_json_or_error("Gemini", response)?;
        Self::parse_response(&payload)
    }
}

fn default_provider_registry(config: &EngineConfig) -> InferenceProviderRegistry {
    let mut providers = InferenceProviderRegistry::new();
    providers.register(DryrunProvider);
    providers.register(GeminiProvider::new(config));
    providers
}

/// Clears the in-flight flag when the call finishes, however it finishes.
struct InFlightGuard {
    flag: Arc<AtomicBool>,
}

impl InFlightGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()?;
        Some(Self {
            flag: Arc::clone(flag),
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Sends requests to the provider behind the selected model. One call at a
/// time; no retries.
pub struct InferenceClient {
    providers: InferenceProviderRegistry,
    selector: ModelSelector,
    model: Option<String>,
    in_flight: Arc<AtomicBool>,
}

impl InferenceClient {
    pub fn new(config: &EngineConfig) -> Self {
        Self::with_providers(default_provider_registry(config), config.model.clone())
    }

    pub fn with_providers(providers: InferenceProviderRegistry, model: Option<String>) -> Self {
        Self {
            providers,
            selector: ModelSelector::new(None),
            model,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn register_provider<P: InferenceProvider + 'static>(&mut self, provider: P) {
        self.providers.register(provider);
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers.names()
    }

    pub fn set_model(&mut self, model: Option<String>) {
        self.model = model;
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn select_model(&self, state: &SubmissionState) -> Result<ModelSelection, SpotError> {
        self.selector
            .for_submission(self.model().unwrap_or(DEFAULT_MODEL), state)
    }

    pub fn generate(
        &self,
        provider: &str,
        request: &InferenceRequest,
    ) -> Result<InferenceResponse, SpotError> {
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight) else {
            return Err(SpotError::AnalysisInProgress);
        };
        let Some(provider) = self.providers.get(provider) else {
            return Err(SpotError::Inference(format!(
                "no provider registered for '{provider}'"
            )));
        };
        provider
            .generate(request)
            .map_err(|err| SpotError::Inference(error_chain_text(&err, 512)))
    }
}

fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .map_err(reqwest::Error::without_url)
        .with_context(|| format!("{provider} response body read failed"))?;
    if !status.is_success() {
        bail!(
            "{provider} request failed ({code}): {}",
            truncate_text(&body, 512)
        );
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{provider} returned invalid JSON payload"))?;
    Ok(parsed)
}

fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() || parts.last().map(String::as_str) == Some(trimmed) {
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

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn json_object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}
