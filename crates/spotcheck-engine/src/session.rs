use serde_json::{json, Map, Value};
use spotcheck_contracts::events::{redact_media, EventWriter};
use spotcheck_contracts::{
    build_prompt, AnalysisResult, BatchOutcome, CandidateFile, InputMode, SpotError,
    SubmissionState,
};

use crate::{InferenceClient, InferenceRequest};

/// One user's working session: the submission being composed, the last
/// analysis outcome, and the client that produces it.
///
/// The result and error are mutually exclusive. Editing the submission
/// clears the result; a failed analysis keeps every input.
pub struct SpotSession {
    state: SubmissionState,
    result: Option<AnalysisResult>,
    error: Option<SpotError>,
    client: InferenceClient,
    events: EventWriter,
}

impl SpotSession {
    pub fn new(client: InferenceClient, events: EventWriter) -> Self {
        let _ = events.emit(
            "session_started",
            json_object(json!({
                "model": client.model(),
                "providers": client.provider_names(),
            })),
        );
        Self {
            state: SubmissionState::new(),
            result: None,
            error: None,
            client,
            events,
        }
    }

    pub fn state(&self) -> &SubmissionState {
        &self.state
    }

    pub fn result(&self) -> Option<&AnalysisResult> {
        self.result.as_ref()
    }

    pub fn error(&self) -> Option<&SpotError> {
        self.error.as_ref()
    }

    pub fn is_analyzing(&self) -> bool {
        self.client.is_busy()
    }

    pub fn events(&self) -> &EventWriter {
        &self.events
    }

    pub fn model(&self) -> Option<&str> {
        self.client.model()
    }

    pub fn set_model(&mut self, model: Option<String>) {
        self.client.set_model(model);
    }

    /// Admits a batch of files. Rejections are stored as the session error
    /// and also returned so the caller can show them.
    pub fn add_files(&mut self, files: Vec<CandidateFile>) -> Result<BatchOutcome, SpotError> {
        self.result = None;
        self.error = None;
        let incoming = files.len();
        let outcome = match self.state.add_batch(files) {
            Ok(outcome) => outcome,
            Err(err) => {
                let _ = self.events.emit(
                    "batch_refused",
                    json_object(json!({
                        "incoming": incoming,
                        "current": self.state.len(),
                        "reason": err.kind(),
                    })),
                );
                self.error = Some(err.clone());
                return Err(err);
            }
        };

        let admitted_from = self.state.len() - outcome.admitted.len();
        for item in &self.state.media()[admitted_from..] {
            let _ = self.events.emit(
                "media_admitted",
                json_object(json!({
                    "name": item.name(),
                    "mime_type": item.mime_type(),
                    "size": item.size(),
                    "sha256": item.digest(),
                    "preview": item.preview().uri(),
                })),
            );
        }
        for err in &outcome.rejected {
            let _ = self.events.emit(
                "media_rejected",
                json_object(json!({
                    "name": err.file(),
                    "reason": err.kind(),
                    "message": err.user_message(),
                })),
            );
        }
        // The banner shows one error; the outcome carries all of them.
        self.error = outcome.rejected.first().cloned();
        Ok(outcome)
    }

    pub fn remove_media(&mut self, index: usize) -> Option<String> {
        let removed = self.state.remove(index)?;
        self.result = None;
        let _ = self.events.emit(
            "media_removed",
            json_object(json!({
                "index": index,
                "name": removed,
                "remaining": self.state.len(),
            })),
        );
        Some(removed)
    }

    /// Switching modes keeps both sets of inputs but drops the last outcome.
    pub fn switch_mode(&mut self, mode: InputMode) {
        if self.state.mode() == mode {
            return;
        }
        let from = self.state.mode();
        self.state.set_mode(mode);
        self.result = None;
        self.error = None;
        let _ = self.events.emit(
            "mode_switched",
            json_object(json!({
                "from": from.as_str(),
                "to": mode.as_str(),
            })),
        );
    }

    pub fn set_source_link(&mut self, value: Option<String>) {
        self.state.set_source_link(value);
        self.result = None;
    }

    pub fn set_video_url(&mut self, value: Option<String>) {
        self.state.set_video_url(value);
        self.result = None;
    }

    pub fn set_start_timestamp(&mut self, value: Option<String>) {
        self.state.set_start_timestamp(value);
        self.result = None;
    }

    pub fn set_duration_seconds(&mut self, value: Option<String>) {
        self.state.set_duration_seconds(value);
        self.result = None;
    }

    pub fn clear(&mut self) {
        let released = self.state.len();
        self.state.clear();
        self.result = None;
        self.error = None;
        let _ = self.events.emit(
            "submission_cleared",
            json_object(json!({
                "released": released,
                "mode": self.state.mode().as_str(),
            })),
        );
    }

    /// Runs one analysis of the current submission.
    ///
    /// On failure the inputs stay as they were so the user can retry.
    pub fn analyze(&mut self) -> Result<&AnalysisResult, SpotError> {
        self.result = None;
        self.error = None;
        if let Err(err) = self.try_analyze() {
            self.error = Some(err.clone());
            return Err(err);
        }
        self.result.as_ref().ok_or_else(|| {
            SpotError::Inference("analysis finished without a result".to_string())
        })
    }

    fn try_analyze(&mut self) -> Result<(), SpotError> {
        self.state.ensure_ready()?;
        if self.client.is_busy() {
            return Err(SpotError::AnalysisInProgress);
        }

        let selection = self.client.select_model(&self.state)?;
        let prompt = build_prompt(&self.state);
        let request = InferenceRequest::from_submission(&selection.model.name, &prompt, &self.state);
        let _ = self.events.emit(
            "analysis_started",
            json_object(json!({
                "mode": self.state.mode().as_str(),
                "model": selection.model.name,
                "provider": selection.model.provider,
                "requested_model": selection.requested,
                "capability": selection.capability,
                "fallback_reason": selection.fallback_reason,
                "parts": request.part_count(),
                "media": self.state.media().iter().map(|item| json!({
                    "name": item.name(),
                    "sha256": item.digest(),
                })).collect::<Vec<Value>>(),
                "request": redact_media(&request.payload()),
            })),
        );

        let response = match self.client.generate(&selection.model.provider, &request) {
            Ok(response) => response,
            Err(err) => {
                let _ = self.events.emit(
                    "analysis_failed",
                    json_object(json!({
                        "model": selection.model.name,
                        "reason": err.kind(),
                        "error": err.to_string(),
                    })),
                );
                return Err(err);
            }
        };

        let result = AnalysisResult::interpret(&response.text, &response.grounding_chunks);
        let _ = self.events.emit(
            "analysis_completed",
            json_object(json!({
                "model": selection.model.name,
                "coordinates": result.coordinates,
                "web_sources": result.web_sources().count(),
                "map_sources": result.map_sources().count(),
                "provider_response": Value::Object(response.provider_response),
            })),
        );
        self.result = Some(result);
        Ok(())
    }

    /// Releases every preview and closes the log.
    pub fn finish(mut self) {
        let released = self.state.len();
        self.state.clear();
        let _ = self.events.emit(
            "session_finished",
            json_object(json!({
                "released": released,
                "live_previews": self.state.live_previews(),
            })),
        );
    }
}

fn json_object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::{Arc, Mutex};

    use anyhow::{anyhow, Result};
    use serde_json::{json, Value};
    use spotcheck_contracts::events::EventWriter;
    use spotcheck_contracts::{CandidateFile, InputMode, SpotError};

    use super::SpotSession;
    use crate::{
        EngineConfig, InferenceClient, InferenceProvider, InferenceProviderRegistry, InferenceRequest,
        InferenceResponse, DRYRUN_MODEL,
    };

    #[derive(Clone)]
    struct RecordingProvider {
        requests: Arc<Mutex<Vec<InferenceRequest>>>,
        reply: Result<String, String>,
    }

    impl RecordingProvider {
        fn replying(text: &str) -> Self {
            Self {
                requests: Arc::new(Mutex::new(Vec::new())),
                reply: Ok(text.to_string()),
            }
        }

        fn failing(message: &str) -> Self {
            Self {
                requests: Arc::new(Mutex::new(Vec::new())),
                reply: Err(message.to_string()),
            }
        }

        fn recorded(&self) -> Vec<InferenceRequest> {
            self.requests
                .lock()
                .map(|rows| rows.clone())
                .unwrap_or_default()
        }
    }

    impl InferenceProvider for RecordingProvider {
        fn name(&self) -> &str {
            "dryrun"
        }

        fn generate(&self, request: &InferenceRequest) -> Result<InferenceResponse> {
            self.requests
                .lock()
                .map_err(|_| anyhow!("recorder poisoned"))?
                .push(request.clone());
            match &self.reply {
                Ok(text) => Ok(InferenceResponse {
                    text: text.clone(),
                    grounding_chunks: vec![
                        json!({"web": {"uri": "https://skate.example/clip", "title": "Clip"}}),
                        json!({"maps": {"uri": "https://maps.example/park", "title": "Example Park"}}),
                        json!({"retrievedContext": {"uri": "https://ignored"}}),
                    ],
                    ..InferenceResponse::default()
                }),
                Err(message) => Err(anyhow!(message.clone())),
            }
        }
    }

    fn session_with(provider: &RecordingProvider, events: EventWriter) -> SpotSession {
        let mut providers = InferenceProviderRegistry::new();
        providers.register(provider.clone());
        let client = InferenceClient::with_providers(providers, Some(DRYRUN_MODEL.to_string()));
        SpotSession::new(client, events)
    }

    fn jpeg(name: &str) -> CandidateFile {
        CandidateFile::from_bytes(name, "image/jpeg", vec![0xff, 0xd8, 0xff, 0xe0])
    }

    fn read_events(path: &std::path::Path) -> Result<Vec<Value>> {
        fs::read_to_string(path)?
            .lines()
            .map(|line| Ok(serde_json::from_str(line)?))
            .collect()
    }

    #[test]
    fn two_images_with_link_end_to_end() -> Result<()> {
        let provider = RecordingProvider::replying("**Spot Name**: Example Park\nCOORDINATES: 1.0,2.0");
        let mut session = session_with(&provider, EventWriter::disabled("test"));
        session.add_files(vec![jpeg("a.jpg"), jpeg("b.jpg")])?;
        session.set_source_link(Some("https://youtu.be/part".to_string()));

        let result = session.analyze()?.clone();
        assert_eq!(result.text, "**Spot Name**: Example Park");
        let coords = result.coordinates.ok_or_else(|| anyhow!("missing coordinates"))?;
        assert_eq!((coords.latitude, coords.longitude), (1.0, 2.0));
        assert_eq!(result.web_sources().count(), 1);
        assert_eq!(result.map_sources().count(), 1);

        let requests = provider.recorded();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].part_count(), 3);
        assert_eq!(requests[0].media.len(), 2);
        assert!(requests[0].text.contains("https://youtu.be/part"));
        assert!(session.error().is_none());
        assert!(!session.is_analyzing());
        Ok(())
    }

    #[test]
    fn failed_analysis_keeps_inputs() -> Result<()> {
        let provider = RecordingProvider::failing("quota exceeded");
        let mut session = session_with(&provider, EventWriter::disabled("test"));
        session.add_files(vec![jpeg("a.jpg")])?;
        session.set_source_link(Some("https://example.com".to_string()));

        let err = session.analyze().err();
        assert_eq!(err, Some(SpotError::Inference("quota exceeded".to_string())));
        assert_eq!(session.error().map(SpotError::kind), Some("inference"));
        assert!(session.result().is_none());
        assert_eq!(session.state().len(), 1);
        assert_eq!(session.state().source_link(), Some("https://example.com"));
        assert_eq!(provider.recorded().len(), 1);
        Ok(())
    }

    #[test]
    fn incomplete_submission_never_calls_provider() {
        let provider = RecordingProvider::replying("unused");
        let mut session = session_with(&provider, EventWriter::disabled("test"));
        assert!(matches!(
            session.analyze(),
            Err(SpotError::IncompleteSubmission(_))
        ));
        session.switch_mode(InputMode::VideoLink);
        assert!(matches!(
            session.analyze(),
            Err(SpotError::IncompleteSubmission(_))
        ));
        assert!(provider.recorded().is_empty());
    }

    #[test]
    fn video_link_mode_sends_text_only() -> Result<()> {
        let provider = RecordingProvider::replying("Region only, no pin.");
        let mut session = session_with(&provider, EventWriter::disabled("test"));
        session.add_files(vec![jpeg("a.jpg")])?;
        session.switch_mode(InputMode::VideoLink);
        session.set_video_url(Some("https://youtu.be/abc".to_string()));
        session.set_start_timestamp(Some("1:05".to_string()));

        let result = session.analyze()?;
        assert_eq!(result.text, "Region only, no pin.");
        assert!(result.coordinates.is_none());
        let requests = provider.recorded();
        assert_eq!(requests[0].part_count(), 1);
        assert_eq!(session.state().len(), 1);
        Ok(())
    }

    #[test]
    fn oversized_batch_is_refused_whole() -> Result<()> {
        let provider = RecordingProvider::replying("unused");
        let mut session = session_with(&provider, EventWriter::disabled("test"));
        session.add_files(vec![jpeg("a.jpg"), jpeg("b.jpg"), jpeg("c.jpg")])?;

        let err = session
            .add_files(vec![jpeg("d.jpg"), jpeg("e.jpg"), jpeg("f.jpg")])
            .err();
        assert_eq!(err.as_ref().map(SpotError::kind), Some("too_many_files"));
        assert_eq!(session.error(), err.as_ref());
        assert_eq!(session.state().len(), 3);
        Ok(())
    }

    #[test]
    fn mixed_batch_admits_valid_files() -> Result<()> {
        let provider = RecordingProvider::replying("unused");
        let mut session = session_with(&provider, EventWriter::disabled("test"));
        let outcome = session.add_files(vec![
            jpeg("a.jpg"),
            CandidateFile::from_bytes("notes.pdf", "application/pdf", vec![1, 2]),
        ])?;
        assert_eq!(outcome.admitted, vec!["a.jpg"]);
        assert_eq!(session.state().len(), 1);
        assert_eq!(session.error().map(SpotError::kind), Some("invalid_type"));
        Ok(())
    }

    #[test]
    fn editing_inputs_clears_previous_result() -> Result<()> {
        let provider = RecordingProvider::replying("COORDINATES: 10,20");
        let mut session = session_with(&provider, EventWriter::disabled("test"));
        session.add_files(vec![jpeg("a.jpg"), jpeg("b.jpg")])?;
        session.analyze()?;
        assert!(session.result().is_some());

        assert_eq!(session.remove_media(0).as_deref(), Some("a.jpg"));
        assert!(session.result().is_none());
        assert_eq!(session.remove_media(5), None);
        Ok(())
    }

    #[test]
    fn unreachable_service_keeps_api_key_out_of_errors_and_log() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let client = InferenceClient::new(&EngineConfig {
            api_key: Some("SECRET_KEY_123".to_string()),
            api_base: "http://127.0.0.1:1/v1beta".to_string(),
            model: Some("gemini-2.5-flash".to_string()),
            ..EngineConfig::default()
        });
        let mut session = SpotSession::new(client, EventWriter::new(&path, "sess-2"));
        session.add_files(vec![jpeg("a.jpg")])?;

        let err = session
            .analyze()
            .err()
            .ok_or_else(|| anyhow!("unreachable host should fail"))?;
        assert_eq!(err.kind(), "inference");
        assert!(!err.to_string().contains("SECRET_KEY_123"));
        assert!(!format!("{err:?}").contains("SECRET_KEY_123"));
        session.finish();

        let log = fs::read_to_string(&path)?;
        assert!(log.contains("analysis_failed"));
        assert!(!log.contains("SECRET_KEY_123"));
        Ok(())
    }

    #[test]
    fn events_log_records_lifecycle_without_media_bytes() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let provider = RecordingProvider::replying("COORDINATES: -33.86,151.21");
        let mut session = session_with(&provider, EventWriter::new(&path, "sess-1"));
        session.add_files(vec![jpeg("a.jpg")])?;
        session.analyze()?;
        session.clear();
        session.finish();

        let events = read_events(&path)?;
        let kinds: Vec<&str> = events
            .iter()
            .filter_map(|event| event["type"].as_str())
            .collect();
        assert_eq!(
            kinds,
            vec![
                "session_started",
                "media_admitted",
                "analysis_started",
                "analysis_completed",
                "submission_cleared",
                "session_finished",
            ]
        );
        assert!(events.iter().all(|event| event["session_id"] == json!("sess-1")));
        assert_eq!(events[1]["sha256"].as_str().map(str::len), Some(64));
        assert_eq!(
            events[2]["request"]["contents"][0]["parts"][1]["inlineData"]["data"],
            json!("<omitted>")
        );
        assert_eq!(events[3]["coordinates"]["latitude"], json!(-33.86));
        assert_eq!(events[5]["live_previews"], json!(0));
        Ok(())
    }
}
