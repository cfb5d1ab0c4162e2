use crate::error::SpotError;
use crate::submission::{InputMode, SubmissionState};

use super::registry::{ModelRegistry, ModelSpec, CAPABILITY_GROUNDING, CAPABILITY_VIDEO};

/// The model an analysis will run on, plus why it differs from the one the
/// user asked for, if it does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelection {
    pub model: ModelSpec,
    pub requested: String,
    pub capability: &'static str,
    pub fallback_reason: Option<String>,
}

/// Video links and uploaded clips need a model that reads video; stills
/// only need grounding.
pub fn required_capability(state: &SubmissionState) -> &'static str {
    match state.mode() {
        InputMode::VideoLink => CAPABILITY_VIDEO,
        InputMode::Upload if state.has_video_media() => CAPABILITY_VIDEO,
        InputMode::Upload => CAPABILITY_GROUNDING,
    }
}

#[derive(Debug, Clone)]
pub struct ModelSelector {
    pub registry: ModelRegistry,
}

impl ModelSelector {
    pub fn new(registry: Option<ModelRegistry>) -> Self {
        Self {
            registry: registry.unwrap_or_else(|| ModelRegistry::new(None)),
        }
    }

    /// Picks the model for `state`, keeping `requested` when it can handle
    /// the submission and otherwise taking the first registered model that
    /// can.
    pub fn for_submission(
        &self,
        requested: &str,
        state: &SubmissionState,
    ) -> Result<ModelSelection, SpotError> {
        let capability = required_capability(state);
        let requested = requested.trim();
        if let Some(model) = self.registry.ensure(requested, capability) {
            return Ok(ModelSelection {
                model,
                requested: requested.to_string(),
                capability,
                fallback_reason: None,
            });
        }

        let Some(model) = self.registry.by_capability(capability).into_iter().next() else {
            return Err(SpotError::Inference(format!(
                "no configured model can analyze {}",
                describe_capability(capability)
            )));
        };
        let fallback_reason = match self.registry.get(requested) {
            Some(_) => format!(
                "'{requested}' cannot analyze {}; using '{}'.",
                describe_capability(capability),
                model.name
            ),
            None => format!("'{requested}' is not a known model; using '{}'.", model.name),
        };
        Ok(ModelSelection {
            model,
            requested: requested.to_string(),
            capability,
            fallback_reason: Some(fallback_reason),
        })
    }
}

fn describe_capability(capability: &str) -> &'static str {
    if capability == CAPABILITY_VIDEO {
        "video"
    } else {
        "grounded image searches"
    }
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;

    use crate::media::CandidateFile;
    use crate::models::{ModelRegistry, ModelSpec, CAPABILITY_GROUNDING, CAPABILITY_VIDEO};
    use crate::submission::{InputMode, SubmissionState};
    use crate::SpotError;

    use super::{required_capability, ModelSelector};

    fn model(name: &str, capabilities: &[&str]) -> ModelSpec {
        ModelSpec {
            name: name.to_string(),
            provider: "dryrun".to_string(),
            capabilities: capabilities.iter().map(|item| item.to_string()).collect(),
            context_window: None,
        }
    }

    fn with_files(files: Vec<CandidateFile>) -> anyhow::Result<SubmissionState> {
        let mut state = SubmissionState::new();
        state.add_batch(files)?;
        Ok(state)
    }

    #[test]
    fn capability_follows_mode_and_media() -> anyhow::Result<()> {
        let stills = with_files(vec![CandidateFile::from_bytes("a.jpg", "image/jpeg", vec![1])])?;
        assert_eq!(required_capability(&stills), CAPABILITY_GROUNDING);

        let clip = with_files(vec![CandidateFile::from_bytes("a.mp4", "video/mp4", vec![1])])?;
        assert_eq!(required_capability(&clip), CAPABILITY_VIDEO);

        let mut link = SubmissionState::new();
        link.set_mode(InputMode::VideoLink);
        assert_eq!(required_capability(&link), CAPABILITY_VIDEO);
        Ok(())
    }

    #[test]
    fn capable_request_is_kept() -> anyhow::Result<()> {
        let clip = with_files(vec![CandidateFile::from_bytes("a.webm", "video/webm", vec![1])])?;
        let selection = ModelSelector::new(None).for_submission("gemini-2.5-pro", &clip)?;
        assert_eq!(selection.model.name, "gemini-2.5-pro");
        assert_eq!(selection.capability, CAPABILITY_VIDEO);
        assert_eq!(selection.fallback_reason, None);
        Ok(())
    }

    #[test]
    fn stills_only_model_falls_back_for_clips() -> anyhow::Result<()> {
        let clip = with_files(vec![CandidateFile::from_bytes("a.mov", "video/quicktime", vec![1])])?;
        let selection = ModelSelector::new(None).for_submission("gemini-2.5-flash-lite", &clip)?;
        assert_eq!(selection.model.name, "gemini-2.5-flash");
        assert_eq!(selection.requested, "gemini-2.5-flash-lite");
        assert_eq!(
            selection.fallback_reason.as_deref(),
            Some("'gemini-2.5-flash-lite' cannot analyze video; using 'gemini-2.5-flash'.")
        );
        Ok(())
    }

    #[test]
    fn unknown_model_falls_back_to_first_grounded() -> anyhow::Result<()> {
        let mut models = IndexMap::new();
        models.insert(
            "grounded-fallback".to_string(),
            model("grounded-fallback", &[CAPABILITY_GROUNDING]),
        );
        let stills = with_files(vec![CandidateFile::from_bytes("a.png", "image/png", vec![1])])?;
        let selection = ModelSelector::new(Some(ModelRegistry::new(Some(models))))
            .for_submission(" missing ", &stills)?;
        assert_eq!(selection.model.name, "grounded-fallback");
        assert_eq!(
            selection.fallback_reason.as_deref(),
            Some("'missing' is not a known model; using 'grounded-fallback'.")
        );
        Ok(())
    }

    #[test]
    fn no_capable_model_is_an_inference_error() {
        let mut models = IndexMap::new();
        models.insert(
            "stills-only".to_string(),
            model("stills-only", &[CAPABILITY_GROUNDING]),
        );
        let mut link = SubmissionState::new();
        link.set_mode(InputMode::VideoLink);
        let err = ModelSelector::new(Some(ModelRegistry::new(Some(models))))
            .for_submission("stills-only", &link)
            .err();
        assert_eq!(
            err,
            Some(SpotError::Inference(
                "no configured model can analyze video".to_string()
            ))
        );
    }
}
