use serde::Serialize;

use crate::error::SpotError;
use crate::media::{encode, CandidateFile, MediaItem, PreviewLedger};

pub const MAX_MEDIA_ITEMS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InputMode {
    #[default]
    Upload,
    VideoLink,
}

impl InputMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upload => "upload",
            Self::VideoLink => "video_link",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "upload" | "media" | "files" => Some(Self::Upload),
            "video" | "video_link" | "link" | "youtube" | "url" => Some(Self::VideoLink),
            _ => None,
        }
    }
}

/// Result of an admitted batch. Individually rejected files are listed
/// here rather than failing the batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub admitted: Vec<String>,
    pub rejected: Vec<SpotError>,
}

impl BatchOutcome {
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }

    /// One banner message covering every rejection in the batch.
    pub fn message(&self) -> Option<String> {
        if self.rejected.is_empty() {
            return None;
        }
        Some(
            self.rejected
                .iter()
                .map(SpotError::user_message)
                .collect::<Vec<_>>()
                .join(" "),
        )
    }
}

/// The request being composed: media for upload mode, link fields for
/// video-link mode.
#[derive(Debug, Default)]
pub struct SubmissionState {
    mode: InputMode,
    media: Vec<MediaItem>,
    source_link: Option<String>,
    video_url: Option<String>,
    start_timestamp: Option<String>,
    duration_seconds: Option<String>,
    previews: PreviewLedger,
}

impl SubmissionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_previews(previews: PreviewLedger) -> Self {
        Self {
            previews,
            ..Self::default()
        }
    }

    pub fn mode(&self) -> InputMode {
        self.mode
    }

    /// Switching mode leaves upload media in place.
    pub fn set_mode(&mut self, mode: InputMode) {
        self.mode = mode;
    }

    pub fn media(&self) -> &[MediaItem] {
        &self.media
    }

    pub fn len(&self) -> usize {
        self.media.len()
    }

    pub fn is_empty(&self) -> bool {
        self.media.is_empty()
    }

    pub fn has_video_media(&self) -> bool {
        self.media.iter().any(|item| item.media_type().is_video())
    }

    pub fn live_previews(&self) -> usize {
        self.previews.live_count()
    }

    /// Admits a batch in order.
    ///
    /// A batch that would push the count past [`MAX_MEDIA_ITEMS`] is refused
    /// whole. Otherwise invalid files are skipped and reported while valid
    /// ones are appended.
    pub fn add_batch(&mut self, files: Vec<CandidateFile>) -> Result<BatchOutcome, SpotError> {
        if self.media.len() + files.len() > MAX_MEDIA_ITEMS {
            return Err(SpotError::TooManyFiles {
                current: self.media.len(),
                incoming: files.len(),
                limit: MAX_MEDIA_ITEMS,
            });
        }

        let mut outcome = BatchOutcome::default();
        for file in files {
            match encode(file, &self.previews) {
                Ok(item) => {
                    outcome.admitted.push(item.name().to_string());
                    self.media.push(item);
                }
                Err(err) => outcome.rejected.push(err),
            }
        }
        Ok(outcome)
    }

    /// Drops the item at `index`, releasing its preview. Returns the removed
    /// item's name, or `None` when the index is out of range.
    pub fn remove(&mut self, index: usize) -> Option<String> {
        if index >= self.media.len() {
            return None;
        }
        let item = self.media.remove(index);
        Some(item.name().to_string())
    }

    pub fn source_link(&self) -> Option<&str> {
        self.source_link.as_deref()
    }

    pub fn set_source_link(&mut self, value: Option<String>) {
        self.source_link = normalize_text(value);
    }

    pub fn video_url(&self) -> Option<&str> {
        self.video_url.as_deref()
    }

    pub fn set_video_url(&mut self, value: Option<String>) {
        self.video_url = normalize_text(value);
    }

    pub fn start_timestamp(&self) -> Option<&str> {
        self.start_timestamp.as_deref()
    }

    pub fn set_start_timestamp(&mut self, value: Option<String>) {
        self.start_timestamp = normalize_text(value);
    }

    pub fn duration_seconds(&self) -> Option<&str> {
        self.duration_seconds.as_deref()
    }

    pub fn set_duration_seconds(&mut self, value: Option<String>) {
        self.duration_seconds = normalize_text(value);
    }

    /// Releases every item and clears the link fields. The mode is kept.
    pub fn clear(&mut self) {
        self.media.clear();
        self.source_link = None;
        self.video_url = None;
        self.start_timestamp = None;
        self.duration_seconds = None;
    }

    /// Whether the current mode has what it needs to submit.
    pub fn ensure_ready(&self) -> Result<(), SpotError> {
        match self.mode {
            InputMode::Upload if self.media.is_empty() => Err(SpotError::IncompleteSubmission(
                "Add at least one image or video before analyzing.".to_string(),
            )),
            InputMode::VideoLink if self.video_url.is_none() => Err(
                SpotError::IncompleteSubmission("Enter a video URL before analyzing.".to_string()),
            ),
            _ => Ok(()),
        }
    }
}

fn normalize_text(value: Option<String>) -> Option<String> {
    value
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}
