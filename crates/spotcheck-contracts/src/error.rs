use std::fmt;

/// Every failure a front-end has to turn into a message.
///
/// File validation kinds are reported per file; `TooManyFiles` covers a
/// whole batch. None of them are fatal to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpotError {
    InvalidType {
        file: String,
        mime_type: String,
    },
    Oversize {
        file: String,
        size: u64,
        limit: u64,
    },
    TooManyFiles {
        current: usize,
        incoming: usize,
        limit: usize,
    },
    FileProcessing {
        file: String,
        reason: String,
    },
    IncompleteSubmission(String),
    AnalysisInProgress,
    Inference(String),
}

impl SpotError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidType { .. } => "invalid_type",
            Self::Oversize { .. } => "oversize",
            Self::TooManyFiles { .. } => "too_many_files",
            Self::FileProcessing { .. } => "file_processing",
            Self::IncompleteSubmission(_) => "incomplete_submission",
            Self::AnalysisInProgress => "analysis_in_progress",
            Self::Inference(_) => "inference",
        }
    }

    /// Name of the offending file for per-file failures.
    pub fn file(&self) -> Option<&str> {
        match self {
            Self::InvalidType { file, .. }
            | Self::Oversize { file, .. }
            | Self::FileProcessing { file, .. } => Some(file.as_str()),
            _ => None,
        }
    }

    pub fn is_file_error(&self) -> bool {
        self.file().is_some()
    }

    /// Short text suitable for the single error banner of a front-end.
    pub fn user_message(&self) -> String {
        match self {
            Self::InvalidType { file, .. } => format!(
                "{file}: please upload a valid image (JPG, PNG, WebP) or video (MP4, WebM, MOV)."
            ),
            Self::Oversize { file, limit, .. } => format!(
                "{file}: file size too large. Please upload files smaller than {}MB.",
                limit / (1024 * 1024)
            ),
            Self::TooManyFiles { limit, .. } => {
                format!("You can upload a maximum of {limit} files per analysis.")
            }
            Self::FileProcessing { file, .. } => format!("{file}: failed to process file."),
            Self::IncompleteSubmission(reason) => reason.clone(),
            Self::AnalysisInProgress => "An analysis is already running.".to_string(),
            Self::Inference(_) => {
                "An error occurred while analyzing the location. Please try again.".to_string()
            }
        }
    }
}

impl fmt::Display for SpotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidType { file, mime_type } => {
                write!(f, "{file}: unsupported media type '{mime_type}'")
            }
            Self::Oversize { file, size, limit } => {
                write!(f, "{file}: {size} bytes exceeds the {limit} byte limit")
            }
            Self::TooManyFiles {
                current,
                incoming,
                limit,
            } => write!(
                f,
                "adding {incoming} file(s) to {current} would exceed the limit of {limit}"
            ),
            Self::FileProcessing { file, reason } => write!(f, "{file}: {reason}"),
            Self::IncompleteSubmission(reason) => write!(f, "{reason}"),
            Self::AnalysisInProgress => write!(f, "analysis already in progress"),
            Self::Inference(message) => write!(f, "inference failed: {message}"),
        }
    }
}

impl std::error::Error for SpotError {}
