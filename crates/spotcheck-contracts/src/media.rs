use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::SpotError;

/// Per-file cap, enforced before the file is read.
pub const MAX_MEDIA_BYTES: u64 = 20 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    Jpeg,
    Png,
    Webp,
    Mp4,
    Webm,
    Quicktime,
}

impl MediaType {
    pub const ALL: [MediaType; 6] = [
        MediaType::Jpeg,
        MediaType::Png,
        MediaType::Webp,
        MediaType::Mp4,
        MediaType::Webm,
        MediaType::Quicktime,
    ];

    /// Exact allow-list match; no case folding or parameter stripping.
    pub fn from_mime(mime: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.mime() == mime)
    }

    pub fn mime(&self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Webp => "image/webp",
            Self::Mp4 => "video/mp4",
            Self::Webm => "video/webm",
            Self::Quicktime => "video/quicktime",
        }
    }

    pub fn is_video(&self) -> bool {
        matches!(self, Self::Mp4 | Self::Webm | Self::Quicktime)
    }
}

/// Declared MIME type for a path, the way a file picker reports it.
///
/// Types outside the allow-list are still reported so validation can name
/// them; unknown extensions become `application/octet-stream`.
pub fn mime_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "heic" => "image/heic",
        "mp4" | "m4v" => "video/mp4",
        "webm" => "video/webm",
        "mov" | "qt" => "video/quicktime",
        "avi" => "video/x-msvideo",
        "mkv" => "video/x-matroska",
        _ => "application/octet-stream",
    }
}

/// Returns the payload of a `data:<mime>;base64,<payload>` URL, or the
/// input unchanged when it carries no such prefix.
pub fn strip_data_url_prefix(raw: &str) -> &str {
    if !raw.starts_with("data:") {
        return raw;
    }
    raw.split_once(',').map(|(_, payload)| payload).unwrap_or(raw)
}

#[derive(Debug, Clone)]
enum FileSource {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

/// A file offered for admission, not yet validated.
#[derive(Debug, Clone)]
pub struct CandidateFile {
    name: String,
    mime_type: String,
    source: FileSource,
}

impl CandidateFile {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|value| value.to_string_lossy().to_string())
            .unwrap_or_else(|| path.to_string_lossy().to_string());
        Self {
            name,
            mime_type: mime_for_path(&path).to_string(),
            source: FileSource::Path(path),
        }
    }

    pub fn from_bytes(
        name: impl Into<String>,
        mime_type: impl Into<String>,
        bytes: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            source: FileSource::Bytes(bytes.into()),
        }
    }

    /// Builds a candidate from a base64 `data:` URL, taking the MIME type
    /// from its header and decoding the payload behind the prefix.
    pub fn from_data_url(name: impl Into<String>, data_url: &str) -> Result<Self, SpotError> {
        let name = name.into();
        let header = data_url
            .strip_prefix("data:")
            .and_then(|rest| rest.split_once(','))
            .map(|(header, _)| header)
            .ok_or_else(|| SpotError::FileProcessing {
                file: name.clone(),
                reason: "not a data URL".to_string(),
            })?;
        let Some(mime_type) = header.strip_suffix(";base64") else {
            return Err(SpotError::FileProcessing {
                file: name,
                reason: "data URL is not base64-encoded".to_string(),
            });
        };
        let mime_type = mime_type.to_string();
        let bytes = BASE64
            .decode(strip_data_url_prefix(data_url).trim())
            .map_err(|err| SpotError::FileProcessing {
                file: name.clone(),
                reason: format!("invalid base64 payload: {err}"),
            })?;
        Ok(Self::from_bytes(name, mime_type, bytes))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn local_path(&self) -> Option<&Path> {
        match &self.source {
            FileSource::Path(path) => Some(path.as_path()),
            FileSource::Bytes(_) => None,
        }
    }

    fn size(&self) -> io::Result<u64> {
        match &self.source {
            FileSource::Path(path) => Ok(fs::metadata(path)?.len()),
            FileSource::Bytes(bytes) => Ok(bytes.len() as u64),
        }
    }

    fn into_bytes(self) -> io::Result<Vec<u8>> {
        match self.source {
            FileSource::Path(path) => fs::read(path),
            FileSource::Bytes(bytes) => Ok(bytes),
        }
    }
}

/// Tracks how many preview handles are alive.
#[derive(Debug, Clone, Default)]
pub struct PreviewLedger {
    live: Arc<AtomicUsize>,
}

impl PreviewLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn live_count(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    fn allocate(&self, name: &str, local_path: Option<&Path>) -> PreviewHandle {
        self.live.fetch_add(1, Ordering::SeqCst);
        let id = Uuid::new_v4();
        let uri = match local_path {
            Some(path) => format!("file://{}", path.display()),
            None => format!("preview://{id}/{name}"),
        };
        PreviewHandle {
            id,
            uri,
            live: Arc::clone(&self.live),
        }
    }
}

/// Local-only preview reference. Not `Clone`: the owning item releases it
/// exactly once when dropped.
#[derive(Debug)]
pub struct PreviewHandle {
    id: Uuid,
    uri: String,
    live: Arc<AtomicUsize>,
}

impl PreviewHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }
}

impl Drop for PreviewHandle {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A validated, encoded asset ready to be sent inline.
#[derive(Debug)]
pub struct MediaItem {
    name: String,
    media_type: MediaType,
    bytes: Vec<u8>,
    encoded: String,
    digest: String,
    preview: PreviewHandle,
}

impl MediaItem {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    pub fn mime_type(&self) -> &'static str {
        self.media_type.mime()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// Base64 text without any data-URL prefix.
    pub fn encoded(&self) -> &str {
        &self.encoded
    }

    /// Hex SHA-256 of the raw bytes, used in logs in place of content.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn preview(&self) -> &PreviewHandle {
        &self.preview
    }
}

/// Validates `file` against the allow-list and size cap, then encodes it.
///
/// The type is checked before the size, and the size before any content is
/// read.
pub fn encode(file: CandidateFile, previews: &PreviewLedger) -> Result<MediaItem, SpotError> {
    let Some(media_type) = MediaType::from_mime(file.mime_type()) else {
        return Err(SpotError::InvalidType {
            file: file.name.clone(),
            mime_type: file.mime_type.clone(),
        });
    };
    let size = file.size().map_err(|err| SpotError::FileProcessing {
        file: file.name.clone(),
        reason: err.to_string(),
    })?;
    check_size(&file.name, size)?;

    let name = file.name.clone();
    let local_path = file.local_path().map(Path::to_path_buf);
    let bytes = file.into_bytes().map_err(|err| SpotError::FileProcessing {
        file: name.clone(),
        reason: err.to_string(),
    })?;
    // The file may have grown between stat and read.
    check_size(&name, bytes.len() as u64)?;

    let encoded = BASE64.encode(&bytes);
    let digest = hex::encode(Sha256::digest(&bytes));
    let preview = previews.allocate(&name, local_path.as_deref());
    Ok(MediaItem {
        name,
        media_type,
        bytes,
        encoded,
        digest,
        preview,
    })
}

fn check_size(name: &str, size: u64) -> Result<(), SpotError> {
    if size > MAX_MEDIA_BYTES {
        return Err(SpotError::Oversize {
            file: name.to_string(),
            size,
            limit: MAX_MEDIA_BYTES,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use base64::Engine as _;

    use super::*;

    #[test]
    fn allow_list_is_exact() {
        assert_eq!(MediaType::from_mime("image/jpeg"), Some(MediaType::Jpeg));
        assert_eq!(
            MediaType::from_mime("video/quicktime"),
            Some(MediaType::Quicktime)
        );
        assert_eq!(MediaType::from_mime("IMAGE/JPEG"), None);
        assert_eq!(MediaType::from_mime("image/gif"), None);
        assert_eq!(MediaType::from_mime("image/jpeg; charset=binary"), None);
    }

    #[test]
    fn mime_for_path_reports_declared_types() {
        assert_eq!(mime_for_path(Path::new("a/b/ledge.JPG")), "image/jpeg");
        assert_eq!(mime_for_path(Path::new("line.mov")), "video/quicktime");
        assert_eq!(mime_for_path(Path::new("loop.gif")), "image/gif");
        assert_eq!(
            mime_for_path(Path::new("notes")),
            "application/octet-stream"
        );
    }

    #[test]
    fn encoding_round_trips_bytes() -> anyhow::Result<()> {
        let ledger = PreviewLedger::new();
        let bytes: Vec<u8> = (0..=255u8).cycle().take(4099).collect();
        let item = encode(
            CandidateFile::from_bytes("frame.png", "image/png", bytes.clone()),
            &ledger,
        )?;
        assert!(!item.encoded().starts_with("data:"));
        assert_eq!(BASE64.decode(item.encoded())?, bytes);
        assert_eq!(item.bytes(), bytes.as_slice());
        assert_eq!(item.digest().len(), 64);
        Ok(())
    }

    #[test]
    fn rejects_types_outside_allow_list() {
        let ledger = PreviewLedger::new();
        let err = encode(
            CandidateFile::from_bytes("loop.gif", "image/gif", vec![1, 2, 3]),
            &ledger,
        )
        .err();
        assert_eq!(
            err,
            Some(SpotError::InvalidType {
                file: "loop.gif".to_string(),
                mime_type: "image/gif".to_string(),
            })
        );
        assert_eq!(ledger.live_count(), 0);
    }

    #[test]
    fn size_cap_is_inclusive() -> anyhow::Result<()> {
        let ledger = PreviewLedger::new();
        let at_limit = vec![0u8; MAX_MEDIA_BYTES as usize];
        encode(
            CandidateFile::from_bytes("max.mp4", "video/mp4", at_limit),
            &ledger,
        )?;

        let over = vec![0u8; MAX_MEDIA_BYTES as usize + 1];
        let err = encode(CandidateFile::from_bytes("big.mp4", "video/mp4", over), &ledger).err();
        assert!(matches!(err, Some(SpotError::Oversize { .. })));
        Ok(())
    }

    #[test]
    fn oversize_path_is_rejected_before_reading() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("huge.webm");
        let file = fs::File::create(&path)?;
        file.set_len(MAX_MEDIA_BYTES + 1)?;

        let err = encode(CandidateFile::from_path(&path), &PreviewLedger::new()).err();
        assert!(matches!(err, Some(SpotError::Oversize { ref file, .. }) if file == "huge.webm"));
        Ok(())
    }

    #[test]
    fn missing_file_is_a_processing_error() {
        let err = encode(
            CandidateFile::from_path("/definitely/not/here.jpg"),
            &PreviewLedger::new(),
        )
        .err();
        assert!(matches!(err, Some(SpotError::FileProcessing { .. })));
    }

    #[test]
    fn path_candidates_preview_as_file_uri() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("rail.jpg");
        fs::write(&path, b"jpeg-bytes")?;

        let item = encode(CandidateFile::from_path(&path), &PreviewLedger::new())?;
        assert_eq!(item.name(), "rail.jpg");
        assert_eq!(item.mime_type(), "image/jpeg");
        assert!(item.preview().uri().starts_with("file://"));
        Ok(())
    }

    #[test]
    fn data_url_prefix_is_stripped() -> anyhow::Result<()> {
        assert_eq!(strip_data_url_prefix("data:image/png;base64,AAEC"), "AAEC");
        assert_eq!(strip_data_url_prefix("AAEC"), "AAEC");

        let candidate = CandidateFile::from_data_url("still", "data:image/webp;base64,AAEC")?;
        assert_eq!(candidate.mime_type(), "image/webp");
        let item = encode(candidate, &PreviewLedger::new())?;
        assert_eq!(item.bytes(), &[0u8, 1, 2]);
        assert_eq!(item.encoded(), "AAEC");
        Ok(())
    }

    #[test]
    fn plain_data_url_is_rejected_as_not_base64() {
        let err = CandidateFile::from_data_url("still", "data:image/png,%89PNG").err();
        assert_eq!(
            err,
            Some(SpotError::FileProcessing {
                file: "still".to_string(),
                reason: "data URL is not base64-encoded".to_string(),
            })
        );
    }

    #[test]
    fn preview_handles_are_released_on_drop() -> anyhow::Result<()> {
        let ledger = PreviewLedger::new();
        let first = encode(
            CandidateFile::from_bytes("a.jpg", "image/jpeg", vec![1]),
            &ledger,
        )?;
        let second = encode(
            CandidateFile::from_bytes("b.jpg", "image/jpeg", vec![2]),
            &ledger,
        )?;
        assert_eq!(ledger.live_count(), 2);
        assert_ne!(first.preview().id(), second.preview().id());
        drop(first);
        assert_eq!(ledger.live_count(), 1);
        drop(second);
        assert_eq!(ledger.live_count(), 0);
        Ok(())
    }
}
