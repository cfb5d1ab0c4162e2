use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};

pub const COORDINATE_MARKER: &str = "COORDINATES:";

const EMPTY_RESPONSE_TEXT: &str = "No detailed analysis could be generated.";

fn marker_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"COORDINATES:[ \t]*([+-]?\d+(?:\.\d+)?)[ \t]*,[ \t]*([+-]?\d+(?:\.\d+)?)")
            .expect("coordinate marker pattern compiles")
    })
}

fn bold_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\*\*(.*?)\*\*").expect("bold pattern compiles"))
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Whether the pair is a real position. The pair is reported either
    /// way; front-ends use this to flag a bad marker.
    pub fn is_in_range(&self) -> bool {
        (-90.0..=90.0).contains(&self.latitude) && (-180.0..=180.0).contains(&self.longitude)
    }

    pub fn maps_url(&self) -> String {
        format!(
            "https://www.google.com/maps/search/?api=1&query={},{}",
            self.latitude, self.longitude
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Citation {
    Web {
        uri: String,
        title: String,
    },
    Map {
        uri: String,
        title: String,
        review_sources: Vec<String>,
    },
}

impl Citation {
    /// Reads one grounding chunk, routed by key: a `web` key wins over a
    /// `maps` key. A shape with neither a uri nor a title yields `None`, as
    /// does a chunk with neither key.
    pub fn from_chunk(chunk: &Value) -> Option<Self> {
        if let Some(web) = chunk.get("web").and_then(Value::as_object) {
            let (uri, title) = uri_and_title(web)?;
            return Some(Self::Web { uri, title });
        }
        let maps = chunk.get("maps").and_then(Value::as_object)?;
        let (uri, title) = uri_and_title(maps)?;
        Some(Self::Map {
            uri,
            title,
            review_sources: review_sources(maps),
        })
    }

    pub fn uri(&self) -> &str {
        match self {
            Self::Web { uri, .. } | Self::Map { uri, .. } => uri,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            Self::Web { title, .. } | Self::Map { title, .. } => title,
        }
    }

    pub fn is_map(&self) -> bool {
        matches!(self, Self::Map { .. })
    }
}

// A missing uri stays empty; a missing title falls back to the uri.
fn uri_and_title(shape: &Map<String, Value>) -> Option<(String, String)> {
    let text = |key: &str| {
        shape
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };
    let uri = text("uri");
    let title = text("title").or(uri)?;
    Some((uri.unwrap_or_default().to_string(), title.to_string()))
}

// `placeAnswerSources` shows up both as an object and as a list of objects.
fn review_sources(maps: &Map<String, Value>) -> Vec<String> {
    let holders: Vec<&Value> = match maps.get("placeAnswerSources") {
        Some(Value::Array(rows)) => rows.iter().collect(),
        Some(value) if value.is_object() => vec![value],
        _ => Vec::new(),
    };
    holders
        .into_iter()
        .filter_map(|holder| holder.get("reviewSnippets").and_then(Value::as_array))
        .flatten()
        .filter_map(|snippet| {
            snippet
                .get("sourceUri")
                .or_else(|| snippet.get("googleMapsUri"))
                .and_then(Value::as_str)
        })
        .map(str::to_string)
        .collect()
}

/// Normalized answer for one submission.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnalysisResult {
    pub text: String,
    pub coordinates: Option<Coordinates>,
    pub citations: Vec<Citation>,
}

impl AnalysisResult {
    pub fn interpret(raw_text: &str, grounding_chunks: &[Value]) -> Self {
        let raw_text = if raw_text.trim().is_empty() {
            EMPTY_RESPONSE_TEXT
        } else {
            raw_text
        };
        let (text, coordinates) = extract_coordinates(raw_text);
        Self {
            text,
            coordinates,
            citations: grounding_chunks
                .iter()
                .filter_map(Citation::from_chunk)
                .collect(),
        }
    }

    pub fn web_sources(&self) -> impl Iterator<Item = &Citation> {
        self.citations.iter().filter(|citation| !citation.is_map())
    }

    pub fn map_sources(&self) -> impl Iterator<Item = &Citation> {
        self.citations.iter().filter(|citation| citation.is_map())
    }

    pub fn display_lines(&self) -> Vec<DisplayLine> {
        render_display(&self.text)
    }
}

/// Splits the coordinate marker out of `text`.
///
/// The first marker supplies the pair, whatever its range. Every marker is removed from the returned text together with the
/// whitespace around it; text without a marker comes back unchanged.
pub fn extract_coordinates(text: &str) -> (String, Option<Coordinates>) {
    let mut coordinates = None;
    let mut pieces = Vec::new();
    let mut cursor = 0;
    for caps in marker_pattern().captures_iter(text) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        pieces.push(&text[cursor..whole.start()]);
        cursor = whole.end();
        if pieces.len() == 1 {
            let latitude = caps[1].parse::<f64>().ok();
            let longitude = caps[2].parse::<f64>().ok();
            coordinates = latitude
                .zip(longitude)
                .map(|(lat, lng)| Coordinates::new(lat, lng));
        }
    }
    if pieces.is_empty() {
        return (text.to_string(), None);
    }
    pieces.push(&text[cursor..]);

    let display = pieces
        .into_iter()
        .map(str::trim)
        .filter(|piece| !piece.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    (display, coordinates)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Span {
    pub text: String,
    pub bold: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisplayLine {
    pub list_item: bool,
    pub spans: Vec<Span>,
}

impl DisplayLine {
    pub fn plain_text(&self) -> String {
        self.spans.iter().map(|span| span.text.as_str()).collect()
    }
}

/// Presentation pass: drops blank lines, marks `* `/`- ` list items and
/// splits `**bold**` spans out with their markers stripped.
pub fn render_display(text: &str) -> Vec<DisplayLine> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            let (list_item, body) = match line
                .strip_prefix("* ")
                .or_else(|| line.strip_prefix("- "))
            {
                Some(rest) => (true, rest.trim_start()),
                None => (false, line),
            };
            DisplayLine {
                list_item,
                spans: split_bold(body),
            }
        })
        .collect()
}

fn split_bold(line: &str) -> Vec<Span> {
    let mut spans = Vec::new();
    let mut cursor = 0;
    for caps in bold_pattern().captures_iter(line) {
        let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        if whole.start() > cursor {
            spans.push(Span {
                text: line[cursor..whole.start()].to_string(),
                bold: false,
            });
        }
        spans.push(Span {
            text: inner.as_str().to_string(),
            bold: true,
        });
        cursor = whole.end();
    }
    if cursor < line.len() {
        spans.push(Span {
            text: line[cursor..].to_string(),
            bold: false,
        });
    }
    spans
}
