use serde::Serialize;

use crate::submission::{InputMode, SubmissionState};

/// Fixed output contract sent with every request. The trailing
/// `COORDINATES:` line is what [`crate::analysis`] parses.
pub const SYSTEM_INSTRUCTION: &str = "\
You are 'SpotCheck', an expert assistant for skateboarding and snowboarding culture and location scouting.
Your primary goal is to identify the real-world location (the \"spot\") shown in user-provided media with high precision.

PROTOCOL:
1. **Analyze Visuals/Context**: Look for street signs, business names, unique architecture, mountain skylines, or park layouts.
2. **Determine Location**:
   - **Target**: Exact address (e.g., \"123 Skate St, Los Angeles, CA\").
   - **Fallback 1**: Specific intersection or block (e.g., \"Intersection of Wilshire and Western, LA\").
   - **Fallback 2**: Neighborhood/District (e.g., \"Koreatown, Los Angeles\").
   - **Fallback 3**: City/Region (e.g., \"Los Angeles, CA\").
3. **Verify**: ALWAYS use Google Maps and Google Search to confirm the spot exists and looks correct.

OUTPUT FORMAT (Markdown):
*   **Spot Name**: [Name of spot or \"Unknown Street Spot\"]
*   **Location**: [The most specific address, intersection, or neighborhood you can identify]
*   **City/Region**: [City, State, Country]
*   **Context**: [Famous tricks, history, or description of obstacles]
*   **Confidence**: [Exact Match / Approximate Area / General Region]

If you are guessing the area based on architecture (e.g., \"Barcelona ledges\"), state that clearly.

CRITICAL: At the very end of your response, if you have identified a specific location (Address or Intersection), output the coordinates in this exact format on a new line:
COORDINATES: Latitude,Longitude
(Example: COORDINATES: 34.052235,-118.243683)
";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuiltPrompt {
    pub text: String,
    pub system_instruction: &'static str,
}

pub fn build_prompt(state: &SubmissionState) -> BuiltPrompt {
    let text = match state.mode() {
        InputMode::Upload => upload_prompt(state.len(), state.source_link()),
        InputMode::VideoLink => video_link_prompt(
            state.video_url().unwrap_or_default(),
            state.start_timestamp(),
            state.duration_seconds(),
        ),
    };
    BuiltPrompt {
        text,
        system_instruction: SYSTEM_INSTRUCTION,
    }
}

fn upload_prompt(media_count: usize, source_link: Option<&str>) -> String {
    let mut prompt = String::from(
        "Analyze this visual content and identify the exact skateboarding or snowboarding location depicted.",
    );
    if media_count > 1 {
        prompt.push_str(&format!(
            " The {media_count} files show the same spot from different angles or moments."
        ));
    }
    prompt.push_str(
        " Cross-reference all images/videos provided for street signs, landmarks, shop names, or park layout.\
         \nBe as specific as the evidence allows: prefer an exact address, then an intersection, then a neighborhood, then a region.",
    );
    if let Some(link) = source_link {
        prompt.push_str(&format!(
            "\n\nCONTEXT FROM USER: The user found this media at the following link: {link}. \
             Use this URL to find information about the riders, crew, or video title to help narrow down the location."
        ));
    }
    prompt
}

fn video_link_prompt(url: &str, start: Option<&str>, duration: Option<&str>) -> String {
    let mut prompt =
        format!("I found a skateboarding or snowboarding video at this URL: {url}.");
    match (start, duration) {
        (Some(start), Some(duration)) => prompt.push_str(&format!(
            " The spot appears in the clip starting at {start} and lasting about {duration} seconds."
        )),
        (Some(start), None) => {
            prompt.push_str(&format!(" The spot appears in the clip starting at {start}."))
        }
        (None, Some(duration)) => prompt.push_str(&format!(
            " The relevant part of the clip lasts about {duration} seconds."
        )),
        (None, None) => {}
    }
    prompt.push_str(
        "\n\nCan you tell me where this was filmed? Use Google Search to find information about this specific video \
         or the spot described in its title/description, verify it, and return the most specific location available \
         (address, intersection, neighborhood, or region).",
    );
    prompt
}
