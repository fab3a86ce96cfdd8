//! Reduction of multi-modal detection events into one display signal.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum score gap within which two candidates count as tied.
pub const CLOSENESS_THRESHOLD: f64 = 0.07;
pub const MAX_BREAKDOWN: usize = 3;
pub const NEUTRAL_COLOR_KEY: &str = "gray-400";
pub const UNKNOWN_SPEAKER: &str = "Unknown";

const THRESHOLD_SLACK: f64 = 1e-9;

/// Palette key per lower-cased label. The host maps keys to styling.
const COLOR_KEYS: &[(&str, &str)] = &[
    ("joy", "yellow-400"),
    ("excitement", "orange-400"),
    ("amusement", "amber-400"),
    ("satisfaction", "lime-400"),
    ("concentration", "blue-500"),
    ("interest", "blue-400"),
    ("confusion", "amber-500"),
    ("doubt", "gray-600"),
    ("boredom", "gray-400"),
    ("sadness", "blue-600"),
    ("anger", "red-500"),
    ("fear", "purple-600"),
    ("authenticity", "green-500"),
    ("love", "pink-400"),
    ("surprise", "cyan-400"),
    ("disgust", "green-600"),
    ("contempt", "red-600"),
    ("pride", "indigo-400"),
    ("shame", "stone-500"),
    ("guilt", "gray-500"),
    ("embarrassment", "red-300"),
    ("gratitude", "rose-300"),
    ("awe", "purple-400"),
    ("admiration", "violet-400"),
    ("relief", "teal-300"),
    ("triumph", "yellow-400"),
    ("anxiety", "violet-600"),
    ("distress", "red-700"),
];

pub fn color_key(label: &str) -> &'static str {
    let lowered = label.trim().to_lowercase();
    COLOR_KEYS
        .iter()
        .find(|(name, _)| *name == lowered)
        .map(|(_, key)| *key)
        .unwrap_or(NEUTRAL_COLOR_KEY)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmotionScore {
    pub name: String,
    pub score: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ModalityResult {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub top_emotions: Vec<EmotionScore>,
}

/// The backend sends `null` for a modality that produced no ranking.
fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<EmotionScore>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Vec<EmotionScore>>::deserialize(deserializer)?.unwrap_or_default())
}

/// One `emotion_detected` payload as the backend sends it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DetectionEvent {
    #[serde(default)]
    pub speaker: Option<String>,
    #[serde(default)]
    pub is_sales_rep: Option<bool>,
    #[serde(default)]
    pub blended_label: Option<String>,
    #[serde(default)]
    pub audio: Option<ModalityResult>,
    #[serde(default)]
    pub video: Option<ModalityResult>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Facial,
    Voice,
}

impl Modality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::Facial => "facial",
            Modality::Voice => "voice",
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DisplaySignal {
    pub label: String,
    pub confidence: f64,
    pub participant: String,
    pub is_user: bool,
    pub modality: Modality,
    pub color_key: String,
    pub breakdown: Vec<EmotionScore>,
}

impl DisplaySignal {
    pub fn confidence_percent(&self) -> u32 {
        (self.confidence * 100.0).round().clamp(0.0, 100.0) as u32
    }

    /// Activity-log line for this signal, e.g. `Dana [Customer]: joy (81%)`.
    pub fn log_line(&self) -> String {
        let role = if self.is_user { "You" } else { "Customer" };
        format!(
            "{} [{role}]: {} ({}%)",
            self.participant,
            self.label,
            self.confidence_percent()
        )
    }
}

fn ranked(result: Option<&ModalityResult>) -> Option<Vec<EmotionScore>> {
    let mut entries: Vec<EmotionScore> = result?
        .top_emotions
        .iter()
        .filter(|entry| entry.score.is_finite())
        .cloned()
        .collect();
    if entries.is_empty() {
        return None;
    }
    entries.sort_by(|a, b| b.score.total_cmp(&a.score));
    Some(entries)
}

/// Picks the modality to display. Facial wins whenever it has candidates.
fn select_modality(event: &DetectionEvent) -> Option<(Modality, Vec<EmotionScore>)> {
    if let Some(entries) = ranked(event.video.as_ref()) {
        return Some((Modality::Facial, entries));
    }
    ranked(event.audio.as_ref()).map(|entries| (Modality::Voice, entries))
}

pub fn closeness_set(ranked: &[EmotionScore]) -> Vec<EmotionScore> {
    let Some(top) = ranked.first() else {
        return Vec::new();
    };
    ranked
        .iter()
        .filter(|entry| top.score - entry.score <= CLOSENESS_THRESHOLD + THRESHOLD_SLACK)
        .take(MAX_BREAKDOWN)
        .cloned()
        .collect()
}

/// Reduces a detection event to a display signal.
///
/// Returns `None` when neither modality carries candidates; callers keep the
/// previous signal in that case.
pub fn reduce(event: &DetectionEvent) -> Option<DisplaySignal> {
    let (modality, entries) = select_modality(event)?;
    let top = entries.first()?.clone();
    let breakdown = closeness_set(&entries);

    let blended = event
        .blended_label
        .as_deref()
        .map(str::trim)
        .filter(|label| !label.is_empty());
    let label = match blended {
        Some(label) => label.to_string(),
        None if breakdown.len() > 1 => breakdown
            .iter()
            .map(|entry| entry.name.as_str())
            .collect::<Vec<_>>()
            .join(","),
        None => top.name.clone(),
    };

    let participant = event
        .speaker
        .as_deref()
        .map(str::trim)
        .filter(|speaker| !speaker.is_empty())
        .unwrap_or(UNKNOWN_SPEAKER)
        .to_string();

    Some(DisplaySignal {
        label,
        confidence: top.score,
        participant,
        is_user: event.is_sales_rep.unwrap_or(false),
        modality,
        color_key: color_key(&top.name).to_string(),
        breakdown,
    })
}
