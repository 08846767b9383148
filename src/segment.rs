//! Segmenter: splits raw game description text into ordered topic segments.
//!
//! The contract is exact partition: the union of segment spans equals the
//! full input range, spans never overlap, and every character belongs to
//! exactly one topic. The algorithm only ever cuts at recognized heading
//! markers and assigns everything else to `Topic::Other`, so a coverage
//! defect indicates a bug, not bad input.

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Topic assigned to a segment of the input text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    Roles,
    Setup,
    Phases,
    Payoffs,
    Mechanics,
    Other,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Roles => "roles",
            Topic::Setup => "setup",
            Topic::Phases => "phases",
            Topic::Payoffs => "payoffs",
            Topic::Mechanics => "mechanics",
            Topic::Other => "other",
        }
    }

    /// Recognize a heading keyword. Markers are heading lines like
    /// `Roles:`, `## Phases`, or `PAYOFFS`.
    fn from_keyword(word: &str) -> Option<Topic> {
        match word {
            "roles" | "players" | "participants" => Some(Topic::Roles),
            "setup" | "overview" | "description" => Some(Topic::Setup),
            "phases" | "stages" | "timeline" => Some(Topic::Phases),
            "payoffs" | "payoff" | "payments" | "rewards" => Some(Topic::Payoffs),
            "mechanics" | "actions" | "tasks" | "rules" => Some(Topic::Mechanics),
            _ => None,
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One contiguous slice of the input, tagged with a topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub topic: Topic,
    /// Byte offsets `(start, end)` into the source text, end exclusive.
    pub span: (usize, usize),
    pub text: String,
}

impl Segment {
    /// Segment body with the heading marker line removed.
    pub fn body(&self) -> &str {
        if self.topic == Topic::Other {
            return &self.text;
        }
        match self.text.split_once('\n') {
            Some((_, rest)) => rest,
            None => "",
        }
    }
}

/// Splits input text into an ordered, exactly-covering segment sequence.
pub struct Segmenter;

impl Segmenter {
    /// Segment the input. Returns segments sorted by start offset whose
    /// spans partition the input exactly.
    pub fn segment(text: &str) -> Result<Vec<Segment>> {
        if text.is_empty() {
            return Ok(Vec::new());
        }

        // Collect (offset, topic) boundaries at recognized marker lines.
        let mut boundaries: Vec<(usize, Topic)> = Vec::new();
        let mut offset = 0usize;
        for line in text.split_inclusive('\n') {
            if let Some(topic) = Self::marker_topic(line) {
                boundaries.push((offset, topic));
            }
            offset += line.len();
        }

        // Anything before the first marker is an Other segment.
        if boundaries.first().map(|(start, _)| *start) != Some(0) {
            boundaries.insert(0, (0, Topic::Other));
        }

        let mut segments = Vec::with_capacity(boundaries.len());
        for (i, (start, topic)) in boundaries.iter().enumerate() {
            let end = boundaries.get(i + 1).map_or(text.len(), |(next, _)| *next);
            segments.push(Segment {
                topic: *topic,
                span: (*start, end),
                text: text[*start..end].to_string(),
            });
        }

        Self::verify(text, &segments)?;
        tracing::debug!(count = segments.len(), "segmented input");
        Ok(segments)
    }

    /// Classify a line as a topic marker, if it is one.
    ///
    /// A marker line is a heading: optional `#` prefixes, a single keyword,
    /// optional trailing colon.
    fn marker_topic(line: &str) -> Option<Topic> {
        let stripped = line.trim().trim_start_matches('#').trim();
        let stripped = stripped.strip_suffix(':').unwrap_or(stripped);
        let word = stripped.to_lowercase();
        if word.split_whitespace().count() != 1 {
            return None;
        }
        Topic::from_keyword(word.trim())
    }

    /// Check the exact-partition contract: sorted, gap-free, overlap-free,
    /// covering `[0, len)`.
    fn verify(text: &str, segments: &[Segment]) -> Result<()> {
        let mut cursor = 0usize;
        for segment in segments {
            let (start, end) = segment.span;
            if start != cursor {
                return Err(PipelineError::Segmentation(format!(
                    "expected segment at offset {}, found span ({}, {})",
                    cursor, start, end
                )));
            }
            if end < start {
                return Err(PipelineError::Segmentation(format!(
                    "inverted span ({}, {})",
                    start, end
                )));
            }
            cursor = end;
        }
        if cursor != text.len() {
            return Err(PipelineError::Segmentation(format!(
                "coverage ends at {} of {}",
                cursor,
                text.len()
            )));
        }
        Ok(())
    }
}
