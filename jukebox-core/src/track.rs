use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{CommandError, CommandResult};

lazy_static! {
    static ref VIDEO_ID_REGEX: Regex = Regex::new(r"^[A-Za-z0-9_-]{11}$").unwrap();
}

/// A single playable item. Queues hold copies, never references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub video_id: String,
    pub title: String,
    #[serde(default)]
    pub channel_title: String,
    /// The length of the track, 0 if unknown
    #[serde(default)]
    pub duration_seconds: f64,
    #[serde(default)]
    pub thumbnail_url: String,
}

impl Track {
    /// Ensures the track is well-formed before it enters a venue.
    pub fn validate(&self) -> CommandResult<()> {
        if !VIDEO_ID_REGEX.is_match(&self.video_id) {
            return Err(CommandError::invalid_payload(format!(
                "track.videoId {:?} is not a valid video id",
                self.video_id
            )));
        }

        if self.title.trim().is_empty() {
            return Err(CommandError::invalid_payload("track.title is empty"));
        }

        if !self.duration_seconds.is_finite() || self.duration_seconds < 0. {
            return Err(CommandError::invalid_payload(
                "track.durationSeconds must be a non-negative number",
            ));
        }

        Ok(())
    }

    /// Returns the duration if it is known.
    pub fn known_duration(&self) -> Option<f64> {
        (self.duration_seconds > 0.).then_some(self.duration_seconds)
    }

    /// Creates a track for use in tests.
    #[cfg(test)]
    pub fn mock(title: &str) -> Self {
        // Pad the title into a valid video id
        let video_id: String = title
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .chain(std::iter::repeat('x'))
            .take(11)
            .collect();

        Self {
            video_id,
            title: title.to_string(),
            channel_title: "mock channel".to_string(),
            duration_seconds: 180.,
            thumbnail_url: String::new(),
        }
    }
}
