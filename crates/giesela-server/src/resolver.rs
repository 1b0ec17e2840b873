//! Track metadata lookup.
//!
//! The broadcaster asks a [`MetadataResolver`] for artist, song name and cover
//! art of the track a room is playing. Lookups are best effort and bounded by
//! a timeout; a weak or failed guess falls back to the raw title.

use std::sync::LazyLock;

use async_trait::async_trait;
use giesela_proto::DEFAULT_COVER_URL;
use regex::Regex;
use thiserror::Error;

/// Guesses at or below this certainty are not shown.
pub const CERTAINTY_THRESHOLD: f64 = 0.4;

/// A metadata guess for one track query.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackGuess {
    /// The query the guess was made for
    pub query: String,
    /// Artist name
    pub artist: String,
    /// Song name
    pub song_name: String,
    /// Cover art URL
    pub cover_url: String,
    /// Confidence in 0.0–1.0
    pub certainty: f64,
}

impl TrackGuess {
    /// Whether the guess is good enough to display.
    pub fn is_confident(&self) -> bool {
        self.certainty > CERTAINTY_THRESHOLD
    }
}

/// Resolver failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// Lookup did not finish in time
    #[error("metadata lookup timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Backend reported an error
    #[error("metadata lookup failed: {0}")]
    Backend(String),
}

/// Best-effort metadata source.
#[async_trait]
pub trait MetadataResolver: Send + Sync + 'static {
    /// Guess metadata for `query`, typically a track title.
    async fn resolve(&self, query: &str) -> Result<TrackGuess, ResolveError>;
}

#[allow(clippy::expect_used)]
static NOISE: LazyLock<[Regex; 4]> = LazyLock::new(|| {
    [
        r"(?i)\s*\([^)]*(?:official|lyrics?|video|audio|mv|visualizer|hd|4k)[^)]*\)",
        r"(?i)\s*\[[^\]]*(?:official|lyrics?|video|audio|mv|visualizer|hd|4k)[^\]]*\]",
        r"(?i)\s*[(\[]\s*(?:ft\.?|feat\.?|featuring)\s+[^)\]]+[)\]]",
        r"(?i)\s*-\s*Topic$",
    ]
    .map(|pattern| Regex::new(pattern).expect("invariant: noise pattern is valid"))
});

/// Offline resolver that reads `"Artist - Title"` out of the track title.
///
/// Strips decorations like `(Official Video)` and `[feat. X]` first. A title
/// that splits cleanly yields certainty 0.5; anything else yields 0.0 so the
/// display falls back to the query.
#[derive(Debug, Clone, Copy, Default)]
pub struct TitleResolver;

impl TitleResolver {
    fn clean(title: &str) -> String {
        NOISE
            .iter()
            .fold(title.to_string(), |acc, re| re.replace_all(&acc, "").into_owned())
            .trim()
            .to_string()
    }
}

#[async_trait]
impl MetadataResolver for TitleResolver {
    async fn resolve(&self, query: &str) -> Result<TrackGuess, ResolveError> {
        let cleaned = Self::clean(query);

        let split = cleaned
            .split_once(" - ")
            .map(|(artist, song)| (artist.trim(), song.trim()))
            .filter(|(artist, song)| !artist.is_empty() && !song.is_empty());

        let guess = match split {
            Some((artist, song)) => TrackGuess {
                query: query.to_string(),
                artist: artist.to_string(),
                song_name: song.to_string(),
                cover_url: DEFAULT_COVER_URL.to_string(),
                certainty: 0.5,
            },
            None => TrackGuess {
                query: query.to_string(),
                artist: String::new(),
                song_name: cleaned,
                cover_url: DEFAULT_COVER_URL.to_string(),
                certainty: 0.0,
            },
        };
        Ok(guess)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_is_exclusive() {
        let mut guess = TrackGuess {
            query: "q".to_string(),
            artist: "a".to_string(),
            song_name: "s".to_string(),
            cover_url: DEFAULT_COVER_URL.to_string(),
            certainty: 0.4,
        };
        assert!(!guess.is_confident());

        guess.certainty = 0.41;
        assert!(guess.is_confident());
    }

    #[tokio::test]
    async fn splits_artist_and_title() {
        let guess = TitleResolver
            .resolve("Rick Astley - Never Gonna Give You Up (Official Music Video)")
            .await
            .unwrap();

        assert_eq!(guess.artist, "Rick Astley");
        assert_eq!(guess.song_name, "Never Gonna Give You Up");
        assert!(guess.is_confident());
    }

    #[tokio::test]
    async fn strips_featured_artists() {
        let guess = TitleResolver.resolve("Daft Punk - Get Lucky [feat. Pharrell]").await.unwrap();
        assert_eq!(guess.song_name, "Get Lucky");
    }

    #[tokio::test]
    async fn unsplittable_title_is_not_confident() {
        let guess = TitleResolver.resolve("lofi hip hop radio").await.unwrap();

        assert!(!guess.is_confident());
        assert_eq!(guess.query, "lofi hip hop radio");
    }
}
