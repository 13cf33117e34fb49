/// Tone classification
///
/// Keyword lookup over lower-cased words. Categories are checked in a fixed
/// order so a post that matches several resolves deterministically.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    Professional,
    Casual,
    Humorous,
    Neutral,
}

impl fmt::Display for Tone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Tone::Professional => "professional",
            Tone::Casual => "casual",
            Tone::Humorous => "humorous",
            Tone::Neutral => "neutral",
        };
        f.write_str(label)
    }
}

lazy_static::lazy_static! {
    static ref TONE_KEYWORDS: Vec<(Tone, HashSet<&'static str>)> = vec![
        (
            Tone::Professional,
            [
                "announce", "announcing", "pleased", "update", "insights", "strategy",
                "report", "regarding", "professional", "partnership", "industry",
            ]
            .into_iter()
            .collect(),
        ),
        (
            Tone::Casual,
            [
                "hey", "cool", "awesome", "love", "gonna", "wanna", "chill", "vibes",
                "omg", "yay", "super",
            ]
            .into_iter()
            .collect(),
        ),
        (
            Tone::Humorous,
            ["lol", "lmao", "haha", "funny", "joke", "hilarious", "rofl", "😂", "🤣"]
                .into_iter()
                .collect(),
        ),
    ];
}

/// Classify a post's tone from its wording
pub fn classify_tone(text: &str) -> Tone {
    let lower = text.to_lowercase();
    let words: HashSet<&str> = lower
        .split(|c: char| c.is_whitespace() || (c.is_ascii_punctuation() && c != '\''))
        .filter(|w| !w.is_empty())
        .collect();

    TONE_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| words.contains(k)))
        .map(|(tone, _)| *tone)
        .unwrap_or(Tone::Neutral)
}
