/// Training feedback
///
/// Human ratings are kept per account in a bounded window (oldest entries are
/// evicted first) and averaged into the parameters used for generation.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;

use crate::error::AutomationError;
use crate::models::{Platform, TrainingFeedback};
use crate::profile::ChildAccountProfile;

/// Weight reported for every dimension before any feedback exists
const NEUTRAL_WEIGHT: f64 = 0.5;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackEntry {
    pub platform: Platform,
    pub feedback: TrainingFeedback,
    pub received_at: DateTime<Utc>,
}

#[derive(Default)]
struct AccountFeedback {
    window: VecDeque<FeedbackEntry>,
    lifetime_samples: u64,
}

/// Normalised (0..1) averages over an account's retained feedback
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackAverages {
    pub accuracy: f64,
    pub personality: f64,
    pub voice: f64,
    pub samples: usize,
    pub lifetime_samples: u64,
}

/// Generation parameters derived from feedback and the account profile
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdjustedAiParams {
    pub temperature: f32,
    pub accuracy_weight: f64,
    pub personality_weight: f64,
    pub voice_weight: f64,
    pub tone: String,
    pub style: String,
    pub interests: Vec<String>,
    pub constraints: Vec<String>,
    pub samples: usize,
}

pub struct FeedbackStore {
    limit: usize,
    accounts: RwLock<HashMap<String, AccountFeedback>>,
}

impl FeedbackStore {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            accounts: RwLock::new(HashMap::new()),
        }
    }

    /// Record a rating; returns how many entries the account now retains
    pub async fn submit(
        &self,
        account_id: &str,
        platform: Platform,
        feedback: TrainingFeedback,
    ) -> Result<usize, AutomationError> {
        feedback.validate()?;

        let mut accounts = self.accounts.write().await;
        let entry = accounts.entry(account_id.to_string()).or_default();

        if entry.window.len() == self.limit {
            entry.window.pop_front();
        }
        entry.window.push_back(FeedbackEntry {
            platform,
            feedback,
            received_at: Utc::now(),
        });
        entry.lifetime_samples += 1;

        log::debug!(
            "Feedback recorded for {} on {} ({} retained, {} lifetime)",
            account_id,
            platform,
            entry.window.len(),
            entry.lifetime_samples
        );

        Ok(entry.window.len())
    }

    pub async fn history(&self, account_id: &str) -> Vec<FeedbackEntry> {
        let accounts = self.accounts.read().await;
        accounts
            .get(account_id)
            .map(|a| a.window.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn averages(&self, account_id: &str) -> FeedbackAverages {
        let accounts = self.accounts.read().await;
        let Some(account) = accounts.get(account_id).filter(|a| !a.window.is_empty()) else {
            return FeedbackAverages {
                accuracy: NEUTRAL_WEIGHT,
                personality: NEUTRAL_WEIGHT,
                voice: NEUTRAL_WEIGHT,
                samples: 0,
                lifetime_samples: accounts.get(account_id).map_or(0, |a| a.lifetime_samples),
            };
        };

        let n = account.window.len() as f64;
        let (accuracy, personality, voice) =
            account
                .window
                .iter()
                .fold((0.0, 0.0, 0.0), |(a, p, v), e| {
                    (
                        a + e.feedback.content_accuracy,
                        p + e.feedback.personality_match,
                        v + e.feedback.voice_calibration,
                    )
                });

        FeedbackAverages {
            accuracy: accuracy / n / 5.0,
            personality: personality / n / 5.0,
            voice: voice / n / 100.0,
            samples: account.window.len(),
            lifetime_samples: account.lifetime_samples,
        }
    }

    /// Blend feedback averages with the account's profile
    ///
    /// Temperature is the personality weight: a linear rescale of the 0..5
    /// personality-match rating onto 0..1.
    pub async fn adjusted_params(
        &self,
        account_id: &str,
        profile: &ChildAccountProfile,
    ) -> AdjustedAiParams {
        let averages = self.averages(account_id).await;

        AdjustedAiParams {
            temperature: averages.personality.clamp(0.0, 1.0) as f32,
            accuracy_weight: averages.accuracy,
            personality_weight: averages.personality,
            voice_weight: averages.voice,
            tone: profile.personality.tone.clone(),
            style: profile.personality.style.clone(),
            interests: profile.personality.interests.clone(),
            constraints: profile.personality.constraints.clone(),
            samples: averages.samples,
        }
    }
}
