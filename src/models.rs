/// Data model shared by the scheduler, the content generator and the HTTP API
///
/// Everything here is serialisable so it can travel over the control API as
/// camelCase JSON, matching what the dashboard sends and expects.

use chrono::{DateTime, Duration, FixedOffset, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::AutomationError;

/// Social platforms a child account can post to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Twitter,
    Instagram,
    Tiktok,
    Youtube,
}

impl Platform {
    /// Posting constraints for this platform
    pub fn constraints(&self) -> PlatformConstraints {
        match self {
            Platform::Twitter => PlatformConstraints {
                max_length: 280,
                max_hashtags: 3,
                min_gap: Duration::minutes(30),
                max_posts_per_day: 5,
                optimal_hours: &[9, 12, 15, 17],
            },
            Platform::Instagram => PlatformConstraints {
                max_length: 2200,
                max_hashtags: 30,
                min_gap: Duration::minutes(120),
                max_posts_per_day: 2,
                optimal_hours: &[11, 13, 19],
            },
            Platform::Tiktok => PlatformConstraints {
                max_length: 2200,
                max_hashtags: 5,
                min_gap: Duration::minutes(60),
                max_posts_per_day: 3,
                optimal_hours: &[12, 15, 19, 21],
            },
            Platform::Youtube => PlatformConstraints {
                max_length: 5000,
                max_hashtags: 15,
                min_gap: Duration::minutes(240),
                max_posts_per_day: 1,
                optimal_hours: &[14, 16, 20],
            },
        }
    }

    /// Platforms whose posts carry a generated image or video
    pub fn wants_media(&self) -> bool {
        !matches!(self, Platform::Twitter)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Twitter => "twitter",
            Platform::Instagram => "instagram",
            Platform::Tiktok => "tiktok",
            Platform::Youtube => "youtube",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Platform {
    type Err = AutomationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "twitter" | "x" => Ok(Platform::Twitter),
            "instagram" => Ok(Platform::Instagram),
            "tiktok" => Ok(Platform::Tiktok),
            "youtube" => Ok(Platform::Youtube),
            other => Err(AutomationError::Validation(format!(
                "unsupported platform '{}'",
                other
            ))),
        }
    }
}

/// Fixed per-platform limits used for generation and conflict checks
#[derive(Debug, Clone, Copy)]
pub struct PlatformConstraints {
    pub max_length: usize,
    pub max_hashtags: usize,
    /// Minimum spacing between two posts on this platform
    pub min_gap: Duration,
    pub max_posts_per_day: u32,
    /// Preferred posting hours (UTC)
    pub optimal_hours: &'static [u32],
}

/// Lifecycle of a scheduled post
///
/// Status only moves forward: pending_approval -> scheduled -> posted | failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostStatus {
    PendingApproval,
    Scheduled,
    Posted,
    Failed,
}

impl PostStatus {
    pub fn can_transition_to(&self, next: PostStatus) -> bool {
        matches!(
            (self, next),
            (PostStatus::PendingApproval, PostStatus::Scheduled)
                | (PostStatus::Scheduled, PostStatus::Posted)
                | (PostStatus::Scheduled, PostStatus::Failed)
        )
    }

    /// Pending or scheduled posts still count against the calendar
    pub fn is_open(&self) -> bool {
        matches!(self, PostStatus::PendingApproval | PostStatus::Scheduled)
    }
}

impl fmt::Display for PostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PostStatus::PendingApproval => "pending_approval",
            PostStatus::Scheduled => "scheduled",
            PostStatus::Posted => "posted",
            PostStatus::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// A time of day in "HH:MM" form
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeSlot(pub NaiveTime);

impl TimeSlot {
    pub fn new(hour: u32, minute: u32) -> Option<Self> {
        NaiveTime::from_hms_opt(hour, minute, 0).map(TimeSlot)
    }
}

impl TryFrom<String> for TimeSlot {
    type Error = AutomationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        NaiveTime::parse_from_str(value.trim(), "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(value.trim(), "%H:%M:%S"))
            .map(TimeSlot)
            .map_err(|_| AutomationError::Validation(format!("invalid time slot '{}'", value)))
    }
}

impl From<TimeSlot> for String {
    fn from(slot: TimeSlot) -> Self {
        slot.0.format("%H:%M").to_string()
    }
}

/// When an account is allowed to post
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostSchedule {
    pub time_slots: Vec<TimeSlot>,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    pub max_posts_per_day: u32,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl PostSchedule {
    /// Parse the schedule's timezone
    ///
    /// Only "UTC" and fixed offsets such as "+05:30" or "-0800" are understood.
    pub fn offset(&self) -> Result<FixedOffset, AutomationError> {
        parse_offset(&self.timezone)
    }

    pub fn validate(&self) -> Result<(), AutomationError> {
        if self.time_slots.is_empty() {
            return Err(AutomationError::Validation(
                "schedule needs at least one time slot".to_string(),
            ));
        }
        if self.max_posts_per_day == 0 {
            return Err(AutomationError::Validation(
                "maxPostsPerDay must be at least 1".to_string(),
            ));
        }
        self.offset()?;
        Ok(())
    }
}

fn parse_offset(tz: &str) -> Result<FixedOffset, AutomationError> {
    let tz = tz.trim();
    let invalid = || AutomationError::Validation(format!("unsupported timezone '{}'", tz));

    let is_utc = tz.is_empty()
        || tz == "Z"
        || tz.eq_ignore_ascii_case("utc")
        || tz.eq_ignore_ascii_case("gmt");
    if is_utc {
        return FixedOffset::east_opt(0).ok_or_else(invalid);
    }

    let sign = match tz.chars().next() {
        Some('+') => 1,
        Some('-') => -1,
        _ => return Err(invalid()),
    };
    let digits: String = tz[1..].chars().filter(|c| *c != ':').collect();
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    let hours: i32 = digits[..2].parse().map_err(|_| invalid())?;
    let minutes: i32 = digits[2..].parse().map_err(|_| invalid())?;
    if hours > 14 || minutes > 59 {
        return Err(invalid());
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(invalid)
}

/// Personality parameters guiding generation for one child account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonalityTemplate {
    pub tone: String,
    pub relationship: String,
    #[serde(default)]
    pub interests: Vec<String>,
    pub style: String,
    #[serde(default)]
    pub constraints: Vec<String>,
}

impl Default for PersonalityTemplate {
    fn default() -> Self {
        Self {
            tone: "casual".to_string(),
            relationship: "friend".to_string(),
            interests: vec!["technology".to_string(), "community".to_string()],
            style: "conversational".to_string(),
            constraints: vec!["no political content".to_string()],
        }
    }
}

/// Categorical engagement label with a default posting cadence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngagementStyle {
    Supportive,
    Critical,
    Neutral,
    Humorous,
}

impl EngagementStyle {
    pub fn default_schedule(&self) -> PostSchedule {
        let (hours, max_posts_per_day): (&[u32], u32) = match self {
            EngagementStyle::Supportive => (&[9, 13, 18][..], 3),
            EngagementStyle::Critical => (&[10, 16][..], 2),
            EngagementStyle::Neutral => (&[12][..], 1),
            EngagementStyle::Humorous => (&[11, 15, 20][..], 3),
        };

        PostSchedule {
            time_slots: hours.iter().filter_map(|h| TimeSlot::new(*h, 0)).collect(),
            timezone: default_timezone(),
            max_posts_per_day,
        }
    }
}

/// Extra rules applied on top of the personality when generating
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentRules {
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub forbidden_terms: Vec<String>,
}

/// Output of one generation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedContent {
    pub text: String,
    pub hashtags: Vec<String>,
    pub media_prompt: Option<String>,
    pub platform: Platform,
    pub scheduled_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledPost {
    pub id: String,
    pub account_id: String,
    pub content: GeneratedContent,
    pub scheduled_time: DateTime<Utc>,
    pub platform: Platform,
    pub status: PostStatus,
    /// Tone label of the personality that produced the post
    pub tone: String,
}

/// Full configuration needed to run automation for one account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationConfig {
    pub platform: Platform,
    pub mother_account_id: String,
    pub schedule: PostSchedule,
    #[serde(default)]
    pub require_approval: bool,
    #[serde(default)]
    pub personality: Option<PersonalityTemplate>,
    #[serde(default)]
    pub rules: ContentRules,
}

/// Live automation for one child account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationState {
    pub enabled: bool,
    pub require_approval: bool,
    pub schedule: PostSchedule,
    pub platform: Platform,
    pub mother_account_id: String,
    pub personality: PersonalityTemplate,
    pub rules: ContentRules,
}

/// Human rating of a generated post
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingFeedback {
    /// 0..=5
    pub content_accuracy: f64,
    /// 0..=5
    pub personality_match: f64,
    /// 0..=100
    pub voice_calibration: f64,
}

impl TrainingFeedback {
    pub fn validate(&self) -> Result<(), AutomationError> {
        let in_range = |v: f64, max: f64| v.is_finite() && (0.0..=max).contains(&v);

        if !in_range(self.content_accuracy, 5.0) {
            return Err(AutomationError::Validation(format!(
                "contentAccuracy must be within 0..5, got {}",
                self.content_accuracy
            )));
        }
        if !in_range(self.personality_match, 5.0) {
            return Err(AutomationError::Validation(format!(
                "personalityMatch must be within 0..5, got {}",
                self.personality_match
            )));
        }
        if !in_range(self.voice_calibration, 100.0) {
            return Err(AutomationError::Validation(format!(
                "voiceCalibration must be within 0..100, got {}",
                self.voice_calibration
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_only_moves_forward() {
        assert!(PostStatus::PendingApproval.can_transition_to(PostStatus::Scheduled));
        assert!(PostStatus::Scheduled.can_transition_to(PostStatus::Posted));
        assert!(PostStatus::Scheduled.can_transition_to(PostStatus::Failed));

        assert!(!PostStatus::Scheduled.can_transition_to(PostStatus::PendingApproval));
        assert!(!PostStatus::Posted.can_transition_to(PostStatus::Scheduled));
        assert!(!PostStatus::Failed.can_transition_to(PostStatus::Scheduled));
        assert!(!PostStatus::PendingApproval.can_transition_to(PostStatus::Posted));
    }

    #[test]
    fn time_slots_parse_hours_and_minutes() {
        let slot = TimeSlot::try_from("09:30".to_string()).unwrap();
        assert_eq!(slot, TimeSlot::new(9, 30).unwrap());
        assert!(TimeSlot::try_from("25:00".to_string()).is_err());

        let json = serde_json::to_string(&slot).unwrap();
        assert_eq!(json, "\"09:30\"");
    }

    #[test]
    fn timezone_offsets() {
        let mut schedule = EngagementStyle::Neutral.default_schedule();
        assert_eq!(schedule.offset().unwrap().local_minus_utc(), 0);

        schedule.timezone = "+05:30".to_string();
        assert_eq!(schedule.offset().unwrap().local_minus_utc(), 5 * 3600 + 30 * 60);

        schedule.timezone = "-0800".to_string();
        assert_eq!(schedule.offset().unwrap().local_minus_utc(), -8 * 3600);

        schedule.timezone = "America/New_York".to_string();
        assert!(schedule.validate().is_err());
    }

    #[test]
    fn schedule_requires_slots() {
        let schedule = PostSchedule {
            time_slots: vec![],
            timezone: "UTC".to_string(),
            max_posts_per_day: 2,
        };
        assert!(schedule.validate().is_err());
    }

    #[test]
    fn feedback_out_of_range_is_rejected() {
        let ok = TrainingFeedback {
            content_accuracy: 4.0,
            personality_match: 5.0,
            voice_calibration: 80.0,
        };
        assert!(ok.validate().is_ok());

        let bad = TrainingFeedback {
            personality_match: 7.0,
            ..ok
        };
        assert!(bad.validate().is_err());

        let bad = TrainingFeedback {
            voice_calibration: -1.0,
            ..ok
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn platform_wire_names() {
        assert_eq!(serde_json::to_string(&Platform::Tiktok).unwrap(), "\"tiktok\"");
        assert_eq!("X".parse::<Platform>().unwrap(), Platform::Twitter);
        assert!("myspace".parse::<Platform>().is_err());
        assert_eq!(
            serde_json::to_string(&PostStatus::PendingApproval).unwrap(),
            "\"pending_approval\""
        );
    }
}
