/// Content generation module
///
/// This module handles:
/// - Prompt building from a personality template and platform limits
/// - Completion backends (templated mock or a real HTTP provider)
/// - Hashtag extraction and word-overlap similarity
/// - Optimal posting time search and the messaging consistency report

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tiktoken_rs::CoreBPE;
use tokio::sync::RwLock;

use crate::config::{AiProvider, Config};
use crate::error::AutomationError;
use crate::models::{ContentRules, GeneratedContent, PersonalityTemplate, Platform};
use crate::tone::{classify_tone, Tone};

/// Jaccard score at or above which two posts count as overlapping
pub const SIGNIFICANT_OVERLAP: f64 = 0.7;

/// Days searched for a free optimal slot, today included
const LOOKAHEAD_DAYS: i64 = 7;

/// Minimum spacing between an optimal slot and an existing post
const SLOT_CLEARANCE_HOURS: i64 = 2;

lazy_static::lazy_static! {
    static ref HASHTAG_RE: Regex =
        Regex::new(r"#[\p{L}\p{N}_]+").expect("hashtag pattern is valid");
}

/// Wire body for the completion endpoint
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Local-only hints for backends that don't read the prompt
    #[serde(skip)]
    pub hints: PromptHints,
}

#[derive(Debug, Clone, Default)]
pub struct PromptHints {
    pub platform: Option<Platform>,
    pub topics: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    text: String,
}

/// Something that turns a prompt into post text
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;
}

/// Completion endpoint speaking `{model, prompt, temperature, max_tokens}`
pub struct HttpCompletionBackend {
    http_client: reqwest::Client,
    api_url: String,
    api_key: String,
}

impl HttpCompletionBackend {
    pub fn new(api_url: String, api_key: String) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            api_url,
            api_key,
        }
    }
}

#[async_trait]
impl CompletionBackend for HttpCompletionBackend {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let response = self
            .http_client
            .post(&self.api_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(request)
            .send()
            .await
            .context("Failed to send completion request")?;

        // Check HTTP status
        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(anyhow::anyhow!(
                "AI provider error (status {}): {}",
                status,
                error_text
            ));
        }

        let response: CompletionResponse = response
            .json()
            .await
            .context("Failed to parse completion response")?;

        response
            .choices
            .into_iter()
            .next()
            .map(|c| c.text)
            .context("No completion returned")
    }
}

const MOCK_TEMPLATES: &[&str] = &[
    "Just spent the afternoon diving into {topic}. Anyone else hooked? #{tag} #{platform}",
    "Quick thought on {topic}: small steps add up over time. #{tag}",
    "Can't stop thinking about {topic} today, so much to learn! #{tag} #community",
    "Hot take: {topic} deserves way more attention than it gets. #{tag}",
];

/// Templated text, rotating through a fixed set of sentences
#[derive(Default)]
pub struct MockBackend {
    counter: AtomicUsize,
}

#[async_trait]
impl CompletionBackend for MockBackend {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let topic = request
            .hints
            .topics
            .get(n % request.hints.topics.len().max(1))
            .cloned()
            .unwrap_or_else(|| "what we're building".to_string());
        let tag: String = topic
            .chars()
            .filter(|c| c.is_alphanumeric())
            .collect::<String>()
            .to_lowercase();
        let platform = request
            .hints
            .platform
            .map(|p| p.as_str())
            .unwrap_or("social");

        Ok(MOCK_TEMPLATES[n % MOCK_TEMPLATES.len()]
            .replace("{topic}", &topic)
            .replace("{tag}", if tag.is_empty() { "update" } else { tag.as_str() })
            .replace("{platform}", platform))
    }
}

/// Tunable generation parameters, adjusted by training feedback
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationParams {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Builds prompts and turns completions into platform-ready content
pub struct ContentGenerator {
    backend: Arc<dyn CompletionBackend>,
    params: RwLock<GenerationParams>,
    context_window: usize,
    bpe: CoreBPE,
}

impl ContentGenerator {
    pub fn new(
        backend: Arc<dyn CompletionBackend>,
        params: GenerationParams,
        context_window: usize,
    ) -> Result<Self> {
        let bpe = tiktoken_rs::cl100k_base().context("Failed to load cl100k_base tokenizer")?;

        Ok(Self {
            backend,
            params: RwLock::new(params),
            context_window,
            bpe,
        })
    }

    /// Pick the backend named in the config
    pub fn from_config(config: &Config) -> Result<Self> {
        let backend: Arc<dyn CompletionBackend> = match config.ai_provider {
            AiProvider::Mock => {
                log::info!("Using mock content backend");
                Arc::new(MockBackend::default())
            }
            AiProvider::Http => {
                let api_key = config
                    .ai_api_key
                    .clone()
                    .context("AI_API_KEY not set")?;
                log::info!("Using completion endpoint {}", config.ai_api_url);
                Arc::new(HttpCompletionBackend::new(config.ai_api_url.clone(), api_key))
            }
        };

        Self::new(
            backend,
            GenerationParams {
                model: config.ai_model.clone(),
                temperature: config.ai_temperature,
                max_tokens: config.ai_max_tokens,
            },
            config.ai_context_window,
        )
    }

    pub async fn params(&self) -> GenerationParams {
        self.params.read().await.clone()
    }

    /// Push a feedback-adjusted temperature into the live parameters
    pub async fn set_temperature(&self, temperature: f32) {
        let mut params = self.params.write().await;
        params.temperature = temperature.clamp(0.0, 1.0);
        log::debug!("Generation temperature set to {:.2}", params.temperature);
    }

    /// Generate one post for `platform` in the voice of `personality`
    pub async fn generate(
        &self,
        personality: &PersonalityTemplate,
        platform: Platform,
        rules: &ContentRules,
        mother_account_id: Option<&str>,
    ) -> Result<GeneratedContent, AutomationError> {
        let constraints = platform.constraints();
        let prompt = build_prompt(personality, platform, rules, mother_account_id);
        let params = self.params().await;

        let prompt_tokens = self.bpe.encode_with_special_tokens(&prompt).len();
        if prompt_tokens >= self.context_window {
            return Err(AutomationError::Validation(format!(
                "prompt needs {} tokens but the context window is {}",
                prompt_tokens, self.context_window
            )));
        }
        let max_tokens = (params.max_tokens as usize).min(self.context_window - prompt_tokens);

        let request = CompletionRequest {
            model: params.model,
            prompt,
            temperature: params.temperature,
            max_tokens: max_tokens as u32,
            hints: PromptHints {
                platform: Some(platform),
                topics: topics(personality, rules),
            },
        };

        log::debug!(
            "Generating {} post ({} prompt tokens, max {} completion tokens)",
            platform,
            prompt_tokens,
            max_tokens
        );

        let raw = self
            .backend
            .complete(&request)
            .await
            .map_err(AutomationError::upstream)?;

        let text = truncate_chars(raw.trim(), constraints.max_length);
        if text.is_empty() {
            return Err(AutomationError::Upstream(
                "AI provider returned empty text".to_string(),
            ));
        }

        let lower = text.to_lowercase();
        for term in &rules.forbidden_terms {
            if !term.is_empty() && lower.contains(&term.to_lowercase()) {
                log::warn!("Generated {} post mentions forbidden term '{}'", platform, term);
            }
        }

        let mut hashtags = extract_hashtags(&text);
        hashtags.truncate(constraints.max_hashtags);

        let media_prompt = platform.wants_media().then(|| {
            format!(
                "{} {} visual about {}",
                personality.style,
                personality.tone,
                request.hints.topics.first().map(String::as_str).unwrap_or("daily life")
            )
        });

        Ok(GeneratedContent {
            text,
            hashtags,
            media_prompt,
            platform,
            scheduled_time: None,
        })
    }
}

fn topics(personality: &PersonalityTemplate, rules: &ContentRules) -> Vec<String> {
    let mut topics: Vec<String> = personality.interests.clone();
    for topic in &rules.topics {
        if !topics.contains(topic) {
            topics.push(topic.clone());
        }
    }
    topics
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    text.chars().take(max).collect::<String>().trim_end().to_string()
}

/// Build the generation prompt
///
/// Deterministic: the same inputs always produce the same string.
pub fn build_prompt(
    personality: &PersonalityTemplate,
    platform: Platform,
    rules: &ContentRules,
    mother_account_id: Option<&str>,
) -> String {
    let constraints = platform.constraints();
    let mut prompt = String::new();

    match mother_account_id {
        Some(mother) => prompt.push_str(&format!(
            "Write a {} post as a {} of @{}.\n",
            platform, personality.relationship, mother
        )),
        None => prompt.push_str(&format!(
            "Write a {} post as a {}.\n",
            platform, personality.relationship
        )),
    }

    prompt.push_str(&format!("Tone: {}\n", personality.tone));
    prompt.push_str(&format!("Style: {}\n", personality.style));

    let topics = topics(personality, rules);
    if !topics.is_empty() {
        prompt.push_str(&format!("Topics: {}\n", topics.join(", ")));
    }
    if !rules.forbidden_terms.is_empty() {
        prompt.push_str(&format!(
            "Never mention: {}\n",
            rules.forbidden_terms.join(", ")
        ));
    }
    if !personality.constraints.is_empty() {
        prompt.push_str("Constraints:\n");
        for c in &personality.constraints {
            prompt.push_str(&format!("- {}\n", c));
        }
    }

    prompt.push_str(&format!(
        "Keep it under {} characters and use at most {} hashtags.",
        constraints.max_length, constraints.max_hashtags
    ));

    prompt
}

/// Hashtags in order of appearance, `#` included
pub fn extract_hashtags(text: &str) -> Vec<String> {
    HASHTAG_RE
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Jaccard similarity of lower-cased whitespace-separated word sets, in [0, 1]
pub fn content_overlap(a: &str, b: &str) -> f64 {
    let a_lower = a.to_lowercase();
    let b_lower = b.to_lowercase();
    let words_a: HashSet<&str> = a_lower.split_whitespace().collect();
    let words_b: HashSet<&str> = b_lower.split_whitespace().collect();

    let union = words_a.union(&words_b).count();
    if union == 0 {
        return 1.0;
    }
    let intersection = words_a.intersection(&words_b).count();

    intersection as f64 / union as f64
}

/// First optimal hour for `platform` that is after `now` and at least two
/// hours from every existing post
///
/// Searches today and the following seven days. `None` when every candidate
/// is taken.
pub fn optimal_posting_time(
    platform: Platform,
    existing: &[DateTime<Utc>],
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let clearance = Duration::hours(SLOT_CLEARANCE_HOURS);
    let today = now.date_naive();

    for day in 0..LOOKAHEAD_DAYS {
        let date = today + Duration::days(day);
        for hour in platform.constraints().optimal_hours {
            let Some(naive) = date.and_hms_opt(*hour, 0, 0) else {
                continue;
            };
            let candidate = Utc.from_utc_datetime(&naive);
            if candidate <= now {
                continue;
            }

            let clashes = existing
                .iter()
                .any(|t| (*t - candidate).num_seconds().abs() < clearance.num_seconds());
            if !clashes {
                return Some(candidate);
            }
        }
    }

    None
}

/// Which calendar day a post belongs to in the consistency report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DayGrouping {
    /// The post's own scheduled date
    Scheduled,
    /// Today's date for every post
    Today,
}

impl std::str::FromStr for DayGrouping {
    type Err = AutomationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "scheduled" => Ok(DayGrouping::Scheduled),
            "today" => Ok(DayGrouping::Today),
            other => Err(AutomationError::Validation(format!(
                "unknown day grouping '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsistencyIssueKind {
    ToneMismatch,
    NoSharedHashtag,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsistencyIssue {
    pub date: NaiveDate,
    pub kind: ConsistencyIssueKind,
    pub platforms: Vec<Platform>,
    /// Tones found in the day's posts (tone mismatches only)
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tones: Vec<Tone>,
}

/// Report tone mismatches and missing shared hashtags per day
pub fn check_messaging_consistency(
    contents: &[GeneratedContent],
    grouping: DayGrouping,
    now: DateTime<Utc>,
) -> Vec<ConsistencyIssue> {
    let mut by_day: BTreeMap<NaiveDate, Vec<&GeneratedContent>> = BTreeMap::new();
    for content in contents {
        let date = match grouping {
            DayGrouping::Scheduled => content.scheduled_time.unwrap_or(now).date_naive(),
            DayGrouping::Today => now.date_naive(),
        };
        by_day.entry(date).or_default().push(content);
    }

    let mut issues = Vec::new();
    for (date, group) in by_day {
        let mut platforms: Vec<Platform> = Vec::new();
        for content in &group {
            if !platforms.contains(&content.platform) {
                platforms.push(content.platform);
            }
        }

        let mut tones: Vec<Tone> = Vec::new();
        for content in &group {
            let tone = classify_tone(&content.text);
            if !tones.contains(&tone) {
                tones.push(tone);
            }
        }
        if tones.len() > 1 {
            issues.push(ConsistencyIssue {
                date,
                kind: ConsistencyIssueKind::ToneMismatch,
                platforms: platforms.clone(),
                tones,
            });
        }

        if group.len() > 1 {
            let mut shared: HashSet<String> = group[0]
                .hashtags
                .iter()
                .map(|h| h.to_lowercase())
                .collect();
            for content in &group[1..] {
                let tags: HashSet<String> =
                    content.hashtags.iter().map(|h| h.to_lowercase()).collect();
                shared.retain(|h| tags.contains(h));
            }
            if shared.is_empty() {
                issues.push(ConsistencyIssue {
                    date,
                    kind: ConsistencyIssueKind::NoSharedHashtag,
                    platforms,
                    tones: Vec::new(),
                });
            }
        }
    }

    issues
}
