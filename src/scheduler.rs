/// Scheduler Module
///
/// Owns automation for every child account: which accounts are enabled,
/// the approval flow, and the periodic check that publishes due posts.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time;
use uuid::Uuid;

use crate::config::Config;
use crate::content::ContentGenerator;
use crate::error::AutomationError;
use crate::feedback::{AdjustedAiParams, FeedbackEntry, FeedbackStore};
use crate::models::{
    AutomationConfig, AutomationState, ContentRules, PersonalityTemplate, Platform, PostSchedule,
    PostStatus, ScheduledPost, TrainingFeedback,
};
use crate::profile::{default_profile, ChildAccountProfile, ProfileStore};
use crate::store::{PostStore, StatusUpdate};

/// How far ahead a free slot is searched for
const SLOT_SEARCH_DAYS: i64 = 31;

/// Body of a start request: either a full `config`, or the three loose
/// fields `platform`, `motherAccountId` and `schedule`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartAutomationRequest {
    pub config: Option<AutomationConfig>,
    pub platform: Option<Platform>,
    pub mother_account_id: Option<String>,
    pub schedule: Option<PostSchedule>,
    pub require_approval: Option<bool>,
    pub personality: Option<PersonalityTemplate>,
    pub rules: Option<ContentRules>,
}

impl StartAutomationRequest {
    pub fn into_config(self) -> Result<AutomationConfig, AutomationError> {
        if let Some(config) = self.config {
            return Ok(config);
        }

        match (self.platform, self.mother_account_id, self.schedule) {
            (Some(platform), Some(mother_account_id), Some(schedule))
                if !mother_account_id.trim().is_empty() =>
            {
                Ok(AutomationConfig {
                    platform,
                    mother_account_id,
                    schedule,
                    require_approval: self.require_approval.unwrap_or(false),
                    personality: self.personality,
                    rules: self.rules.unwrap_or_default(),
                })
            }
            _ => Err(AutomationError::Validation(
                "either a full config or platform, motherAccountId and schedule are required"
                    .to_string(),
            )),
        }
    }
}

/// Sends a post to its platform
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, post: &ScheduledPost) -> Result<()>;
}

/// Stands in for the platform APIs: waits, then reports success
pub struct SimulatedPublisher {
    delay: Duration,
}

impl SimulatedPublisher {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl Publisher for SimulatedPublisher {
    async fn publish(&self, post: &ScheduledPost) -> Result<()> {
        time::sleep(self.delay).await;
        log::info!(
            "Published post {} to {} for {}",
            post.id,
            post.platform,
            post.account_id
        );
        Ok(())
    }
}

/// Outcome of one due-post check
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickReport {
    pub published: usize,
    pub failed: usize,
    pub queued: usize,
}

struct Ticker {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub struct Scheduler {
    accounts: RwLock<HashMap<String, AutomationState>>,
    store: Arc<dyn PostStore>,
    generator: Arc<ContentGenerator>,
    profiles: Arc<dyn ProfileStore>,
    publisher: Arc<dyn Publisher>,
    feedback: FeedbackStore,
    ticker: Mutex<Option<Ticker>>,
    interval: Duration,
}

impl Scheduler {
    pub fn new(
        config: &Config,
        store: Arc<dyn PostStore>,
        generator: Arc<ContentGenerator>,
        profiles: Arc<dyn ProfileStore>,
        publisher: Arc<dyn Publisher>,
    ) -> Arc<Self> {
        Arc::new(Self {
            accounts: RwLock::new(HashMap::new()),
            store,
            generator,
            profiles,
            publisher,
            feedback: FeedbackStore::new(config.feedback_history_limit),
            ticker: Mutex::new(None),
            interval: config.scheduler_interval(),
        })
    }

    pub fn store(&self) -> Arc<dyn PostStore> {
        self.store.clone()
    }

    pub fn generator(&self) -> Arc<ContentGenerator> {
        self.generator.clone()
    }

    pub async fn automation_state(&self, account_id: &str) -> Option<AutomationState> {
        let accounts = self.accounts.read().await;
        accounts.get(account_id).cloned()
    }

    pub async fn posts_for_account(&self, account_id: &str) -> Vec<ScheduledPost> {
        self.store.list_for_account(account_id).await
    }

    /// Stored profile for the account, or the default one
    pub async fn profile(&self, account_id: &str) -> Result<ChildAccountProfile, AutomationError> {
        let profile = self
            .profiles
            .get_profile(account_id)
            .await
            .map_err(AutomationError::upstream)?;
        Ok(profile.unwrap_or_else(|| default_profile(account_id)))
    }

    pub async fn set_profile(&self, profile: ChildAccountProfile) -> Result<(), AutomationError> {
        self.profiles
            .set_profile(profile)
            .await
            .map_err(AutomationError::upstream)
    }

    /// Enable automation for an account and queue its first post
    ///
    /// Restarting a running account replaces its settings and its open posts.
    /// If the first post can't be queued, the previous settings and posts
    /// come back unchanged.
    pub async fn start_automation(
        self: &Arc<Self>,
        account_id: &str,
        mut request: StartAutomationRequest,
    ) -> Result<AutomationState, AutomationError> {
        if account_id.trim().is_empty() {
            return Err(AutomationError::Validation(
                "account id must not be empty".to_string(),
            ));
        }

        let mut profile = None;
        if request.config.is_none() && request.schedule.is_none() {
            let stored = self.profile(account_id).await?;
            log::debug!(
                "No schedule given for {}, using the {:?} default",
                account_id,
                stored.engagement_style
            );
            request.schedule = Some(stored.engagement_style.default_schedule());
            profile = Some(stored);
        }

        let config = request.into_config()?;
        config.schedule.validate()?;

        let personality = match (config.personality, profile) {
            (Some(personality), _) => personality,
            (None, Some(profile)) => profile.personality,
            (None, None) => self.profile(account_id).await?.personality,
        };

        let state = AutomationState {
            enabled: true,
            require_approval: config.require_approval,
            schedule: config.schedule,
            platform: config.platform,
            mother_account_id: config.mother_account_id,
            personality,
            rules: config.rules,
        };

        let previous = self
            .accounts
            .write()
            .await
            .insert(account_id.to_string(), state.clone());

        let displaced = match previous {
            Some(_) => {
                log::info!("Replacing automation settings for {}", account_id);
                self.remove_posts(account_id, |status| status.is_open()).await
            }
            None => Vec::new(),
        };

        self.ensure_ticker().await;

        if let Err(e) = self.queue_next_post(account_id, Utc::now()).await {
            log::error!("Could not queue first post for {}: {}", account_id, e);
            {
                let mut accounts = self.accounts.write().await;
                match previous {
                    Some(previous) => {
                        accounts.insert(account_id.to_string(), previous);
                    }
                    None => {
                        accounts.remove(account_id);
                    }
                }
            }
            for post in displaced {
                self.store.insert(post).await;
            }
            self.stop_ticker_if_idle().await;
            return Err(e);
        }

        log::info!(
            "Automation started for {} on {} (approval required: {})",
            account_id,
            state.platform,
            state.require_approval
        );
        Ok(state)
    }

    /// Disable automation and drop every post of the account that hasn't
    /// been published
    pub async fn stop_automation(&self, account_id: &str) -> Result<usize, AutomationError> {
        if self.accounts.write().await.remove(account_id).is_none() {
            return Err(AutomationError::UnknownAccount(account_id.to_string()));
        }

        let removed = self
            .remove_posts(account_id, |status| status != PostStatus::Posted)
            .await
            .len();

        self.stop_ticker_if_idle().await;

        log::info!(
            "Automation stopped for {} ({} unpublished posts removed)",
            account_id,
            removed
        );
        Ok(removed)
    }

    pub async fn approve_post(&self, post_id: &str) -> Result<ScheduledPost, AutomationError> {
        let post = self
            .store
            .get(post_id)
            .await
            .ok_or_else(|| AutomationError::UnknownPost(post_id.to_string()))?;

        let post = self.advance(post, PostStatus::Scheduled).await?;
        log::info!("Post {} approved for {}", post.id, post.scheduled_time);
        Ok(post)
    }

    /// Remove every post awaiting approval; returns how many were removed
    pub async fn cancel_pending_posts(&self, account_id: &str) -> Result<usize, AutomationError> {
        let pending: Vec<ScheduledPost> = self
            .store
            .list_for_account(account_id)
            .await
            .into_iter()
            .filter(|p| p.status == PostStatus::PendingApproval)
            .collect();

        if pending.is_empty() {
            return Err(AutomationError::NoPendingPosts(account_id.to_string()));
        }

        for post in &pending {
            self.store.remove(&post.id).await;
        }

        log::info!("Cancelled {} pending posts for {}", pending.len(), account_id);
        Ok(pending.len())
    }

    /// Generate the account's next post into its next free time slot
    pub async fn queue_next_post(
        &self,
        account_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ScheduledPost, AutomationError> {
        let state = self
            .automation_state(account_id)
            .await
            .ok_or_else(|| AutomationError::UnknownAccount(account_id.to_string()))?;

        let taken: Vec<DateTime<Utc>> = self
            .store
            .list_for_account(account_id)
            .await
            .into_iter()
            .filter(|p| p.status != PostStatus::Failed)
            .map(|p| p.scheduled_time)
            .collect();

        let scheduled_time = next_slot_after(&state.schedule, now, &taken)?;

        let mut content = self
            .generator
            .generate(
                &state.personality,
                state.platform,
                &state.rules,
                Some(&state.mother_account_id),
            )
            .await?;
        content.scheduled_time = Some(scheduled_time);

        let post = ScheduledPost {
            id: Uuid::new_v4().to_string(),
            account_id: account_id.to_string(),
            content,
            scheduled_time,
            platform: state.platform,
            status: if state.require_approval {
                PostStatus::PendingApproval
            } else {
                PostStatus::Scheduled
            },
            tone: state.personality.tone.clone(),
        };

        self.store.insert(post.clone()).await;
        log::info!(
            "Queued post {} for {} at {} ({})",
            post.id,
            account_id,
            post.scheduled_time,
            post.status
        );
        Ok(post)
    }

    /// Publish every scheduled post that is due at `now`
    ///
    /// A failed publish marks the post failed and moves on; failed posts are
    /// never retried.
    pub async fn check_due_posts(&self, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport::default();

        let due: Vec<ScheduledPost> = self
            .store
            .list_by_status(PostStatus::Scheduled)
            .await
            .into_iter()
            .filter(|p| p.scheduled_time <= now)
            .collect();

        for post in due {
            let account_id = post.account_id.clone();
            let outcome = self.publisher.publish(&post).await;

            match outcome {
                Ok(()) => {
                    if self.advance(post, PostStatus::Posted).await.is_err() {
                        continue;
                    }
                    report.published += 1;

                    let enabled = self
                        .automation_state(&account_id)
                        .await
                        .is_some_and(|s| s.enabled);
                    if enabled {
                        match self.queue_next_post(&account_id, now).await {
                            Ok(_) => report.queued += 1,
                            Err(e) => {
                                log::error!("Failed to queue next post for {}: {}", account_id, e)
                            }
                        }
                    }
                }
                Err(e) => {
                    log::error!("Publishing post {} failed: {:#}", post.id, e);
                    if self.advance(post, PostStatus::Failed).await.is_ok() {
                        report.failed += 1;
                    }
                }
            }
        }

        report
    }

    /// Record training feedback and, if automation is on, retune generation
    pub async fn submit_training_feedback(
        &self,
        account_id: &str,
        platform: Platform,
        feedback: TrainingFeedback,
    ) -> Result<Option<AdjustedAiParams>, AutomationError> {
        self.feedback.submit(account_id, platform, feedback).await?;

        let enabled = self
            .automation_state(account_id)
            .await
            .is_some_and(|s| s.enabled);
        if !enabled {
            return Ok(None);
        }

        let params = self.adjusted_ai_params(account_id).await?;
        self.generator.set_temperature(params.temperature).await;
        Ok(Some(params))
    }

    pub async fn adjusted_ai_params(
        &self,
        account_id: &str,
    ) -> Result<AdjustedAiParams, AutomationError> {
        let profile = self.profile(account_id).await?;
        Ok(self.feedback.adjusted_params(account_id, &profile).await)
    }

    /// Retained ratings for the account, oldest first
    pub async fn feedback_history(&self, account_id: &str) -> Vec<FeedbackEntry> {
        self.feedback.history(account_id).await
    }

    pub async fn ticker_running(&self) -> bool {
        self.ticker.lock().await.is_some()
    }

    /// Stop the ticker regardless of enabled accounts and wait for it to exit
    pub async fn shutdown(&self) {
        let ticker = self.ticker.lock().await.take();
        if let Some(ticker) = ticker {
            let _ = ticker.shutdown.send(true);
            if let Err(e) = ticker.handle.await {
                log::warn!("Ticker task ended abnormally: {}", e);
            }
        }
    }

    /// Remove the account's posts whose status matches; returns them
    async fn remove_posts(
        &self,
        account_id: &str,
        matches: impl Fn(PostStatus) -> bool,
    ) -> Vec<ScheduledPost> {
        let mut removed = Vec::new();
        for post in self.store.list_for_account(account_id).await {
            if !matches(post.status) {
                continue;
            }
            if let Some(post) = self.store.remove(&post.id).await {
                removed.push(post);
            }
        }
        removed
    }

    async fn advance(
        &self,
        post: ScheduledPost,
        next: PostStatus,
    ) -> Result<ScheduledPost, AutomationError> {
        if !post.status.can_transition_to(next) {
            return Err(AutomationError::InvalidTransition {
                id: post.id,
                from: post.status,
                to: next,
            });
        }

        match self.store.set_status(&post.id, post.status, next).await {
            StatusUpdate::Applied(post) => Ok(post),
            // Someone else moved it first
            StatusUpdate::Mismatch(current) => Err(AutomationError::InvalidTransition {
                id: post.id,
                from: current,
                to: next,
            }),
            // The account may have been stopped while this post was in flight
            StatusUpdate::Missing => {
                log::debug!("Post {} vanished before it could become {}", post.id, next);
                Err(AutomationError::UnknownPost(post.id))
            }
        }
    }

    async fn ensure_ticker(self: &Arc<Self>) {
        let mut ticker = self.ticker.lock().await;
        if ticker.is_some() {
            return;
        }

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let scheduler = Arc::downgrade(self);
        let period = self.interval;

        let handle = tokio::spawn(async move {
            let mut interval = time::interval(period);

            // Skip the first tick (immediate execution)
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = shutdown_rx.changed() => break,
                }

                let Some(scheduler) = scheduler.upgrade() else {
                    break;
                };

                let report = scheduler.check_due_posts(Utc::now()).await;
                if report != TickReport::default() {
                    log::info!(
                        "Due-post check: {} published, {} failed, {} queued",
                        report.published,
                        report.failed,
                        report.queued
                    );
                }
            }

            log::info!("Due-post ticker stopped");
        });

        log::info!("Due-post ticker started (interval: {:?})", period);
        *ticker = Some(Ticker { shutdown, handle });
    }

    /// Shut the ticker down when no account is enabled
    ///
    /// The ticker lock is held across the check so a concurrent start either
    /// is seen here or finds the ticker gone and spawns a new one.
    async fn stop_ticker_if_idle(&self) {
        let mut ticker = self.ticker.lock().await;
        let idle = !self.accounts.read().await.values().any(|s| s.enabled);
        if !idle {
            return;
        }

        if let Some(ticker) = ticker.take() {
            let _ = ticker.shutdown.send(true);
        }
    }
}

/// Next slot strictly after `after`, skipping taken times and full days
///
/// Slots are read in the schedule's timezone. A day already holding
/// `max_posts_per_day` of the `taken` times is skipped entirely.
pub fn next_slot_after(
    schedule: &PostSchedule,
    after: DateTime<Utc>,
    taken: &[DateTime<Utc>],
) -> Result<DateTime<Utc>, AutomationError> {
    let offset = schedule.offset()?;
    let mut slots = schedule.time_slots.clone();
    slots.sort();
    slots.dedup();

    let start = after.with_timezone(&offset).date_naive();

    for day in 0..SLOT_SEARCH_DAYS {
        let date = start + ChronoDuration::days(day);

        let used = taken
            .iter()
            .filter(|t| t.with_timezone(&offset).date_naive() == date)
            .count();
        if used >= schedule.max_posts_per_day as usize {
            continue;
        }

        for slot in &slots {
            let Some(local) = offset.from_local_datetime(&date.and_time(slot.0)).single() else {
                continue;
            };
            let candidate = local.with_timezone(&Utc);
            if candidate <= after || taken.contains(&candidate) {
                continue;
            }
            return Ok(candidate);
        }
    }

    Err(AutomationError::Validation(format!(
        "no free time slot in the next {} days",
        SLOT_SEARCH_DAYS
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{CompletionBackend, CompletionRequest, GenerationParams, MockBackend};
    use crate::models::{EngagementStyle, TimeSlot};
    use chrono::Timelike;
    use crate::profile::InMemoryProfileStore;
    use crate::store::InMemoryPostStore;

    struct FailingBackend;

    #[async_trait]
    impl CompletionBackend for FailingBackend {
        async fn complete(&self, _request: &CompletionRequest) -> Result<String> {
            anyhow::bail!("provider unavailable")
        }
    }

    struct FailingPublisher;

    #[async_trait]
    impl Publisher for FailingPublisher {
        async fn publish(&self, _post: &ScheduledPost) -> Result<()> {
            anyhow::bail!("platform rejected the post")
        }
    }

    fn at(date: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(date).unwrap().with_timezone(&Utc)
    }

    fn schedule(hours: &[u32], max_posts_per_day: u32) -> PostSchedule {
        PostSchedule {
            time_slots: hours.iter().map(|h| TimeSlot::new(*h, 0).unwrap()).collect(),
            timezone: "UTC".to_string(),
            max_posts_per_day,
        }
    }

    fn build(backend: Arc<dyn CompletionBackend>, publisher: Arc<dyn Publisher>) -> Arc<Scheduler> {
        build_with(&Config::default(), backend, publisher)
    }

    fn build_with(
        config: &Config,
        backend: Arc<dyn CompletionBackend>,
        publisher: Arc<dyn Publisher>,
    ) -> Arc<Scheduler> {
        let generator = ContentGenerator::new(
            backend,
            GenerationParams {
                model: "test-model".to_string(),
                temperature: 0.7,
                max_tokens: 200,
            },
            4096,
        )
        .unwrap();

        Scheduler::new(
            config,
            Arc::new(InMemoryPostStore::new()),
            Arc::new(generator),
            Arc::new(InMemoryProfileStore::new()),
            publisher,
        )
    }

    fn scheduler() -> Arc<Scheduler> {
        build(
            Arc::new(MockBackend::default()),
            Arc::new(SimulatedPublisher::new(Duration::ZERO)),
        )
    }

    fn request(require_approval: bool) -> StartAutomationRequest {
        StartAutomationRequest {
            platform: Some(Platform::Twitter),
            mother_account_id: Some("mother".to_string()),
            schedule: Some(schedule(&[9, 13, 18], 3)),
            require_approval: Some(require_approval),
            ..Default::default()
        }
    }

    #[test]
    fn request_needs_config_or_all_parts() {
        let missing_schedule = StartAutomationRequest {
            platform: Some(Platform::Twitter),
            mother_account_id: Some("mother".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            missing_schedule.into_config(),
            Err(AutomationError::Validation(_))
        ));

        let config = request(false).into_config().unwrap();
        let full = StartAutomationRequest {
            config: Some(config.clone()),
            ..Default::default()
        };
        assert_eq!(full.into_config().unwrap(), config);
    }

    #[test]
    fn next_slot_later_today() {
        let now = at("2026-03-02T10:00:00Z");
        let slot = next_slot_after(&schedule(&[9, 18], 2), now, &[]).unwrap();
        assert_eq!(slot, at("2026-03-02T18:00:00Z"));
    }

    #[test]
    fn next_slot_rolls_over_to_tomorrow() {
        let now = at("2026-03-02T19:00:00Z");
        let slot = next_slot_after(&schedule(&[18, 9], 2), now, &[]).unwrap();
        assert_eq!(slot, at("2026-03-03T09:00:00Z"));
    }

    #[test]
    fn next_slot_is_strictly_after() {
        let now = at("2026-03-02T09:00:00Z");
        let slot = next_slot_after(&schedule(&[9, 18], 2), now, &[]).unwrap();
        assert_eq!(slot, at("2026-03-02T18:00:00Z"));
    }

    #[test]
    fn next_slot_skips_full_days_and_taken_slots() {
        let taken = [at("2026-03-02T09:00:00Z")];
        let now = at("2026-03-02T08:00:00Z");
        let slot = next_slot_after(&schedule(&[9, 18], 1), now, &taken).unwrap();
        assert_eq!(slot, at("2026-03-03T09:00:00Z"));

        let slot = next_slot_after(&schedule(&[9, 18], 2), now, &taken).unwrap();
        assert_eq!(slot, at("2026-03-02T18:00:00Z"));
    }

    #[test]
    fn next_slot_uses_schedule_offset() {
        let mut s = schedule(&[9], 1);
        s.timezone = "+02:00".to_string();
        let slot = next_slot_after(&s, at("2026-03-02T06:00:00Z"), &[]).unwrap();
        assert_eq!(slot, at("2026-03-02T07:00:00Z"));
    }

    #[tokio::test]
    async fn start_then_stop_clears_state_and_unpublished_posts() {
        let scheduler = scheduler();
        scheduler.start_automation("kid", request(true)).await.unwrap();

        assert!(scheduler.automation_state("kid").await.is_some());
        assert!(scheduler.ticker_running().await);
        let posts = scheduler.posts_for_account("kid").await;
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].status, PostStatus::PendingApproval);

        let removed = scheduler.stop_automation("kid").await.unwrap();
        assert_eq!(removed, 1);
        assert!(scheduler.automation_state("kid").await.is_none());
        assert!(scheduler.posts_for_account("kid").await.is_empty());
        assert!(!scheduler.ticker_running().await);
    }

    #[tokio::test]
    async fn stop_keeps_posted_posts() {
        let scheduler = scheduler();
        scheduler.start_automation("kid", request(false)).await.unwrap();

        let report = scheduler
            .check_due_posts(Utc::now() + ChronoDuration::days(2))
            .await;
        assert_eq!(report.published, 1);

        scheduler.stop_automation("kid").await.unwrap();
        let remaining = scheduler.posts_for_account("kid").await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].status, PostStatus::Posted);
    }

    #[tokio::test]
    async fn ticker_stays_while_other_accounts_run() {
        let scheduler = scheduler();
        scheduler.start_automation("a", request(false)).await.unwrap();
        scheduler.start_automation("b", request(false)).await.unwrap();

        scheduler.stop_automation("a").await.unwrap();
        assert!(scheduler.ticker_running().await);

        scheduler.stop_automation("b").await.unwrap();
        assert!(!scheduler.ticker_running().await);
    }

    #[tokio::test]
    async fn stop_unknown_account_is_an_error() {
        let scheduler = scheduler();
        assert!(matches!(
            scheduler.stop_automation("ghost").await,
            Err(AutomationError::UnknownAccount(_))
        ));
    }

    #[tokio::test]
    async fn invalid_start_request_is_rejected() {
        let scheduler = scheduler();
        let err = scheduler
            .start_automation("kid", StartAutomationRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AutomationError::Validation(_)));
        assert!(scheduler.automation_state("kid").await.is_none());
        assert!(!scheduler.ticker_running().await);
    }

    #[tokio::test]
    async fn generation_failure_rolls_back_start() {
        let scheduler = build(
            Arc::new(FailingBackend),
            Arc::new(SimulatedPublisher::new(Duration::ZERO)),
        );
        let err = scheduler.start_automation("kid", request(false)).await.unwrap_err();
        assert!(matches!(err, AutomationError::Upstream(_)));
        assert!(scheduler.automation_state("kid").await.is_none());
        assert!(!scheduler.ticker_running().await);
    }

    #[tokio::test]
    async fn approve_unknown_post_names_the_id() {
        let scheduler = scheduler();
        let err = scheduler.approve_post("unknown-id").await.unwrap_err();
        assert!(err.to_string().contains("unknown-id"));
    }

    #[tokio::test]
    async fn approval_moves_forward_only() {
        let scheduler = scheduler();
        scheduler.start_automation("kid", request(true)).await.unwrap();
        let post = scheduler.posts_for_account("kid").await.remove(0);

        let approved = scheduler.approve_post(&post.id).await.unwrap();
        assert_eq!(approved.status, PostStatus::Scheduled);

        let err = scheduler.approve_post(&post.id).await.unwrap_err();
        assert!(matches!(err, AutomationError::InvalidTransition { .. }));
        assert_eq!(
            scheduler.store().get(&post.id).await.unwrap().status,
            PostStatus::Scheduled
        );
    }

    #[tokio::test]
    async fn cancel_pending_posts() {
        let scheduler = scheduler();
        scheduler.start_automation("kid", request(true)).await.unwrap();

        assert_eq!(scheduler.cancel_pending_posts("kid").await.unwrap(), 1);
        assert!(matches!(
            scheduler.cancel_pending_posts("kid").await,
            Err(AutomationError::NoPendingPosts(_))
        ));
    }

    #[tokio::test]
    async fn due_posts_are_published_and_next_one_queued() {
        let scheduler = scheduler();
        scheduler.start_automation("kid", request(false)).await.unwrap();
        let first = scheduler.posts_for_account("kid").await.remove(0);

        // Nothing is due yet
        let before = first.scheduled_time - ChronoDuration::seconds(1);
        let report = scheduler.check_due_posts(before).await;
        assert_eq!(report, TickReport::default());

        let now = first.scheduled_time + ChronoDuration::seconds(30);
        let report = scheduler.check_due_posts(now).await;
        assert_eq!(report.published, 1);
        assert_eq!(report.queued, 1);

        let posts = scheduler.posts_for_account("kid").await;
        assert_eq!(posts.len(), 2);
        assert_eq!(posts[0].id, first.id);
        assert_eq!(posts[0].status, PostStatus::Posted);
        assert_eq!(posts[1].status, PostStatus::Scheduled);
        assert!(posts[1].scheduled_time > now);
    }

    #[tokio::test]
    async fn pending_posts_are_not_published() {
        let scheduler = scheduler();
        scheduler.start_automation("kid", request(true)).await.unwrap();

        let report = scheduler
            .check_due_posts(Utc::now() + ChronoDuration::days(2))
            .await;
        assert_eq!(report, TickReport::default());
    }

    #[tokio::test]
    async fn publish_failure_is_terminal() {
        let scheduler = build(Arc::new(MockBackend::default()), Arc::new(FailingPublisher));
        scheduler.start_automation("kid", request(false)).await.unwrap();

        let later = Utc::now() + ChronoDuration::days(2);
        let report = scheduler.check_due_posts(later).await;
        assert_eq!(report.failed, 1);
        assert_eq!(report.queued, 0);

        let posts = scheduler.posts_for_account("kid").await;
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].status, PostStatus::Failed);

        // Not retried on the next tick
        assert_eq!(scheduler.check_due_posts(later).await, TickReport::default());

        // Only posted posts outlive a stop
        assert_eq!(scheduler.stop_automation("kid").await.unwrap(), 1);
        assert!(scheduler.posts_for_account("kid").await.is_empty());
    }

    #[tokio::test]
    async fn feedback_retunes_temperature_when_enabled() {
        let scheduler = scheduler();
        let feedback = TrainingFeedback {
            content_accuracy: 5.0,
            personality_match: 1.0,
            voice_calibration: 50.0,
        };

        // Not running: recorded but nothing pushed
        let params = scheduler
            .submit_training_feedback("kid", Platform::Twitter, feedback)
            .await
            .unwrap();
        assert!(params.is_none());
        assert_eq!(scheduler.generator().params().await.temperature, 0.7);

        scheduler.start_automation("kid", request(false)).await.unwrap();
        let params = scheduler
            .submit_training_feedback("kid", Platform::Twitter, feedback)
            .await
            .unwrap()
            .unwrap();
        assert!((params.temperature - 0.2).abs() < 1e-6);
        assert!((scheduler.generator().params().await.temperature - 0.2).abs() < 1e-6);
    }

    #[tokio::test]
    async fn shutdown_stops_the_ticker() {
        let scheduler = scheduler();
        scheduler.start_automation("kid", request(false)).await.unwrap();
        scheduler.shutdown().await;
        assert!(!scheduler.ticker_running().await);
    }

    fn open_posts(posts: &[ScheduledPost]) -> usize {
        posts.iter().filter(|p| p.status.is_open()).count()
    }

    #[tokio::test]
    async fn restart_replaces_the_open_post_chain() {
        let scheduler = scheduler();
        scheduler.start_automation("kid", request(false)).await.unwrap();
        let first = scheduler.posts_for_account("kid").await.remove(0);

        scheduler.start_automation("kid", request(true)).await.unwrap();
        let posts = scheduler.posts_for_account("kid").await;
        assert_eq!(posts.len(), 1);
        assert_ne!(posts[0].id, first.id);
        assert_eq!(posts[0].status, PostStatus::PendingApproval);

        let restarted = scheduler.start_automation("kid", request(false)).await.unwrap();
        assert!(!restarted.require_approval);

        let start = Utc::now();
        let mut published = 0;
        for day in 1..=3 {
            let report = scheduler
                .check_due_posts(start + ChronoDuration::days(day))
                .await;
            published += report.published;
            assert_eq!(open_posts(&scheduler.posts_for_account("kid").await), 1);
        }
        assert_eq!(published, 3);
    }

    #[tokio::test]
    async fn failed_restart_keeps_the_running_setup() {
        let scheduler = scheduler();
        scheduler.start_automation("kid", request(false)).await.unwrap();
        let before = scheduler.automation_state("kid").await.unwrap();
        let first = scheduler.posts_for_account("kid").await.remove(0);

        // A prompt that can't fit in the context window
        let mut personality = PersonalityTemplate::default();
        personality.interests = (0..3000).map(|i| format!("interest number {}", i)).collect();
        let oversized = StartAutomationRequest {
            personality: Some(personality),
            ..request(true)
        };
        let err = scheduler.start_automation("kid", oversized).await.unwrap_err();
        assert!(matches!(err, AutomationError::Validation(_)));

        assert_eq!(scheduler.automation_state("kid").await, Some(before));
        assert!(scheduler.ticker_running().await);
        let posts = scheduler.posts_for_account("kid").await;
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].id, first.id);

        // The chain keeps going after the failed restart
        let report = scheduler
            .check_due_posts(first.scheduled_time + ChronoDuration::seconds(1))
            .await;
        assert_eq!(report.published, 1);
        assert_eq!(report.queued, 1);
    }

    #[tokio::test]
    async fn missing_schedule_falls_back_to_engagement_style() {
        let scheduler = scheduler();
        scheduler
            .set_profile(ChildAccountProfile {
                account_id: "kid".to_string(),
                personality: PersonalityTemplate::default(),
                engagement_style: EngagementStyle::Critical,
            })
            .await
            .unwrap();

        let without_schedule = StartAutomationRequest {
            schedule: None,
            ..request(false)
        };
        let state = scheduler
            .start_automation("kid", without_schedule)
            .await
            .unwrap();
        assert_eq!(state.schedule, EngagementStyle::Critical.default_schedule());

        let post = scheduler.posts_for_account("kid").await.remove(0);
        let hour = post.scheduled_time.hour();
        assert!(hour == 10 || hour == 16, "unexpected hour {}", hour);
    }

    #[tokio::test]
    async fn ticker_publishes_due_posts() {
        let config = Config {
            scheduler_interval_secs: 1,
            ..Config::default()
        };
        let scheduler = build_with(
            &config,
            Arc::new(MockBackend::default()),
            Arc::new(SimulatedPublisher::new(Duration::ZERO)),
        );
        scheduler.start_automation("kid", request(false)).await.unwrap();

        // Pull the queued post into the past so the next tick picks it up
        let queued = scheduler.posts_for_account("kid").await.remove(0);
        let overdue = Utc::now() - ChronoDuration::minutes(1);
        scheduler.store().reschedule(&queued.id, overdue).await.unwrap();

        time::sleep(Duration::from_millis(2500)).await;

        let post = scheduler.store().get(&queued.id).await.unwrap();
        assert_eq!(post.status, PostStatus::Posted);
        assert_eq!(open_posts(&scheduler.posts_for_account("kid").await), 1);

        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn concurrent_stop_and_start_leave_a_ticker_running() {
        let scheduler = scheduler();
        scheduler.start_automation("b", request(false)).await.unwrap();

        let (stopped, started) = tokio::join!(
            scheduler.stop_automation("b"),
            scheduler.start_automation("a", request(false))
        );
        stopped.unwrap();
        started.unwrap();

        assert!(scheduler.automation_state("a").await.is_some());
        assert!(scheduler.ticker_running().await);
    }
}
