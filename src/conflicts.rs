/// Cross-platform conflict detection
///
/// Looks at one account's open posts and reports posts that land too close
/// together, say nearly the same thing on two platforms, or mix tones on the
/// same day. Findings are advisory; nothing here blocks scheduling.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::content::{content_overlap, SIGNIFICANT_OVERLAP};
use crate::models::{Platform, ScheduledPost};
use crate::store::PostStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictKind {
    Timing,
    Content,
    Messaging,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Info,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub kind: ConflictKind,
    pub severity: Severity,
    pub post_ids: Vec<String>,
    pub platforms: Vec<Platform>,
    pub message: String,
}

pub struct ConflictChecker {
    store: Arc<dyn PostStore>,
}

impl ConflictChecker {
    pub fn new(store: Arc<dyn PostStore>) -> Self {
        Self { store }
    }

    async fn open_posts(&self, account_id: &str) -> Vec<ScheduledPost> {
        self.store
            .list_for_account(account_id)
            .await
            .into_iter()
            .filter(|p| p.status.is_open())
            .collect()
    }

    pub async fn check_cross_platform_conflicts(&self, account_id: &str) -> Vec<Conflict> {
        let posts = self.open_posts(account_id).await;
        let conflicts = find_conflicts(&posts);
        log::debug!(
            "{} conflicts across {} open posts for {}",
            conflicts.len(),
            posts.len(),
            account_id
        );
        conflicts
    }

    /// Move each open post onto its platform's preferred hours and persist
    /// the new times
    ///
    /// Only the time is written back. A post that was published, failed or
    /// removed since the snapshot was taken is left untouched and dropped
    /// from the result.
    pub async fn optimize_post_timing(
        &self,
        account_id: &str,
        now: DateTime<Utc>,
    ) -> Vec<ScheduledPost> {
        let posts = self.open_posts(account_id).await;
        let optimized = optimized_schedule(&posts, now);

        let mut moved = 0;
        let mut result = Vec::with_capacity(optimized.len());
        for (before, after) in posts.iter().zip(optimized) {
            if before.scheduled_time == after.scheduled_time {
                result.push(after);
                continue;
            }
            match self.store.reschedule(&after.id, after.scheduled_time).await {
                Some(post) => {
                    moved += 1;
                    result.push(post);
                }
                None => log::debug!("Post {} left the open set before it could move", after.id),
            }
        }

        log::info!("Optimized timing for {}: {} posts moved", account_id, moved);
        result
    }
}

/// Timing, content and messaging conflicts among `posts`
pub fn find_conflicts(posts: &[ScheduledPost]) -> Vec<Conflict> {
    let mut conflicts = Vec::new();

    for (i, a) in posts.iter().enumerate() {
        for b in &posts[i + 1..] {
            let gap_secs = (a.scheduled_time - b.scheduled_time).num_seconds().abs();
            let min_gap = a.platform.constraints().min_gap.min(b.platform.constraints().min_gap);
            if gap_secs < min_gap.num_seconds() {
                conflicts.push(Conflict {
                    kind: ConflictKind::Timing,
                    severity: Severity::Warning,
                    post_ids: vec![a.id.clone(), b.id.clone()],
                    platforms: vec![a.platform, b.platform],
                    message: format!(
                        "posts are {} minutes apart, minimum is {} minutes",
                        gap_secs / 60,
                        min_gap.num_minutes()
                    ),
                });
            }

            if a.platform != b.platform {
                let overlap = content_overlap(&a.content.text, &b.content.text);
                if overlap >= SIGNIFICANT_OVERLAP {
                    conflicts.push(Conflict {
                        kind: ConflictKind::Content,
                        severity: Severity::Warning,
                        post_ids: vec![a.id.clone(), b.id.clone()],
                        platforms: vec![a.platform, b.platform],
                        message: format!("{:.0}% word overlap", overlap * 100.0),
                    });
                }
            }
        }
    }

    let mut by_day: BTreeMap<NaiveDate, Vec<&ScheduledPost>> = BTreeMap::new();
    for post in posts {
        by_day.entry(post.scheduled_time.date_naive()).or_default().push(post);
    }
    for (date, group) in by_day {
        let mut tones: Vec<String> = Vec::new();
        for post in &group {
            let tone = post.tone.trim().to_lowercase();
            if !tones.contains(&tone) {
                tones.push(tone);
            }
        }
        if tones.len() > 1 {
            let mut platforms: Vec<Platform> = Vec::new();
            for post in &group {
                if !platforms.contains(&post.platform) {
                    platforms.push(post.platform);
                }
            }
            conflicts.push(Conflict {
                kind: ConflictKind::Messaging,
                severity: Severity::Info,
                post_ids: group.iter().map(|p| p.id.clone()).collect(),
                platforms,
                message: format!("mixed tones on {}: {}", date, tones.join(", ")),
            });
        }
    }

    conflicts
}

/// Reassign times day by day from each platform's optimal hours
///
/// Within a day, platforms with a tighter daily cap go first; each platform
/// cycles through its own hours. A new time that is not after `now` is
/// dropped and the post keeps its old time. Output order matches input.
pub fn optimized_schedule(posts: &[ScheduledPost], now: DateTime<Utc>) -> Vec<ScheduledPost> {
    let mut result: Vec<ScheduledPost> = posts.to_vec();

    let mut by_day: BTreeMap<NaiveDate, Vec<usize>> = BTreeMap::new();
    for (idx, post) in posts.iter().enumerate() {
        by_day.entry(post.scheduled_time.date_naive()).or_default().push(idx);
    }

    for (date, mut indices) in by_day {
        indices.sort_by_key(|&i| {
            (
                posts[i].platform.constraints().max_posts_per_day,
                posts[i].scheduled_time,
            )
        });

        let mut used: HashMap<Platform, usize> = HashMap::new();
        for idx in indices {
            let platform = posts[idx].platform;
            let hours = platform.constraints().optimal_hours;
            let n = used.entry(platform).or_insert(0);
            let hour = hours[*n % hours.len()];
            *n += 1;

            let Some(naive) = date.and_hms_opt(hour, 0, 0) else {
                continue;
            };
            let new_time = Utc.from_utc_datetime(&naive);
            if new_time <= now {
                continue;
            }

            let post = &mut result[idx];
            post.scheduled_time = new_time;
            post.content.scheduled_time = Some(new_time);
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GeneratedContent, PostStatus};
    use crate::store::{InMemoryPostStore, StatusUpdate};
    use async_trait::async_trait;
    use std::time::Duration;

    /// Store whose account listing is slow, leaving a window for other writers
    struct SlowListing(InMemoryPostStore);

    #[async_trait]
    impl PostStore for SlowListing {
        async fn insert(&self, post: ScheduledPost) {
            self.0.insert(post).await
        }

        async fn get(&self, id: &str) -> Option<ScheduledPost> {
            self.0.get(id).await
        }

        async fn set_status(&self, id: &str, from: PostStatus, to: PostStatus) -> StatusUpdate {
            self.0.set_status(id, from, to).await
        }

        async fn reschedule(&self, id: &str, time: DateTime<Utc>) -> Option<ScheduledPost> {
            self.0.reschedule(id, time).await
        }

        async fn remove(&self, id: &str) -> Option<ScheduledPost> {
            self.0.remove(id).await
        }

        async fn list_for_account(&self, account_id: &str) -> Vec<ScheduledPost> {
            let posts = self.0.list_for_account(account_id).await;
            tokio::time::sleep(Duration::from_millis(100)).await;
            posts
        }

        async fn list_by_status(&self, status: PostStatus) -> Vec<ScheduledPost> {
            self.0.list_by_status(status).await
        }
    }

    fn at(date: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(date).unwrap().with_timezone(&Utc)
    }

    fn post(id: &str, platform: Platform, when: &str, text: &str, tone: &str) -> ScheduledPost {
        let time = at(when);
        ScheduledPost {
            id: id.to_string(),
            account_id: "kid".to_string(),
            content: GeneratedContent {
                text: text.to_string(),
                hashtags: vec![],
                media_prompt: None,
                platform,
                scheduled_time: Some(time),
            },
            scheduled_time: time,
            platform,
            status: PostStatus::Scheduled,
            tone: tone.to_string(),
        }
    }

    fn kinds(conflicts: &[Conflict]) -> Vec<ConflictKind> {
        conflicts.iter().map(|c| c.kind).collect()
    }

    #[test]
    fn twitter_posts_fifteen_minutes_apart_conflict() {
        let posts = vec![
            post("a", Platform::Twitter, "2026-03-02T09:00:00Z", "coffee thoughts", "casual"),
            post("b", Platform::Twitter, "2026-03-02T09:15:00Z", "lunch plans", "casual"),
        ];
        let conflicts = find_conflicts(&posts);
        assert_eq!(kinds(&conflicts), vec![ConflictKind::Timing]);
        assert_eq!(conflicts[0].severity, Severity::Warning);
        assert_eq!(conflicts[0].post_ids, vec!["a", "b"]);
    }

    #[test]
    fn twitter_posts_forty_five_minutes_apart_do_not() {
        let posts = vec![
            post("a", Platform::Twitter, "2026-03-02T09:00:00Z", "coffee thoughts", "casual"),
            post("b", Platform::Twitter, "2026-03-02T09:45:00Z", "lunch plans", "casual"),
        ];
        assert!(find_conflicts(&posts).is_empty());
    }

    #[test]
    fn gap_uses_the_smaller_platform_minimum() {
        // youtube wants 240 minutes, twitter 30: 40 minutes is fine
        let posts = vec![
            post("a", Platform::Youtube, "2026-03-02T09:00:00Z", "new video up", "casual"),
            post("b", Platform::Twitter, "2026-03-02T09:40:00Z", "go watch it", "casual"),
        ];
        assert!(find_conflicts(&posts).is_empty());
    }

    #[test]
    fn near_duplicate_text_across_platforms() {
        let text = "our big launch is finally here and we love it";
        let posts = vec![
            post("a", Platform::Twitter, "2026-03-02T09:00:00Z", text, "casual"),
            post(
                "b",
                Platform::Instagram,
                "2026-03-02T15:00:00Z",
                &format!("{} !", text),
                "casual",
            ),
        ];
        let conflicts = find_conflicts(&posts);
        assert_eq!(kinds(&conflicts), vec![ConflictKind::Content]);
    }

    #[test]
    fn same_platform_duplicates_are_not_content_conflicts() {
        let posts = vec![
            post("a", Platform::Twitter, "2026-03-02T09:00:00Z", "same words", "casual"),
            post("b", Platform::Twitter, "2026-03-02T15:00:00Z", "same words", "casual"),
        ];
        assert!(find_conflicts(&posts).is_empty());
    }

    #[test]
    fn mixed_tones_on_one_day() {
        let posts = vec![
            post("a", Platform::Twitter, "2026-03-02T09:00:00Z", "the report", "professional"),
            post("b", Platform::Tiktok, "2026-03-02T19:00:00Z", "dance challenge", "Humorous"),
            post("c", Platform::Tiktok, "2026-03-03T19:00:00Z", "another one", "casual"),
        ];
        let conflicts = find_conflicts(&posts);
        assert_eq!(kinds(&conflicts), vec![ConflictKind::Messaging]);
        assert_eq!(conflicts[0].severity, Severity::Info);
        assert_eq!(conflicts[0].post_ids, vec!["a", "b"]);
    }

    #[test]
    fn optimized_schedule_uses_platform_hours_cyclically() {
        let posts = vec![
            post("t1", Platform::Twitter, "2026-03-02T08:10:00Z", "one", "casual"),
            post("t2", Platform::Twitter, "2026-03-02T08:20:00Z", "two", "casual"),
            post("i1", Platform::Instagram, "2026-03-02T08:30:00Z", "three", "casual"),
        ];
        let optimized = optimized_schedule(&posts, at("2026-03-01T00:00:00Z"));

        assert_eq!(optimized[0].scheduled_time, at("2026-03-02T09:00:00Z"));
        assert_eq!(optimized[1].scheduled_time, at("2026-03-02T12:00:00Z"));
        assert_eq!(optimized[2].scheduled_time, at("2026-03-02T11:00:00Z"));
        assert_eq!(
            optimized[2].content.scheduled_time,
            Some(at("2026-03-02T11:00:00Z"))
        );
    }

    #[test]
    fn optimized_schedule_never_moves_into_the_past() {
        let posts = vec![post("t1", Platform::Twitter, "2026-03-02T20:00:00Z", "one", "casual")];
        let optimized = optimized_schedule(&posts, at("2026-03-02T10:00:00Z"));
        assert_eq!(optimized[0].scheduled_time, at("2026-03-02T20:00:00Z"));
    }

    #[tokio::test]
    async fn checker_reads_and_updates_store() {
        let store = Arc::new(InMemoryPostStore::new());
        store
            .insert(post("a", Platform::Twitter, "2030-03-02T09:00:00Z", "morning", "casual"))
            .await;
        store
            .insert(post("b", Platform::Twitter, "2030-03-02T09:15:00Z", "evening", "casual"))
            .await;
        let mut posted = post("c", Platform::Twitter, "2030-03-02T09:05:00Z", "done", "casual");
        posted.status = PostStatus::Posted;
        store.insert(posted).await;

        let checker = ConflictChecker::new(store.clone());
        let conflicts = checker.check_cross_platform_conflicts("kid").await;
        assert_eq!(kinds(&conflicts), vec![ConflictKind::Timing]);

        checker
            .optimize_post_timing("kid", at("2030-03-01T00:00:00Z"))
            .await;
        assert_eq!(
            store.get("b").await.unwrap().scheduled_time,
            at("2030-03-02T12:00:00Z")
        );
        assert!(checker.check_cross_platform_conflicts("kid").await.is_empty());
    }

    #[tokio::test]
    async fn optimize_does_not_undo_a_concurrent_publish() {
        let store = Arc::new(SlowListing(InMemoryPostStore::new()));
        store
            .insert(post("a", Platform::Twitter, "2030-03-02T08:00:00Z", "morning", "casual"))
            .await;
        let checker = ConflictChecker::new(store.clone());

        let (optimized, published) = tokio::join!(
            checker.optimize_post_timing("kid", at("2030-03-01T00:00:00Z")),
            async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                store
                    .set_status("a", PostStatus::Scheduled, PostStatus::Posted)
                    .await
            }
        );

        assert!(matches!(published, StatusUpdate::Applied(_)));
        assert!(optimized.is_empty());
        let stored = store.get("a").await.unwrap();
        assert_eq!(stored.status, PostStatus::Posted);
        assert_eq!(stored.scheduled_time, at("2030-03-02T08:00:00Z"));
    }
}
