/// Post storage
///
/// Scheduled posts only live in memory; the trait exists so a durable
/// backend can be swapped in without touching the scheduler.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use chrono::{DateTime, Utc};

use crate::models::{PostStatus, ScheduledPost};

/// Outcome of a guarded status change
#[derive(Debug, Clone, PartialEq)]
pub enum StatusUpdate {
    Applied(ScheduledPost),
    /// The post was no longer in the expected status; holds the one it has
    Mismatch(PostStatus),
    Missing,
}

#[async_trait]
pub trait PostStore: Send + Sync {
    async fn insert(&self, post: ScheduledPost);

    async fn get(&self, id: &str) -> Option<ScheduledPost>;

    /// Move a post from `from` to `to`, only if it is still in `from`
    async fn set_status(&self, id: &str, from: PostStatus, to: PostStatus) -> StatusUpdate;

    /// Move an open post to a new time; `None` if it is gone or no longer open
    async fn reschedule(&self, id: &str, time: DateTime<Utc>) -> Option<ScheduledPost>;

    async fn remove(&self, id: &str) -> Option<ScheduledPost>;

    /// Posts for one account, ordered by scheduled time
    async fn list_for_account(&self, account_id: &str) -> Vec<ScheduledPost>;

    /// Posts in a given status across all accounts, ordered by scheduled time
    async fn list_by_status(&self, status: PostStatus) -> Vec<ScheduledPost>;
}

/// Process-local store; everything is lost on restart
#[derive(Default)]
pub struct InMemoryPostStore {
    posts: RwLock<HashMap<String, ScheduledPost>>,
}

impl InMemoryPostStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn sorted(mut posts: Vec<ScheduledPost>) -> Vec<ScheduledPost> {
    posts.sort_by(|a, b| {
        a.scheduled_time
            .cmp(&b.scheduled_time)
            .then_with(|| a.id.cmp(&b.id))
    });
    posts
}

#[async_trait]
impl PostStore for InMemoryPostStore {
    async fn insert(&self, post: ScheduledPost) {
        let mut posts = self.posts.write().await;
        posts.insert(post.id.clone(), post);
    }

    async fn get(&self, id: &str) -> Option<ScheduledPost> {
        let posts = self.posts.read().await;
        posts.get(id).cloned()
    }

    async fn set_status(&self, id: &str, from: PostStatus, to: PostStatus) -> StatusUpdate {
        let mut posts = self.posts.write().await;
        match posts.get_mut(id) {
            Some(post) if post.status == from => {
                post.status = to;
                StatusUpdate::Applied(post.clone())
            }
            Some(post) => StatusUpdate::Mismatch(post.status),
            None => StatusUpdate::Missing,
        }
    }

    async fn reschedule(&self, id: &str, time: DateTime<Utc>) -> Option<ScheduledPost> {
        let mut posts = self.posts.write().await;
        let post = posts.get_mut(id).filter(|p| p.status.is_open())?;
        post.scheduled_time = time;
        post.content.scheduled_time = Some(time);
        Some(post.clone())
    }

    async fn remove(&self, id: &str) -> Option<ScheduledPost> {
        let mut posts = self.posts.write().await;
        posts.remove(id)
    }

    async fn list_for_account(&self, account_id: &str) -> Vec<ScheduledPost> {
        let posts = self.posts.read().await;
        sorted(
            posts
                .values()
                .filter(|p| p.account_id == account_id)
                .cloned()
                .collect(),
        )
    }

    async fn list_by_status(&self, status: PostStatus) -> Vec<ScheduledPost> {
        let posts = self.posts.read().await;
        sorted(
            posts
                .values()
                .filter(|p| p.status == status)
                .cloned()
                .collect(),
        )
    }
}
