/// Child Account Scheduler Library
///
/// This library provides the core functionality for automating child-account
/// posting: AI content generation, the posting scheduler, cross-platform
/// conflict detection, training feedback, and the HTTP control API.

pub mod config;
pub mod conflicts;
pub mod content;
pub mod error;
pub mod feedback;
pub mod http_server;
pub mod models;
pub mod profile;
pub mod scheduler;
pub mod store;
pub mod tone;
