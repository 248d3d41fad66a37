//! Inbox Triage: rule- and score-driven mailbox triage engine.

pub mod config;
pub mod digest;
pub mod error;
pub mod mailbox;
pub mod pipeline;
pub mod store;
