//! dingrelay - relays alert-group webhooks to DingTalk chat robots
//!
//! Incoming webhook payloads are rendered through per-target message
//! templates and delivered, optionally signed, to the target's robot
//! endpoint. Configuration and templates can be reloaded at runtime without
//! dropping requests.

pub mod app;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod lifecycle;
pub mod models;
pub mod notifier;
pub mod registry;
pub mod task_manager;
pub mod telemetry;
pub mod template;
pub mod watcher;
pub mod web;
