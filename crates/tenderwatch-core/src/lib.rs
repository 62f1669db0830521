pub mod actions;
pub mod config;
pub mod conversation;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod lifecycle;
pub mod matcher;
pub mod mirror;
pub mod notifier;
pub mod pipeline;
pub mod reminders;
pub mod render;
pub mod sessions;
pub mod source;
pub mod store;
pub mod transport;
pub mod types;
