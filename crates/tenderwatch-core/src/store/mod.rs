pub mod actions;
pub mod announcements;
pub mod parsing_logs;
