//! Pomodoro focus timer and study tracker.
//!
//! # Modules
//!
//! - [`pomodoro`]: phases, settings, the countdown engine and its tick driver
//! - [`widget`]: floating widget position, drag, lock and visibility
//! - [`session`]: completed-phase records and id generation
//! - [`tasks`]: the to-do list pomodoros are credited to
//! - [`store`]: key/value preference storage
//! - [`notify`]: completion notifications
//! - [`progress`]: per-subject progress log with live subscriptions
//! - [`ws`]: WebSocket control channel for the widget
//! - [`config`]: configuration from environment variables
//! - [`error`]: crate-level error type

pub mod config;
pub mod error;
pub mod notify;
pub mod pomodoro;
pub mod progress;
pub mod session;
pub mod store;
pub mod tasks;
pub mod widget;
pub mod ws;

pub use config::Config;
pub use error::{AppError, Result};
pub use pomodoro::engine::{TimerEngine, TimerSnapshot};
pub use pomodoro::runner::TimerRunner;
