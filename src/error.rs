//! Error types for the study timer.
//!
//! Each module owns a focused error enum; [`AppError`] gathers them for the
//! command-line entry points.

use thiserror::Error;

use crate::config::ConfigError;
use crate::progress::ProgressError;
use crate::store::StoreError;
use crate::tasks::TaskError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("task error: {0}")]
    Task(#[from] TaskError),

    #[error("progress error: {0}")]
    Progress(#[from] ProgressError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;
