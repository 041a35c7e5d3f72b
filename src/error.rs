// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use thiserror::Error;

/// Errors surfaced by survival tracking. Each well is tracked independently,
/// so one of these aborts only the well that produced it.
#[derive(Debug, Error)]
pub enum TrackError {
    /// The first frame of a stack yielded no trackable cells. A survival
    /// analysis without subjects is meaningless, so this is never silently
    /// skipped.
    #[error("no neurons found in first frame of well {well}")]
    NoNeuronsFound { well: String },

    #[error("stack for well {well} has no frames")]
    EmptyStack { well: String },

    #[error("stack for well {well} ({width}x{height}) is too small for crop margin {margin}")]
    StackTooSmall { well: String, width: u32, height: u32, margin: u32 },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("unsupported stack format in {path}: {reason}")]
    UnsupportedStack { path: String, reason: String },

    #[error("worker tracking well {well} panicked: {message}")]
    WorkerPanicked { well: String, message: String },

    #[error("cannot start worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Tiff(#[from] tiff::TiffError),

    #[error("cannot load annotation font: {0}")]
    Font(#[from] ab_glyph::InvalidFont),
}

pub type Result<T> = std::result::Result<T, TrackError>;
