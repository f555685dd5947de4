//! Error types for the rendering engine.

use crate::geom::{Crs, Envelope};
use thiserror::Error;

/// Errors reported by [`CachedRenderEngine::prepare_pass`](crate::engine::CachedRenderEngine::prepare_pass).
///
/// Invalid input is a checked failure: no engine state is mutated when one of
/// these is returned. Contention and rate limiting are not errors; they are
/// reported through [`PassOutcome`](crate::engine::PassOutcome).
#[derive(Debug, Error)]
pub enum EngineError {
    /// The requested world envelope has zero or negative extent.
    #[error("invalid world envelope: {0}")]
    InvalidEnvelope(Envelope),

    /// The requested paint surface has a zero dimension.
    #[error("invalid pixel dimensions: {width}x{height}")]
    InvalidPixelSize { width: u32, height: u32 },

    /// The envelope's coordinate reference does not match the project's.
    #[error("coordinate reference mismatch: requested {requested}, project uses {project}")]
    CrsMismatch { requested: Crs, project: Crs },

    /// The engine's render runtime could not be created.
    #[error("failed to create render runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

/// Failure of an opaque per-layer render source.
///
/// A render failure never aborts a pass: the worker logs it and leaves the
/// tile pending so a later pass can retry.
#[derive(Debug, Error)]
pub enum RenderError {
    /// The render source could not produce an image for the requested extent.
    #[error("render source failed: {0}")]
    Source(String),
}
