//! Target-driven PDF compression.
//!
//! A document is analyzed, the analysis plus a reduction target picks a
//! strategy and its parameters, and an orchestrator runs that strategy (with
//! one optional stricter retry). Interactive front ends drive all of this
//! through a [`Session`] running on its own thread.

pub mod analyzer;
pub mod cancel;
pub mod document;
pub mod error;
pub mod orchestrator;
pub mod params;
pub mod preview;
pub mod render;
pub mod session;
pub mod strategy;

use wasm_bindgen::prelude::*;

pub use analyzer::{analyze, Analysis, SamplePages};
pub use cancel::CancelToken;
pub use document::DocumentHandle;
pub use error::CompressError;
pub use orchestrator::{Orchestrator, Outcome, Phase};
pub use params::{calculate, CompressionParams, QualityFloor, Strategy};
pub use preview::Bitmap;
pub use render::{EmbeddedImageRasterizer, PageRasterizer};
pub use session::{
    Command, EventKind, RequestId, Session, SessionConfig, SessionEvent, SessionHandle,
};
pub use strategy::{Executor, Progress, StrategyExecutor};

/// Analyzes, picks parameters and compresses in one call.
pub fn compress_to_target(
    input: Vec<u8>,
    target_percent: u8,
    floor: QualityFloor,
    rasterizer: &dyn PageRasterizer,
    progress: &mut dyn Progress,
    cancel: &CancelToken,
) -> error::Result<Outcome> {
    let handle = DocumentHandle::load(input)?;
    let analysis = analyze(&handle);
    let params = calculate(&analysis, target_percent, floor);
    let mut orchestrator = Orchestrator::new(StrategyExecutor::new(rasterizer));
    orchestrator.run(handle.source(), &params, progress, cancel)
}

#[wasm_bindgen]
pub fn compress_pdf(
    input: &[u8],
    target_percent: u8,
    quality_floor: &str,
) -> Result<Vec<u8>, JsError> {
    let floor: QualityFloor = quality_floor
        .parse()
        .map_err(|e: String| JsError::new(&e))?;
    let rasterizer = EmbeddedImageRasterizer::default();

    let outcome = compress_to_target(
        input.to_vec(),
        target_percent,
        floor,
        &rasterizer,
        &mut |_: f64, _: &str| {},
        &CancelToken::new(),
    )
    .map_err(|e| JsError::new(&format!("{} ({})", e, e.code())))?;

    Ok(outcome.bytes)
}
