//! Runs a strategy, measures how close it got to the target, and makes at
//! most one stricter second attempt.

use log::info;

use crate::cancel::CancelToken;
use crate::error::{CompressError, Result};
use crate::params::{round2, CompressionParams, Strategy};
use crate::strategy::{Executor, Progress};

/// Percentage points short of target that trigger a refinement pass.
pub const REFINE_THRESHOLD_PERCENT: f64 = 10.0;

pub const REFINE_QUALITY_FACTOR: f64 = 0.8;
pub const REFINE_MIN_QUALITY: f64 = 0.6;
pub const REFINE_DPI_FACTOR: f64 = 0.9;
pub const REFINE_MIN_DPI: u32 = 96;

/// Where refinement progress starts on the overall bar.
const REFINE_PROGRESS_BASE: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Exploring,
    Refining,
    Done,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone)]
pub struct Outcome {
    pub bytes: Vec<u8>,
    /// Parameters of the pass that produced `bytes`.
    pub params: CompressionParams,
    pub passes: u32,
    pub reduction_percent: f64,
}

pub fn reduction_percent(original: usize, result: usize) -> f64 {
    if original == 0 {
        return 0.0;
    }
    (original as f64 - result as f64) / original as f64 * 100.0
}

/// Stricter parameters for the second pass.
pub fn refined_params(params: &CompressionParams) -> CompressionParams {
    CompressionParams {
        image_quality: round2(
            (params.image_quality * REFINE_QUALITY_FACTOR).max(REFINE_MIN_QUALITY),
        ),
        resolution_dpi: ((params.resolution_dpi as f64 * REFINE_DPI_FACTOR).floor() as u32)
            .max(REFINE_MIN_DPI),
        ..*params
    }
}

/// Maps a pass's own `[0, 1]` progress into `[base, 1]` of the overall bar.
struct Rebased<'a> {
    inner: &'a mut dyn Progress,
    base: f64,
}

impl Progress for Rebased<'_> {
    fn report(&mut self, fraction: f64, _status: &str) {
        let overall = self.base + fraction.clamp(0.0, 1.0) * (1.0 - self.base);
        self.inner.report(overall, "Finalizing...");
    }

    fn suspend(&mut self) {
        self.inner.suspend();
    }
}

pub struct Orchestrator<E> {
    executor: E,
    phase: Phase,
}

impl<E: Executor> Orchestrator<E> {
    pub fn new(executor: E) -> Self {
        Self {
            executor,
            phase: Phase::Idle,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn run(
        &mut self,
        source: &[u8],
        params: &CompressionParams,
        progress: &mut dyn Progress,
        cancel: &CancelToken,
    ) -> Result<Outcome> {
        let result = self.drive(source, params, progress, cancel);
        self.phase = match &result {
            Ok(_) => Phase::Done,
            Err(CompressError::Cancelled) => Phase::Cancelled,
            Err(_) => Phase::Failed,
        };
        result
    }

    fn drive(
        &mut self,
        source: &[u8],
        params: &CompressionParams,
        progress: &mut dyn Progress,
        cancel: &CancelToken,
    ) -> Result<Outcome> {
        let original_size = source.len();
        let params = &self.executor.plan(source, params)?;

        self.phase = Phase::Exploring;
        info!(
            "Exploring with {} at {} dpi, quality {:.2} (target {}%)",
            params.strategy,
            params.resolution_dpi,
            params.image_quality,
            params.target_reduction_percent
        );
        let first_pass = source.to_vec();
        let bytes = self.executor.execute(&first_pass, params, progress, cancel)?;
        cancel.check()?;

        let achieved = reduction_percent(original_size, bytes.len());
        let shortfall = params.target_reduction_percent as f64 - achieved;
        info!(
            "First pass: {} -> {} bytes ({:.1}% reduction, {:.1} points short)",
            original_size,
            bytes.len(),
            achieved,
            shortfall
        );

        if shortfall <= REFINE_THRESHOLD_PERCENT || params.strategy == Strategy::Lossless {
            return Ok(Outcome {
                bytes,
                params: *params,
                passes: 1,
                reduction_percent: achieved,
            });
        }

        self.phase = Phase::Refining;
        let refined = refined_params(params);
        info!(
            "Refining at {} dpi, quality {:.2}",
            refined.resolution_dpi, refined.image_quality
        );
        progress.report(REFINE_PROGRESS_BASE, "Refining for target...");

        let second_pass = source.to_vec();
        let bytes = {
            let mut rebased = Rebased {
                inner: progress,
                base: REFINE_PROGRESS_BASE,
            };
            self.executor.execute(&second_pass, &refined, &mut rebased, cancel)?
        };
        cancel.check()?;

        let achieved = reduction_percent(original_size, bytes.len());
        info!("Refined pass: {} bytes ({:.1}% reduction)", bytes.len(), achieved);
        Ok(Outcome {
            bytes,
            params: refined,
            passes: 2,
            reduction_percent: achieved,
        })
    }
}
