//! The three whole-document compression strategies.
//!
//! All of them share one contract: take the source bytes, produce new bytes,
//! report progress, and stop at the next suspension point once cancelled.
//! Pages are always processed in order; partial output is never returned.

mod lossless;
mod raster;

use log::warn;

use crate::cancel::CancelToken;
use crate::document::DocumentHandle;
use crate::error::Result;
use crate::params::{CompressionParams, Strategy};
use crate::render::PageRasterizer;

/// Receives progress from an executor.
pub trait Progress {
    /// `fraction` is in `[0, 1]`.
    fn report(&mut self, fraction: f64, status: &str);

    /// Called at every suspension point, right before the cancel token is
    /// checked.
    fn suspend(&mut self) {}
}

impl<F: FnMut(f64, &str)> Progress for F {
    fn report(&mut self, fraction: f64, status: &str) {
        self(fraction, status)
    }
}

pub(crate) fn checkpoint(progress: &mut dyn Progress, cancel: &CancelToken) -> Result<()> {
    progress.suspend();
    cancel.check()
}

impl Strategy {
    pub fn execute(
        &self,
        source: &[u8],
        params: &CompressionParams,
        rasterizer: &dyn PageRasterizer,
        progress: &mut dyn Progress,
        cancel: &CancelToken,
    ) -> Result<Vec<u8>> {
        match self {
            Strategy::Lossless => lossless::compact(source, progress, cancel),
            Strategy::Hybrid => {
                raster::rasterize_document(source, params, rasterizer, true, progress, cancel)
            }
            Strategy::Aggressive => {
                raster::rasterize_document(source, params, rasterizer, false, progress, cancel)
            }
        }
    }
}

/// Something that can run one compression pass. The orchestrator talks to
/// this rather than to [`Strategy`] directly.
pub trait Executor {
    /// Adjusts `params` to what this executor can do for `source` without
    /// losing visible content. Called once, before the first pass.
    fn plan(&self, _source: &[u8], params: &CompressionParams) -> Result<CompressionParams> {
        Ok(*params)
    }

    fn execute(
        &self,
        source: &[u8],
        params: &CompressionParams,
        progress: &mut dyn Progress,
        cancel: &CancelToken,
    ) -> Result<Vec<u8>>;
}

/// Runs `params.strategy` with the given rasterizer.
pub struct StrategyExecutor<'a> {
    rasterizer: &'a dyn PageRasterizer,
}

impl<'a> StrategyExecutor<'a> {
    pub fn new(rasterizer: &'a dyn PageRasterizer) -> Self {
        Self { rasterizer }
    }
}

impl Executor for StrategyExecutor<'_> {
    /// Raster strategies replace every page with what the rasterizer draws.
    /// If that would drop visible content on any page, run Lossless instead.
    fn plan(&self, source: &[u8], params: &CompressionParams) -> Result<CompressionParams> {
        if params.strategy == Strategy::Lossless {
            return Ok(*params);
        }
        let doc = DocumentHandle::load(source.to_vec())?;
        let unfaithful = (1..=doc.page_count())
            .find(|&page| !self.rasterizer.renders_faithfully(&doc, page));
        match unfaithful {
            Some(page) => {
                warn!(
                    "Page {} has content the rasterizer cannot draw; using lossless instead of {}",
                    page, params.strategy
                );
                Ok(CompressionParams {
                    strategy: Strategy::Lossless,
                    image_quality: 1.0,
                    ..*params
                })
            }
            None => Ok(*params),
        }
    }

    fn execute(
        &self,
        source: &[u8],
        params: &CompressionParams,
        progress: &mut dyn Progress,
        cancel: &CancelToken,
    ) -> Result<Vec<u8>> {
        params
            .strategy
            .execute(source, params, self.rasterizer, progress, cancel)
    }
}


#[cfg(test)]
pub(crate) mod test_support {
    use anyhow::{anyhow, Result};
    use image::{Rgb, RgbImage};

    use crate::cancel::CancelToken;
    use crate::document::DocumentHandle;
    use crate::render::PageRasterizer;

    /// Noisy page-sized bitmap so JPEG quality and DPI visibly move the
    /// output size.
    pub struct NoiseRasterizer;

    impl PageRasterizer for NoiseRasterizer {
        fn rasterize(&self, doc: &DocumentHandle, page: usize, dpi: u32) -> Result<RgbImage> {
            let (w, h) = doc.page_size(page)?;
            let scale = dpi as f32 / 72.0;
            let (w, h) = ((w * scale) as u32 / 4, (h * scale) as u32 / 4);
            let mut seed = (page as u32).wrapping_mul(2_654_435_761) | 1;
            Ok(RgbImage::from_fn(w.max(1), h.max(1), |_, _| {
                seed ^= seed << 13;
                seed ^= seed >> 17;
                seed ^= seed << 5;
                let v = seed.to_le_bytes();
                Rgb([v[0], v[1], v[2]])
            }))
        }
    }

    /// Fails on one page, renders the rest.
    pub struct FailingRasterizer {
        pub failing_page: usize,
    }

    impl PageRasterizer for FailingRasterizer {
        fn rasterize(&self, doc: &DocumentHandle, page: usize, dpi: u32) -> Result<RgbImage> {
            if page == self.failing_page {
                return Err(anyhow!("corrupt image stream"));
            }
            NoiseRasterizer.rasterize(doc, page, dpi)
        }
    }

    /// Trips `token` while rendering `page`.
    pub struct CancellingRasterizer {
        pub token: CancelToken,
        pub page: usize,
    }

    impl PageRasterizer for CancellingRasterizer {
        fn rasterize(&self, doc: &DocumentHandle, page: usize, dpi: u32) -> Result<RgbImage> {
            if page == self.page {
                self.token.cancel();
            }
            NoiseRasterizer.rasterize(doc, page, dpi)
        }
    }
}
