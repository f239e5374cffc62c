//! Live before/after previews of a single page.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::{ImageFormat, RgbImage};
use log::debug;

use crate::document::DocumentHandle;
use crate::error::{CompressError, Result};
use crate::params::CompressionParams;
use crate::render::PageRasterizer;

/// Decoded RGBA8 pixels. Moved, never cloned, across the session channel.
#[derive(Clone, PartialEq, Eq)]
pub struct Bitmap {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl std::fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Bitmap({}x{})", self.width, self.height)
    }
}

/// Encodes `image` as JPEG at `quality` (1..=100).
pub(crate) fn encode_jpeg(image: &RgbImage, quality: u8) -> image::ImageResult<Vec<u8>> {
    let mut buffer = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buffer, quality);
    encoder.encode_image(image)?;
    Ok(buffer)
}

/// Renders `page_number` the way the raster strategies would: at `dpi`, then
/// through a JPEG round trip at `jpeg_quality`, so artifacts show up in the
/// preview.
pub fn render_sample(
    doc: &DocumentHandle,
    rasterizer: &dyn PageRasterizer,
    page_number: usize,
    dpi: u32,
    jpeg_quality: u8,
) -> Result<Bitmap> {
    doc.check_page(page_number)?;
    let encode_err = |reason: String| CompressError::Encode {
        page: page_number,
        reason,
    };

    let raster = rasterizer
        .rasterize(doc, page_number, dpi)
        .map_err(|e| encode_err(format!("{:#}", e)))?;
    let jpeg = encode_jpeg(&raster, jpeg_quality).map_err(|e| encode_err(e.to_string()))?;
    let decoded = image::load(Cursor::new(&jpeg), ImageFormat::Jpeg)
        .map_err(|e| encode_err(e.to_string()))?
        .to_rgba8();

    debug!(
        "Preview of page {} at {} dpi, q={}: {} JPEG bytes",
        page_number,
        dpi,
        jpeg_quality,
        jpeg.len()
    );

    Ok(Bitmap {
        width: decoded.width(),
        height: decoded.height(),
        rgba: decoded.into_raw(),
    })
}

/// Predicted look of `page_number` after compressing with `params`.
pub fn render_preview(
    doc: &DocumentHandle,
    rasterizer: &dyn PageRasterizer,
    page_number: usize,
    params: &CompressionParams,
) -> Result<Bitmap> {
    render_sample(
        doc,
        rasterizer,
        page_number,
        params.resolution_dpi,
        params.jpeg_quality(),
    )
}

/// The untouched page, for the "before" pane.
pub fn render_original(
    doc: &DocumentHandle,
    rasterizer: &dyn PageRasterizer,
    page_number: usize,
    dpi: u32,
) -> Result<Bitmap> {
    render_sample(doc, rasterizer, page_number, dpi, 100)
}
