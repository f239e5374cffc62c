//! Page rasterization.
//!
//! Turning a page into pixels is a collaborator concern: the engine only
//! needs "give me page N at D dpi". [`EmbeddedImageRasterizer`] is the
//! built-in implementation; it paints every image XObject the page places,
//! at its placed position, onto a white page. Vector art and glyphs are not
//! drawn, so callers that need them plug their own renderer in.

use std::io::Read;

use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, Rgb, RgbImage};
use log::{debug, warn};
use lopdf::{Object, Stream};
use rayon::prelude::*;

use crate::document::DocumentHandle;

pub const POINTS_PER_INCH: f32 = 72.0;

/// Produces a bitmap of one page.
pub trait PageRasterizer {
    /// Renders 1-based `page_number` at `dpi`.
    fn rasterize(&self, doc: &DocumentHandle, page_number: usize, dpi: u32) -> Result<RgbImage>;

    /// Whether [`rasterize`](Self::rasterize) shows everything visible on the
    /// page. Raster strategies refuse documents with pages that fail this.
    fn renders_faithfully(&self, _doc: &DocumentHandle, _page_number: usize) -> bool {
        true
    }
}

pub struct EmbeddedImageRasterizer {
    max_dimension: u32,
}

impl Default for EmbeddedImageRasterizer {
    fn default() -> Self {
        Self::new(4000)
    }
}

impl EmbeddedImageRasterizer {
    /// `max_dimension` caps the longer side of the output bitmap.
    pub fn new(max_dimension: u32) -> Self {
        Self {
            max_dimension: max_dimension.max(1),
        }
    }

    fn canvas_size(&self, width_pt: f32, height_pt: f32, dpi: u32) -> (u32, u32, f32) {
        let mut scale = dpi as f32 / POINTS_PER_INCH;
        let longest = width_pt.max(height_pt) * scale;
        if longest > self.max_dimension as f32 {
            scale *= self.max_dimension as f32 / longest;
        }
        let w = ((width_pt * scale).round() as u32).max(1);
        let h = ((height_pt * scale).round() as u32).max(1);
        (w, h, scale)
    }
}

impl PageRasterizer for EmbeddedImageRasterizer {
    fn rasterize(&self, doc: &DocumentHandle, page_number: usize, dpi: u32) -> Result<RgbImage> {
        let page_box = doc.page_box(page_number)?;
        let (width_pt, height_pt) = (page_box.width, page_box.height);
        let (w, h, scale) = self.canvas_size(width_pt, height_pt, dpi);
        let mut canvas = RgbImage::from_pixel(w, h, Rgb([255, 255, 255]));

        let scan = doc
            .scan_page(page_number)
            .with_context(|| format!("Failed to read content of page {}", page_number))?;

        for placement in &scan.placements {
            let stream = match doc.stream(placement.id) {
                Some(s) => s,
                None => continue,
            };
            let image = match decode_image(doc, stream) {
                Ok(img) => img,
                Err(e) => {
                    warn!(
                        "Skipping image /{} on page {}: {:?}",
                        String::from_utf8_lossy(&placement.name),
                        page_number,
                        e
                    );
                    continue;
                }
            };

            let (x0, y0, x1, y1) = placement.ctm.unit_square_bounds();
            let target_w = ((x1 - x0) * scale).round() as i64;
            let target_h = ((y1 - y0) * scale).round() as i64;
            if target_w <= 0 || target_h <= 0 {
                continue;
            }
            // Clip against the page before resizing so off-page art costs nothing.
            let left = ((x0 - page_box.x) * scale).round() as i64;
            let top = ((page_box.y + height_pt - y1) * scale).round() as i64;
            if left >= w as i64 || top >= h as i64 || left + target_w <= 0 || top + target_h <= 0 {
                continue;
            }

            let resized = image::imageops::resize(
                &image,
                target_w as u32,
                target_h as u32,
                FilterType::Triangle,
            );
            image::imageops::overlay(&mut canvas, &resized, left, top);
        }

        debug!(
            "Rasterized page {} at {} dpi -> {}x{} ({} images)",
            page_number,
            dpi,
            w,
            h,
            scan.placements.len()
        );
        Ok(canvas)
    }

    /// Only image XObjects are drawn, so anything else visible would be lost.
    fn renders_faithfully(&self, doc: &DocumentHandle, page_number: usize) -> bool {
        match doc.scan_page(page_number) {
            Ok(scan) => scan.is_image_only(),
            Err(e) => {
                debug!("Page {} could not be scanned: {}", page_number, e);
                false
            }
        }
    }
}

fn decompress_stream(stream: &Stream) -> Result<Vec<u8>> {
    match stream.decompressed_content() {
        Ok(c) => Ok(c),
        Err(e) => {
            let filter = stream.dict.get(b"Filter").ok();
            match filter {
                Some(Object::Name(name)) if name == b"FlateDecode" => {
                    let mut decoder = flate2::read::ZlibDecoder::new(&stream.content[..]);
                    let mut buffer = Vec::new();
                    decoder
                        .read_to_end(&mut buffer)
                        .context("Manual zlib failed")?;
                    Ok(buffer)
                }
                // Streams with no filter at all are already raw.
                None => Ok(stream.content.clone()),
                _ => Err(anyhow!("Decompression failed: {:?}", e)),
            }
        }
    }
}

fn has_filter(stream: &Stream, wanted: &[u8]) -> bool {
    match stream.dict.get(b"Filter") {
        Ok(Object::Name(name)) => name == wanted,
        Ok(Object::Array(arr)) => arr
            .iter()
            .any(|o| matches!(o, Object::Name(name) if name == wanted)),
        _ => false,
    }
}

/// Decodes an image XObject into RGB, applying its soft mask against white.
fn decode_image(doc: &DocumentHandle, stream: &Stream) -> Result<RgbImage> {
    let dict = &stream.dict;
    let width = dict.get(b"Width").and_then(|o| o.as_i64()).unwrap_or(0) as u32;
    let height = dict.get(b"Height").and_then(|o| o.as_i64()).unwrap_or(0) as u32;

    let image = if has_filter(stream, b"DCTDecode") {
        // The raw stream is a JPEG file; lopdf leaves DCT data undecoded.
        let content = stream
            .decompressed_content()
            .unwrap_or_else(|_| stream.content.clone());
        image::load_from_memory(&content).context("Failed to load JPEG from memory")?
    } else {
        let content = decompress_stream(stream)?;
        let components = match dict.get(b"ColorSpace") {
            Ok(Object::Name(name)) if name == b"DeviceGray" => 1,
            Ok(Object::Name(name)) if name == b"DeviceCMYK" => 4,
            Ok(Object::Name(_)) => 3,
            _ => {
                let pixels = (width * height) as usize;
                if pixels > 0 && content.len() == pixels {
                    1
                } else if pixels > 0 && content.len() == pixels * 4 {
                    4
                } else {
                    3
                }
            }
        };
        raw_to_image(width, height, components, content)?
    };

    let mut rgb = image.to_rgb8();

    if let Ok(Object::Reference(mask_id)) = dict.get(b"SMask") {
        if let Ok(Object::Stream(mask_stream)) = doc.document().get_object(*mask_id) {
            match soft_mask(mask_stream, rgb.width(), rgb.height()) {
                Ok(mask) => blend_over_white(&mut rgb, &mask),
                Err(e) => debug!("Ignoring unusable SMask: {:?}", e),
            }
        }
    }

    Ok(rgb)
}

fn raw_to_image(width: u32, height: u32, components: u8, content: Vec<u8>) -> Result<DynamicImage> {
    let image = match components {
        1 => DynamicImage::ImageLuma8(
            GrayImage::from_raw(width, height, content.clone())
                .or_else(|| image::load_from_memory(&content).map(|i| i.to_luma8()).ok())
                .ok_or(anyhow!("Failed Gray"))?,
        ),
        3 => DynamicImage::ImageRgb8(
            RgbImage::from_raw(width, height, content.clone())
                .or_else(|| image::load_from_memory(&content).map(|i| i.to_rgb8()).ok())
                .ok_or(anyhow!("Failed RGB"))?,
        ),
        4 => {
            if let Ok(img) = image::load_from_memory(&content) {
                img
            } else {
                DynamicImage::ImageRgb8(
                    RgbImage::from_raw(width, height, cmyk_to_rgb(&content))
                        .ok_or(anyhow!("Failed CMYK->RGB"))?,
                )
            }
        }
        _ => return Err(anyhow!("Unsupported components {}", components)),
    };
    Ok(image)
}

fn cmyk_to_rgb(content: &[u8]) -> Vec<u8> {
    content
        .par_chunks(4)
        .flat_map_iter(|cmyk| {
            if cmyk.len() < 4 {
                return [0u8, 0, 0];
            }
            let k = 1.0 - cmyk[3] as f32 / 255.0;
            let channel = |v: u8| ((1.0 - v as f32 / 255.0) * k * 255.0) as u8;
            [channel(cmyk[0]), channel(cmyk[1]), channel(cmyk[2])]
        })
        .collect()
}

fn soft_mask(stream: &Stream, width: u32, height: u32) -> Result<GrayImage> {
    let content = decompress_stream(stream).context("Failed to decompress mask")?;
    let mw = stream.dict.get(b"Width").and_then(|o| o.as_i64()).unwrap_or(0) as u32;
    let mh = stream.dict.get(b"Height").and_then(|o| o.as_i64()).unwrap_or(0) as u32;
    let mask = GrayImage::from_raw(mw, mh, content).ok_or(anyhow!("Failed Mask"))?;
    if (mw, mh) == (width, height) {
        Ok(mask)
    } else {
        Ok(image::imageops::resize(&mask, width, height, FilterType::Triangle))
    }
}

fn blend_over_white(rgb: &mut RgbImage, mask: &GrayImage) {
    for (x, y, pixel) in rgb.enumerate_pixels_mut() {
        let alpha = mask.get_pixel(x, y)[0] as u32;
        for channel in pixel.0.iter_mut() {
            *channel = ((*channel as u32 * alpha + 255 * (255 - alpha)) / 255) as u8;
        }
    }
}
