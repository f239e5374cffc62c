//! Estimates how image-heavy a document is from a bounded sample of pages.

use std::collections::BTreeSet;

use log::{debug, warn};

use crate::document::DocumentHandle;

/// How many text items weigh as much as one image paint. Heuristic.
pub const TEXT_ITEMS_PER_IMAGE: f64 = 10.0;

/// Leading pages always sampled, on top of first/middle/last.
const LEADING_SAMPLE_PAGES: usize = 10;

const TEXT_PAGE_MIN_ITEMS: usize = 50;
const IMAGE_PAGE_MAX_ITEMS: usize = 10;
const MIXED_PAGE_MIN_ITEMS: usize = 20;

/// Representative 1-based page numbers for the preview panes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplePages {
    pub text: usize,
    pub image: usize,
    pub mixed: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Analysis {
    pub file_size_bytes: u64,
    pub page_count: usize,
    pub image_ratio: f64,
    pub text_ratio: f64,
    pub is_scanned: bool,
    pub sample_pages: SamplePages,
}

/// Pages visited by [`analyze`], in visiting order.
pub fn sample_page_numbers(page_count: usize) -> Vec<usize> {
    let mut pages: BTreeSet<usize> = [1, page_count / 2, page_count]
        .into_iter()
        .filter(|p| *p >= 1 && *p <= page_count)
        .collect();
    pages.extend(1..=page_count.min(LEADING_SAMPLE_PAGES));
    pages.into_iter().collect()
}

pub fn analyze(handle: &DocumentHandle) -> Analysis {
    let page_count = handle.page_count();
    let mut total_images = 0usize;
    let mut total_text_items = 0usize;
    let mut text_sample = None;
    let mut image_sample = None;
    let mut mixed_sample = None;

    for page in sample_page_numbers(page_count) {
        let (images, text_items) = match handle.scan_page(page) {
            Ok(scan) => (scan.image_ops, scan.text_items.len()),
            Err(e) => {
                warn!("Failed to scan page {} during analysis: {}", page, e);
                (0, 0)
            }
        };
        debug!("Page {}: {} image ops, {} text items", page, images, text_items);

        total_images += images;
        total_text_items += text_items;

        if text_sample.is_none() && text_items > TEXT_PAGE_MIN_ITEMS && images == 0 {
            text_sample = Some(page);
        } else if image_sample.is_none() && images > 0 && text_items < IMAGE_PAGE_MAX_ITEMS {
            image_sample = Some(page);
        } else if mixed_sample.is_none() && images > 0 && text_items > MIXED_PAGE_MIN_ITEMS {
            mixed_sample = Some(page);
        }
    }

    let image_ratio = image_ratio(total_images, total_text_items);

    Analysis {
        file_size_bytes: handle.size_bytes(),
        page_count,
        image_ratio,
        text_ratio: 1.0 - image_ratio,
        is_scanned: total_text_items == 0 && total_images > 0,
        sample_pages: SamplePages {
            text: text_sample.unwrap_or(1),
            image: image_sample.unwrap_or(1),
            mixed: mixed_sample.unwrap_or(1),
        },
    }
}

fn image_ratio(images: usize, text_items: usize) -> f64 {
    let images = images as f64;
    let weighted_text = text_items as f64 / TEXT_ITEMS_PER_IMAGE;
    (images / (images + weighted_text + 1.0)).clamp(0.0, 1.0)
}
