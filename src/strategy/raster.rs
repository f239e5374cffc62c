//! Hybrid and Aggressive: every page becomes one JPEG, optionally with an
//! invisible text layer on top so the result stays searchable.

use log::{debug, warn};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};

use super::{checkpoint, Progress};
use crate::cancel::CancelToken;
use crate::document::{DocumentHandle, PageBox, TextItem};
use crate::error::{CompressError, Result};
use crate::params::CompressionParams;
use crate::preview::encode_jpeg;
use crate::render::PageRasterizer;

const IMAGE_NAME: &str = "Im0";
const FONT_NAME: &str = "F1";
const INVISIBLE_STATE: &str = "GS0";

/// Text render mode 3: neither fill nor stroke.
const INVISIBLE_RENDER_MODE: i64 = 3;

struct SharedResources {
    font: ObjectId,
    invisible: ObjectId,
}

pub(super) fn rasterize_document(
    source: &[u8],
    params: &CompressionParams,
    rasterizer: &dyn PageRasterizer,
    text_layer: bool,
    progress: &mut dyn Progress,
    cancel: &CancelToken,
) -> Result<Vec<u8>> {
    checkpoint(progress, cancel)?;
    let input = DocumentHandle::load(source.to_vec())?;
    let total = input.page_count();

    let mut out = Document::with_version("1.5");
    let pages_id = out.new_object_id();
    let shared = text_layer.then(|| SharedResources {
        font: out.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
            "Encoding" => "WinAnsiEncoding",
        }),
        invisible: out.add_object(dictionary! {
            "Type" => "ExtGState",
            "ca" => 0,
            "CA" => 0,
        }),
    });

    let mut kids: Vec<Object> = Vec::with_capacity(total);
    for page in 1..=total {
        checkpoint(progress, cancel)?;

        let page_box = input.page_box(page)?;
        let rotation = input.page_rotation(page)?;

        let image_id = match page_image(&input, page, params, rasterizer, progress, cancel) {
            Ok(stream) => Some(out.add_object(stream)),
            Err(CompressError::Cancelled) => return Err(CompressError::Cancelled),
            Err(e) => {
                warn!("{}; page {} is written without its image", e, page);
                None
            }
        };

        let text_items = match &shared {
            Some(_) => match input.scan_page(page) {
                Ok(scan) => scan.text_items,
                Err(e) => {
                    warn!("Failed to read text of page {}: {}", page, e);
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        let content = match page_content(&page_box, image_id.is_some(), &text_items).encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                let err = CompressError::Embed {
                    page,
                    reason: format!("{:?}", e),
                };
                warn!("{}; page {} is left blank", err, page);
                Vec::new()
            }
        };
        let content_id = out.add_object(Stream::new(dictionary! {}, content));

        let mut resources = Dictionary::new();
        if let Some(id) = image_id {
            resources.set("XObject", dictionary! { IMAGE_NAME => id });
        }
        if let Some(shared) = &shared {
            resources.set("Font", dictionary! { FONT_NAME => shared.font });
            resources.set("ExtGState", dictionary! { INVISIBLE_STATE => shared.invisible });
        }

        let mut page_dict = dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), page_box.width.into(), page_box.height.into()],
            "Contents" => content_id,
            "Resources" => resources,
        };
        if rotation != 0 {
            page_dict.set("Rotate", rotation);
        }
        kids.push(out.add_object(page_dict).into());

        debug!("Page {}/{} rasterized ({} text items)", page, total, text_items.len());
        progress.report(
            page as f64 / total as f64,
            &format!("Compressing page {} of {}", page, total),
        );
    }

    out.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => total as i64,
        }),
    );
    let catalog_id = out.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    out.trailer.set("Root", catalog_id);
    out.compress();

    let mut buffer = Vec::new();
    out.save_to(&mut buffer)
        .map_err(|e| CompressError::Write(format!("{:?}", e)))?;
    Ok(buffer)
}

/// Renders and JPEG-encodes one page into an image XObject.
fn page_image(
    input: &DocumentHandle,
    page: usize,
    params: &CompressionParams,
    rasterizer: &dyn PageRasterizer,
    progress: &mut dyn Progress,
    cancel: &CancelToken,
) -> Result<Stream> {
    let raster = rasterizer
        .rasterize(input, page, params.resolution_dpi)
        .map_err(|e| CompressError::Encode {
            page,
            reason: format!("{:#}", e),
        })?;
    checkpoint(progress, cancel)?;

    let jpeg = encode_jpeg(&raster, params.jpeg_quality()).map_err(|e| CompressError::Encode {
        page,
        reason: e.to_string(),
    })?;
    checkpoint(progress, cancel)?;

    if jpeg.is_empty() {
        return Err(CompressError::Embed {
            page,
            reason: "encoder produced no data".to_string(),
        });
    }

    let dict = dictionary! {
        "Type" => "XObject",
        "Subtype" => "Image",
        "Width" => raster.width() as i64,
        "Height" => raster.height() as i64,
        "ColorSpace" => "DeviceRGB",
        "BitsPerComponent" => 8,
        "Filter" => "DCTDecode",
    };
    Ok(Stream::new(dict, jpeg).with_compression(false))
}

/// Image stretched over the whole page, then the invisible text layer. The
/// new page starts at the origin, so text moves by the source MediaBox corner.
fn page_content(page_box: &PageBox, has_image: bool, text: &[TextItem]) -> Content {
    let mut operations = Vec::new();

    if has_image {
        operations.push(Operation::new("q", vec![]));
        operations.push(Operation::new(
            "cm",
            vec![
                page_box.width.into(),
                0.into(),
                0.into(),
                page_box.height.into(),
                0.into(),
                0.into(),
            ],
        ));
        operations.push(Operation::new("Do", vec![Object::Name(IMAGE_NAME.into())]));
        operations.push(Operation::new("Q", vec![]));
    }

    let visible: Vec<&TextItem> = text.iter().filter(|item| !item.is_blank()).collect();
    if !visible.is_empty() {
        operations.push(Operation::new("q", vec![]));
        operations.push(Operation::new(
            "gs",
            vec![Object::Name(INVISIBLE_STATE.into())],
        ));
        operations.push(Operation::new("BT", vec![]));
        operations.push(Operation::new("Tr", vec![INVISIBLE_RENDER_MODE.into()]));
        for item in visible {
            let size = if item.font_size > 0.0 { item.font_size } else { 1.0 };
            operations.push(Operation::new(
                "Tf",
                vec![Object::Name(FONT_NAME.into()), size.into()],
            ));
            operations.push(Operation::new(
                "Tm",
                vec![
                    1.into(),
                    0.into(),
                    0.into(),
                    1.into(),
                    (item.x - page_box.x).into(),
                    (item.y - page_box.y).into(),
                ],
            ));
            operations.push(Operation::new(
                "Tj",
                vec![Object::string_literal(win_ansi(&item.text))],
            ));
        }
        operations.push(Operation::new("ET", vec![]));
        operations.push(Operation::new("Q", vec![]));
    }

    Content { operations }
}

/// Code points 0x80..=0x9F of WinAnsiEncoding; U+FFFD marks unused slots.
const WIN_ANSI_HIGH: [char; 32] = [
    '\u{20AC}', '\u{FFFD}', '\u{201A}', '\u{0192}', '\u{201E}', '\u{2026}', '\u{2020}', '\u{2021}',
    '\u{02C6}', '\u{2030}', '\u{0160}', '\u{2039}', '\u{0152}', '\u{FFFD}', '\u{017D}', '\u{FFFD}',
    '\u{FFFD}', '\u{2018}', '\u{2019}', '\u{201C}', '\u{201D}', '\u{2022}', '\u{2013}', '\u{2014}',
    '\u{02DC}', '\u{2122}', '\u{0161}', '\u{203A}', '\u{0153}', '\u{FFFD}', '\u{017E}', '\u{0178}',
];

/// Encodes `text` for the WinAnsi Helvetica overlay font. Characters it
/// cannot show become `?`.
fn win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match c as u32 {
            0x20..=0x7E | 0xA0..=0xFF => c as u32 as u8,
            _ if c == '\u{FFFD}' => b'?',
            _ => WIN_ANSI_HIGH
                .iter()
                .position(|&high| high == c)
                .map(|i| 0x80 + i as u8)
                .unwrap_or(b'?'),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::fixtures::*;
    use crate::params::Strategy;
    use crate::strategy::test_support::*;

    fn params(strategy: Strategy, dpi: u32, quality: f64) -> CompressionParams {
        CompressionParams {
            strategy,
            resolution_dpi: dpi,
            image_quality: quality,
            target_reduction_percent: 50,
            predicted_size_bytes: None,
        }
    }

    fn run(
        source: &[u8],
        text_layer: bool,
        rasterizer: &dyn PageRasterizer,
        cancel: &CancelToken,
    ) -> (Result<Vec<u8>>, Vec<f64>) {
        let mut fractions = Vec::new();
        let result = rasterize_document(
            source,
            &params(Strategy::Hybrid, 72, 0.7),
            rasterizer,
            text_layer,
            &mut |f: f64, _: &str| fractions.push(f),
            cancel,
        );
        (result, fractions)
    }

    #[test]
    fn hybrid_keeps_text_searchable() {
        let source = build_pdf(&[text_page(4), image_page(1, 2)]);
        let (out, _) = run(&source, true, &NoiseRasterizer, &CancelToken::new());
        let out = DocumentHandle::load(out.unwrap()).unwrap();

        assert_eq!(out.page_count(), 2);
        let first = out.scan_page(1).unwrap();
        assert_eq!(first.image_ops, 1);
        assert_eq!(first.text_items.len(), 4);
        assert_eq!(first.text_items[0].text, "Line 0");
        assert!(first.text_items[0].invisible);
        assert_eq!((first.text_items[0].x, first.text_items[0].y), (72.0, 750.0));
        assert_eq!(first.text_items[0].font_size, 12.0);

        let ops = out.page_operations(1).unwrap();
        assert!(ops.iter().any(|op| {
            op.operator == "Tr" && matches!(op.operands.first(), Some(Object::Integer(3)))
        }));
    }

    #[test]
    fn aggressive_drops_text() {
        let source = build_pdf(&[text_page(4), image_page(1, 2)]);
        let (out, _) = run(&source, false, &NoiseRasterizer, &CancelToken::new());
        let out = DocumentHandle::load(out.unwrap()).unwrap();
        for page in 1..=2 {
            let scan = out.scan_page(page).unwrap();
            assert_eq!(scan.image_ops, 1);
            assert!(scan.text_items.is_empty());
        }
        assert_eq!(out.page_size(2).unwrap(), (612.0, 792.0));
    }

    #[test]
    fn composite_font_text_stays_searchable() {
        let (out, _) = run(&composite_font_pdf(), true, &NoiseRasterizer, &CancelToken::new());
        let out = DocumentHandle::load(out.unwrap()).unwrap();
        let scan = out.scan_page(1).unwrap();
        assert_eq!(scan.text_items.len(), 1);
        assert_eq!(scan.text_items[0].text, "Hi");
        assert_eq!((scan.text_items[0].x, scan.text_items[0].y), (72.0, 700.0));
    }

    #[test]
    fn overlay_follows_media_box_origin_and_rotation() {
        let source = build_pdf(&[text_page(2).shifted(100, 200).rotated(90)]);
        let (out, _) = run(&source, true, &NoiseRasterizer, &CancelToken::new());
        let out = DocumentHandle::load(out.unwrap()).unwrap();

        let page_box = out.page_box(1).unwrap();
        assert_eq!((page_box.x, page_box.y), (0.0, 0.0));
        assert_eq!(out.page_rotation(1).unwrap(), 90);
        let scan = out.scan_page(1).unwrap();
        assert_eq!((scan.text_items[0].x, scan.text_items[0].y), (72.0, 750.0));
        assert_eq!((scan.text_items[1].x, scan.text_items[1].y), (72.0, 738.0));
    }

    #[test]
    fn overlay_text_is_win_ansi() {
        assert_eq!(win_ansi("Caf\u{e9} \u{20ac}5"), b"Caf\xe9 \x805".to_vec());
        assert_eq!(win_ansi("\u{4e2d}\u{2014}"), b"?\x97".to_vec());
    }

    #[test]
    fn progress_once_per_page_in_order() {
        let source = build_pdf(&[text_page(1); 10]);
        let (out, fractions) = run(&source, true, &NoiseRasterizer, &CancelToken::new());
        assert!(out.is_ok());
        assert_eq!(fractions.len(), 10);
        assert!(fractions.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(fractions.last(), Some(&1.0));
    }

    #[test]
    fn failed_page_is_skipped_not_fatal() {
        let source = build_pdf(&[text_page(2), text_page(2), text_page(2)]);
        let (out, fractions) = run(
            &source,
            true,
            &FailingRasterizer { failing_page: 2 },
            &CancelToken::new(),
        );
        let out = DocumentHandle::load(out.unwrap()).unwrap();
        assert_eq!(out.page_count(), 3);
        assert_eq!(out.scan_page(1).unwrap().image_ops, 1);
        assert_eq!(out.scan_page(2).unwrap().image_ops, 0);
        assert_eq!(out.scan_page(2).unwrap().text_items.len(), 2);
        assert_eq!(out.scan_page(3).unwrap().image_ops, 1);
        assert_eq!(fractions.len(), 3);
    }

    #[test]
    fn cancellation_stops_before_next_page() {
        let source = build_pdf(&[text_page(1); 6]);
        let token = CancelToken::new();
        let rasterizer = CancellingRasterizer {
            token: token.clone(),
            page: 3,
        };
        let (out, fractions) = run(&source, true, &rasterizer, &token);
        assert_eq!(out.unwrap_err(), CompressError::Cancelled);
        // Pages 1 and 2 completed; page 3 was abandoned after rendering.
        assert_eq!(fractions.len(), 2);
    }

    #[test]
    fn lower_quality_means_smaller_output() {
        let source = build_pdf(&[image_page(1, 0); 3]);
        let cancel = CancelToken::new();
        let mut noop = |_: f64, _: &str| {};
        let high = rasterize_document(
            &source,
            &params(Strategy::Aggressive, 150, 0.95),
            &NoiseRasterizer,
            false,
            &mut noop,
            &cancel,
        )
        .unwrap();
        let low = rasterize_document(
            &source,
            &params(Strategy::Aggressive, 96, 0.6),
            &NoiseRasterizer,
            false,
            &mut noop,
            &cancel,
        )
        .unwrap();
        assert!(low.len() < high.len());
    }
}
