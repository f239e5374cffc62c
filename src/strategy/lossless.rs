use log::{debug, info};

use super::{checkpoint, Progress};
use crate::cancel::CancelToken;
use crate::document::decode;
use crate::error::{CompressError, Result};

/// Structural compaction only: unreferenced objects and empty streams are
/// dropped and uncompressed streams are flate-compressed. Pixels are never
/// touched. Output is never larger than the input.
pub(super) fn compact(
    source: &[u8],
    progress: &mut dyn Progress,
    cancel: &CancelToken,
) -> Result<Vec<u8>> {
    progress.report(0.0, "Optimizing document structure...");
    checkpoint(progress, cancel)?;

    let mut doc = decode(source)?;
    let pruned = doc.prune_objects();
    let emptied = doc.delete_zero_length_streams();
    doc.renumber_objects();
    doc.compress();
    debug!(
        "Lossless: pruned {} objects, removed {} empty streams",
        pruned.len(),
        emptied.len()
    );

    checkpoint(progress, cancel)?;

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer)
        .map_err(|e| CompressError::Write(format!("{:?}", e)))?;

    let result = if buffer.len() < source.len() {
        buffer
    } else {
        info!(
            "Lossless re-save did not shrink the file ({} -> {} bytes); keeping original",
            source.len(),
            buffer.len()
        );
        source.to_vec()
    };

    progress.report(1.0, "Done");
    Ok(result)
}
