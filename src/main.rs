use std::io::Write;
use std::path::PathBuf;
use std::sync::mpsc::Receiver;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::Parser;
use pdf_target_compressor::{
    calculate, EventKind, QualityFloor, RequestId, Session, SessionConfig, SessionEvent,
};

/// Compress a PDF towards a target size reduction
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Input PDF file
    input: PathBuf,

    /// Output PDF file
    #[arg(required_unless_present = "analyze_only")]
    output: Option<PathBuf>,

    /// Desired size reduction in percent (10-90)
    #[arg(long, default_value_t = 50)]
    target: u8,

    /// Quality floor: lossless, balanced or aggressive
    #[arg(long, default_value_t = QualityFloor::Balanced)]
    floor: QualityFloor,

    /// Resolution of the original-page preview
    #[arg(long, default_value_t = 150)]
    original_dpi: u32,

    /// Max rasterized page dimension (longer side)
    #[arg(long, default_value_t = 4000)]
    max_dim: u32,

    /// Print the analysis and suggested parameters, then exit
    #[arg(long)]
    analyze_only: bool,

    /// Render a preview of this page (1-based) before compressing
    #[arg(long, requires = "preview_out")]
    preview_page: Option<usize>,

    /// Where to write the preview PNG
    #[arg(long)]
    preview_out: Option<PathBuf>,
}

fn mb(bytes: u64) -> f64 {
    bytes as f64 / 1_048_576.0
}

/// Blocks until `request` produces a terminal event, printing progress on
/// the way.
fn wait_for(events: &Receiver<SessionEvent>, request: RequestId) -> Result<EventKind> {
    loop {
        let event = events.recv().context("Session ended unexpectedly")?;
        if event.request != request {
            continue;
        }
        match event.kind {
            EventKind::ProgressUpdate { fraction, status } => {
                print!("\r[{:>3.0}%] {:<40}", fraction * 100.0, status);
                std::io::stdout().flush()?;
            }
            EventKind::Error { message, code } => bail!("{} ({})", message, code),
            EventKind::Cancelled => bail!("Compression was cancelled"),
            kind => return Ok(kind),
        }
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    println!("Loading PDF: {:?}", args.input);
    let start = Instant::now();
    let bytes = std::fs::read(&args.input).context("Failed to read PDF")?;
    let original_size = bytes.len() as u64;

    let config = SessionConfig {
        original_preview_dpi: args.original_dpi,
        max_raster_dimension: args.max_dim,
    };
    let (session, events) = Session::spawn(config).context("Failed to start session")?;

    let id = session.init(bytes);
    wait_for(&events, id).context("Failed to load PDF")?;
    println!("Loaded in {:.2?}", start.elapsed());

    let id = session.analyze();
    let analysis = match wait_for(&events, id)? {
        EventKind::AnalysisComplete(analysis) => analysis,
        other => bail!("Unexpected reply to analysis: {:?}", other),
    };
    println!(
        "Pages: {}, images: {:.0}%, text: {:.0}%, scanned: {}",
        analysis.page_count,
        analysis.image_ratio * 100.0,
        analysis.text_ratio * 100.0,
        analysis.is_scanned
    );

    let params = calculate(&analysis, args.target, args.floor);
    println!(
        "Strategy: {} at {} dpi, quality {:.2}",
        params.strategy, params.resolution_dpi, params.image_quality
    );
    if let Some(predicted) = params.predicted_size_bytes {
        println!("Predicted size: {:.2} MB", mb(predicted));
    }

    if args.analyze_only {
        session.shutdown();
        return Ok(());
    }

    if let (Some(page), Some(path)) = (args.preview_page, &args.preview_out) {
        let id = session.render_preview(page, params);
        let bitmap = match wait_for(&events, id)? {
            EventKind::PreviewReady(bitmap) => bitmap,
            other => bail!("Unexpected reply to preview: {:?}", other),
        };
        let image = image::RgbaImage::from_raw(bitmap.width, bitmap.height, bitmap.rgba)
            .context("Preview buffer has the wrong size")?;
        image.save(path).context("Failed to save preview")?;
        println!("Preview of page {} written to {:?}", page, path);
    }

    let start = Instant::now();
    let id = session.start_compression(params);
    let (compressed, reduction, passes) = match wait_for(&events, id)? {
        EventKind::CompressionComplete {
            bytes,
            reduction_percent,
            passes,
        } => (bytes, reduction_percent, passes),
        other => bail!("Unexpected reply to compression: {:?}", other),
    };
    println!();
    session.shutdown();

    let output = args.output.context("No output file given")?;
    std::fs::write(&output, &compressed).context("Failed to save PDF")?;

    println!("Compressed in {:.2?} ({} pass(es))", start.elapsed(), passes);
    println!("Original size: {:.2} MB", mb(original_size));
    println!("New size:      {:.2} MB", mb(compressed.len() as u64));
    println!("Reduction:     {:.1}%", reduction);

    Ok(())
}
