use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use log::{LevelFilter, debug, info};
use simplelog::{Config, SimpleLogger, WriteLogger};

use pagerender::panic_handler::initialize_panic_handler;
use pagerender::render::{
    ImmediateImage, PageLayout, PageProvider, PageSource, PointSize, SyntheticDocument, Viewport,
    ViewportHost,
};
use pagerender::settings::RenderSettings;

/// Scroll and zoom through a document and report how the page render
/// cache kept up
#[derive(Parser, Debug)]
#[command(name = "pagerender", version, about)]
struct Args {
    /// Render this PDF instead of a synthetic document
    #[cfg(feature = "pdf")]
    #[arg(long)]
    pdf: Option<PathBuf>,

    /// Synthetic document: number of pages
    #[arg(long, default_value_t = 40)]
    pages: usize,

    /// Synthetic document: page width in points
    #[arg(long, default_value_t = 612.0)]
    page_width: f64,

    /// Synthetic document: page height in points
    #[arg(long, default_value_t = 792.0)]
    page_height: f64,

    /// Synthetic document: simulated cost of one page render
    #[arg(long, default_value_t = 15)]
    render_delay_ms: u64,

    #[arg(long, default_value_t = 900.0)]
    viewport_width: f64,

    #[arg(long, default_value_t = 700.0)]
    viewport_height: f64,

    /// Number of simulated frames from top to bottom of the document
    #[arg(long, default_value_t = 240)]
    steps: usize,

    #[arg(long, default_value_t = 16)]
    frame_ms: u64,

    #[arg(long, default_value_t = 0.5)]
    min_zoom: f64,

    #[arg(long, default_value_t = 2.0)]
    max_zoom: f64,

    /// YAML render settings
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the cache budget from the settings, in MiB
    #[arg(long)]
    cache_limit_mb: Option<usize>,

    /// Write every cached page image here as PNG when done
    #[arg(long)]
    dump_dir: Option<PathBuf>,

    #[arg(long)]
    log_file: Option<PathBuf>,

    #[arg(long, default_value = "info")]
    log_level: LevelFilter,
}

/// What the simulated page view got back, frame by frame
#[derive(Debug, Default)]
struct FrameStats {
    frames: usize,
    exact: usize,
    approximate: usize,
    blank: usize,
    repaints: usize,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args)?;
    initialize_panic_handler();

    let mut settings = match &args.config {
        Some(path) => RenderSettings::load_from(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => RenderSettings::default(),
    };
    if let Some(mb) = args.cache_limit_mb {
        settings.cache_limit_bytes = mb * 1024 * 1024;
    }

    let source = open_source(&args)?;
    let layout = PageLayout::from_source(source.as_ref());
    let viewport = Viewport::new(args.viewport_width, args.viewport_height);
    let mut provider =
        PageProvider::with_settings(source, ViewportHost::new(layout, viewport), &settings);

    info!("Starting scroll simulation over {} pages", provider.page_count());
    let frames = simulate(&mut provider, &args)?;
    let settled = provider.run_until_idle(Duration::from_secs(30));

    print_report(&provider, &frames, settled);

    if let Some(dir) = &args.dump_dir {
        dump_cache(&provider, dir)?;
    }
    Ok(())
}

fn init_logging(args: &Args) -> Result<()> {
    match &args.log_file {
        Some(path) => WriteLogger::init(
            args.log_level,
            Config::default(),
            File::create(path).with_context(|| format!("creating {}", path.display()))?,
        )?,
        None => SimpleLogger::init(args.log_level, Config::default())?,
    }
    Ok(())
}

fn open_source(args: &Args) -> Result<Arc<dyn PageSource>> {
    if let Some(pdf) = open_pdf(args)? {
        return Ok(pdf);
    }

    let doc = SyntheticDocument::uniform(
        args.pages,
        PointSize::new(args.page_width, args.page_height),
    )
    .with_render_delay(Duration::from_millis(args.render_delay_ms));
    Ok(Arc::new(doc))
}

#[cfg(feature = "pdf")]
fn open_pdf(args: &Args) -> Result<Option<Arc<dyn PageSource>>> {
    let Some(path) = &args.pdf else {
        return Ok(None);
    };
    let doc = pagerender::render::MuPdfDocument::open(path)
        .with_context(|| format!("opening {}", path.display()))?;
    Ok(Some(Arc::new(doc)))
}

#[cfg(not(feature = "pdf"))]
fn open_pdf(_args: &Args) -> Result<Option<Arc<dyn PageSource>>> {
    Ok(None)
}

/// Scroll from top to bottom while zooming in and out twice
fn simulate(provider: &mut PageProvider<ViewportHost>, args: &Args) -> Result<FrameStats> {
    let mut stats = FrameStats::default();
    let frame = Duration::from_millis(args.frame_ms);
    let doc_height = provider.host().layout().document_size().height;
    let last_step = args.steps.saturating_sub(1).max(1) as f64;

    for step in 0..args.steps {
        let frame_start = Instant::now();
        let t = step as f64 / last_step;
        let wave = 0.5 - 0.5 * (4.0 * std::f64::consts::PI * t).cos();
        let zoom = args.min_zoom + (args.max_zoom - args.min_zoom) * wave;

        let host = provider.host_mut();
        host.set_zoom(zoom);
        host.scroll_to(t * doc_height);
        let zoom = host.viewport().zoom;
        let visible = host.visible_pages();

        if provider.viewport_changed() {
            debug!("Frame {step}: cancelled render of a page that scrolled away");
        }

        for page in visible {
            match provider.request(ViewportHost::requester_for(page), page, zoom)? {
                ImmediateImage::Exact(_) => stats.exact += 1,
                ImmediateImage::Nearest(_) => stats.approximate += 1,
                ImmediateImage::Nothing => stats.blank += 1,
            }
        }

        loop {
            let elapsed = frame_start.elapsed();
            if elapsed >= frame {
                break;
            }
            provider.wait(frame - elapsed);
        }
        stats.repaints += provider.host_mut().take_dirty().len();
        stats.frames += 1;
    }

    Ok(stats)
}

fn print_report(provider: &PageProvider<ViewportHost>, frames: &FrameStats, settled: bool) {
    let stats = provider.stats();
    let drawn = (frames.exact + frames.approximate + frames.blank).max(1) as f64;

    println!("frames:            {}", frames.frames);
    println!(
        "page draws:        {} exact ({:.1}%), {} approximate, {} blank",
        frames.exact,
        100.0 * frames.exact as f64 / drawn,
        frames.approximate,
        frames.blank
    );
    println!("repaint notices:   {}", frames.repaints);
    println!(
        "cache:             {} images, {:.1} MiB of {:.1} MiB",
        stats.cached_images,
        stats.cache_bytes as f64 / (1024.0 * 1024.0),
        provider.cache().budget() as f64 / (1024.0 * 1024.0)
    );
    println!(
        "cache activity:    {} hits, {} misses, {} inserted, {} evicted, {} rejected",
        stats.cache.hits,
        stats.cache.misses,
        stats.cache.insertions,
        stats.cache.evictions,
        stats.cache.rejections
    );
    println!(
        "scheduler:         {:?}, {} queued{}",
        stats.state,
        stats.queued,
        if settled { "" } else { " (did not settle)" }
    );
}

fn dump_cache(provider: &PageProvider<ViewportHost>, dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;

    let mut written = 0;
    for image in provider.cache().images() {
        let path = dir.join(format!(
            "page-{:04}-scale-{:.3}.png",
            image.page(),
            image.scale().get()
        ));
        image
            .image()
            .save(&path)
            .with_context(|| format!("writing {}", path.display()))?;
        written += 1;
    }

    info!("Wrote {written} page images to {}", dir.display());
    println!("dumped {written} images to {}", dir.display());
    Ok(())
}
