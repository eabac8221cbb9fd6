//! dwelld - zone dwell-time watcher
//!
//! This daemon:
//! 1. Pulls frames from the configured video source
//! 2. Runs the detector on the newest frame
//! 3. Tracks how long the target class occupies the zone
//! 4. Raises one alert per occupancy episode once dwell exceeds the threshold
//! 5. Stops cleanly on Ctrl-C or end of stream

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use dwell_watch::ingest::VideoSource;
use dwell_watch::{DwellConfig, Pipeline, ShutdownSignal};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Config file (TOML or JSON).
    #[arg(long, env = "DWELL_CONFIG")]
    config: Option<PathBuf>,
    /// Video source: stub://name, http(s)://..., rtsp://... or an image directory.
    #[arg(long)]
    source: Option<String>,
    /// Capture resolution the zone is scaled to.
    #[arg(long, num_args = 2, value_names = ["WIDTH", "HEIGHT"])]
    webcam_resolution: Option<Vec<u32>>,
    /// Seconds of continuous occupancy before an alert fires.
    #[arg(long)]
    threshold_secs: Option<f64>,
    /// Detector class id to track.
    #[arg(long)]
    target_class: Option<u32>,
    /// Pull frames on the processing thread instead of a background thread.
    #[arg(long)]
    inline: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut cfg = DwellConfig::load_with_path(args.config.as_deref())?;
    apply_args(&mut cfg, &args);
    cfg.validate().context("invalid command line overrides")?;

    let zone = cfg.zone_polygon();
    log::info!(
        "dwelld starting: source={} resolution={}x{} class={} ({}) threshold={:.1}s",
        cfg.source.url,
        cfg.source.width,
        cfg.source.height,
        cfg.target.class_id,
        cfg.target.label,
        cfg.alert.threshold_secs
    );
    log::info!(
        "zone (pixels): {:?} anchor={:?}",
        zone.vertices()
            .iter()
            .map(|p| (p.x as i64, p.y as i64))
            .collect::<Vec<_>>(),
        cfg.zone.anchor
    );

    let shutdown = ShutdownSignal::new();
    let handler_signal = shutdown.clone();
    ctrlc::set_handler(move || {
        log::info!("shutdown requested");
        handler_signal.trigger();
    })
    .expect("error setting Ctrl-C handler");

    let source = VideoSource::new(cfg.source_config())?;
    let pipeline = Pipeline::from_config(&cfg)?;
    let report = pipeline.run(Box::new(source), &shutdown)?;

    if report.dispatch.failed > 0 {
        log::warn!("{} alert(s) could not be delivered", report.dispatch.failed);
    }
    log::info!(
        "dwelld exiting: {} episode(s), {} alert(s)",
        report.episodes_completed,
        report.alerts_fired
    );
    Ok(())
}

fn apply_args(cfg: &mut DwellConfig, args: &Args) {
    if let Some(source) = &args.source {
        cfg.source.url = source.clone();
    }
    if let Some([width, height]) = args.webcam_resolution.as_deref().and_then(|v| v.get(..2)) {
        cfg.source.width = *width;
        cfg.source.height = *height;
    }
    if let Some(threshold) = args.threshold_secs {
        cfg.alert.threshold_secs = threshold;
    }
    if let Some(class_id) = args.target_class {
        cfg.target.class_id = class_id;
    }
    if args.inline {
        cfg.source.threaded = false;
    }
}
