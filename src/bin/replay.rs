use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use clap::Parser;
use flate2::read::GzDecoder;
use orientation_tracker_rs::source::ReaderSource;
use orientation_tracker_rs::{ByteSource, CalibrationEvent, CalibrationState, PipelineDriver, TrackerConfig};
use serde_json::json;

#[derive(Parser, Debug)]
struct Args {
    /// Path to a raw capture_*.txt[.gz]
    #[arg(long, conflicts_with = "capture_dir")]
    capture: Option<PathBuf>,

    /// Directory of captures to batch replay (processes capture_*.txt[.gz])
    #[arg(long)]
    capture_dir: Option<PathBuf>,

    /// JSON config file; missing keys use defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Process noise (Q) override
    #[arg(long)]
    process_noise: Option<f64>,

    /// Measurement noise (R) override
    #[arg(long)]
    measurement_noise: Option<f64>,

    /// Bytes delivered per simulated tick (9600 baud is ~16 bytes per 16ms tick)
    #[arg(long, default_value = "16")]
    bytes_per_tick: usize,

    /// Simulated tick period in seconds
    #[arg(long, default_value = "0.016")]
    tick_secs: f64,

    /// Extra recalibration at this simulated time, like a key press
    #[arg(long)]
    recalibrate_at: Option<f64>,
}

fn open_capture(path: &Path) -> anyhow::Result<Box<dyn Read>> {
    let file = File::open(path)?;
    if path.extension().map(|e| e == "gz").unwrap_or(false) {
        Ok(Box::new(GzDecoder::new(file)))
    } else {
        Ok(Box::new(file))
    }
}

fn load_config(args: &Args) -> anyhow::Result<TrackerConfig> {
    let mut config = match args.config.as_ref() {
        Some(path) => TrackerConfig::load(path)?,
        None => TrackerConfig::default(),
    };
    if let Some(q) = args.process_noise {
        config.process_noise = q;
    }
    if let Some(r) = args.measurement_noise {
        config.measurement_noise = r;
    }
    config.validate()?;
    Ok(config)
}

/// Simulated time must advance or a pending calibration never fires
fn check_tick_secs(tick_secs: f64) -> anyhow::Result<()> {
    if !(tick_secs.is_finite() && tick_secs > 0.0) {
        anyhow::bail!("--tick-secs must be a finite positive number, got {}", tick_secs);
    }
    Ok(())
}

fn calibration_settled<S: ByteSource>(driver: &PipelineDriver<S>) -> bool {
    let calibration = driver.pipeline().calibration();
    !calibration.has_pending_request() && !matches!(calibration.state(), CalibrationState::Waiting { .. })
}

fn run_once(path: &Path, args: &Args, config: &TrackerConfig) -> anyhow::Result<serde_json::Value> {
    let label = path.display().to_string();
    let source = ReaderSource::new(open_capture(path)?, args.bytes_per_tick.max(1), &label);
    let mut driver = PipelineDriver::new(source, config.clone());

    let mut tick = 0u64;
    let mut calibrated_at: Option<f64> = None;
    let mut recalibrated = false;
    let mut max_norm_error = 0.0_f64;
    let mut per_channel = vec![0u64; config.channel_count];

    loop {
        let now = tick as f64 * args.tick_secs;
        if let Some(at) = args.recalibrate_at {
            if !recalibrated && now >= at {
                driver.on_calibrate_request(config.manual_calibration_delay_secs);
                recalibrated = true;
            }
        }

        let output = driver.on_tick(now);
        for event in &output.calibration {
            if let CalibrationEvent::Completed { at, .. } = event {
                calibrated_at.get_or_insert(*at);
            }
        }
        for o in &output.orientations {
            max_norm_error = max_norm_error.max((o.orientation.norm() - 1.0).abs());
            if let Some(count) = per_channel.get_mut(o.channel) {
                *count += 1;
            }
        }

        tick += 1;
        // Keep ticking past EOF so a pending calibration can still fire
        if driver.source_exhausted() && calibration_settled(&driver) {
            break;
        }
    }
    driver.on_shutdown();

    let stats = driver.pipeline().stats();
    let final_orientations: Vec<_> = driver
        .pipeline()
        .channel_snapshots()
        .into_iter()
        .map(|s| s.corrected)
        .collect();

    Ok(json!({
        "capture": label,
        "process_noise": config.process_noise,
        "measurement_noise": config.measurement_noise,
        "simulated_secs": tick as f64 * args.tick_secs,
        "ticks": stats.ticks,
        "bytes": stats.bytes,
        "lines": stats.lines,
        "records_accepted": stats.records_accepted,
        "malformed": stats.malformed,
        "out_of_range": stats.out_of_range,
        "blank_lines": stats.blank_lines,
        "buffer_overflows": stats.buffer_overflows,
        "calibrated_at": calibrated_at,
        "calibrations": driver.pipeline().calibration().completions(),
        "emissions": stats.emissions,
        "emissions_per_channel": per_channel,
        "degenerate_corrections": stats.degenerate_corrections,
        "max_norm_error": max_norm_error,
        "final_orientations": final_orientations,
    }))
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    check_tick_secs(args.tick_secs)?;
    let config = load_config(&args)?;
    let mut results = Vec::new();

    if let Some(dir) = args.capture_dir.as_ref() {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            if !(name.starts_with("capture_") && (name.ends_with(".txt") || name.ends_with(".txt.gz"))) {
                continue;
            }
            match run_once(&path, &args, &config) {
                Ok(res) => results.push(res),
                Err(e) => eprintln!("Failed {}: {}", path.display(), e),
            }
        }
    } else if let Some(capture) = args.capture.as_ref() {
        results.push(run_once(capture, &args, &config)?);
    } else {
        anyhow::bail!("Provide --capture or --capture-dir");
    }

    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_secs_must_advance_time() {
        assert!(check_tick_secs(0.016).is_ok());
        assert!(check_tick_secs(0.0).is_err());
        assert!(check_tick_secs(-0.016).is_err());
        assert!(check_tick_secs(f64::NAN).is_err());
        assert!(check_tick_secs(f64::INFINITY).is_err());
    }
}
