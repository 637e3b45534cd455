use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use crossbeam::channel::{unbounded, Receiver, Sender};
use std::fs::File;
use std::io::{BufRead, BufWriter, Read};
use std::path::PathBuf;
use std::time::Instant;
use tokio::time::{interval, Duration, MissedTickBehavior};

use orientation_tracker_rs::dashboard::{self, SnapshotSink};
use orientation_tracker_rs::live_status::LiveStatus;
use orientation_tracker_rs::rerun_logger::RerunLogger;
use orientation_tracker_rs::source::{CaptureSource, ChannelSource, SerialSource, DEFAULT_BAUD_RATE};
use orientation_tracker_rs::{
    ByteSource, CalibrationEvent, JsonLinesSink, OrientationSink, PipelineDriver, TrackerConfig,
};

#[derive(Parser, Debug)]
#[command(name = "orientation_tracker")]
#[command(about = "Multi-sensor orientation tracker - Kalman smoothing with zero-reference calibration", long_about = None)]
struct Args {
    /// Duration in seconds (0 = continuous)
    #[arg(value_name = "SECONDS", default_value = "0")]
    duration: u64,

    /// Serial port carrying the sensor stream (e.g. COM3, /dev/ttyUSB0)
    #[arg(long, conflicts_with = "stdin")]
    port: Option<String>,

    /// Serial baud rate
    #[arg(long, default_value_t = DEFAULT_BAUD_RATE)]
    baud: u32,

    /// Read the stream from stdin instead of a serial port (disables keyboard commands)
    #[arg(long)]
    stdin: bool,

    /// JSON config file; missing keys use defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override filter process noise (Q)
    #[arg(long)]
    process_noise: Option<f64>,

    /// Override filter measurement noise (R)
    #[arg(long)]
    measurement_noise: Option<f64>,

    /// Override the startup calibration delay in seconds
    #[arg(long)]
    calibration_delay: Option<f64>,

    /// Output directory
    #[arg(long, default_value = "orientation_sessions")]
    output_dir: String,

    /// Serve the live dashboard on this port
    #[arg(long)]
    dashboard_port: Option<u16>,

    /// Record a Rerun .rrd file of every stage
    #[arg(long)]
    rerun: bool,

    /// Tee the raw byte stream to a capture file for later replay
    #[arg(long)]
    capture: bool,

    /// Write corrected orientations as JSON lines
    #[arg(long)]
    jsonl: bool,
}

/// Commands typed at the console while running
#[derive(Debug, Clone, Copy, PartialEq)]
enum Command {
    Recalibrate { delay_secs: f64 },
    Quit,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = match args.config.as_ref() {
        Some(path) => TrackerConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => TrackerConfig::default(),
    };
    if let Some(q) = args.process_noise {
        config.process_noise = q;
    }
    if let Some(r) = args.measurement_noise {
        config.measurement_noise = r;
    }
    if let Some(delay) = args.calibration_delay {
        config.startup_calibration_delay_secs = delay;
    }
    config.validate()?;

    println!("[{}] Orientation Tracker RS Starting", ts_now());
    println!("  Duration: {} seconds (0=continuous)", args.duration);
    println!("  Channels: {}", config.channel_count);
    println!("  Filter: Q={} R={}", config.process_noise, config.measurement_noise);
    println!("  Startup calibration: {:.1}s", config.startup_calibration_delay_secs);
    println!("  Output Dir: {}", args.output_dir);

    std::fs::create_dir_all(&args.output_dir)?;
    let session = ts_now_clean();

    // ── Source ──
    let (cmd_tx, cmd_rx) = unbounded::<Command>();
    let mut source: Box<dyn ByteSource> = if args.stdin {
        let (tx, rx) = unbounded::<Vec<u8>>();
        std::thread::spawn(move || stdin_bytes_loop(tx));
        Box::new(ChannelSource::new(rx))
    } else {
        let port = args
            .port
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("Provide --port or --stdin"))?;
        let serial = SerialSource::open(port, args.baud)
            .with_context(|| format!("Failed to open serial port {} at {} baud", port, args.baud))?;
        println!("[{}] Opened {} at {} baud", ts_now(), port, args.baud);
        let manual_delay = config.manual_calibration_delay_secs;
        let startup_delay = config.startup_calibration_delay_secs;
        std::thread::spawn(move || keyboard_loop(cmd_tx, manual_delay, startup_delay));
        println!("  Keys: c+Enter recalibrate now, r+Enter recalibrate after {:.1}s, q+Enter quit", startup_delay);
        Box::new(serial)
    };
    if args.capture {
        let path = PathBuf::from(format!("{}/capture_{}.txt", args.output_dir, session));
        source = Box::new(
            CaptureSource::create(source, &path)
                .with_context(|| format!("Failed to create capture {}", path.display()))?,
        );
    }

    // ── Sinks ──
    let mut sinks: Vec<Box<dyn OrientationSink>> = Vec::new();
    if args.jsonl {
        let path = format!("{}/orientations_{}.jsonl", args.output_dir, session);
        let file = File::create(&path).with_context(|| format!("Failed to create {}", path))?;
        sinks.push(Box::new(JsonLinesSink::new(BufWriter::new(file))));
    }
    if let Some(port) = args.dashboard_port {
        let shared = dashboard::shared_snapshot(config.channel_count);
        sinks.push(Box::new(SnapshotSink::new(shared.clone())));
        tokio::spawn(async move {
            if let Err(e) = dashboard::start_dashboard(shared, port).await {
                log::error!("[DASHBOARD] {:#}", e);
            }
        });
    }
    let mut rerun = if args.rerun {
        let path = format!("{}/rerun_{}.rrd", args.output_dir, session);
        match RerunLogger::new(&path) {
            Ok(r) => Some(r),
            Err(e) => {
                log::warn!("Rerun disabled: {}", e);
                None
            }
        }
    } else {
        None
    };

    // ── Tick loop ──
    let mut ticker = interval(Duration::from_millis(config.tick_interval_ms.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let status_path = format!("{}/live_status.json", args.output_dir);
    let mut live_status = LiveStatus::new(&source.describe());
    let mut driver = PipelineDriver::new(source, config);
    let start = Instant::now();
    let mut last_status_update = 0.0;

    println!("[{}] Waiting for startup calibration...", ts_now());

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = &mut ctrl_c => {
                println!("[{}] Ctrl-C received, stopping...", ts_now());
                break;
            }
        }
        let now = start.elapsed().as_secs_f64();

        if args.duration > 0 && now >= args.duration as f64 {
            println!("[{}] Duration reached, stopping...", ts_now());
            break;
        }

        if drain_commands(&cmd_rx, &mut driver) {
            println!("[{}] Quit requested, stopping...", ts_now());
            break;
        }

        let output = driver.on_tick(now);
        for event in &output.calibration {
            match event {
                CalibrationEvent::Started { deadline, restarted } => println!(
                    "[{}] Calibration {}: hold still for {:.1}s",
                    ts_now(),
                    if *restarted { "restarted" } else { "started" },
                    (deadline - now).max(0.0)
                ),
                CalibrationEvent::Completed { offsets, .. } => println!(
                    "[{}] Calibration complete ({} channels zeroed)",
                    ts_now(),
                    offsets.len()
                ),
            }
        }

        for sink in sinks.iter_mut() {
            if let Err(e) = sink.apply(&output) {
                log::warn!("Sink error: {:#}", e);
            }
        }
        if let Some(r) = rerun.as_mut() {
            if let Err(e) = r.log_tick(&output, &driver.pipeline().channel_snapshots()) {
                log::warn!("Rerun logging failed: {:#}", e);
            }
        }

        // Update live status every 2 seconds
        if now - last_status_update >= 2.0 {
            live_status.update(driver.pipeline(), &driver.health().check_health(now), now);
            let _ = live_status.save(&status_path);
            log::debug!("{}", driver.health().format_status(now));
            last_status_update = now;
        }

        if driver.source_exhausted() {
            println!("[{}] Input stream ended, stopping...", ts_now());
            break;
        }
    }

    driver.on_shutdown();
    for sink in sinks.iter_mut() {
        if let Err(e) = sink.flush() {
            log::warn!("Sink flush failed: {:#}", e);
        }
    }

    // Final live status update
    let uptime = start.elapsed().as_secs_f64();
    live_status.update(driver.pipeline(), &driver.health().check_health(uptime), uptime);
    let _ = live_status.save(&format!("{}/live_status_final.json", args.output_dir));

    let stats = driver.pipeline().stats();
    println!("\n=== Final Stats ===");
    println!("Uptime: {:.1} s", uptime);
    println!("Bytes: {}  Lines: {}", stats.bytes, stats.lines);
    println!(
        "Records: {} accepted, {} malformed, {} out of range",
        stats.records_accepted, stats.malformed, stats.out_of_range
    );
    println!("Transport errors: {}", stats.transport_errors);
    println!("Calibrations: {}", driver.pipeline().calibration().completions());
    println!("Orientations emitted: {}", stats.emissions);

    Ok(())
}

/// Apply queued console commands. Returns true when a quit was requested.
fn drain_commands<S: ByteSource>(rx: &Receiver<Command>, driver: &mut PipelineDriver<S>) -> bool {
    while let Ok(cmd) = rx.try_recv() {
        match cmd {
            Command::Recalibrate { delay_secs } => driver.on_calibrate_request(delay_secs),
            Command::Quit => return true,
        }
    }
    false
}

fn parse_command(line: &str, manual_delay: f64, startup_delay: f64) -> Option<Command> {
    match line.trim().to_ascii_lowercase().as_str() {
        "c" => Some(Command::Recalibrate { delay_secs: manual_delay }),
        "r" => Some(Command::Recalibrate { delay_secs: startup_delay }),
        "q" => Some(Command::Quit),
        _ => None,
    }
}

fn keyboard_loop(tx: Sender<Command>, manual_delay: f64, startup_delay: f64) {
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        match parse_command(&line, manual_delay, startup_delay) {
            Some(cmd) => {
                if tx.send(cmd).is_err() {
                    break;
                }
            }
            None => log::info!("Unknown command {:?} (c, r or q)", line.trim()),
        }
    }
}

fn stdin_bytes_loop(tx: Sender<Vec<u8>>) {
    let mut stdin = std::io::stdin().lock();
    let mut buf = [0u8; 4096];
    loop {
        match stdin.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if tx.send(buf[..n].to_vec()).is_err() {
                    break;
                }
            }
            Err(e) => {
                log::warn!("stdin read failed: {}", e);
                break;
            }
        }
    }
}

fn ts_now() -> String {
    Utc::now().format("%H:%M:%S").to_string()
}

fn ts_now_clean() -> String {
    Utc::now().format("%Y%m%d_%H%M%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command() {
        assert_eq!(
            parse_command(" c \n", 0.0, 5.0),
            Some(Command::Recalibrate { delay_secs: 0.0 })
        );
        assert_eq!(
            parse_command("R", 0.0, 5.0),
            Some(Command::Recalibrate { delay_secs: 5.0 })
        );
        assert_eq!(parse_command("q", 0.0, 5.0), Some(Command::Quit));
        assert_eq!(parse_command("x", 0.0, 5.0), None);
    }
}
