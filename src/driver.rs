use crate::config::TrackerConfig;
use crate::health_monitor::SourceHealth;
use crate::pipeline::{IngestReport, OrientationPipeline, TickOutput};
use crate::source::ByteSource;

/// Host-facing driver: owns the byte source and the pipeline
///
/// The host calls `on_tick` at its own cadence. Each tick drains whatever the
/// source has, processes every complete line, advances calibration and returns
/// the orientations to apply. A startup calibration is queued at construction
/// and starts on the first tick.
pub struct PipelineDriver<S: ByteSource> {
    source: S,
    pipeline: OrientationPipeline,
    health: SourceHealth,
    closed: bool,
}

impl<S: ByteSource> PipelineDriver<S> {
    pub fn new(source: S, config: TrackerConfig) -> Self {
        let health = SourceHealth::new(&source.describe(), config.silence_threshold_secs);
        let mut pipeline = OrientationPipeline::new(config);
        pipeline.request_startup_calibration();
        Self {
            source,
            pipeline,
            health,
            closed: false,
        }
    }

    /// Poll the source once, then run the tick
    pub fn on_tick(&mut self, now: f64) -> TickOutput {
        self.health.observe_tick(now);

        if !self.closed {
            match self.source.read_available() {
                Ok(chunk) if !chunk.is_empty() => {
                    self.health.record_data(now);
                    self.on_bytes(&chunk);
                }
                Ok(_) => {}
                Err(e) => {
                    // Retried on the next tick
                    self.health.record_error();
                    self.pipeline.record_transport_error();
                    log::warn!("Transport error on {}: {}", self.source.describe(), e);
                }
            }
        }

        self.pipeline.on_tick(now)
    }

    /// Feed bytes that arrived outside the polled source
    pub fn on_bytes(&mut self, chunk: &[u8]) -> IngestReport {
        let report = self.pipeline.on_bytes(chunk);
        if !report.rejected.is_empty() {
            log::debug!(
                "{} of {} lines rejected this batch",
                report.rejected.len(),
                report.lines
            );
        }
        report
    }

    pub fn on_calibrate_request(&mut self, delay_secs: f64) {
        self.pipeline.on_calibrate_request(delay_secs);
    }

    /// Release the source. Safe to call more than once; only the first call
    /// reaches the transport. A trailing unterminated line is dropped.
    pub fn on_shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if self.pipeline.buffered_bytes() > 0 {
            log::debug!(
                "Dropping {} buffered bytes of an unterminated line",
                self.pipeline.buffered_bytes()
            );
        }
        self.source.close();
        log::info!("Released {}", self.source.describe());
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn source_exhausted(&self) -> bool {
        self.source.is_exhausted()
    }

    pub fn pipeline(&self) -> &OrientationPipeline {
        &self.pipeline
    }

    pub fn pipeline_mut(&mut self) -> &mut OrientationPipeline {
        &mut self.pipeline
    }

    pub fn health(&self) -> &SourceHealth {
        &self.health
    }

    pub fn source(&self) -> &S {
        &self.source
    }
}

impl<S: ByteSource> Drop for PipelineDriver<S> {
    fn drop(&mut self) {
        self.on_shutdown();
    }
}
