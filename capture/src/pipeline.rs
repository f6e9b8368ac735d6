use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thermocam_common::frame::FramePublisher;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::render::ThermalRenderer;
use crate::sensor::ThermalSensor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// A frame was published with this sequence number.
    Published(u64),
    /// The sensor had no reading this cycle; nothing was published.
    SensorFailed,
    /// The reading could not be rendered; nothing was published.
    RenderFailed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub cycles: u64,
    pub published: u64,
    pub sensor_failures: u64,
    pub render_failures: u64,
}

/// Reads the thermal sensor on a fixed cadence and publishes a rendered JPEG
/// for every successful reading.
pub struct ThermalPipeline<S> {
    sensor: S,
    renderer: ThermalRenderer,
    publisher: FramePublisher,
    interval: Duration,
    stats: PipelineStats,
}

impl<S: ThermalSensor> ThermalPipeline<S> {
    pub fn new(
        sensor: S,
        renderer: ThermalRenderer,
        publisher: FramePublisher,
        interval: Duration,
    ) -> Self {
        Self {
            sensor,
            renderer,
            publisher,
            interval,
            stats: PipelineStats::default(),
        }
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    /// Read, render and publish once. Failures skip the publish and leave the
    /// previous frame in place.
    pub fn run_cycle(&mut self) -> CycleOutcome {
        self.stats.cycles += 1;

        let grid = match self.sensor.read_grid() {
            Ok(g) => g,
            Err(e) => {
                self.stats.sensor_failures += 1;
                debug!(sensor = self.sensor.name(), error = %e, "sensor read failed, skipping cycle");
                return CycleOutcome::SensorFailed;
            }
        };

        let jpeg = match self.renderer.encode(&grid) {
            Ok(j) => j,
            Err(e) => {
                self.stats.render_failures += 1;
                warn!(error = %e, "failed to render thermal frame, skipping cycle");
                return CycleOutcome::RenderFailed;
            }
        };

        let bytes = jpeg.len();
        let seq = self.publisher.publish(jpeg);
        self.stats.published += 1;
        debug!(seq, bytes, "published thermal frame");
        CycleOutcome::Published(seq)
    }

    /// Run cycles until `stop` is cancelled. The token is checked once per
    /// cycle, so shutdown takes at most one cycle plus one sensor read.
    pub fn run(mut self, stop: &CancellationToken) -> PipelineStats {
        info!(
            sensor = self.sensor.name(),
            interval_ms = self.interval.as_millis() as u64,
            "thermal capture started"
        );

        while !stop.is_cancelled() {
            let started = Instant::now();
            self.run_cycle();
            let remaining = self.interval.saturating_sub(started.elapsed());
            if !remaining.is_zero() {
                std::thread::sleep(remaining);
            }
        }

        info!(
            cycles = self.stats.cycles,
            published = self.stats.published,
            sensor_failures = self.stats.sensor_failures,
            render_failures = self.stats.render_failures,
            "thermal capture stopped"
        );
        self.stats
    }
}

impl<S: ThermalSensor + 'static> ThermalPipeline<S> {
    /// Move the pipeline, and with it the sensor, onto a dedicated thread.
    pub fn spawn(self, stop: CancellationToken) -> std::io::Result<CaptureHandle> {
        let token = stop.clone();
        let thread = std::thread::Builder::new()
            .name("thermal-capture".into())
            .spawn(move || self.run(&token))?;
        Ok(CaptureHandle { stop, thread })
    }
}

/// Owner's side of a running capture thread.
pub struct CaptureHandle {
    stop: CancellationToken,
    thread: JoinHandle<PipelineStats>,
}

impl CaptureHandle {
    /// Ask the thread to stop and block until it has exited.
    ///
    /// Returns `None` if the capture thread panicked.
    pub fn stop_and_join(self) -> Option<PipelineStats> {
        self.stop.cancel();
        match self.thread.join() {
            Ok(stats) => Some(stats),
            Err(_) => {
                warn!("thermal capture thread panicked");
                None
            }
        }
    }
}
