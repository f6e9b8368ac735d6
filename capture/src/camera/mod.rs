//! Camera ingest: adapters that push finished JPEG frames from the primary
//! camera into its frame buffer.

pub mod mjpeg;
pub mod pattern;

use thermocam_common::config::{CameraConfig, CameraMode};
use thermocam_common::frame::FramePublisher;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// A running camera source publishing into the camera buffer.
pub struct CameraIngest {
    mode: CameraMode,
    stop: CancellationToken,
    task: JoinHandle<()>,
}

impl CameraIngest {
    /// Start the source selected by `config.mode`. A disabled camera still
    /// holds its publisher until stopped, so `/stream.mjpg` stays open
    /// without frames instead of closing at once.
    pub fn start(config: &CameraConfig, mut publisher: FramePublisher, stop: CancellationToken) -> Self {
        let task_stop = stop.clone();
        let task = match config.mode {
            CameraMode::Mjpeg => {
                let url = config.url.clone();
                tokio::spawn(async move {
                    mjpeg::run_mjpeg_ingest(&url, &mut publisher, &task_stop).await;
                })
            }
            CameraMode::TestPattern => {
                let config = config.clone();
                tokio::spawn(async move {
                    pattern::run_test_pattern(&config, &mut publisher, &task_stop).await;
                })
            }
            CameraMode::Disabled => {
                info!("camera disabled, /stream.mjpg will carry no frames");
                tokio::spawn(async move {
                    task_stop.cancelled().await;
                    drop(publisher);
                })
            }
        };
        Self {
            mode: config.mode,
            stop,
            task,
        }
    }

    pub fn mode(&self) -> CameraMode {
        self.mode
    }

    /// Stop the source and wait for its task to finish.
    pub async fn stop(self) {
        self.stop.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "camera ingest task failed");
        }
        info!(mode = ?self.mode, "camera ingest stopped");
    }
}
