use thermocam_capture::camera::CameraIngest;
use thermocam_capture::pipeline::CaptureHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Owns the capture sources and tears them down in order: stop streams,
/// stop and join the thermal thread, then stop the camera.
pub struct LifecycleCoordinator {
    shutdown: CancellationToken,
    thermal: Option<CaptureHandle>,
    camera: Option<CameraIngest>,
}

impl LifecycleCoordinator {
    pub fn new(
        shutdown: CancellationToken,
        thermal: Option<CaptureHandle>,
        camera: Option<CameraIngest>,
    ) -> Self {
        Self {
            shutdown,
            thermal,
            camera,
        }
    }

    pub async fn shutdown(self) {
        info!("shutting down");
        self.shutdown.cancel();

        if let Some(thermal) = self.thermal {
            match tokio::task::spawn_blocking(move || thermal.stop_and_join()).await {
                Ok(Some(stats)) => info!(published = stats.published, "thermal capture joined"),
                Ok(None) => warn!("thermal capture exited abnormally"),
                Err(e) => warn!(error = %e, "failed to join thermal capture"),
            }
        }

        if let Some(camera) = self.camera {
            camera.stop().await;
        }
        info!("shutdown complete");
    }
}

/// Resolve on Ctrl-C, SIGTERM, or when `shutdown` is cancelled elsewhere,
/// and cancel `shutdown` in every case.
pub async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl-C"),
        _ = terminate => info!("received SIGTERM"),
        _ = shutdown.cancelled() => {}
    }
    shutdown.cancel();
}
