mod lifecycle;
mod routes;
mod stream;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lifecycle::LifecycleCoordinator;
use routes::AppState;
use stream::StallSettings;
use thermocam_capture::camera::CameraIngest;
use thermocam_capture::pipeline::{CaptureHandle, ThermalPipeline};
use thermocam_capture::render::ThermalRenderer;
use thermocam_capture::sensor::amg8833::{self, Amg8833};
use thermocam_capture::sensor::simulated::SimulatedSensor;
use thermocam_capture::sensor::{SensorError, ThermalSensor};
use thermocam_common::config::{Config, SensorKind, ThermalConfig};
use thermocam_common::frame::{frame_channel, FramePublisher};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("failed to open thermal sensor: {0}")]
    Sensor(#[from] SensorError),
    #[error("failed to spawn capture thread: {0}")]
    Spawn(std::io::Error),
    #[error("failed to bind {0}: {1}")]
    Bind(String, std::io::Error),
}

fn start_thermal(
    config: &ThermalConfig,
    publisher: FramePublisher,
) -> Result<CaptureHandle, StartupError> {
    let sensor: Box<dyn ThermalSensor> = match config.sensor {
        SensorKind::Amg8833 => Box::new(Amg8833::open(Path::new(&config.i2c_bus), config.address)?),
        SensorKind::Simulated => Box::new(SimulatedSensor::new(amg8833::ROWS, amg8833::COLS)),
    };
    let renderer = ThermalRenderer::from_config(amg8833::ROWS, amg8833::COLS, config);
    ThermalPipeline::new(sensor, renderer, publisher, config.interval())
        .spawn(CancellationToken::new())
        .map_err(StartupError::Spawn)
}

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    info!(
        port = config.server.port,
        camera_mode = ?config.camera.mode,
        sensor = ?config.thermal.sensor,
        thermal_fps = config.thermal.fps,
        stall_timeout = ?config.server.stall_timeout(),
        "starting thermocam"
    );

    let addr = format!("{}:{}", config.server.bind, config.server.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(error = %StartupError::Bind(addr, e), "cannot serve");
            std::process::exit(1);
        }
    };

    let (thermal_pub, thermal_buf) = frame_channel();
    let (camera_pub, camera_buf) = frame_channel();

    let thermal = match start_thermal(&config.thermal, thermal_pub) {
        Ok(h) => h,
        Err(e) => {
            error!(error = %e, "thermal capture failed to start");
            std::process::exit(1);
        }
    };
    let camera = CameraIngest::start(&config.camera, camera_pub, CancellationToken::new());

    let shutdown = CancellationToken::new();
    let coordinator = LifecycleCoordinator::new(shutdown.clone(), Some(thermal), Some(camera));
    tokio::spawn(lifecycle::shutdown_signal(shutdown.clone()));

    let state = Arc::new(AppState {
        camera: camera_buf,
        thermal: thermal_buf,
        stall: StallSettings::from(&config.server),
        shutdown: shutdown.clone(),
    });
    let app = routes::router(state).into_make_service_with_connect_info::<SocketAddr>();

    info!(addr, "stream server listening");
    let graceful = shutdown.clone();
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(async move { graceful.cancelled().await })
        .await
    {
        error!(error = %e, "server loop failed");
    }

    coordinator.shutdown().await;
}
