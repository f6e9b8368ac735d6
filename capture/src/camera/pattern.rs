use image::{Rgb, RgbImage};
use thermocam_common::config::CameraConfig;
use thermocam_common::frame::FramePublisher;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::render::encode_jpeg;

const BAR_WIDTH: u32 = 32;
/// Pixels the bar advances per frame.
const BAR_SPEED: u32 = 8;

/// Stand-in for a camera: a diagonal gradient with a sweeping white bar.
pub async fn run_test_pattern(
    config: &CameraConfig,
    publisher: &mut FramePublisher,
    stop: &CancellationToken,
) {
    let (width, height, quality) = (config.width.max(1), config.height.max(1), config.jpeg_quality);
    let mut ticker = tokio::time::interval(config.interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut frame_no: u64 = 0;
    let mut size_hint = 0;

    info!(width, height, fps = config.fps, "camera test pattern started");
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let n = frame_no;
        frame_no += 1;
        let encoded = tokio::task::spawn_blocking(move || {
            encode_jpeg(&draw_pattern(width, height, n), quality, size_hint)
        })
        .await;

        match encoded {
            Ok(Ok(jpeg)) => {
                size_hint = jpeg.len();
                let seq = publisher.publish(jpeg);
                debug!(seq, bytes = size_hint, "published test pattern frame");
            }
            Ok(Err(e)) => warn!(error = %e, "failed to encode test pattern frame"),
            Err(e) => warn!(error = %e, "test pattern encode task failed"),
        }
    }
    info!(frames = frame_no, "camera test pattern stopped");
}

pub fn draw_pattern(width: u32, height: u32, frame_no: u64) -> RgbImage {
    let travel = u64::from(width + BAR_WIDTH);
    let bar_x = ((frame_no * u64::from(BAR_SPEED)) % travel) as u32;
    RgbImage::from_fn(width, height, |x, y| {
        if x + BAR_WIDTH >= bar_x && x < bar_x {
            return Rgb([255, 255, 255]);
        }
        let r = (x * 255 / width.max(1)) as u8;
        let g = (y * 255 / height.max(1)) as u8;
        Rgb([r, g, 128])
    })
}
