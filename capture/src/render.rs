use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use thermocam_common::config::{ThermalConfig, MAX_PIXEL_SCALE, MAX_UPSCALE};

use crate::colormap::Colormap;
use crate::interpolate::Upsampler;
use crate::sensor::ThermalGrid;

const COLORBAR_GAP: u32 = 12;
const COLORBAR_WIDTH: u32 = 24;
const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("grid is {got_rows}x{got_cols}, renderer expects {rows}x{cols}")]
    Shape {
        got_rows: usize,
        got_cols: usize,
        rows: usize,
        cols: usize,
    },
    #[error("JPEG encode failed: {0}")]
    Encode(#[from] image::ImageError),
}

/// Turns sensor grids into JPEG frames: bicubic upsample, colour mapping,
/// nearest-neighbour enlargement and an optional colour legend.
///
/// The interpolation buffers and the raster are reused across frames.
pub struct ThermalRenderer {
    rows: usize,
    cols: usize,
    upsampler: Upsampler,
    colormap: Colormap,
    pixel_scale: u32,
    quality: u8,
    raster: RgbImage,
    last_jpeg_len: usize,
}

impl ThermalRenderer {
    pub fn new(
        rows: usize,
        cols: usize,
        upscale: usize,
        pixel_scale: u32,
        colormap: Colormap,
        colorbar: bool,
        quality: u8,
    ) -> Self {
        let upsampler = Upsampler::new(rows, cols, upscale.clamp(1, MAX_UPSCALE));
        let pixel_scale = pixel_scale.clamp(1, MAX_PIXEL_SCALE);
        let heat_w = upsampler.out_cols() as u32 * pixel_scale;
        let heat_h = upsampler.out_rows() as u32 * pixel_scale;
        let width = if colorbar {
            heat_w + COLORBAR_GAP + COLORBAR_WIDTH
        } else {
            heat_w
        };
        let mut raster = RgbImage::from_pixel(width, heat_h, BACKGROUND);
        if colorbar {
            draw_colorbar(&mut raster, &colormap, heat_w + COLORBAR_GAP);
        }
        Self {
            rows,
            cols,
            upsampler,
            colormap,
            pixel_scale,
            quality,
            raster,
            last_jpeg_len: 0,
        }
    }

    pub fn from_config(rows: usize, cols: usize, config: &ThermalConfig) -> Self {
        Self::new(
            rows,
            cols,
            config.upscale,
            config.pixel_scale,
            Colormap::red_blue(config.min_temp, config.max_temp),
            config.colorbar,
            config.jpeg_quality,
        )
    }

    /// Width of the heat map portion of the raster, excluding the legend.
    pub fn heatmap_width(&self) -> u32 {
        self.upsampler.out_cols() as u32 * self.pixel_scale
    }

    pub fn colormap(&self) -> &Colormap {
        &self.colormap
    }

    /// Draw `grid` into the internal raster and return it.
    pub fn render(&mut self, grid: &ThermalGrid) -> Result<&RgbImage, RenderError> {
        let shape_error = RenderError::Shape {
            got_rows: grid.rows(),
            got_cols: grid.cols(),
            rows: self.rows,
            cols: self.cols,
        };
        let out_cols = self.upsampler.out_cols();
        let values = self.upsampler.upsample(grid).ok_or(shape_error)?;

        let scale = self.pixel_scale;
        for (i, &temp) in values.iter().enumerate() {
            let color = self.colormap.map(temp);
            let (cy, cx) = ((i / out_cols) as u32, (i % out_cols) as u32);
            for y in cy * scale..(cy + 1) * scale {
                for x in cx * scale..(cx + 1) * scale {
                    self.raster.put_pixel(x, y, color);
                }
            }
        }
        Ok(&self.raster)
    }

    /// Render and JPEG-encode one grid.
    pub fn encode(&mut self, grid: &ThermalGrid) -> Result<Bytes, RenderError> {
        self.render(grid)?;
        let jpeg = encode_jpeg(&self.raster, self.quality, self.last_jpeg_len)?;
        self.last_jpeg_len = jpeg.len();
        Ok(jpeg)
    }
}

/// JPEG-encode an RGB raster.
pub fn encode_jpeg(img: &RgbImage, quality: u8, size_hint: usize) -> Result<Bytes, image::ImageError> {
    let mut buf = Vec::with_capacity(size_hint.max(16 * 1024));
    JpegEncoder::new_with_quality(&mut buf, quality).encode_image(img)?;
    Ok(Bytes::from(buf))
}

/// Vertical legend: hottest colour at the top, coldest at the bottom.
fn draw_colorbar(raster: &mut RgbImage, colormap: &Colormap, x0: u32) {
    let height = raster.height();
    for y in 0..height {
        let fraction = if height > 1 {
            1.0 - y as f32 / (height - 1) as f32
        } else {
            1.0
        };
        let color = colormap.at_fraction(fraction);
        for x in x0..x0 + COLORBAR_WIDTH {
            raster.put_pixel(x, y, color);
        }
    }
}
