//! Pixel helpers for rendered frames: background flattening, rotation, PNG
//! encoding and parallel export.

use crate::config::RenderConfig;
use crate::document::Rotation;
use crate::engine::RenderedFrame;
use crate::error::{ConversionError, Result};
use image::{imageops, RgbaImage};
use rayon::prelude::*;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, error};

/// Points per inch in PDF user space.
pub const POINTS_PER_INCH: f32 = 72.0;

/// Physical size of a page or frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSize {
    /// Width in PDF points (1/72 inch).
    pub width_points: f32,
    /// Height in PDF points (1/72 inch).
    pub height_points: f32,
}

impl PageSize {
    /// Size of a pixel grid at the given horizontal and vertical DPI.
    pub fn from_pixels(width: u32, height: u32, dpi_x: f32, dpi_y: f32) -> Self {
        Self {
            width_points: width as f32 / dpi_x * POINTS_PER_INCH,
            height_points: height as f32 / dpi_y * POINTS_PER_INCH,
        }
    }

    /// Get width in pixels at a given DPI.
    pub fn width_pixels(&self, dpi: u32) -> u32 {
        ((self.width_points * dpi as f32) / POINTS_PER_INCH).round() as u32
    }

    /// Get height in pixels at a given DPI.
    pub fn height_pixels(&self, dpi: u32) -> u32 {
        ((self.height_points * dpi as f32) / POINTS_PER_INCH).round() as u32
    }
}

/// Blend transparent pixels over a solid background.
pub fn apply_background(mut image: RgbaImage, background: (u8, u8, u8)) -> RgbaImage {
    let (r, g, b) = background;

    for pixel in image.pixels_mut() {
        let alpha = pixel[3] as f32 / 255.0;
        if alpha < 1.0 {
            let inv_alpha = 1.0 - alpha;
            pixel[0] = ((pixel[0] as f32 * alpha) + (r as f32 * inv_alpha)) as u8;
            pixel[1] = ((pixel[1] as f32 * alpha) + (g as f32 * inv_alpha)) as u8;
            pixel[2] = ((pixel[2] as f32 * alpha) + (b as f32 * inv_alpha)) as u8;
            pixel[3] = 255;
        }
    }

    image
}

pub fn rotate(image: RgbaImage, rotation: Rotation) -> RgbaImage {
    match rotation {
        Rotation::None => image,
        Rotation::Cw90 => imageops::rotate90(&image),
        Rotation::Cw180 => imageops::rotate180(&image),
        Rotation::Cw270 => imageops::rotate270(&image),
    }
}

/// Encode an RGBA image as PNG, recording the DPI in a `pHYs` chunk.
pub fn encode_png(image: &RgbaImage, dpi: u32) -> Result<Vec<u8>> {
    let mut buffer = Cursor::new(Vec::new());

    let mut encoder = png::Encoder::new(&mut buffer, image.width(), image.height());
    encoder.set_color(png::ColorType::Rgba);
    encoder.set_depth(png::BitDepth::Eight);
    encoder.set_compression(png::Compression::Fast);
    let pixels_per_meter = (dpi as f64 / 0.0254).round() as u32;
    encoder.set_pixel_dims(Some(png::PixelDimensions {
        xppu: pixels_per_meter,
        yppu: pixels_per_meter,
        unit: png::Unit::Meter,
    }));

    let mut writer = encoder
        .write_header()
        .map_err(|e| ConversionError::ImageError(format!("Failed to write PNG header: {}", e)))?;

    writer
        .write_image_data(image.as_raw())
        .map_err(|e| ConversionError::ImageError(format!("Failed to write PNG data: {}", e)))?;

    drop(writer);

    Ok(buffer.into_inner())
}

/// A frame written to disk.
#[derive(Debug, Clone)]
pub struct SavedFrame {
    /// Page number (1-indexed).
    pub page_number: usize,
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
}

/// Flatten and encode frames in parallel, writing `<prefix>-NNN.png` files.
pub fn save_frames(
    frames: Vec<RenderedFrame>,
    output_dir: &Path,
    prefix: &str,
    config: &RenderConfig,
) -> Result<Vec<SavedFrame>> {
    let start = Instant::now();
    std::fs::create_dir_all(output_dir).map_err(|e| ConversionError::io(output_dir, e))?;

    let thread_pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.render_threads)
        .build()
        .map_err(|e| {
            ConversionError::InvalidConfig(format!("Failed to create thread pool: {}", e))
        })?;

    let count = frames.len();
    let results: Vec<Result<SavedFrame>> = thread_pool.install(|| {
        frames
            .into_par_iter()
            .map(|frame| {
                let image = if config.use_alpha {
                    frame.image
                } else {
                    apply_background(frame.image, config.background_color)
                };
                let data = encode_png(&image, frame.dpi)?;
                let page_number = frame.index + 1;
                let path = output_dir.join(format!("{}-{:03}.png", prefix, page_number));
                std::fs::write(&path, data).map_err(|e| ConversionError::io(&path, e))?;
                Ok(SavedFrame {
                    page_number,
                    path,
                    width: image.width(),
                    height: image.height(),
                })
            })
            .collect()
    });

    let mut saved = Vec::with_capacity(count);
    for result in results {
        match result {
            Ok(frame) => saved.push(frame),
            Err(e) => {
                error!("Failed to save frame: {:?}", e);
                return Err(e);
            }
        }
    }
    saved.sort_by_key(|f| f.page_number);

    debug!("Saved {} frames in {:?}", count, start.elapsed());
    Ok(saved)
}
