use crate::config::HeatMapSettings;
use crate::report::BucketImage;
use crate::threshold::ThresholdTable;
use crate::tiles::TileGrid;
use image::{Rgba, RgbaImage};

const OVERLAY_ALPHA: f32 = 0.5;
const GRID_COLOR: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// Renders a bucket image with the table colors; empty pixels stay clear.
pub fn bucket_image_to_rgba(image: &BucketImage, table: &ThresholdTable) -> RgbaImage {
    RgbaImage::from_fn(image.width, image.height, |x, y| match image.bucket_at(x, y) {
        Some(bucket) => Rgba(table.color(bucket).to_rgba8()),
        None => Rgba([0, 0, 0, 0]),
    })
}

/// Blends the classification over a captured frame and optionally draws
/// the tile grid, mirroring what the post effect shows on screen. With a
/// heat map ramp the blend weight grows with the bucket.
pub fn compose_overlay(
    frame: &RgbaImage,
    image: Option<&BucketImage>,
    table: &ThresholdTable,
    grid: Option<&TileGrid>,
    ramp: Option<&HeatMapSettings>,
) -> RgbaImage {
    let mut out = frame.clone();
    if let Some(image) = image {
        for (x, y, px) in out.enumerate_pixels_mut() {
            if x >= image.width || y >= image.height {
                continue;
            }
            let Some(bucket) = image.bucket_at(x, y) else {
                continue;
            };
            let color = table.color(bucket);
            let weight = ramp
                .map(|r| ramp_value(bucket, table.len(), r.ramp_min, r.ramp_max))
                .unwrap_or(OVERLAY_ALPHA);
            let a = weight * color.a;
            let over = color.to_rgba8();
            for c in 0..3 {
                px.0[c] = (px.0[c] as f32 * (1.0 - a) + over[c] as f32 * a).round() as u8;
            }
        }
    }
    if let Some(grid) = grid {
        draw_grid(&mut out, grid);
    }
    out
}

pub fn draw_grid(img: &mut RgbaImage, grid: &TileGrid) {
    let (w, h) = img.dimensions();
    for tx in 0..=grid.num_x {
        let x = tx * grid.tile_width;
        if x < w {
            for y in 0..h {
                img.put_pixel(x, y, GRID_COLOR);
            }
        }
    }
    for ty in 0..=grid.num_y {
        let y = ty * grid.tile_height;
        if y < h {
            for x in 0..w {
                img.put_pixel(x, y, GRID_COLOR);
            }
        }
    }
}

/// Heat map ramp: maps a bucket onto `[ramp_min, ramp_max]`.
pub fn ramp_value(bucket: usize, bucket_count: usize, ramp_min: f32, ramp_max: f32) -> f32 {
    let t = if bucket_count > 1 {
        bucket as f32 / (bucket_count - 1) as f32
    } else {
        0.0
    };
    ramp_min + (ramp_max - ramp_min) * t
}
