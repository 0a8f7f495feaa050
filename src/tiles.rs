use crate::utils::{PixelSize, Rectangle};
use glam::{Mat4, Vec3, Vec4};
use serde::{Deserialize, Serialize};

/// Screen partition into fixed size tiles, origin at the top left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileGrid {
    pub screen: PixelSize,
    pub tile_width: u32,
    pub tile_height: u32,
    pub num_x: u32,
    pub num_y: u32,
}

impl TileGrid {
    pub fn new(screen: PixelSize, tile_width: u32, tile_height: u32) -> Self {
        let tile_width = tile_width.max(1);
        let tile_height = tile_height.max(1);
        Self {
            screen,
            tile_width,
            tile_height,
            num_x: screen.width.div_ceil(tile_width),
            num_y: screen.height.div_ceil(tile_height),
        }
    }

    pub fn tile_count(&self) -> u32 {
        self.num_x * self.num_y
    }

    pub fn tile_area(&self) -> u32 {
        self.tile_width * self.tile_height
    }

    pub fn index(&self, x: u32, y: u32) -> u32 {
        y * self.num_x + x
    }

    pub fn coords(&self, index: u32) -> (u32, u32) {
        (index % self.num_x.max(1), index / self.num_x.max(1))
    }

    pub fn tile_of_pixel(&self, px: u32, py: u32) -> u32 {
        self.index(px / self.tile_width, py / self.tile_height)
    }

    /// Pixel rectangle of a tile, clipped to the screen.
    pub fn tile_rect(&self, index: u32) -> Rectangle {
        let (tx, ty) = self.coords(index);
        let x = tx * self.tile_width;
        let y = ty * self.tile_height;
        Rectangle::new(
            x,
            y,
            self.tile_width.min(self.screen.width.saturating_sub(x)),
            self.tile_height.min(self.screen.height.saturating_sub(y)),
        )
    }
}

/// Projects an object space position to a pixel, `None` when behind the
/// camera or off screen.
pub fn project_to_pixel(mvp: &Mat4, position: Vec3, screen: PixelSize) -> Option<(u32, u32)> {
    let clip = *mvp * Vec4::from((position, 1.0));
    clip_to_pixel(clip, screen)
}

pub fn clip_to_pixel(clip: Vec4, screen: PixelSize) -> Option<(u32, u32)> {
    if clip.w <= 0.0 {
        return None;
    }
    let (sx, sy) = clip_to_screen(clip, screen);
    if sx < 0.0 || sy < 0.0 {
        return None;
    }
    let (px, py) = (sx.floor() as u32, sy.floor() as u32);
    (px < screen.width && py < screen.height).then_some((px, py))
}

/// Continuous screen coordinates of a clip space position.
pub fn clip_to_screen(clip: Vec4, screen: PixelSize) -> (f32, f32) {
    let ndc_x = clip.x / clip.w;
    let ndc_y = clip.y / clip.w;
    (
        (ndc_x * 0.5 + 0.5) * screen.width as f32,
        (0.5 - ndc_y * 0.5) * screen.height as f32,
    )
}
