use glam::{Mat4, Vec3, Vec4};
use serde::{Deserialize, Serialize};
use std::ops::Mul;

/// One entry of the GPU-resident threshold table.
#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable, Debug, PartialEq)]
pub struct ColorRangeSetting {
    pub color: [f32; 4],
    pub threshold: f32,
    pub _pad: [f32; 3],
}

/// Uniform block shared by every compute kernel and raster pass.
#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable, Debug)]
pub struct KernelParams {
    pub view_proj: [[f32; 4]; 4],
    pub local_to_world: [[f32; 4]; 4],
    pub screen: [u32; 4], // width, height, row stride (u32 words), offset count
    pub tile: [u32; 4],   // tile width, tile height, tiles x, tiles y
    pub draw: [u32; 4],   // vertex count, entity index, tile count, threshold count
    pub heat: [i32; 4],   // range, step, coverage granularity, unused
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const WHITE: Color = Color::rgb(1.0, 1.0, 1.0);
    pub const BLACK: Color = Color::rgb(0.0, 0.0, 0.0);
    pub const GREEN: Color = Color::rgb(0.0, 1.0, 0.0);
    pub const YELLOW: Color = Color::rgb(1.0, 1.0, 0.0);
    pub const RED: Color = Color::rgb(1.0, 0.0, 0.0);

    pub const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b, a: 1.0 }
    }

    pub fn with_alpha(self, a: f32) -> Self {
        Self { a, ..self }
    }

    pub fn to_array(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }

    pub fn to_rgba8(self) -> [u8; 4] {
        let q = |c: f32| (c.clamp(0.0, 1.0) * 255.0).round() as u8;
        [q(self.r), q(self.g), q(self.b), q(self.a)]
    }
}

impl Mul<f32> for Color {
    type Output = Color;

    fn mul(self, rhs: f32) -> Self::Output {
        Color {
            r: self.r * rhs,
            g: self.g * rhs,
            b: self.b * rhs,
            a: self.a * rhs,
        }
    }
}

/// Axis aligned box stored as center and half extents.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub center: Vec3,
    pub extents: Vec3,
}

impl Aabb {
    pub fn new(center: Vec3, extents: Vec3) -> Self {
        Self {
            center,
            extents: extents.abs(),
        }
    }

    pub fn from_min_max(min: Vec3, max: Vec3) -> Self {
        Self::new((min + max) * 0.5, (max - min) * 0.5)
    }

    /// Bounds of a point set; `None` when the set is empty.
    pub fn from_points(points: &[Vec3]) -> Option<Self> {
        let first = *points.first()?;
        let (min, max) = points
            .iter()
            .fold((first, first), |(lo, hi), p| (lo.min(*p), hi.max(*p)));
        Some(Self::from_min_max(min, max))
    }

    pub fn min(&self) -> Vec3 {
        self.center - self.extents
    }

    pub fn max(&self) -> Vec3 {
        self.center + self.extents
    }

    /// World space bounds of this box after an affine transform.
    pub fn transformed(&self, m: &Mat4) -> Self {
        let center = m.transform_point3(self.center);
        let x = m.x_axis.truncate().abs() * self.extents.x;
        let y = m.y_axis.truncate().abs() * self.extents.y;
        let z = m.z_axis.truncate().abs() * self.extents.z;
        Self {
            center,
            extents: x + y + z,
        }
    }
}

/// Plane in `dot(normal, p) + distance = 0` form. Points with a positive
/// signed distance are on the inner side.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    pub normal: Vec3,
    pub distance: f32,
}

impl Plane {
    pub fn new(normal: Vec3, distance: f32) -> Self {
        Self { normal, distance }
    }

    pub fn from_vec4(v: Vec4) -> Self {
        let normal = v.truncate();
        let len = normal.length();
        if len > f32::EPSILON {
            Self {
                normal: normal / len,
                distance: v.w / len,
            }
        } else {
            // degenerate row, kept unnormalised
            Self {
                normal,
                distance: v.w,
            }
        }
    }

    pub fn signed_distance(&self, p: Vec3) -> f32 {
        self.normal.dot(p) + self.distance
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelSize {
    pub width: u32,
    pub height: u32,
}

impl PixelSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn area(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// Pixel space rectangle, origin at the top left of the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rectangle {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rectangle {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x && x < self.x + self.width && y >= self.y && y < self.y + self.height
    }

    pub fn area(&self) -> u32 {
        self.width * self.height
    }
}

pub(crate) fn mat4_to_cols(m: &Mat4) -> [[f32; 4]; 4] {
    m.to_cols_array_2d()
}

/// FNV-1a 64 bit hash, used for stable content keys.
#[inline]
pub fn fnv1a64(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x00000100000001B3;
    let mut hash = OFFSET;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}
