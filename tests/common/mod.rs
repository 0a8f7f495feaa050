#![allow(dead_code)]

use glam::{Mat4, Vec3};
use vertex_profiler::utils::PixelSize;
use vertex_profiler::{MeshData, ProfilerCamera};

/// Depth of every test mesh; maps to 0.1 in the 0..1 depth range.
pub const Z: f32 = -1.0;

/// Orthographic camera where world x/y equal pixel coordinates, origin top
/// left, looking down -z.
pub fn pixel_camera(width: u32, height: u32) -> ProfilerCamera {
    ProfilerCamera::new(
        Mat4::IDENTITY,
        Mat4::orthographic_rh(0.0, width as f32, height as f32, 0.0, 0.0, 10.0),
        PixelSize::new(width, height),
    )
}

/// Axis aligned quad over the pixel rectangle `[x0, x1) x [y0, y1)`.
pub fn quad(name: &str, x0: f32, y0: f32, x1: f32, y1: f32, z: f32) -> MeshData {
    MeshData::new(
        name,
        vec![
            Vec3::new(x0, y0, z),
            Vec3::new(x1, y0, z),
            Vec3::new(x1, y1, z),
            Vec3::new(x0, y1, z),
        ],
        Some(vec![0, 1, 2, 0, 2, 3]),
    )
}

/// `n` points inside a `size` square at `(x0, y0)`, one per pixel center,
/// rows of ten.
pub fn cluster(name: &str, n: u32, x0: f32, y0: f32) -> MeshData {
    let positions = (0..n)
        .map(|i| Vec3::new(x0 + (i % 10) as f32 + 0.5, y0 + (i / 10) as f32 + 0.5, Z))
        .collect();
    MeshData::new(name, positions, None)
}
