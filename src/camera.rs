use crate::utils::{PixelSize, Plane};
use glam::{Mat4, Vec3};

#[derive(Debug, Clone, Copy)]
pub struct ProfilerCamera {
    pub view: Mat4,
    pub projection: Mat4,
    pub pixel_size: PixelSize,
}

impl ProfilerCamera {
    pub fn new(view: Mat4, projection: Mat4, pixel_size: PixelSize) -> Self {
        Self {
            view,
            projection,
            pixel_size,
        }
    }

    /// Right handed perspective camera with a 0..1 depth range.
    pub fn perspective(
        eye: Vec3,
        target: Vec3,
        fov_y_radians: f32,
        near: f32,
        far: f32,
        pixel_size: PixelSize,
    ) -> Self {
        let aspect = pixel_size.width.max(1) as f32 / pixel_size.height.max(1) as f32;
        Self {
            view: Mat4::look_at_rh(eye, target, Vec3::Y),
            projection: Mat4::perspective_rh(fov_y_radians, aspect, near, far),
            pixel_size,
        }
    }

    pub fn view_proj(&self) -> Mat4 {
        self.projection * self.view
    }

    /// Left, right, bottom, top, near, far planes with inward normals.
    pub fn frustum_planes(&self) -> [Plane; 6] {
        frustum_planes(&self.view_proj())
    }
}

/// Extracts the six clip planes of a view-projection matrix.
pub fn frustum_planes(view_proj: &Mat4) -> [Plane; 6] {
    let r0 = view_proj.row(0);
    let r1 = view_proj.row(1);
    let r2 = view_proj.row(2);
    let r3 = view_proj.row(3);
    [
        Plane::from_vec4(r3 + r0),
        Plane::from_vec4(r3 - r0),
        Plane::from_vec4(r3 + r1),
        Plane::from_vec4(r3 - r1),
        // depth range is 0..1 so the near plane is the bare z row
        Plane::from_vec4(r2),
        Plane::from_vec4(r3 - r2),
    ]
}
