use crate::utils::{Aabb, Plane};
use rayon::prelude::*;

/// Parallel AABB-vs-frustum visibility job.
///
/// Inputs are shared read-only and each worker writes only its own output
/// slot, so the job needs no synchronisation beyond the final join.
pub struct FrustumCuller {
    planes: [Plane; 6],
}

impl FrustumCuller {
    pub fn new(planes: [Plane; 6]) -> Self {
        Self { planes }
    }

    pub fn planes(&self) -> &[Plane; 6] {
        &self.planes
    }

    pub fn is_visible(&self, bounds: &Aabb) -> bool {
        is_visible(bounds, &self.planes)
    }

    /// Runs the job and blocks until every flag is written.
    pub fn run(&self, bounds: &[Aabb]) -> Vec<bool> {
        bounds
            .par_iter()
            .map(|b| is_visible(b, &self.planes))
            .collect()
    }

    /// Same job, flags packed as `u32` for upload next to other GPU inputs.
    pub fn run_packed(&self, bounds: &[Aabb]) -> Vec<u32> {
        bounds
            .par_iter()
            .map(|b| is_visible(b, &self.planes) as u32)
            .collect()
    }
}

/// A box is outside when its positive extreme corner lies behind any plane.
pub fn is_visible(bounds: &Aabb, planes: &[Plane]) -> bool {
    planes.iter().all(|plane| {
        let corner = bounds.center + bounds.extents * plane.normal.signum();
        plane.signed_distance(corner) >= 0.0
    })
}
