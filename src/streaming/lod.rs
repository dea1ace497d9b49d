//! LOD selection: per-tick camera state and screen-space metrics
//!
//! `CameraState` is recomputed once per engine tick. The frustum uses the
//! culling projection (field of view widened by the configured ratio) so
//! tiles just outside the view keep streaming; the pixel-size metric always
//! uses the true field of view.

use crate::core::camera::Camera;
use crate::core::types::Vec3;
use crate::math::{Aabb, Frustum};

pub struct CameraState {
    frustum: Option<Frustum>,
    position: Vec3,
    screen_width: f32,
    screen_height: f32,
    // Clip quantities, recomputed only when fov/near/aspect change
    fov_y: f32,
    near: f32,
    aspect: f32,
    inverse_near: f32,
    top_clip: f32,
    right_clip: f32,
}

impl CameraState {
    pub fn new() -> Self {
        Self {
            frustum: None,
            position: Vec3::ZERO,
            screen_width: 1.0,
            screen_height: 1.0,
            fov_y: 0.0,
            near: 0.0,
            aspect: 0.0,
            inverse_near: 0.0,
            top_clip: 0.0,
            right_clip: 0.0,
        }
    }

    /// Capture the camera for this tick.
    pub fn update(&mut self, camera: &Camera, fov_ratio: f32) {
        self.frustum = Some(Frustum::from_view_projection(
            &camera.culling_view_projection(fov_ratio),
        ));
        self.position = camera.position;
        self.screen_width = camera.screen_width;
        self.screen_height = camera.screen_height;

        let changed = self.fov_y != camera.fov_y
            || self.near != camera.near
            || self.aspect != camera.aspect;
        if changed {
            self.fov_y = camera.fov_y;
            self.near = camera.near;
            self.aspect = camera.aspect;
            self.inverse_near = 1.0 / camera.near;
            self.top_clip = camera.near * (0.5 * camera.fov_y).tan();
            self.right_clip = camera.aspect * self.top_clip;
        }
    }

    /// Frustum test against world-space bounds. False until the first
    /// update.
    pub fn visible(&self, bounds: &Aabb) -> bool {
        match &self.frustum {
            Some(frustum) => frustum.intersects_aabb(bounds),
            None => false,
        }
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn distance_to(&self, point: Vec3) -> f32 {
        point.distance(self.position)
    }

    /// World-space size of one pixel at the depth of `point`: the larger of
    /// the horizontal and vertical meters-per-pixel.
    pub fn pixel_size(&self, point: Vec3) -> f32 {
        let distance = self.distance_to(point);
        let tan_half_fov = self.top_clip * self.inverse_near;
        let pixel_height = 2.0 * distance * tan_half_fov / self.screen_height;
        let tan_half_fov = self.right_clip * self.inverse_near;
        let pixel_width = 2.0 * distance * tan_half_fov / self.screen_width;
        pixel_width.max(pixel_height)
    }

    /// Estimated on-screen pixel diameter of a bounding sphere. A camera
    /// sitting on the center projects to infinity (always refines); a
    /// zero-radius sphere never refines.
    pub fn projected_diameter(&self, center: Vec3, radius: f32, diameter_ratio: f32) -> f32 {
        radius / self.pixel_size(center) * diameter_ratio
    }
}

impl Default for CameraState {
    fn default() -> Self {
        Self::new()
    }
}
