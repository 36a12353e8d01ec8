//! Directional-light shadow frustum fitting
//!
//! The shadow map covers exactly the part of the world the main camera can
//! see: every frame the camera frustum corners are unprojected to world
//! space and an orthographic light frustum is fitted around them.

use glam::{Mat4, Vec3, Vec4};

use super::{Camera, DirectionalLight, Projection};

/// Light-space extents below this count as a collapsed fit.
const MIN_EXTENT: f32 = 1e-4;

/// Fits the directional light camera to the view frustum and keeps the
/// last valid fit around for degenerate frames.
pub struct ShadowFitter {
    light_camera: Camera,
}

impl Default for ShadowFitter {
    fn default() -> Self {
        // Placeholder fit from the default light position; replaced by the
        // first successful fit.
        Self {
            light_camera: Camera {
                position: Vec3::new(0.0, 500.0, 10.0),
                target: Vec3::ZERO,
                up: Vec3::Y,
                projection: Projection::Orthographic {
                    left: -100.0,
                    right: 100.0,
                    bottom: -100.0,
                    top: 100.0,
                    near: 0.1,
                    far: 1000.0,
                },
            },
        }
    }
}

impl ShadowFitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// The camera produced by the most recent successful [`fit`](Self::fit).
    pub fn light_camera(&self) -> &Camera {
        &self.light_camera
    }

    /// Fit the light frustum to `camera`'s view frustum.
    ///
    /// Returns the updated light camera. If the fit collapses (zero extent
    /// or non-finite corners) the previous frame's camera is returned
    /// unchanged.
    pub fn fit(&mut self, camera: &Camera, light: &DirectionalLight) -> &Camera {
        // Frustum corners in NDC; depth range is 0..1.
        let ndc_corners = [
            Vec4::new(-1.0, -1.0, 0.0, 1.0),
            Vec4::new(1.0, -1.0, 0.0, 1.0),
            Vec4::new(-1.0, 1.0, 0.0, 1.0),
            Vec4::new(1.0, 1.0, 0.0, 1.0),
            Vec4::new(-1.0, -1.0, 1.0, 1.0),
            Vec4::new(1.0, -1.0, 1.0, 1.0),
            Vec4::new(-1.0, 1.0, 1.0, 1.0),
            Vec4::new(1.0, 1.0, 1.0, 1.0),
        ];

        let inv_view_proj = camera.view_projection_matrix().inverse();

        let mut world_corners = [Vec3::ZERO; 8];
        for (world, ndc) in world_corners.iter_mut().zip(&ndc_corners) {
            let unprojected = inv_view_proj * *ndc;
            *world = unprojected.truncate() / unprojected.w;
        }

        let centroid = world_corners.iter().sum::<Vec3>() / 8.0;

        // Back away from the centroid against the light direction by the
        // camera far clip so the whole frustum sits in front of the light.
        let eye = centroid - camera.projection.far() * light.direction();
        let light_view = Mat4::look_at_rh(eye, centroid, Vec3::Y);

        // Fold min/max from the corner values themselves; the first corner
        // seeds the fold so the bounds touch the outermost corners exactly.
        let first = light_view.transform_point3(world_corners[0]);
        let mut min = first;
        let mut max = first;
        for corner in &world_corners[1..] {
            let p = light_view.transform_point3(*corner);
            min = min.min(p);
            max = max.max(p);
        }

        let extent = max - min;
        if !(extent.x > MIN_EXTENT && extent.y > MIN_EXTENT && extent.z > MIN_EXTENT) {
            return &self.light_camera;
        }

        self.light_camera = Camera {
            position: eye,
            target: centroid,
            up: Vec3::Y,
            projection: Projection::Orthographic {
                left: min.x,
                right: max.x,
                bottom: min.y,
                top: max.y,
                near: max.z,
                far: -min.z,
            },
        };
        &self.light_camera
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ortho_params(camera: &Camera) -> (f32, f32, f32, f32, f32, f32) {
        match camera.projection {
            Projection::Orthographic {
                left,
                right,
                bottom,
                top,
                near,
                far,
            } => (left, right, bottom, top, near, far),
            Projection::Perspective { .. } => panic!("light camera must be orthographic"),
        }
    }

    fn unprojected_corners(camera: &Camera) -> [Vec3; 8] {
        let inv = camera.view_projection_matrix().inverse();
        let mut corners = [Vec3::ZERO; 8];
        let mut i = 0;
        for z in [0.0, 1.0] {
            for y in [-1.0, 1.0] {
                for x in [-1.0, 1.0] {
                    let p = inv * Vec4::new(x, y, z, 1.0);
                    corners[i] = p.truncate() / p.w;
                    i += 1;
                }
            }
        }
        corners
    }

    #[test]
    fn test_fit_bounds_touch_outermost_corner() {
        let camera = Camera::default();
        let light = DirectionalLight::default();
        let mut fitter = ShadowFitter::new();

        let fitted = fitter.fit(&camera, &light).clone();
        let (left, right, bottom, top, ..) = ortho_params(&fitted);

        let light_view = fitted.view_matrix();
        let mut max_x = f32::NEG_INFINITY;
        let mut min_x = f32::INFINITY;
        for corner in unprojected_corners(&camera) {
            let p = light_view.transform_point3(corner);
            max_x = max_x.max(p.x);
            min_x = min_x.min(p.x);
        }

        // The fold starts from a corner value, so the bound is exact.
        assert_eq!(right, max_x);
        assert_eq!(left, min_x);
        assert!(bottom < top);
    }

    #[test]
    fn test_all_corners_inside_fitted_frustum() {
        let mut camera = Camera::default();
        camera.set_aspect(1920, 1080);
        camera.position = Vec3::new(15.0, 4.0, -20.0);
        camera.target = Vec3::new(0.0, 1.0, 0.0);
        let light = DirectionalLight::default();
        let mut fitter = ShadowFitter::new();

        let fitted = fitter.fit(&camera, &light).clone();
        let (left, right, bottom, top, near, far) = ortho_params(&fitted);
        let light_view = fitted.view_matrix();

        for corner in unprojected_corners(&camera) {
            let p = light_view.transform_point3(corner);
            assert!(p.x >= left - 1e-2 && p.x <= right + 1e-2);
            assert!(p.y >= bottom - 1e-2 && p.y <= top + 1e-2);
            // The depth range [near, far] corresponds to -z in [near, far].
            assert!(-p.z >= near - 1e-2 && -p.z <= far + 1e-2);
        }
    }

    #[test]
    fn test_light_eye_backs_off_by_far_clip() {
        let camera = Camera::default();
        let light = DirectionalLight::default();
        let mut fitter = ShadowFitter::new();

        let fitted = fitter.fit(&camera, &light);
        let to_target = fitted.target - fitted.position;
        assert!((to_target.length() - camera.projection.far()).abs() < 1e-2);
        assert!((to_target.normalize() - light.direction()).length() < 1e-5);
    }

    #[test]
    fn test_degenerate_frustum_keeps_previous_fit() {
        let camera = Camera::default();
        let light = DirectionalLight::default();
        let mut fitter = ShadowFitter::new();

        let good = fitter.fit(&camera, &light).clone();

        // A zero-extent projection cannot be unprojected; the fitter must
        // hold on to the last good fit instead of producing NaNs.
        let mut collapsed = Camera::default();
        collapsed.projection = Projection::Orthographic {
            left: 0.0,
            right: 0.0,
            bottom: 0.0,
            top: 0.0,
            near: 0.0,
            far: 0.0,
        };
        let kept = fitter.fit(&collapsed, &light);

        assert_eq!(kept.view_matrix(), good.view_matrix());
        assert_eq!(
            kept.projection_matrix(),
            good.projection_matrix()
        );
    }
}
