use glam::{Mat4, Vec3};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Camera {
    pub eye: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    pub fov_y_radians: f32,
    pub near: f32,
    pub far: f32,
    pub aspect: f32,
}

impl Camera {
    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.eye, self.target, self.up)
    }

    pub fn proj(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov_y_radians, self.aspect, self.near, self.far)
    }

    pub fn view_proj(&self) -> Mat4 {
        self.proj() * self.view()
    }

    pub fn position(&self) -> Vec3 {
        self.eye
    }

    pub fn set_aspect(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.aspect = width as f32 / height as f32;
        }
    }

    /// Rotates the eye around the target; pitch is clamped short of the poles.
    pub fn orbit(&mut self, yaw: f32, pitch: f32) {
        let offset = self.eye - self.target;
        let radius = offset.length();
        if radius <= f32::EPSILON {
            return;
        }
        let current_pitch = (offset.y / radius).clamp(-1.0, 1.0).asin();
        let current_yaw = offset.z.atan2(offset.x);
        let limit = 85f32.to_radians();
        let new_pitch = (current_pitch + pitch).clamp(-limit, limit);
        let new_yaw = current_yaw + yaw;
        self.eye = self.target
            + radius
                * Vec3::new(
                    new_pitch.cos() * new_yaw.cos(),
                    new_pitch.sin(),
                    new_pitch.cos() * new_yaw.sin(),
                );
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            eye: Vec3::new(0.0, 6.0, 18.0),
            target: Vec3::ZERO,
            up: Vec3::Y,
            fov_y_radians: 60f32.to_radians(),
            near: 0.1,
            far: 100.0,
            aspect: 16.0 / 9.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_proj_is_reasonable() {
        let cam = Camera::default();
        let vp = cam.view_proj();
        let inv = vp.inverse();
        assert!((vp * inv).abs_diff_eq(Mat4::IDENTITY, 1e-4));
    }

    #[test]
    fn orbit_keeps_distance() {
        let mut cam = Camera::default();
        let before = cam.eye.distance(cam.target);
        cam.orbit(0.7, 0.2);
        assert!((cam.eye.distance(cam.target) - before).abs() < 1e-4);
        cam.orbit(0.0, 10.0);
        assert!(cam.eye.y < before);
    }
}
