// Camera pose used to drive sorting

use glam::{Mat3, Mat4, Vec3};

/// Camera position and forward direction, in the space the splat centers live in
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraPose {
    pub position: Vec3,
    pub direction: Vec3,
}

impl CameraPose {
    pub fn new(position: Vec3, direction: Vec3) -> Self {
        Self {
            position,
            direction,
        }
    }

    /// Extract the pose from a camera world transform (forward is -Z)
    pub fn from_world_transform(world: &Mat4) -> Self {
        let position = world.w_axis.truncate();
        let direction = (-world.z_axis.truncate()).normalize_or_zero();
        Self {
            position,
            direction,
        }
    }

    /// Re-express this pose in the local space of an entity with the given inverse world transform.
    /// The direction maps through the transpose of the forward linear part, so local
    /// `dot(c - position, direction)` orders splats the same as world depth under any scale.
    pub fn to_local(&self, inverse_world: &Mat4) -> Self {
        let forward_transposed = Mat3::from_mat4(*inverse_world).inverse().transpose();
        Self {
            position: inverse_world.transform_point3(self.position),
            direction: (forward_transposed * self.direction).normalize_or_zero(),
        }
    }

    /// True when any of the six scalar components differs by more than `epsilon`
    pub fn differs_from(&self, other: &CameraPose, epsilon: f32) -> bool {
        let a = [self.position.to_array(), self.direction.to_array()];
        let b = [other.position.to_array(), other.direction.to_array()];
        a.iter()
            .flatten()
            .zip(b.iter().flatten())
            .any(|(x, y)| {
                let d = (x - y).abs();
                d > epsilon || d.is_nan()
            })
    }
}
