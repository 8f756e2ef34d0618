/// Orbit camera for the mesh viewer
///
/// The camera always looks at the origin (meshes are recentred before
/// viewing) from a distance derived from the mesh's bounding radius.

use cgmath::{perspective, Deg, InnerSpace, Matrix4, Point3, Vector3, Vector4};

/// Vertical field of view
const FOV_DEGREES: f32 = 45.0;

/// Keeps the camera off the poles where `look_at` degenerates
const MAX_PITCH: f32 = 1.5;

const MIN_ZOOM: f32 = 0.2;
const MAX_ZOOM: f32 = 20.0;

/// Distance to the target in bounding radii, at zoom 1
const FRAMING: f32 = 2.8;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrbitCamera {
    /// Rotation around the vertical axis, radians
    pub yaw: f32,
    /// Elevation above the horizontal plane, radians
    pub pitch: f32,
    pub zoom: f32,
}

impl Default for OrbitCamera {
    fn default() -> Self {
        Self {
            yaw: 0.6,
            pitch: 0.35,
            zoom: 1.0,
        }
    }
}

impl OrbitCamera {
    /// Rotate by a mouse drag in pixels
    pub fn orbit(&mut self, dx: f32, dy: f32) {
        self.yaw -= dx * 0.01;
        self.pitch = (self.pitch + dy * 0.01).clamp(-MAX_PITCH, MAX_PITCH);
    }

    /// Positive steps move closer
    pub fn zoom_by(&mut self, steps: f32) {
        self.zoom = (self.zoom * 1.1f32.powf(steps)).clamp(MIN_ZOOM, MAX_ZOOM);
    }

    /// Camera position for a mesh of the given bounding radius
    pub fn eye(&self, radius: f32) -> Point3<f32> {
        let distance = radius.max(1e-3) * FRAMING / self.zoom;
        Point3::new(
            distance * self.pitch.cos() * self.yaw.sin(),
            distance * self.pitch.sin(),
            distance * self.pitch.cos() * self.yaw.cos(),
        )
    }

    /// Unit vector from the origin towards the camera
    pub fn view_direction(&self, radius: f32) -> Vector3<f32> {
        let eye = self.eye(radius);
        Vector3::new(eye.x, eye.y, eye.z).normalize()
    }

    pub fn view_projection(&self, radius: f32, aspect: f32) -> Matrix4<f32> {
        let radius = radius.max(1e-3);
        let eye = self.eye(radius);
        let distance = eye.x.hypot(eye.y).hypot(eye.z);

        let view = Matrix4::look_at_rh(eye, Point3::new(0.0, 0.0, 0.0), Vector3::unit_y());
        let projection = perspective(
            Deg(FOV_DEGREES),
            aspect.max(1e-3),
            (distance - radius * 2.0).max(distance * 0.01),
            distance + radius * 2.0,
        );

        projection * view
    }
}

/// Map a world point to screen pixels plus normalized depth
///
/// Returns `None` for points behind the camera.
pub fn project(matrix: &Matrix4<f32>, point: [f32; 3], width: f32, height: f32) -> Option<(f32, f32, f32)> {
    let clip = *matrix * Vector4::new(point[0], point[1], point[2], 1.0);
    if clip.w <= 1e-6 {
        return None;
    }

    let ndc = clip.truncate() / clip.w;
    Some((
        (ndc.x + 1.0) * 0.5 * width,
        (1.0 - ndc.y) * 0.5 * height,
        ndc.z,
    ))
}
