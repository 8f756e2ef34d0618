use iced::mouse::{self, Cursor};
use iced::widget::canvas::{self, Cache, Frame, Path, Program};
use iced::{Color, Point, Rectangle, Renderer, Size, Theme};
use std::path::PathBuf;

use super::camera::{project, OrbitCamera};
use crate::error::MeshError;
use crate::mesh::Mesh;

/// Shade used when the mesh carries no vertex colours
const DEFAULT_COLOR: [f32; 3] = [0.75, 0.75, 0.75];
const AMBIENT: f32 = 0.3;
/// Triangles painted per frame while the camera is dragged
const DRAG_FACE_BUDGET: usize = 20_000;
const BACKGROUND: Color = Color {
    r: 0.12,
    g: 0.12,
    b: 0.14,
    a: 1.0,
};

/// Interactive view of a mesh loaded from disk
///
/// Holds its own copy of the mesh, recentred on its area-weighted
/// centroid. Drag to orbit, scroll to zoom.
pub struct MeshViewer {
    mesh: Mesh,
    radius: f32,
    cache: Cache,
}

impl MeshViewer {
    pub fn new(mut mesh: Mesh) -> Self {
        let centroid = mesh.centroid();
        mesh.apply_translation(centroid.map(|v| -v));
        let radius = mesh.bounding_radius();

        Self {
            mesh,
            radius,
            cache: Cache::new(),
        }
    }

    pub fn mesh(&self) -> &Mesh {
        &self.mesh
    }
}

/// Read an OBJ file off the UI thread
///
/// Errors come back as display text for the status line.
pub async fn load_mesh(path: PathBuf) -> Result<Mesh, String> {
    let loaded = tokio::task::spawn_blocking(move || {
        let mesh = Mesh::load_obj(&path)?;
        tracing::info!(
            "Viewing {} ({} vertices, {} faces)",
            path.display(),
            mesh.vertices.len(),
            mesh.faces.len()
        );
        Ok::<_, MeshError>(mesh)
    })
    .await;

    match loaded {
        Ok(result) => result.map_err(|e| e.to_string()),
        Err(e) => Err(e.to_string()),
    }
}

/// A triangle ready for the painter
#[derive(Debug, Clone, PartialEq)]
pub struct ScreenTriangle {
    pub points: [Point; 3],
    pub depth: f32,
    pub color: Color,
}

/// Paint every n-th face while dragging so large meshes stay interactive
///
/// The full mesh is painted again once the drag ends.
pub fn face_stride(face_count: usize, dragging: bool) -> usize {
    if dragging {
        face_count.div_ceil(DRAG_FACE_BUDGET).max(1)
    } else {
        1
    }
}

/// Project, light and sort every `stride`-th face, farthest triangle first
///
/// Lambert shading with the light at the camera; both faces of a triangle
/// are lit since the extracted winding is not guaranteed.
pub fn shade_triangles(
    mesh: &Mesh,
    radius: f32,
    camera: &OrbitCamera,
    size: Size,
    stride: usize,
) -> Vec<ScreenTriangle> {
    let matrix = camera.view_projection(radius, size.width / size.height.max(1.0));
    let light = camera.view_direction(radius);

    let mut triangles: Vec<ScreenTriangle> = mesh
        .faces
        .iter()
        .step_by(stride.max(1))
        .filter_map(|face| {
            let corners = mesh.triangle(face)?;
            let mut points = [Point::ORIGIN; 3];
            let mut depth = 0.0;
            for (point, corner) in points.iter_mut().zip(corners) {
                let (x, y, z) = project(&matrix, corner, size.width, size.height)?;
                *point = Point::new(x, y);
                depth += z / 3.0;
            }

            let normal = face_normal(corners);
            let lambert = (normal[0] * light.x + normal[1] * light.y + normal[2] * light.z).abs();
            let intensity = AMBIENT + (1.0 - AMBIENT) * lambert;

            let base = face_color(mesh, face);
            Some(ScreenTriangle {
                points,
                depth,
                color: Color::from_rgb(base[0] * intensity, base[1] * intensity, base[2] * intensity),
            })
        })
        .collect();

    triangles.sort_by(|a, b| b.depth.total_cmp(&a.depth));
    triangles
}

fn face_normal([a, b, c]: [[f32; 3]; 3]) -> [f32; 3] {
    let ab = [b[0] - a[0], b[1] - a[1], b[2] - a[2]];
    let ac = [c[0] - a[0], c[1] - a[1], c[2] - a[2]];
    let n = [
        ab[1] * ac[2] - ab[2] * ac[1],
        ab[2] * ac[0] - ab[0] * ac[2],
        ab[0] * ac[1] - ab[1] * ac[0],
    ];
    let len = (n[0] * n[0] + n[1] * n[1] + n[2] * n[2]).sqrt();
    if len <= f32::EPSILON {
        return [0.0; 3];
    }
    n.map(|v| v / len)
}

/// Mean of the corner colours
fn face_color(mesh: &Mesh, face: &[u32; 3]) -> [f32; 3] {
    let Some(colors) = mesh.colors.as_ref() else {
        return DEFAULT_COLOR;
    };

    let mut sum = [0.0; 3];
    for &index in face {
        let c = colors.get(index as usize).unwrap_or(&DEFAULT_COLOR);
        for channel in 0..3 {
            sum[channel] += c[channel] / 3.0;
        }
    }
    sum.map(|v| v.clamp(0.0, 1.0))
}

impl<Message> Program<Message> for MeshViewer {
    type State = ViewState;

    fn draw(
        &self,
        state: &Self::State,
        renderer: &Renderer,
        _theme: &Theme,
        bounds: Rectangle,
        _cursor: Cursor,
    ) -> Vec<canvas::Geometry> {
        let geometry = self.cache.draw(renderer, bounds.size(), |frame: &mut Frame| {
            frame.fill_rectangle(Point::ORIGIN, frame.size(), BACKGROUND);

            let stride = face_stride(self.mesh.faces.len(), state.last_position.is_some());
            for triangle in shade_triangles(&self.mesh, self.radius, &state.camera, frame.size(), stride) {
                let [a, b, c] = triangle.points;
                let path = Path::new(|builder| {
                    builder.move_to(a);
                    builder.line_to(b);
                    builder.line_to(c);
                    builder.close();
                });
                frame.fill(&path, triangle.color);
            }
        });

        vec![geometry]
    }

    fn update(
        &self,
        state: &mut Self::State,
        event: canvas::Event,
        bounds: Rectangle,
        cursor: Cursor,
    ) -> (canvas::event::Status, Option<Message>) {
        match event {
            canvas::Event::Mouse(mouse::Event::WheelScrolled { delta }) => {
                if cursor.is_over(bounds) {
                    let steps = match delta {
                        mouse::ScrollDelta::Lines { y, .. } => y,
                        mouse::ScrollDelta::Pixels { y, .. } => y / 40.0,
                    };
                    state.camera.zoom_by(steps);
                    self.cache.clear();
                    return (canvas::event::Status::Captured, None);
                }
            }

            canvas::Event::Mouse(mouse::Event::ButtonPressed(mouse::Button::Left)) => {
                if let Some(position) = cursor.position_in(bounds) {
                    state.last_position = Some(position);
                    return (canvas::event::Status::Captured, None);
                }
            }

            canvas::Event::Mouse(mouse::Event::ButtonReleased(mouse::Button::Left)) => {
                if state.last_position.take().is_some() {
                    // Repaint at full detail
                    self.cache.clear();
                    return (canvas::event::Status::Captured, None);
                }
            }

            canvas::Event::Mouse(mouse::Event::CursorMoved { position }) => {
                if let Some(last) = state.last_position {
                    state.camera.orbit(position.x - bounds.x - last.x, position.y - bounds.y - last.y);
                    state.last_position = Some(Point::new(position.x - bounds.x, position.y - bounds.y));
                    self.cache.clear();
                    return (canvas::event::Status::Captured, None);
                }
            }

            _ => {}
        }

        (canvas::event::Status::Ignored, None)
    }

    fn mouse_interaction(&self, state: &Self::State, bounds: Rectangle, cursor: Cursor) -> mouse::Interaction {
        if state.last_position.is_some() {
            mouse::Interaction::Grabbing
        } else if cursor.is_over(bounds) {
            mouse::Interaction::Grab
        } else {
            mouse::Interaction::default()
        }
    }
}

/// Camera and drag state, owned by the canvas widget
#[derive(Debug, Clone, Default)]
pub struct ViewState {
    pub camera: OrbitCamera,
    pub last_position: Option<Point>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offset_triangle() -> Mesh {
        Mesh::new(
            vec![[10.0, 10.0, 10.0], [11.0, 10.0, 10.0], [10.0, 11.0, 10.0]],
            vec![[0, 1, 2]],
            Some(vec![[1.0, 0.0, 0.0]; 3]),
        )
    }

    #[test]
    fn test_viewer_recentres_its_copy() {
        let viewer = MeshViewer::new(offset_triangle());
        assert!(viewer.mesh().centroid().iter().all(|v| v.abs() < 1e-5));
    }

    #[test]
    fn test_triangles_land_on_screen() {
        let viewer = MeshViewer::new(offset_triangle());
        let size = Size::new(800.0, 600.0);

        let triangles = shade_triangles(viewer.mesh(), viewer.radius, &OrbitCamera::default(), size, 1);

        assert_eq!(triangles.len(), 1);
        for point in triangles[0].points {
            assert!((0.0..=800.0).contains(&point.x));
            assert!((0.0..=600.0).contains(&point.y));
        }
        // Red vertex colour stays red under any lighting
        assert!(triangles[0].color.r > 0.0);
        assert_eq!(triangles[0].color.g, 0.0);
    }

    #[test]
    fn test_far_triangles_are_painted_first() {
        let mesh = Mesh::new(
            vec![
                [-1.0, -1.0, -1.0],
                [1.0, -1.0, -1.0],
                [0.0, 1.0, -1.0],
                [-1.0, -1.0, 1.0],
                [1.0, -1.0, 1.0],
                [0.0, 1.0, 1.0],
            ],
            vec![[3, 4, 5], [0, 1, 2]],
            None,
        );
        let camera = OrbitCamera {
            yaw: 0.0,
            pitch: 0.0,
            zoom: 1.0,
        };

        let triangles = shade_triangles(&mesh, mesh.bounding_radius(), &camera, Size::new(100.0, 100.0), 1);

        assert_eq!(triangles.len(), 2);
        assert!(triangles[0].depth > triangles[1].depth);
    }

    #[test]
    fn test_dragging_large_meshes_paints_a_subset() {
        assert_eq!(face_stride(100, true), 1);
        assert_eq!(face_stride(500_000, false), 1);

        let stride = face_stride(500_000, true);
        assert!(500_000usize.div_ceil(stride) <= DRAG_FACE_BUDGET);
    }

    #[test]
    fn test_stride_skips_faces() {
        let mut vertices = Vec::new();
        let mut faces = Vec::new();
        for i in 0..10u32 {
            let x = i as f32 * 0.1;
            vertices.extend([[x, 0.0, 0.0], [x + 0.05, 0.0, 0.0], [x, 0.05, 0.0]]);
            faces.push([3 * i, 3 * i + 1, 3 * i + 2]);
        }
        let viewer = MeshViewer::new(Mesh::new(vertices, faces, None));
        let camera = OrbitCamera::default();
        let size = Size::new(800.0, 600.0);

        assert_eq!(shade_triangles(viewer.mesh(), viewer.radius, &camera, size, 1).len(), 10);
        assert_eq!(shade_triangles(viewer.mesh(), viewer.radius, &camera, size, 3).len(), 4);
    }

    #[test]
    fn test_uncoloured_faces_use_default_gray() {
        let mesh = Mesh::new(vec![[0.0; 3]; 3], vec![[0, 1, 2]], None);
        assert_eq!(face_color(&mesh, &[0, 1, 2]), DEFAULT_COLOR);
    }
}
