use wgpu::util::DeviceExt;

use crate::renderer::Vertex;

/// Indexed triangle list on the GPU, plus the local-space bounding radius.
/// Lives in the mesh arena and is destroyed on explicit release.
#[derive(Debug)]
pub struct Mesh {
    vertices: wgpu::Buffer,
    indices: wgpu::Buffer,
    index_count: u32,
    radius: f32,
}

impl Mesh {
    pub fn upload(device: &wgpu::Device, name: &str, vertices: &[Vertex], indices: &[u32]) -> Self {
        let vertex_label = format!("{name}Vertices");
        let index_label = format!("{name}Indices");
        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&vertex_label),
            contents: bytemuck::cast_slice(vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&index_label),
            contents: bytemuck::cast_slice(indices),
            usage: wgpu::BufferUsages::INDEX,
        });
        log::debug!(
            "Mesh {}: {} vertices, {} triangles",
            name,
            vertices.len(),
            indices.len() / 3
        );

        Self {
            vertices: vertex_buffer,
            indices: index_buffer,
            index_count: indices.len() as u32,
            radius: bounding_radius(vertices),
        }
    }

    pub fn vertex_buffer(&self) -> &wgpu::Buffer {
        &self.vertices
    }

    pub fn index_buffer(&self) -> &wgpu::Buffer {
        &self.indices
    }

    pub fn index_format(&self) -> wgpu::IndexFormat {
        wgpu::IndexFormat::Uint32
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    pub fn radius(&self) -> f32 {
        self.radius
    }

    pub fn destroy(self) {
        self.vertices.destroy();
        self.indices.destroy();
    }
}

/// Distance from the local origin to the farthest vertex.
pub fn bounding_radius(vertices: &[Vertex]) -> f32 {
    vertices
        .iter()
        .map(|v| glam::Vec3::from(v.pos).length())
        .fold(0.0, f32::max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::primitives::{cube_mesh, sphere_mesh};

    #[test]
    fn unit_shapes_have_expected_radius() {
        let (cube, _) = cube_mesh();
        assert!((bounding_radius(&cube) - 3f32.sqrt() * 0.5).abs() < 1e-5);
        let (sphere, _) = sphere_mesh(16, 8);
        assert!(bounding_radius(&sphere) <= 1.0 + 1e-5);
        assert_eq!(bounding_radius(&[]), 0.0);
    }
}
