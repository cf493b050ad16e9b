pub mod arena;
pub mod handle;
pub mod mesh;
pub mod texture;

pub use arena::ResourceArena;
pub use handle::Handle;
pub use mesh::Mesh;
pub use texture::{GpuTexture, TextureHandle, TextureImage, TextureManager};

pub type MeshHandle = Handle<Mesh>;

/// Owner of every loaded GPU asset. Nothing here is dropped implicitly:
/// meshes go through [`Assets::release_mesh`], textures through the manager.
#[derive(Default)]
pub struct Assets {
    pub meshes: ResourceArena<Mesh>,
    pub textures: TextureManager,
}

impl Assets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_mesh(&mut self, mesh: Mesh) -> MeshHandle {
        self.meshes.insert(mesh)
    }

    pub fn mesh(&self, handle: MeshHandle) -> Option<&Mesh> {
        self.meshes.get(handle)
    }

    pub fn release_mesh(&mut self, handle: MeshHandle) {
        match self.meshes.release(handle) {
            Some(mesh) => mesh.destroy(),
            None => log::warn!("Release of stale mesh handle {:?}", handle),
        }
    }

    pub fn release_all(&mut self) {
        let handles: Vec<_> = self.meshes.iter().map(|(handle, _)| handle).collect();
        for handle in handles {
            self.release_mesh(handle);
        }
    }
}
