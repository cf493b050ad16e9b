use crate::asset::Assets;
use crate::scene::DrawBatch;

/// Issues one instanced draw per batch. Instance indices address the frame's
/// object buffer, so the shader reads per-object data by `instance_index`.
pub fn draw_batches(pass: &mut wgpu::RenderPass<'_>, assets: &Assets, batches: &[DrawBatch]) {
    for batch in batches {
        let Some(mesh) = assets.mesh(batch.mesh) else {
            log::warn!("Skipping batch with stale mesh handle {:?}", batch.mesh);
            continue;
        };
        pass.set_vertex_buffer(0, mesh.vertex_buffer().slice(..));
        pass.set_index_buffer(mesh.index_buffer().slice(..), mesh.index_format());
        pass.draw_indexed(0..mesh.index_count(), 0, batch.instances());
    }
}
