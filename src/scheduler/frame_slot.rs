//! Per-swapchain-image frame state

use crate::arena::{DrawBatch, ResourceArena};
use crate::backend::traits::*;

/// Everything one frame in flight owns.
///
/// The slot's instance buffers live in the arena. The slot itself keeps the fence that
/// guards them, the semaphore ordering its lighting submission after its geometry, and
/// the lazily rebuilt draw batch.
pub struct FrameSlot {
    index: usize,
    fence: FenceHandle,
    geometry_done: SemaphoreHandle,
    batch: DrawBatch,
    frames_rendered: u64,
}

impl FrameSlot {
    pub fn new<B: GraphicsBackend + ?Sized>(backend: &mut B, index: usize) -> Self {
        Self {
            index,
            // Signaled so the first wait on a fresh slot returns immediately
            fence: backend.create_fence(true),
            geometry_done: backend.create_semaphore(),
            batch: DrawBatch::new(),
            frames_rendered: 0,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn fence(&self) -> FenceHandle {
        self.fence
    }

    pub fn geometry_done(&self) -> SemaphoreHandle {
        self.geometry_done
    }

    pub fn batch(&self) -> &DrawBatch {
        &self.batch
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    /// Rebuild the draw batch if the arena rebuilt its entity buffers since the last use.
    /// Returns whether a rebuild happened.
    pub fn refresh_batch(&mut self, arena: &ResourceArena) -> bool {
        if self.batch.is_current(arena) {
            return false;
        }
        self.batch.rebuild(arena, self.index);
        true
    }

    /// Drop the recorded batch, e.g. after the swapchain was recreated
    pub fn invalidate(&mut self) {
        self.batch.invalidate();
    }

    pub(crate) fn mark_rendered(&mut self) {
        self.frames_rendered += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::HeadlessBackend;
    use crate::config::RendererConfig;

    #[test]
    fn test_fresh_slot_fence_is_signaled() {
        let mut backend = HeadlessBackend::new(16, 16);
        let slot = FrameSlot::new(&mut backend, 1);
        assert!(backend.wait_for_fence(slot.fence()).is_ok());
        assert_eq!(slot.index(), 1);
    }

    #[test]
    fn test_batch_rebuilds_once_per_generation() {
        let mut backend = HeadlessBackend::new(16, 16);
        let config = RendererConfig::default().with_capacities(4096, 1024, 8, 64 * 1024, 4096);
        let arena = ResourceArena::new(&mut backend, &config).unwrap();
        let mut slot = FrameSlot::new(&mut backend, 0);

        assert!(slot.refresh_batch(&arena));
        assert!(!slot.refresh_batch(&arena));

        slot.invalidate();
        assert!(slot.refresh_batch(&arena));
    }
}
