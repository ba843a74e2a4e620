//! Fixed-capacity bump regions inside the arena's device buffers

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::error::{RendererError, RendererResult};

/// One device buffer filled front to back.
///
/// Space is never returned; the next free byte only moves forward.
pub struct ArenaRegion {
    name: &'static str,
    buffer: BufferHandle,
    capacity: u64,
    used: u64,
}

impl ArenaRegion {
    pub fn new<B: GraphicsBackend + ?Sized>(
        backend: &mut B,
        name: &'static str,
        capacity: u64,
        usage: BufferUsage,
    ) -> RendererResult<Self> {
        let buffer = backend.create_buffer(&BufferDescriptor {
            label: Some(format!("arena {}", name)),
            size: capacity,
            usage: usage | BufferUsage::COPY_DST,
        })?;

        Ok(Self {
            name,
            buffer,
            capacity,
            used: 0,
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn buffer(&self) -> BufferHandle {
        self.buffer
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn used(&self) -> u64 {
        self.used
    }

    /// Start planning allocations from the current end of the region
    pub fn plan(&self) -> RegionPlan {
        RegionPlan {
            name: self.name,
            capacity: self.capacity,
            start: self.used,
            next: self.used,
            bytes: Vec::new(),
        }
    }

    /// Record the copy of a finished plan into this region.
    ///
    /// The staging buffer must stay alive until the open encoder has been submitted and
    /// has completed; it is returned so the caller can destroy it afterwards.
    pub fn stage<B: GraphicsBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        plan: RegionPlan,
    ) -> RendererResult<Option<BufferHandle>> {
        debug_assert_eq!(plan.start, self.used);
        if plan.bytes.is_empty() {
            return Ok(None);
        }

        let staging = backend.create_buffer_init(
            &BufferDescriptor {
                label: Some(format!("{} staging", self.name)),
                size: plan.bytes.len() as u64,
                usage: BufferUsage::COPY_SRC,
            },
            &plan.bytes,
        )?;
        backend.copy_buffer_to_buffer(staging, 0, self.buffer, plan.start, plan.bytes.len() as u64);
        self.used = plan.next;
        Ok(Some(staging))
    }

    pub fn destroy<B: GraphicsBackend + ?Sized>(&self, backend: &mut B) {
        backend.destroy_buffer(self.buffer);
    }
}

/// Allocations planned against a region before anything is written
pub struct RegionPlan {
    name: &'static str,
    capacity: u64,
    start: u64,
    next: u64,
    bytes: Vec<u8>,
}

impl RegionPlan {
    /// Claim space for `data`, returning its byte offset in the region
    pub fn push(&mut self, data: &[u8]) -> RendererResult<u64> {
        let offset = self.reserve(data.len() as u64)?;
        self.bytes.extend_from_slice(data);
        Ok(offset)
    }

    /// Claim `size` bytes without providing their contents yet
    pub fn reserve(&mut self, size: u64) -> RendererResult<u64> {
        let end = self.next + size;
        if end > self.capacity {
            return Err(RendererError::CapacityExceeded {
                region: self.name,
                requested: end,
                available: self.capacity,
            });
        }
        let offset = self.next;
        self.next = end;
        Ok(offset)
    }

    /// Offset of the next allocation
    pub fn cursor(&self) -> u64 {
        self.next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::HeadlessBackend;

    #[test]
    fn test_plan_overflow_leaves_region_untouched() {
        let mut backend = HeadlessBackend::new(4, 4);
        let region = ArenaRegion::new(&mut backend, "indices", 16, BufferUsage::INDEX).unwrap();

        let mut plan = region.plan();
        assert_eq!(plan.push(&[1u8; 12]).unwrap(), 0);
        let err = plan.push(&[2u8; 8]).unwrap_err();
        assert!(matches!(
            err,
            RendererError::CapacityExceeded {
                region: "indices",
                requested: 20,
                available: 16
            }
        ));
        assert_eq!(region.used(), 0);
    }

    #[test]
    fn test_stage_appends_after_previous_data() {
        let mut backend = HeadlessBackend::new(4, 4);
        let mut region = ArenaRegion::new(&mut backend, "vertices", 16, BufferUsage::VERTEX).unwrap();

        for fill in [7u8, 9u8] {
            let mut plan = region.plan();
            plan.push(&[fill; 8]).unwrap();
            backend.begin_commands("upload");
            let staging = region.stage(&mut backend, plan).unwrap();
            backend.submit(&SubmitInfo::default()).unwrap();
            assert!(staging.is_some());
        }

        assert_eq!(region.used(), 16);
        let data = backend.buffer_data(region.buffer()).unwrap();
        assert_eq!(&data[..8], &[7u8; 8]);
        assert_eq!(&data[8..], &[9u8; 8]);
    }
}
