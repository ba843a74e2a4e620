//! Headless GPU backend for testing and CPU-only validation.
//!
//! This backend doesn't talk to a GPU. Buffers are byte vectors, so writes and copies
//! can be read back, and every recorded command ends up in a submission log that tests
//! inspect. Synchronization objects follow Vulkan rules strictly: waiting on a binary
//! semaphore that nobody signaled, or on a fence that can never signal, is reported
//! instead of silently passing.

use crate::backend::traits::*;
use crate::backend::types::*;
use std::collections::{HashMap, HashSet};

/// A command captured between `begin_commands` and `submit`
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    CopyBuffer {
        src: BufferHandle,
        src_offset: u64,
        dst: BufferHandle,
        dst_offset: u64,
        size: u64,
    },
    Barrier(MemoryBarrier),
    BeginRenderPass {
        label: Option<String>,
        color_views: Vec<TextureViewHandle>,
        depth_view: Option<TextureViewHandle>,
        load_ops: Vec<LoadOp>,
    },
    EndRenderPass,
    BeginComputePass {
        label: Option<String>,
    },
    EndComputePass,
    SetRenderPipeline(RenderPipelineHandle),
    SetComputePipeline(ComputePipelineHandle),
    SetBindGroup {
        index: u32,
        bind_group: BindGroupHandle,
    },
    SetPushConstants {
        stages: ShaderStageFlags,
        offset: u32,
        data: Vec<u8>,
    },
    SetVertexBuffer {
        slot: u32,
        buffer: BufferHandle,
        offset: u64,
    },
    SetIndexBuffer {
        buffer: BufferHandle,
        offset: u64,
    },
    SetViewport {
        width: f32,
        height: f32,
    },
    Draw {
        vertices: std::ops::Range<u32>,
        instances: std::ops::Range<u32>,
    },
    DrawIndexedIndirect {
        buffer: BufferHandle,
        offset: u64,
        count: u32,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
}

/// One queued command buffer
#[derive(Debug, Clone)]
pub struct Submission {
    pub label: String,
    pub commands: Vec<RecordedCommand>,
    pub wait_semaphores: Vec<SemaphoreHandle>,
    pub signal_semaphores: Vec<SemaphoreHandle>,
    pub fence: Option<FenceHandle>,
}

struct HeadlessBuffer {
    desc: BufferDescriptor,
    data: Vec<u8>,
}

/// In-memory implementation of [`GraphicsBackend`]
pub struct HeadlessBackend {
    features: DeviceFeatures,
    width: u32,
    height: u32,
    frames_in_flight: u32,
    frame_counter: u64,
    swapchain_view: TextureViewHandle,
    outdated_acquires: u32,
    outdated_presents: u32,
    presented_frames: u64,

    buffers: HashMap<u64, HeadlessBuffer>,
    textures: HashMap<u64, TextureDescriptor>,
    texture_views: HashMap<u64, TextureViewDescriptor>,
    samplers: HashSet<u64>,
    bind_group_layouts: HashMap<u64, Vec<BindGroupLayoutEntry>>,
    bind_groups: HashMap<u64, Vec<(u32, BindGroupEntry)>>,
    render_pipelines: HashMap<u64, RenderPipelineDescriptor>,
    compute_pipelines: HashMap<u64, ComputePipelineDescriptor>,
    fences: HashMap<u64, bool>,
    semaphores: HashSet<u64>,
    signaled_semaphores: HashSet<u64>,
    next_id: u64,

    recording: Option<(String, Vec<RecordedCommand>)>,
    submissions: Vec<Submission>,
    fence_waits: Vec<FenceHandle>,
    idle_waits: usize,
    validation_errors: Vec<String>,
}

impl HeadlessBackend {
    /// Create a backend with every required feature and three frames in flight
    pub fn new(width: u32, height: u32) -> Self {
        let mut backend = Self {
            features: DeviceFeatures::REQUIRED,
            width,
            height,
            frames_in_flight: 3,
            frame_counter: 0,
            swapchain_view: TextureViewHandle(0),
            outdated_acquires: 0,
            outdated_presents: 0,
            presented_frames: 0,
            buffers: HashMap::new(),
            textures: HashMap::new(),
            texture_views: HashMap::new(),
            samplers: HashSet::new(),
            bind_group_layouts: HashMap::new(),
            bind_groups: HashMap::new(),
            render_pipelines: HashMap::new(),
            compute_pipelines: HashMap::new(),
            fences: HashMap::new(),
            semaphores: HashSet::new(),
            signaled_semaphores: HashSet::new(),
            next_id: 1,
            recording: None,
            submissions: Vec::new(),
            fence_waits: Vec::new(),
            idle_waits: 0,
            validation_errors: Vec::new(),
        };
        let id = backend.allocate_id();
        backend.texture_views.insert(id, TextureViewDescriptor::default());
        backend.swapchain_view = TextureViewHandle(id);
        backend
    }

    pub fn with_features(mut self, features: DeviceFeatures) -> Self {
        self.features = features;
        self
    }

    pub fn with_frames_in_flight(mut self, frames: u32) -> Self {
        self.frames_in_flight = frames.max(1);
        self
    }

    /// Make the next `count` acquisitions report a stale swapchain
    pub fn mark_surface_outdated(&mut self, count: u32) {
        self.outdated_acquires = count;
    }

    /// Make the next `count` presentations report a suboptimal swapchain
    pub fn mark_present_outdated(&mut self, count: u32) {
        self.outdated_presents = count;
    }

    /// Simulate the window changing size without going through the renderer
    pub fn set_window_size(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
    }

    pub fn buffer_data(&self, buffer: BufferHandle) -> Option<&[u8]> {
        self.buffers.get(&buffer.0).map(|b| b.data.as_slice())
    }

    pub fn buffer_descriptor(&self, buffer: BufferHandle) -> Option<&BufferDescriptor> {
        self.buffers.get(&buffer.0).map(|b| &b.desc)
    }

    pub fn texture_descriptor(&self, texture: TextureHandle) -> Option<&TextureDescriptor> {
        self.textures.get(&texture.0)
    }

    pub fn texture_view_descriptor(&self, view: TextureViewHandle) -> Option<&TextureViewDescriptor> {
        self.texture_views.get(&view.0)
    }

    pub fn bind_group_entries(&self, bind_group: BindGroupHandle) -> Option<&[(u32, BindGroupEntry)]> {
        self.bind_groups.get(&bind_group.0).map(|e| e.as_slice())
    }

    pub fn live_buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn live_texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn submissions(&self) -> &[Submission] {
        &self.submissions
    }

    /// Drain the submission log, typically between frames in a test
    pub fn take_submissions(&mut self) -> Vec<Submission> {
        std::mem::take(&mut self.submissions)
    }

    pub fn fence_waits(&self) -> &[FenceHandle] {
        &self.fence_waits
    }

    pub fn idle_waits(&self) -> usize {
        self.idle_waits
    }

    pub fn presented_frames(&self) -> u64 {
        self.presented_frames
    }

    pub fn swapchain_view(&self) -> TextureViewHandle {
        self.swapchain_view
    }

    /// Misuse detected so far, such as out-of-bounds writes or recording outside an encoder
    pub fn validation_errors(&self) -> &[String] {
        &self.validation_errors
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn report(&mut self, message: String) {
        log::error!("HeadlessBackend: {}", message);
        self.validation_errors.push(message);
    }

    fn record(&mut self, command: RecordedCommand) {
        match self.recording.as_mut() {
            Some((_, commands)) => commands.push(command),
            None => self.report(format!("{:?} recorded outside of an encoder", command)),
        }
    }

    fn apply_copy(&mut self, src: BufferHandle, src_offset: u64, dst: BufferHandle, dst_offset: u64, size: u64) {
        let Some(bytes) = self.buffers.get(&src.0).and_then(|b| {
            b.data
                .get(src_offset as usize..(src_offset + size) as usize)
                .map(|s| s.to_vec())
        }) else {
            self.report(format!("copy source {:?} out of range", src));
            return;
        };
        self.write_buffer(dst, dst_offset, &bytes);
    }
}

impl GraphicsBackend for HeadlessBackend {
    fn features(&self) -> DeviceFeatures {
        self.features
    }

    fn frames_in_flight(&self) -> u32 {
        self.frames_in_flight
    }

    fn resize(&mut self, width: u32, height: u32) {
        log::trace!("HeadlessBackend: resizing surface to {}x{}", width, height);
        if width > 0 && height > 0 {
            self.width = width;
            self.height = height;
        }
    }

    fn surface_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn begin_frame(&mut self) -> BackendResult<FrameContext> {
        if self.outdated_acquires > 0 {
            self.outdated_acquires -= 1;
            return Err(BackendError::SurfaceOutdated);
        }

        let image_index = (self.frame_counter % self.frames_in_flight as u64) as u32;
        self.frame_counter += 1;

        Ok(FrameContext {
            swapchain_view: self.swapchain_view,
            image_index,
            width: self.width,
            height: self.height,
        })
    }

    fn end_frame(&mut self) -> BackendResult<()> {
        self.presented_frames += 1;
        if self.outdated_presents > 0 {
            self.outdated_presents -= 1;
            return Err(BackendError::SurfaceOutdated);
        }
        Ok(())
    }

    fn swapchain_format(&self) -> TextureFormat {
        TextureFormat::Bgra8UnormSrgb
    }

    fn wait_idle(&mut self) -> BackendResult<()> {
        self.idle_waits += 1;
        Ok(())
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        log::trace!(
            "HeadlessBackend: creating buffer {:?} (size: {})",
            desc.label,
            desc.size
        );
        if desc.size == 0 {
            return Err(BackendError::BufferCreationFailed(format!(
                "{:?} has zero size",
                desc.label
            )));
        }
        let id = self.allocate_id();
        self.buffers.insert(
            id,
            HeadlessBuffer {
                desc: desc.clone(),
                data: vec![0; desc.size as usize],
            },
        );
        Ok(BufferHandle(id))
    }

    fn create_buffer_init(
        &mut self,
        desc: &BufferDescriptor,
        data: &[u8],
    ) -> BackendResult<BufferHandle> {
        let handle = self.create_buffer(&BufferDescriptor {
            size: desc.size.max(data.len() as u64),
            ..desc.clone()
        })?;
        self.write_buffer(handle, 0, data);
        Ok(handle)
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) {
        let end = offset as usize + data.len();
        let result = match self.buffers.get_mut(&buffer.0) {
            Some(b) if end <= b.data.len() => {
                b.data[offset as usize..end].copy_from_slice(data);
                Ok(())
            }
            Some(b) => Err(format!(
                "write of {} bytes at {} overflows {:?} ({} bytes)",
                data.len(),
                offset,
                b.desc.label,
                b.data.len()
            )),
            None => Err(format!("write to unknown buffer {:?}", buffer)),
        };
        if let Err(message) = result {
            self.report(message);
        }
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        log::trace!(
            "HeadlessBackend: creating texture {:?} ({}x{}x{})",
            desc.label,
            desc.width,
            desc.height,
            desc.array_layers
        );
        let id = self.allocate_id();
        self.textures.insert(id, desc.clone());
        Ok(TextureHandle(id))
    }

    fn create_texture_view(
        &mut self,
        texture: TextureHandle,
        desc: &TextureViewDescriptor,
    ) -> BackendResult<TextureViewHandle> {
        let layers = self
            .textures
            .get(&texture.0)
            .ok_or(BackendError::InvalidHandle {
                kind: "texture",
                id: texture.0,
            })?
            .array_layers;
        if desc.base_array_layer + desc.array_layer_count > layers {
            return Err(BackendError::TextureCreationFailed(format!(
                "view layers {}..{} exceed {} layers",
                desc.base_array_layer,
                desc.base_array_layer + desc.array_layer_count,
                layers
            )));
        }
        let id = self.allocate_id();
        self.texture_views.insert(id, desc.clone());
        Ok(TextureViewHandle(id))
    }

    fn write_texture(&mut self, texture: TextureHandle, data: &[u8], width: u32, height: u32) {
        if !self.textures.contains_key(&texture.0) {
            self.report(format!("write to unknown texture {:?}", texture));
        } else if data.len() != (width * height * 4) as usize {
            self.report(format!(
                "texture write of {} bytes does not match {}x{}",
                data.len(),
                width,
                height
            ));
        }
    }

    fn create_sampler(&mut self, desc: &SamplerDescriptor) -> BackendResult<SamplerHandle> {
        log::trace!("HeadlessBackend: creating sampler {:?}", desc.label);
        let id = self.allocate_id();
        self.samplers.insert(id);
        Ok(SamplerHandle(id))
    }

    fn create_bind_group_layout(
        &mut self,
        entries: &[BindGroupLayoutEntry],
    ) -> BackendResult<BindGroupLayoutHandle> {
        let id = self.allocate_id();
        self.bind_group_layouts.insert(id, entries.to_vec());
        Ok(BindGroupLayoutHandle(id))
    }

    fn create_bind_group(
        &mut self,
        layout: BindGroupLayoutHandle,
        entries: &[(u32, BindGroupEntry)],
    ) -> BackendResult<BindGroupHandle> {
        let layout_entries = self
            .bind_group_layouts
            .get(&layout.0)
            .ok_or(BackendError::InvalidHandle {
                kind: "bind group layout",
                id: layout.0,
            })?;

        for layout_entry in layout_entries {
            let Some((_, entry)) = entries.iter().find(|(b, _)| *b == layout_entry.binding) else {
                return Err(BackendError::PipelineCreationFailed(format!(
                    "binding {} left unbound",
                    layout_entry.binding
                )));
            };
            if let (Some(count), BindGroupEntry::TextureArray(views)) = (layout_entry.count, entry) {
                if views.len() != count as usize {
                    return Err(BackendError::PipelineCreationFailed(format!(
                        "binding {} expects {} textures, got {}",
                        layout_entry.binding,
                        count,
                        views.len()
                    )));
                }
            }
        }

        let id = self.allocate_id();
        self.bind_groups.insert(id, entries.to_vec());
        Ok(BindGroupHandle(id))
    }

    fn create_render_pipeline(
        &mut self,
        desc: &RenderPipelineDescriptor,
    ) -> BackendResult<RenderPipelineHandle> {
        log::trace!("HeadlessBackend: creating render pipeline {:?}", desc.label);
        let id = self.allocate_id();
        self.render_pipelines.insert(id, desc.clone());
        Ok(RenderPipelineHandle(id))
    }

    fn create_compute_pipeline(
        &mut self,
        desc: &ComputePipelineDescriptor,
    ) -> BackendResult<ComputePipelineHandle> {
        log::trace!("HeadlessBackend: creating compute pipeline {:?}", desc.label);
        let id = self.allocate_id();
        self.compute_pipelines.insert(id, desc.clone());
        Ok(ComputePipelineHandle(id))
    }

    fn create_fence(&mut self, signaled: bool) -> FenceHandle {
        let id = self.allocate_id();
        self.fences.insert(id, signaled);
        FenceHandle(id)
    }

    fn wait_for_fence(&mut self, fence: FenceHandle) -> BackendResult<()> {
        self.fence_waits.push(fence);
        match self.fences.get(&fence.0) {
            Some(true) => Ok(()),
            Some(false) => Err(BackendError::SubmissionFailed(format!(
                "waiting on {:?} which no submission will signal",
                fence
            ))),
            None => Err(BackendError::InvalidHandle {
                kind: "fence",
                id: fence.0,
            }),
        }
    }

    fn reset_fence(&mut self, fence: FenceHandle) {
        if let Some(signaled) = self.fences.get_mut(&fence.0) {
            *signaled = false;
        }
    }

    fn create_semaphore(&mut self) -> SemaphoreHandle {
        let id = self.allocate_id();
        self.semaphores.insert(id);
        SemaphoreHandle(id)
    }

    fn begin_commands(&mut self, label: &str) {
        if let Some((open, _)) = &self.recording {
            let message = format!("encoder {:?} opened while {:?} is still recording", label, open);
            self.report(message);
        }
        self.recording = Some((label.to_string(), Vec::new()));
    }

    fn submit(&mut self, info: &SubmitInfo) -> BackendResult<()> {
        let (label, commands) = self
            .recording
            .take()
            .ok_or_else(|| BackendError::SubmissionFailed("no open encoder".into()))?;

        for semaphore in info.wait_semaphores {
            if !self.signaled_semaphores.remove(&semaphore.0) {
                return Err(BackendError::SubmissionFailed(format!(
                    "{} waits on unsignaled {:?}",
                    label, semaphore
                )));
            }
        }
        for semaphore in info.signal_semaphores {
            if !self.semaphores.contains(&semaphore.0) {
                return Err(BackendError::InvalidHandle {
                    kind: "semaphore",
                    id: semaphore.0,
                });
            }
            self.signaled_semaphores.insert(semaphore.0);
        }

        for command in &commands {
            if let RecordedCommand::CopyBuffer {
                src,
                src_offset,
                dst,
                dst_offset,
                size,
            } = *command
            {
                self.apply_copy(src, src_offset, dst, dst_offset, size);
            }
        }

        if let Some(fence) = info.fence {
            match self.fences.get_mut(&fence.0) {
                Some(signaled) => *signaled = true,
                None => {
                    return Err(BackendError::InvalidHandle {
                        kind: "fence",
                        id: fence.0,
                    })
                }
            }
        }

        log::trace!(
            "HeadlessBackend: submitted {:?} ({} commands)",
            label,
            commands.len()
        );
        self.submissions.push(Submission {
            label,
            commands,
            wait_semaphores: info.wait_semaphores.to_vec(),
            signal_semaphores: info.signal_semaphores.to_vec(),
            fence: info.fence,
        });
        Ok(())
    }

    fn copy_buffer_to_buffer(
        &mut self,
        src: BufferHandle,
        src_offset: u64,
        dst: BufferHandle,
        dst_offset: u64,
        size: u64,
    ) {
        self.record(RecordedCommand::CopyBuffer {
            src,
            src_offset,
            dst,
            dst_offset,
            size,
        });
    }

    fn pipeline_barrier(&mut self, barrier: MemoryBarrier) {
        self.record(RecordedCommand::Barrier(barrier));
    }

    fn begin_render_pass(&mut self, desc: &RenderPassDescriptor) {
        self.record(RecordedCommand::BeginRenderPass {
            label: desc.label.clone(),
            color_views: desc.color_attachments.iter().map(|a| a.view).collect(),
            depth_view: desc.depth_stencil_attachment.as_ref().map(|d| d.view),
            load_ops: desc.color_attachments.iter().map(|a| a.load_op.clone()).collect(),
        });
    }

    fn end_render_pass(&mut self) {
        self.record(RecordedCommand::EndRenderPass);
    }

    fn begin_compute_pass(&mut self, label: Option<&str>) {
        self.record(RecordedCommand::BeginComputePass {
            label: label.map(|s| s.to_string()),
        });
    }

    fn end_compute_pass(&mut self) {
        self.record(RecordedCommand::EndComputePass);
    }

    fn set_render_pipeline(&mut self, pipeline: RenderPipelineHandle) {
        self.record(RecordedCommand::SetRenderPipeline(pipeline));
    }

    fn set_compute_pipeline(&mut self, pipeline: ComputePipelineHandle) {
        self.record(RecordedCommand::SetComputePipeline(pipeline));
    }

    fn set_bind_group(&mut self, index: u32, bind_group: BindGroupHandle) {
        self.record(RecordedCommand::SetBindGroup { index, bind_group });
    }

    fn set_push_constants(&mut self, stages: ShaderStageFlags, offset: u32, data: &[u8]) {
        self.record(RecordedCommand::SetPushConstants {
            stages,
            offset,
            data: data.to_vec(),
        });
    }

    fn set_vertex_buffer(&mut self, slot: u32, buffer: BufferHandle, offset: u64) {
        self.record(RecordedCommand::SetVertexBuffer { slot, buffer, offset });
    }

    fn set_index_buffer(&mut self, buffer: BufferHandle, offset: u64, _format: IndexFormat) {
        self.record(RecordedCommand::SetIndexBuffer { buffer, offset });
    }

    fn set_viewport(&mut self, _x: f32, _y: f32, width: f32, height: f32, _min_depth: f32, _max_depth: f32) {
        self.record(RecordedCommand::SetViewport { width, height });
    }

    fn draw(&mut self, vertices: std::ops::Range<u32>, instances: std::ops::Range<u32>) {
        self.record(RecordedCommand::Draw { vertices, instances });
    }

    fn draw_indexed_indirect(&mut self, indirect_buffer: BufferHandle, offset: u64, count: u32) {
        self.record(RecordedCommand::DrawIndexedIndirect {
            buffer: indirect_buffer,
            offset,
            count,
        });
    }

    fn dispatch_compute(&mut self, x: u32, y: u32, z: u32) {
        self.record(RecordedCommand::Dispatch { x, y, z });
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.buffers.remove(&buffer.0);
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        self.textures.remove(&texture.0);
    }

    fn destroy_texture_view(&mut self, view: TextureViewHandle) {
        self.texture_views.remove(&view.0);
    }

    fn destroy_bind_group(&mut self, bind_group: BindGroupHandle) {
        self.bind_groups.remove(&bind_group.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage_buffer(backend: &mut HeadlessBackend, size: u64) -> BufferHandle {
        backend
            .create_buffer(&BufferDescriptor {
                label: Some("test".into()),
                size,
                usage: BufferUsage::STORAGE | BufferUsage::COPY_DST | BufferUsage::COPY_SRC,
            })
            .unwrap()
    }

    #[test]
    fn test_copies_apply_on_submit() {
        let mut backend = HeadlessBackend::new(64, 64);
        let src = storage_buffer(&mut backend, 8);
        let dst = storage_buffer(&mut backend, 16);
        backend.write_buffer(src, 0, &[1, 2, 3, 4, 5, 6, 7, 8]);

        backend.begin_commands("copy");
        backend.copy_buffer_to_buffer(src, 2, dst, 8, 4);
        assert_eq!(&backend.buffer_data(dst).unwrap()[8..12], &[0, 0, 0, 0]);

        backend.submit(&SubmitInfo::default()).unwrap();
        assert_eq!(&backend.buffer_data(dst).unwrap()[8..12], &[3, 4, 5, 6]);
        assert!(backend.validation_errors().is_empty());
    }

    #[test]
    fn test_semaphore_must_be_signaled_before_wait() {
        let mut backend = HeadlessBackend::new(64, 64);
        let semaphore = backend.create_semaphore();

        backend.begin_commands("consumer");
        let result = backend.submit(&SubmitInfo {
            wait_semaphores: &[semaphore],
            ..Default::default()
        });
        assert!(matches!(result, Err(BackendError::SubmissionFailed(_))));

        backend.begin_commands("producer");
        backend
            .submit(&SubmitInfo {
                signal_semaphores: &[semaphore],
                ..Default::default()
            })
            .unwrap();
        backend.begin_commands("consumer");
        backend
            .submit(&SubmitInfo {
                wait_semaphores: &[semaphore],
                ..Default::default()
            })
            .unwrap();
    }

    #[test]
    fn test_fence_signals_on_submit() {
        let mut backend = HeadlessBackend::new(64, 64);
        let fence = backend.create_fence(false);
        assert!(backend.wait_for_fence(fence).is_err());

        backend.begin_commands("work");
        backend
            .submit(&SubmitInfo {
                fence: Some(fence),
                ..Default::default()
            })
            .unwrap();
        backend.wait_for_fence(fence).unwrap();
        assert_eq!(backend.fence_waits().len(), 2);
    }

    #[test]
    fn test_out_of_bounds_write_is_reported() {
        let mut backend = HeadlessBackend::new(64, 64);
        let buffer = storage_buffer(&mut backend, 4);
        backend.write_buffer(buffer, 2, &[0; 4]);
        assert_eq!(backend.validation_errors().len(), 1);
    }

    #[test]
    fn test_image_index_cycles_through_frames_in_flight() {
        let mut backend = HeadlessBackend::new(64, 64).with_frames_in_flight(2);
        let indices: Vec<u32> = (0..4)
            .map(|_| backend.begin_frame().unwrap().image_index)
            .collect();
        assert_eq!(indices, vec![0, 1, 0, 1]);
    }
}
