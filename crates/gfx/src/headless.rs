//! In-process [`GpuDevice`] without a GPU.
//!
//! The headless device keeps buffer and texture memory on the host, executes
//! copy commands when a submission completes, and records every call it
//! receives. Completion is either immediate or driven by the caller, which
//! lets tests hold submissions "in flight" and observe hazards: a submission
//! that writes a resource a pending submission still uses (or the reverse)
//! without waiting on it, or a resource destroyed while still referenced.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::command::Command;
use crate::descriptor::{DescriptorResource, DescriptorSetDesc, DescriptorWrite};
use crate::device::{GpuDevice, Submission};
use crate::error::GfxError;
use crate::handle::{
    BufferHandle, DescriptorSetHandle, PipelineHandle, SemaphoreData, SemaphoreHandle,
    TextureHandle,
};
use crate::pipeline::PipelineDesc;
use crate::resource::{BufferDesc, QueueKind, TextureDesc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionMode {
    /// Submissions complete as soon as their waits are satisfied.
    Immediate,
    /// Submissions complete only through [`HeadlessDevice::advance`],
    /// [`HeadlessDevice::complete_all`] or a blocking wait.
    Manual,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCall {
    CreateBuffer { buffer: BufferHandle, size: u64 },
    DestroyBuffer(BufferHandle),
    CreateTexture(TextureHandle),
    DestroyTexture(TextureHandle),
    CreateSemaphore(SemaphoreHandle),
    DestroySemaphore(SemaphoreHandle),
    CreateDescriptorSet(DescriptorSetHandle),
    UpdateDescriptorSet(DescriptorSetHandle),
    DestroyDescriptorSet(DescriptorSetHandle),
    CreatePipeline(PipelineHandle),
    DestroyPipeline(PipelineHandle),
    Submit {
        index: usize,
        queue: QueueKind,
        waits: Vec<SemaphoreData>,
        signals: Vec<SemaphoreData>,
    },
    Wait { semaphore: SemaphoreHandle, value: u64 },
    WaitIdle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceRef {
    Buffer(BufferHandle),
    Texture(TextureHandle),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hazard {
    /// A new submission accesses a resource that a pending submission writes,
    /// or writes one a pending submission accesses, without waiting on it.
    WriteInFlight {
        resource: ResourceRef,
        pending_submission: usize,
    },
    /// A resource was destroyed while a pending submission references it.
    DestroyInFlight {
        resource: ResourceRef,
        pending_submission: usize,
    },
}

#[derive(Debug, Clone)]
pub struct SubmissionRecord {
    pub index: usize,
    pub queue: QueueKind,
    pub stream_labels: Vec<String>,
    pub commands: Vec<Command>,
    pub waits: Vec<SemaphoreData>,
    pub signals: Vec<SemaphoreData>,
    pub completed: bool,
    reads: BTreeSet<ResourceRef>,
    writes: BTreeSet<ResourceRef>,
}

impl SubmissionRecord {
    pub fn draw_count(&self) -> usize {
        self.commands.iter().filter(|c| c.is_draw()).count()
    }

    fn touches(&self, resource: ResourceRef) -> bool {
        self.reads.contains(&resource) || self.writes.contains(&resource)
    }
}

#[derive(Debug)]
struct BufferState {
    desc: BufferDesc,
    memory: Vec<u8>,
}

#[derive(Debug)]
struct TextureState {
    desc: TextureDesc,
    texels: Vec<u8>,
}

#[derive(Debug, Default)]
struct SemaphoreState {
    completed: u64,
    submitted: u64,
}

#[derive(Debug)]
struct DescriptorSetState {
    desc: DescriptorSetDesc,
    bindings: BTreeMap<u32, DescriptorResource>,
}

#[derive(Debug)]
pub struct HeadlessDevice {
    mode: CompletionMode,
    next_id: u32,
    buffers: BTreeMap<BufferHandle, BufferState>,
    textures: BTreeMap<TextureHandle, TextureState>,
    semaphores: BTreeMap<SemaphoreHandle, SemaphoreState>,
    descriptor_sets: BTreeMap<DescriptorSetHandle, DescriptorSetState>,
    pipelines: BTreeMap<PipelineHandle, PipelineDesc>,
    submissions: Vec<SubmissionRecord>,
    pending: VecDeque<usize>,
    calls: Vec<DeviceCall>,
    hazards: Vec<Hazard>,
    memory_budget: Option<u64>,
    memory_used: u64,
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessDevice {
    pub fn new() -> Self {
        Self::with_mode(CompletionMode::Immediate)
    }

    pub fn with_mode(mode: CompletionMode) -> Self {
        Self {
            mode,
            next_id: 1,
            buffers: BTreeMap::new(),
            textures: BTreeMap::new(),
            semaphores: BTreeMap::new(),
            descriptor_sets: BTreeMap::new(),
            pipelines: BTreeMap::new(),
            submissions: Vec::new(),
            pending: VecDeque::new(),
            calls: Vec::new(),
            hazards: Vec::new(),
            memory_budget: None,
            memory_used: 0,
        }
    }

    /// Fail buffer and texture creation once `bytes` of device memory are in use.
    pub fn with_memory_budget(mut self, bytes: u64) -> Self {
        self.memory_budget = Some(bytes);
        self
    }

    pub fn mode(&self) -> CompletionMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: CompletionMode) {
        self.mode = mode;
        if mode == CompletionMode::Immediate {
            self.drain_ready();
        }
    }

    pub fn calls(&self) -> &[DeviceCall] {
        &self.calls
    }

    pub fn submissions(&self) -> &[SubmissionRecord] {
        &self.submissions
    }

    pub fn hazards(&self) -> &[Hazard] {
        &self.hazards
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn memory_used(&self) -> u64 {
        self.memory_used
    }

    /// Device-side contents of a buffer, as written by completed copies.
    pub fn read_buffer(&self, buffer: BufferHandle) -> Option<&[u8]> {
        self.buffers.get(&buffer).map(|b| b.memory.as_slice())
    }

    pub fn read_texture(&self, texture: TextureHandle) -> Option<&[u8]> {
        self.textures.get(&texture).map(|t| t.texels.as_slice())
    }

    pub fn buffer_desc(&self, buffer: BufferHandle) -> Option<&BufferDesc> {
        self.buffers.get(&buffer).map(|b| &b.desc)
    }

    pub fn texture_desc(&self, texture: TextureHandle) -> Option<&TextureDesc> {
        self.textures.get(&texture).map(|t| &t.desc)
    }

    pub fn pipeline_desc(&self, pipeline: PipelineHandle) -> Option<&PipelineDesc> {
        self.pipelines.get(&pipeline)
    }

    pub fn is_buffer_alive(&self, buffer: BufferHandle) -> bool {
        self.buffers.contains_key(&buffer)
    }

    pub fn is_texture_alive(&self, texture: TextureHandle) -> bool {
        self.textures.contains_key(&texture)
    }

    /// Current bindings of a descriptor set.
    pub fn descriptor_writes(
        &self,
        set: DescriptorSetHandle,
    ) -> Option<&BTreeMap<u32, DescriptorResource>> {
        self.descriptor_sets.get(&set).map(|s| &s.bindings)
    }

    /// Number of live objects of every kind. Zero after a clean shutdown.
    pub fn live_object_count(&self) -> usize {
        self.buffers.len()
            + self.textures.len()
            + self.semaphores.len()
            + self.descriptor_sets.len()
            + self.pipelines.len()
    }

    /// Complete up to `count` ready submissions. Returns how many completed.
    pub fn advance(&mut self, count: usize) -> usize {
        let mut done = 0;
        while done < count && self.complete_next() {
            done += 1;
        }
        done
    }

    /// Complete every submission whose waits can be satisfied.
    pub fn complete_all(&mut self) -> usize {
        self.advance(usize::MAX)
    }

    fn next_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn reserve_memory(&mut self, label: &str, size: u64) -> Result<(), GfxError> {
        if let Some(budget) = self.memory_budget {
            if self.memory_used + size > budget {
                return Err(GfxError::OutOfMemory {
                    label: label.to_string(),
                    size,
                });
            }
        }
        self.memory_used += size;
        Ok(())
    }

    fn waits_satisfied(&self, waits: &[SemaphoreData]) -> bool {
        waits.iter().all(|w| {
            w.is_none() || w.value == 0 || self.completed_value(w.semaphore) >= w.value
        })
    }

    /// Complete the oldest pending submission whose waits are satisfied.
    fn complete_next(&mut self) -> bool {
        let Some(position) = self
            .pending
            .iter()
            .position(|&i| self.waits_satisfied(&self.submissions[i].waits))
        else {
            return false;
        };
        let Some(index) = self.pending.remove(position) else {
            return false;
        };
        self.execute(index);
        true
    }

    fn drain_ready(&mut self) {
        while self.complete_next() {}
    }

    fn execute(&mut self, index: usize) {
        let record = &mut self.submissions[index];
        record.completed = true;
        for command in &record.commands {
            match command {
                Command::CopyBuffer {
                    dst,
                    dst_offset,
                    data,
                } => {
                    if let Some(buffer) = self.buffers.get_mut(dst) {
                        let start = *dst_offset as usize;
                        buffer.memory[start..start + data.len()].copy_from_slice(data);
                    }
                }
                Command::CopyTexture { dst, data, .. } => {
                    if let Some(texture) = self.textures.get_mut(dst) {
                        texture.texels.copy_from_slice(data);
                    }
                }
                _ => {}
            }
        }
        for signal in &record.signals {
            if let Some(state) = self.semaphores.get_mut(&signal.semaphore) {
                state.completed = state.completed.max(signal.value);
            }
        }
        tracing::trace!(index, "headless submission completed");
    }

    fn validate_copies(&self, commands: &[Command]) -> Result<(), GfxError> {
        for command in commands {
            match command {
                Command::CopyBuffer {
                    dst,
                    dst_offset,
                    data,
                } => {
                    let buffer = self.buffers.get(dst).ok_or(GfxError::UnknownHandle {
                        kind: "buffer",
                        id: dst.0,
                    })?;
                    assert!(
                        dst_offset + data.len() as u64 <= buffer.desc.size,
                        "copy of {} bytes at {} overflows buffer '{}'",
                        data.len(),
                        dst_offset,
                        buffer.desc.label
                    );
                }
                Command::CopyTexture { dst, data, .. } => {
                    let texture = self.textures.get(dst).ok_or(GfxError::UnknownHandle {
                        kind: "texture",
                        id: dst.0,
                    })?;
                    assert_eq!(
                        data.len() as u64,
                        texture.desc.byte_size(),
                        "texture copy size mismatch for '{}'",
                        texture.desc.label
                    );
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn access_sets(&self, commands: &[Command]) -> (BTreeSet<ResourceRef>, BTreeSet<ResourceRef>) {
        let mut reads = BTreeSet::new();
        let mut writes = BTreeSet::new();
        for command in commands {
            match command {
                Command::CopyBuffer { dst, .. } => {
                    writes.insert(ResourceRef::Buffer(*dst));
                }
                Command::CopyTexture { dst, .. } => {
                    writes.insert(ResourceRef::Texture(*dst));
                }
                Command::Barrier(barriers) => {
                    reads.extend(barriers.iter().map(|b| ResourceRef::Texture(b.texture)));
                }
                Command::BeginRenderPass(begin) => {
                    writes.extend(begin.colors.iter().map(|c| ResourceRef::Texture(c.texture)));
                    if let Some(depth) = &begin.depth {
                        writes.insert(ResourceRef::Texture(depth.texture));
                    }
                }
                Command::BindVertexBuffer { buffer, .. }
                | Command::BindIndexBuffer { buffer, .. }
                | Command::DrawIndexedIndirect { buffer, .. } => {
                    reads.insert(ResourceRef::Buffer(*buffer));
                }
                Command::BindDescriptorSet { set, .. } => {
                    if let Some(state) = self.descriptor_sets.get(set) {
                        for resource in state.bindings.values() {
                            match resource {
                                DescriptorResource::Buffer(b) => {
                                    reads.insert(ResourceRef::Buffer(*b));
                                }
                                DescriptorResource::Texture(t) => {
                                    reads.insert(ResourceRef::Texture(*t));
                                }
                                // Bindless tables are sampled read-only and
                                // synchronized by their owners.
                                DescriptorResource::TextureArray(_)
                                | DescriptorResource::Sampler(_) => {}
                            }
                        }
                    }
                }
                _ => {}
            }
        }
        (reads, writes)
    }

    /// Pending submissions that `waits` orders after, directly or through the
    /// waits of those submissions.
    fn dependencies(&self, waits: &[SemaphoreData]) -> BTreeSet<usize> {
        let mut deps = BTreeSet::new();
        let mut frontier: Vec<SemaphoreData> = waits.to_vec();
        while let Some(wait) = frontier.pop() {
            if wait.is_none() || wait.value == 0 {
                continue;
            }
            for &i in &self.pending {
                let record = &self.submissions[i];
                let covered = record
                    .signals
                    .iter()
                    .any(|s| s.semaphore == wait.semaphore && s.value <= wait.value);
                if covered && deps.insert(i) {
                    frontier.extend(record.waits.iter().copied());
                }
            }
        }
        deps
    }

    fn destroy_check(&mut self, resource: ResourceRef) {
        for &i in &self.pending {
            if self.submissions[i].touches(resource) {
                tracing::warn!(?resource, pending_submission = i, "resource destroyed while in flight");
                self.hazards.push(Hazard::DestroyInFlight {
                    resource,
                    pending_submission: i,
                });
            }
        }
    }
}

impl GpuDevice for HeadlessDevice {
    fn name(&self) -> &str {
        "headless"
    }

    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<BufferHandle, GfxError> {
        self.reserve_memory(&desc.label, desc.size)?;
        let buffer = BufferHandle(self.next_id());
        self.buffers.insert(
            buffer,
            BufferState {
                desc: desc.clone(),
                memory: vec![0; desc.size as usize],
            },
        );
        self.calls.push(DeviceCall::CreateBuffer {
            buffer,
            size: desc.size,
        });
        Ok(buffer)
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.destroy_check(ResourceRef::Buffer(buffer));
        if let Some(state) = self.buffers.remove(&buffer) {
            self.memory_used -= state.desc.size;
        }
        self.calls.push(DeviceCall::DestroyBuffer(buffer));
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureHandle, GfxError> {
        let size = desc.byte_size();
        if size == 0 {
            return Err(GfxError::Creation {
                kind: "texture",
                label: desc.label.clone(),
                reason: "zero-area extent".into(),
            });
        }
        self.reserve_memory(&desc.label, size)?;
        let texture = TextureHandle(self.next_id());
        self.textures.insert(
            texture,
            TextureState {
                desc: desc.clone(),
                texels: vec![0; size as usize],
            },
        );
        self.calls.push(DeviceCall::CreateTexture(texture));
        Ok(texture)
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        self.destroy_check(ResourceRef::Texture(texture));
        if let Some(state) = self.textures.remove(&texture) {
            self.memory_used -= state.desc.byte_size();
        }
        self.calls.push(DeviceCall::DestroyTexture(texture));
    }

    fn create_semaphore(&mut self, _label: &str) -> Result<SemaphoreHandle, GfxError> {
        let semaphore = SemaphoreHandle(self.next_id());
        self.semaphores.insert(semaphore, SemaphoreState::default());
        self.calls.push(DeviceCall::CreateSemaphore(semaphore));
        Ok(semaphore)
    }

    fn destroy_semaphore(&mut self, semaphore: SemaphoreHandle) {
        self.semaphores.remove(&semaphore);
        self.calls.push(DeviceCall::DestroySemaphore(semaphore));
    }

    fn create_descriptor_set(
        &mut self,
        desc: &DescriptorSetDesc,
    ) -> Result<DescriptorSetHandle, GfxError> {
        let set = DescriptorSetHandle(self.next_id());
        self.descriptor_sets.insert(
            set,
            DescriptorSetState {
                desc: desc.clone(),
                bindings: BTreeMap::new(),
            },
        );
        self.calls.push(DeviceCall::CreateDescriptorSet(set));
        Ok(set)
    }

    fn update_descriptor_set(
        &mut self,
        set: DescriptorSetHandle,
        writes: &[DescriptorWrite],
    ) -> Result<(), GfxError> {
        let state = self
            .descriptor_sets
            .get_mut(&set)
            .ok_or(GfxError::UnknownHandle {
                kind: "descriptor set",
                id: set.0,
            })?;
        for write in writes {
            if state.desc.slot(write.binding).is_none() {
                return Err(GfxError::Creation {
                    kind: "descriptor write",
                    label: state.desc.label.clone(),
                    reason: format!("binding {} not in layout", write.binding),
                });
            }
            state.bindings.insert(write.binding, write.resource.clone());
        }
        self.calls.push(DeviceCall::UpdateDescriptorSet(set));
        Ok(())
    }

    fn destroy_descriptor_set(&mut self, set: DescriptorSetHandle) {
        self.descriptor_sets.remove(&set);
        self.calls.push(DeviceCall::DestroyDescriptorSet(set));
    }

    fn create_pipeline(&mut self, desc: &PipelineDesc) -> Result<PipelineHandle, GfxError> {
        let pipeline = PipelineHandle(self.next_id());
        self.pipelines.insert(pipeline, desc.clone());
        self.calls.push(DeviceCall::CreatePipeline(pipeline));
        Ok(pipeline)
    }

    fn destroy_pipeline(&mut self, pipeline: PipelineHandle) {
        self.pipelines.remove(&pipeline);
        self.calls.push(DeviceCall::DestroyPipeline(pipeline));
    }

    fn submit(&mut self, submission: &Submission<'_>) -> Result<(), GfxError> {
        let mut commands = Vec::new();
        let mut stream_labels = Vec::new();
        for stream in submission.streams {
            assert!(
                stream.is_closed(),
                "submitting unclosed stream '{}'",
                stream.label()
            );
            assert_eq!(
                stream.queue(),
                submission.queue,
                "stream '{}' submitted to the wrong queue",
                stream.label()
            );
            stream_labels.push(stream.label().to_string());
            commands.extend_from_slice(stream.commands());
        }
        self.validate_copies(&commands)?;

        for signal in submission.signals.iter().filter(|s| !s.is_none()) {
            let state = self
                .semaphores
                .get_mut(&signal.semaphore)
                .ok_or(GfxError::UnknownHandle {
                    kind: "semaphore",
                    id: signal.semaphore.0,
                })?;
            assert!(
                signal.value > state.submitted,
                "semaphore {} signal value {} is not above {}",
                signal.semaphore.0,
                signal.value,
                state.submitted
            );
            state.submitted = signal.value;
        }

        let (reads, writes) = self.access_sets(&commands);
        let deps = self.dependencies(submission.waits);
        let index = self.submissions.len();
        for &i in &self.pending {
            if deps.contains(&i) {
                continue;
            }
            let pending = &self.submissions[i];
            let conflict = writes
                .iter()
                .find(|r| pending.touches(**r))
                .or_else(|| reads.iter().find(|r| pending.writes.contains(*r)));
            if let Some(resource) = conflict {
                tracing::warn!(?resource, pending_submission = i, index, "write hazard");
                self.hazards.push(Hazard::WriteInFlight {
                    resource: *resource,
                    pending_submission: i,
                });
            }
        }

        tracing::debug!(
            index,
            queue = ?submission.queue,
            commands = commands.len(),
            waits = submission.waits.len(),
            signals = submission.signals.len(),
            "headless submit"
        );
        self.calls.push(DeviceCall::Submit {
            index,
            queue: submission.queue,
            waits: submission.waits.to_vec(),
            signals: submission.signals.to_vec(),
        });
        self.submissions.push(SubmissionRecord {
            index,
            queue: submission.queue,
            stream_labels,
            commands,
            waits: submission.waits.to_vec(),
            signals: submission.signals.to_vec(),
            completed: false,
            reads,
            writes,
        });
        self.pending.push_back(index);
        if self.mode == CompletionMode::Immediate {
            self.drain_ready();
        }
        Ok(())
    }

    fn completed_value(&self, semaphore: SemaphoreHandle) -> u64 {
        self.semaphores
            .get(&semaphore)
            .map(|s| s.completed)
            .unwrap_or(0)
    }

    fn wait_semaphore(&mut self, semaphore: SemaphoreHandle, value: u64) -> Result<(), GfxError> {
        self.calls.push(DeviceCall::Wait { semaphore, value });
        while self.completed_value(semaphore) < value {
            if !self.complete_next() {
                let submitted = self
                    .semaphores
                    .get(&semaphore)
                    .map(|s| s.submitted)
                    .unwrap_or(0);
                return Err(GfxError::WaitNeverSignaled {
                    semaphore: semaphore.0,
                    value,
                    submitted,
                });
            }
        }
        Ok(())
    }

    fn wait_idle(&mut self) -> Result<(), GfxError> {
        self.calls.push(DeviceCall::WaitIdle);
        self.drain_ready();
        match self.pending.front() {
            None => Ok(()),
            Some(&i) => {
                let blocked = self.submissions[i]
                    .waits
                    .iter()
                    .find(|w| self.completed_value(w.semaphore) < w.value)
                    .copied()
                    .unwrap_or(SemaphoreData::NONE);
                Err(GfxError::WaitNeverSignaled {
                    semaphore: blocked.semaphore.0,
                    value: blocked.value,
                    submitted: self
                        .semaphores
                        .get(&blocked.semaphore)
                        .map(|s| s.submitted)
                        .unwrap_or(0),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandStream;
    use crate::descriptor::{DescriptorKind, DescriptorSlot};
    use crate::resource::BufferUsage;

    fn buffer(device: &mut HeadlessDevice, size: u64) -> BufferHandle {
        device
            .create_buffer(&BufferDesc {
                label: "b".into(),
                size,
                usage: BufferUsage::Storage,
            })
            .unwrap()
    }

    fn copy_stream(dst: BufferHandle, data: &[u8]) -> CommandStream {
        let mut stream = CommandStream::new(QueueKind::Transfer, "copy");
        stream.copy_buffer(dst, 0, data);
        stream.close();
        stream
    }

    fn submit(
        device: &mut HeadlessDevice,
        stream: &CommandStream,
        waits: &[SemaphoreData],
        signals: &[SemaphoreData],
    ) {
        device
            .submit(&Submission {
                queue: stream.queue(),
                streams: &[stream],
                waits,
                signals,
            })
            .unwrap();
    }

    #[test]
    fn handles_are_unique_and_nonzero() {
        let mut device = HeadlessDevice::new();
        let a = buffer(&mut device, 4);
        let b = buffer(&mut device, 4);
        assert_ne!(a, b);
        assert!(!a.is_null());
        device.destroy_buffer(a);
        let c = buffer(&mut device, 4);
        assert_ne!(a, c);
        assert!(!device.is_buffer_alive(a));
    }

    #[test]
    fn manual_mode_defers_copies() {
        let mut device = HeadlessDevice::with_mode(CompletionMode::Manual);
        let b = buffer(&mut device, 4);
        let sem = device.create_semaphore("s").unwrap();
        submit(
            &mut device,
            &copy_stream(b, &[1, 2, 3, 4]),
            &[],
            &[SemaphoreData::new(sem, 1)],
        );
        assert_eq!(device.read_buffer(b).unwrap(), &[0, 0, 0, 0]);
        assert_eq!(device.completed_value(sem), 0);
        assert_eq!(device.advance(1), 1);
        assert_eq!(device.read_buffer(b).unwrap(), &[1, 2, 3, 4]);
        assert_eq!(device.completed_value(sem), 1);
    }

    #[test]
    fn submission_waits_for_dependency() {
        let mut device = HeadlessDevice::with_mode(CompletionMode::Manual);
        let b = buffer(&mut device, 4);
        let copy = device.create_semaphore("copy").unwrap();
        let other = device.create_semaphore("other").unwrap();

        // Second submission waits on a value the first never signals yet.
        submit(
            &mut device,
            &copy_stream(b, &[9; 4]),
            &[SemaphoreData::new(copy, 1)],
            &[SemaphoreData::new(other, 1)],
        );
        assert_eq!(device.complete_all(), 0);
        let mut signal = CommandStream::new(QueueKind::Transfer, "signal");
        signal.close();
        submit(&mut device, &signal, &[], &[SemaphoreData::new(copy, 1)]);
        assert_eq!(device.complete_all(), 2);
        assert_eq!(device.completed_value(other), 1);
    }

    #[test]
    fn wait_forces_progress() {
        let mut device = HeadlessDevice::with_mode(CompletionMode::Manual);
        let b = buffer(&mut device, 4);
        let sem = device.create_semaphore("s").unwrap();
        submit(
            &mut device,
            &copy_stream(b, &[7; 4]),
            &[],
            &[SemaphoreData::new(sem, 1)],
        );
        device.wait_semaphore(sem, 1).unwrap();
        assert_eq!(device.pending_count(), 0);
        let err = device.wait_semaphore(sem, 2).unwrap_err();
        assert!(matches!(
            err,
            GfxError::WaitNeverSignaled {
                value: 2,
                submitted: 1,
                ..
            }
        ));
    }

    #[test]
    fn unordered_write_is_a_hazard() {
        let mut device = HeadlessDevice::with_mode(CompletionMode::Manual);
        let b = buffer(&mut device, 4);
        submit(&mut device, &copy_stream(b, &[1; 4]), &[], &[]);
        submit(&mut device, &copy_stream(b, &[2; 4]), &[], &[]);
        assert_eq!(
            device.hazards(),
            &[Hazard::WriteInFlight {
                resource: ResourceRef::Buffer(b),
                pending_submission: 0
            }]
        );
    }

    #[test]
    fn ordered_write_is_not_a_hazard() {
        let mut device = HeadlessDevice::with_mode(CompletionMode::Manual);
        let b = buffer(&mut device, 4);
        let sem = device.create_semaphore("s").unwrap();
        submit(
            &mut device,
            &copy_stream(b, &[1; 4]),
            &[],
            &[SemaphoreData::new(sem, 1)],
        );
        submit(
            &mut device,
            &copy_stream(b, &[2; 4]),
            &[SemaphoreData::new(sem, 1)],
            &[],
        );
        assert!(device.hazards().is_empty());
        device.complete_all();
        assert_eq!(device.read_buffer(b).unwrap(), &[2; 4]);
    }

    #[test]
    fn destroy_in_flight_is_a_hazard() {
        let mut device = HeadlessDevice::with_mode(CompletionMode::Manual);
        let b = buffer(&mut device, 4);
        submit(&mut device, &copy_stream(b, &[1; 4]), &[], &[]);
        device.destroy_buffer(b);
        assert!(matches!(
            device.hazards()[0],
            Hazard::DestroyInFlight {
                resource: ResourceRef::Buffer(_),
                ..
            }
        ));
    }

    #[test]
    fn memory_budget_reports_oom() {
        let mut device = HeadlessDevice::new().with_memory_budget(16);
        let a = buffer(&mut device, 12);
        let err = device
            .create_buffer(&BufferDesc {
                label: "big".into(),
                size: 8,
                usage: BufferUsage::Uniform,
            })
            .unwrap_err();
        assert!(matches!(err, GfxError::OutOfMemory { size: 8, .. }));
        device.destroy_buffer(a);
        assert_eq!(device.memory_used(), 0);
    }

    #[test]
    fn descriptor_writes_follow_layout() {
        let mut device = HeadlessDevice::new();
        let b = buffer(&mut device, 16);
        let set = device
            .create_descriptor_set(&DescriptorSetDesc {
                label: "pass".into(),
                slots: vec![DescriptorSlot::new(0, DescriptorKind::UniformBuffer)],
            })
            .unwrap();
        device
            .update_descriptor_set(set, &[DescriptorWrite::buffer(0, b)])
            .unwrap();
        assert_eq!(
            device.descriptor_writes(set).unwrap().get(&0),
            Some(&DescriptorResource::Buffer(b))
        );
        assert!(
            device
                .update_descriptor_set(set, &[DescriptorWrite::buffer(3, b)])
                .is_err()
        );
    }

    #[test]
    #[should_panic(expected = "is not above")]
    fn signal_values_must_grow() {
        let mut device = HeadlessDevice::new();
        let sem = device.create_semaphore("s").unwrap();
        let mut s = CommandStream::new(QueueKind::Graphics, "g");
        s.close();
        submit(&mut device, &s, &[], &[SemaphoreData::new(sem, 2)]);
        submit(&mut device, &s, &[], &[SemaphoreData::new(sem, 2)]);
    }
}
