//! Frame-in-flight bookkeeping.
//!
//! Every renderer keeps one copy of its mutable per-frame state per
//! frame-in-flight slot in a [`FrameRing`]. A slot is only reused after
//! [`FrameSync::begin_frame`] has waited for the GPU to finish the slot's
//! previous submission.

use strata_gfx::{
    CommandStream, GfxError, GpuDevice, QueueKind, SemaphoreData, SemaphoreHandle, Submission,
    TimelineSemaphore,
};

/// Cycles the frame-in-flight index for the application loop.
#[derive(Debug, Clone)]
pub struct FrameCounter {
    frames: usize,
    index: usize,
    frame_number: u64,
}

impl FrameCounter {
    pub fn new(frames: usize) -> Self {
        assert!(frames > 0, "frames in flight must be positive");
        Self {
            frames,
            index: 0,
            frame_number: 0,
        }
    }

    /// Slot for the frame about to be recorded.
    pub fn current(&self) -> usize {
        self.index
    }

    /// Number of frames advanced past so far.
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frames
    }

    /// Move to the next slot and return it.
    pub fn advance(&mut self) -> usize {
        self.index = (self.index + 1) % self.frames;
        self.frame_number += 1;
        self.index
    }
}

/// One value per frame-in-flight slot.
#[derive(Debug)]
pub struct FrameRing<T> {
    slots: Vec<T>,
}

impl<T> FrameRing<T> {
    pub fn try_new<E>(
        frames: usize,
        mut make: impl FnMut(usize) -> Result<T, E>,
    ) -> Result<Self, E> {
        assert!(frames > 0, "frames in flight must be positive");
        let slots = (0..frames).map(&mut make).collect::<Result<Vec<_>, E>>()?;
        Ok(Self { slots })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Panics when `frame` is not a valid slot index.
    pub fn get(&self, frame: usize) -> &T {
        assert!(
            frame < self.slots.len(),
            "frame index {frame} out of range for {} frames in flight",
            self.slots.len()
        );
        &self.slots[frame]
    }

    pub fn get_mut(&mut self, frame: usize) -> &mut T {
        assert!(
            frame < self.slots.len(),
            "frame index {frame} out of range for {} frames in flight",
            self.slots.len()
        );
        &mut self.slots[frame]
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.slots.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.slots.iter_mut()
    }

    pub fn into_vec(self) -> Vec<T> {
        self.slots
    }
}

/// Command streams and timeline semaphores of one frame slot.
///
/// The copy stream goes to the transfer queue and signals `copy_semaphore`;
/// the graphics stream waits on that signal (when a copy was submitted) and
/// signals `graphics_semaphore`, whose last value gates reuse of the slot.
#[derive(Debug)]
pub struct FrameSync {
    pub graphics: CommandStream,
    pub copy: CommandStream,
    graphics_semaphore: TimelineSemaphore,
    copy_semaphore: TimelineSemaphore,
    pending_copy: Option<SemaphoreData>,
}

impl FrameSync {
    pub fn create(device: &mut dyn GpuDevice, label: &str) -> Result<Self, GfxError> {
        Ok(Self {
            graphics: CommandStream::new(QueueKind::Graphics, format!("{label}-graphics")),
            copy: CommandStream::new(QueueKind::Transfer, format!("{label}-copy")),
            graphics_semaphore: TimelineSemaphore::create(device, &format!("{label}-graphics"))?,
            copy_semaphore: TimelineSemaphore::create(device, &format!("{label}-copy"))?,
            pending_copy: None,
        })
    }

    /// Wait until the GPU finished this slot's previous use, then reopen both
    /// streams for recording.
    pub fn begin_frame(&mut self, device: &mut dyn GpuDevice) -> Result<(), GfxError> {
        self.graphics_semaphore.wait_last(device)?;
        self.copy_semaphore.wait_last(device)?;
        self.graphics.reset();
        self.copy.reset();
        self.pending_copy = None;
        Ok(())
    }

    /// Submit the copy stream if anything was recorded into it.
    pub fn submit_copy(&mut self, device: &mut dyn GpuDevice) -> Result<bool, GfxError> {
        if self.copy.is_empty() {
            return Ok(false);
        }
        self.copy.close();
        let signal = self.copy_semaphore.next_signal();
        device.submit(&Submission {
            queue: QueueKind::Transfer,
            streams: &[&self.copy],
            waits: &[],
            signals: &[signal],
        })?;
        self.pending_copy = Some(signal);
        Ok(true)
    }

    /// Close and submit the graphics stream. Waits on every non-empty entry
    /// of `waits` plus this frame's copy, and returns the new signal.
    pub fn submit_graphics(
        &mut self,
        device: &mut dyn GpuDevice,
        waits: &[SemaphoreData],
    ) -> Result<SemaphoreData, GfxError> {
        self.graphics.close();
        let mut all_waits: Vec<SemaphoreData> = waits
            .iter()
            .copied()
            .filter(|w| !w.is_none() && w.value > 0)
            .collect();
        all_waits.extend(self.pending_copy);
        let signal = self.graphics_semaphore.next_signal();
        device.submit(&Submission {
            queue: QueueKind::Graphics,
            streams: &[&self.graphics],
            waits: &all_waits,
            signals: &[signal],
        })?;
        Ok(signal)
    }

    pub fn copy_submitted(&self) -> bool {
        self.pending_copy.is_some()
    }

    pub fn signal_semaphore(&self) -> SemaphoreHandle {
        self.graphics_semaphore.handle()
    }

    /// Last graphics signal of this slot.
    pub fn last_signal(&self) -> SemaphoreData {
        self.graphics_semaphore.current()
    }

    /// True when the GPU finished everything submitted from this slot.
    pub fn is_idle(&self, device: &dyn GpuDevice) -> bool {
        device.completed_value(self.graphics_semaphore.handle()) >= self.graphics_semaphore.last_signal()
            && device.completed_value(self.copy_semaphore.handle()) >= self.copy_semaphore.last_signal()
    }

    pub fn wait_idle(&self, device: &mut dyn GpuDevice) -> Result<(), GfxError> {
        self.graphics_semaphore.wait_last(device)?;
        self.copy_semaphore.wait_last(device)
    }

    pub fn destroy(self, device: &mut dyn GpuDevice) {
        self.graphics_semaphore.destroy(device);
        self.copy_semaphore.destroy(device);
    }
}
