use crate::device::GpuDevice;
use crate::error::GfxError;
use crate::handle::{SemaphoreData, SemaphoreHandle};

/// Timeline semaphore with a host-side counter of the last value handed out
/// for signaling.
#[derive(Debug)]
pub struct TimelineSemaphore {
    handle: SemaphoreHandle,
    last_signal: u64,
}

impl TimelineSemaphore {
    pub fn create(device: &mut dyn GpuDevice, label: &str) -> Result<Self, GfxError> {
        let handle = device.create_semaphore(label)?;
        Ok(Self {
            handle,
            last_signal: 0,
        })
    }

    pub fn handle(&self) -> SemaphoreHandle {
        self.handle
    }

    /// Value most recently returned by [`Self::next_signal`]; 0 if never signaled.
    pub fn last_signal(&self) -> u64 {
        self.last_signal
    }

    /// Reserve the next timeline value for a submission to signal.
    pub fn next_signal(&mut self) -> SemaphoreData {
        self.last_signal += 1;
        SemaphoreData::new(self.handle, self.last_signal)
    }

    /// The last reserved value as a wait target. `value == 0` when nothing
    /// has been signaled yet, which makes the wait a no-op.
    pub fn current(&self) -> SemaphoreData {
        SemaphoreData::new(self.handle, self.last_signal)
    }

    /// Block until the GPU reached `value`. Values of 0 and values that
    /// already completed return immediately.
    pub fn wait_until(&self, device: &mut dyn GpuDevice, value: u64) -> Result<(), GfxError> {
        if value == 0 || device.completed_value(self.handle) >= value {
            return Ok(());
        }
        tracing::trace!(semaphore = self.handle.0, value, "waiting on timeline");
        device.wait_semaphore(self.handle, value)
    }

    /// Block until every value handed out so far has completed.
    pub fn wait_last(&self, device: &mut dyn GpuDevice) -> Result<(), GfxError> {
        self.wait_until(device, self.last_signal)
    }

    pub fn destroy(self, device: &mut dyn GpuDevice) {
        device.destroy_semaphore(self.handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::{CompletionMode, DeviceCall, HeadlessDevice};

    #[test]
    fn next_signal_increments() {
        let mut device = HeadlessDevice::new();
        let mut sem = TimelineSemaphore::create(&mut device, "frame").unwrap();
        assert_eq!(sem.current().value, 0);
        assert_eq!(sem.next_signal().value, 1);
        assert_eq!(sem.next_signal().value, 2);
        assert_eq!(sem.last_signal(), 2);
        assert_eq!(sem.current().semaphore, sem.handle());
    }

    #[test]
    fn zero_wait_skips_device() {
        let mut device = HeadlessDevice::with_mode(CompletionMode::Manual);
        let sem = TimelineSemaphore::create(&mut device, "frame").unwrap();
        sem.wait_until(&mut device, 0).unwrap();
        assert!(
            !device
                .calls()
                .iter()
                .any(|c| matches!(c, DeviceCall::Wait { .. }))
        );
    }

    #[test]
    fn waiting_on_unsubmitted_value_errors() {
        let mut device = HeadlessDevice::with_mode(CompletionMode::Manual);
        let sem = TimelineSemaphore::create(&mut device, "frame").unwrap();
        let err = sem.wait_until(&mut device, 5).unwrap_err();
        assert!(matches!(err, GfxError::WaitNeverSignaled { value: 5, .. }));
    }
}
