//! Opaque device handles.
//!
//! Handles are plain `u32` ids issued by a [`crate::GpuDevice`]. Id `0` is the
//! null handle and is never issued, so a zeroed struct means "nothing".

macro_rules! device_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        pub struct $name(pub u32);

        impl $name {
            pub const NULL: Self = Self(0);

            pub fn is_null(self) -> bool {
                self.0 == 0
            }
        }
    };
}

device_handle!(
    /// Device buffer allocation.
    BufferHandle
);
device_handle!(
    /// Device texture allocation (image + default view).
    TextureHandle
);
device_handle!(
    /// Timeline semaphore.
    SemaphoreHandle
);
device_handle!(
    /// Compiled graphics pipeline.
    PipelineHandle
);
device_handle!(
    /// Descriptor set (bind group).
    DescriptorSetHandle
);

/// A semaphore together with a timeline value, used both as "signal this
/// value" and "wait until this value" in submissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SemaphoreData {
    pub semaphore: SemaphoreHandle,
    pub value: u64,
}

impl SemaphoreData {
    /// `{0, 0}`: no semaphore. Waiting on it is a no-op.
    pub const NONE: Self = Self {
        semaphore: SemaphoreHandle::NULL,
        value: 0,
    };

    pub fn new(semaphore: SemaphoreHandle, value: u64) -> Self {
        Self { semaphore, value }
    }

    pub fn is_none(&self) -> bool {
        self.semaphore.is_null()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_handles() {
        assert!(BufferHandle::NULL.is_null());
        assert!(BufferHandle::default().is_null());
        assert!(!TextureHandle(3).is_null());
    }

    #[test]
    fn semaphore_data_none() {
        assert!(SemaphoreData::NONE.is_none());
        assert!(SemaphoreData::default().is_none());
        assert!(!SemaphoreData::new(SemaphoreHandle(1), 0).is_none());
    }
}
