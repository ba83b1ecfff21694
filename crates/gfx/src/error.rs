/// Errors reported by a [`crate::GpuDevice`].
///
/// None of these are recoverable for the frame graph: a failed allocation or a
/// lost device leaves GPU state inconsistent, so callers propagate them to the
/// application, which shuts down.
#[derive(Debug, thiserror::Error)]
pub enum GfxError {
    #[error("out of device memory allocating {size} bytes for '{label}'")]
    OutOfMemory { label: String, size: u64 },
    #[error("failed to create {kind} '{label}': {reason}")]
    Creation {
        kind: &'static str,
        label: String,
        reason: String,
    },
    #[error("unknown {kind} handle {id}")]
    UnknownHandle { kind: &'static str, id: u32 },
    #[error("semaphore {semaphore} cannot reach value {value} (last submitted signal {submitted})")]
    WaitNeverSignaled {
        semaphore: u32,
        value: u64,
        submitted: u64,
    },
    #[error("device lost: {0}")]
    DeviceLost(String),
    #[error("unsupported by backend: {0}")]
    Unsupported(String),
}
