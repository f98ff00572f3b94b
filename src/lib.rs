// RCK - Remote Computation Kernel
// A remote heap for typed numeric buffers

#![warn(rust_2018_idioms)]

pub mod config;
pub mod heap;
pub mod network;
pub mod plugin;
pub mod service;

// Re-exports for convenience
pub use config::RckConfig;
pub use heap::{BufferStore, DType, SlotId};
pub use plugin::{Kernel, KernelOutput};
pub use service::{HeapService, Status};

/// RCK error types
pub mod error {
    use crate::heap::HeapError;
    use crate::plugin::KernelError;
    use thiserror::Error;

    #[derive(Error, Debug)]
    pub enum Error {
        #[error(transparent)]
        Heap(#[from] HeapError),

        #[error("id {0} does not name a slot")]
        UnknownId(i64),

        #[error("expected a rank {expected} slot, found rank {actual}")]
        RankMismatch { expected: usize, actual: usize },

        #[error("Invalid argument: {0}")]
        InvalidArgument(String),

        #[error("no execute kernel is installed")]
        Unavailable,

        #[error(transparent)]
        Kernel(#[from] KernelError),
    }

    pub type Result<T> = std::result::Result<T, Error>;
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
