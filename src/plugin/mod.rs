//! Execute hook
//!
//! A [`Kernel`] is an optional numeric routine handed to the service at
//! construction. When no kernel was supplied (or the native library could
//! not be resolved) `Execute` answers with an "unavailable" status and the
//! rest of the service is unaffected.

pub mod loader;
pub mod traits;

pub use loader::{load_kernel, NativeQr};
pub use traits::{Kernel, KernelError, KernelOutput};
