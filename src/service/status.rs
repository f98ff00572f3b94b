//! Stable status codes reported to clients
//!
//! [`Status`] is a `repr(i32)` enum. `Ok` is 0 and every failure kind has
//! its own positive value that never changes for the lifetime of the
//! protocol.

use crate::error::Error;
use crate::heap::HeapError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Status code returned with every response
#[repr(i32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Status {
    /// Success.
    Ok = 0,
    /// The id does not name a live slot.
    InvalidId = 1,
    /// The dtype tag is outside Int32/Float32/Float64.
    UnsupportedDtype = 2,
    /// Backing memory could not be obtained.
    AllocationFailure = 3,
    /// Payload element count (or matrix rank) disagrees with the slot.
    ShapeMismatch = 4,
    /// Requested dtype disagrees with the slot's dtype.
    DtypeMismatch = 5,
    /// Malformed request, e.g. a negative dimension.
    InvalidArgument = 6,
    /// No execute kernel is installed.
    Unavailable = 7,
    /// The execute kernel reported an error.
    KernelFailed = 8,
}

impl Status {
    pub const ALL: [Status; 9] = [
        Status::Ok,
        Status::InvalidId,
        Status::UnsupportedDtype,
        Status::AllocationFailure,
        Status::ShapeMismatch,
        Status::DtypeMismatch,
        Status::InvalidArgument,
        Status::Unavailable,
        Status::KernelFailed,
    ];

    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.code() == code)
    }

    pub fn is_ok(self) -> bool {
        self == Status::Ok
    }

    /// Label used in metrics and logs
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Ok => "ok",
            Status::InvalidId => "invalid_id",
            Status::UnsupportedDtype => "unsupported_dtype",
            Status::AllocationFailure => "allocation_failure",
            Status::ShapeMismatch => "shape_mismatch",
            Status::DtypeMismatch => "dtype_mismatch",
            Status::InvalidArgument => "invalid_argument",
            Status::Unavailable => "unavailable",
            Status::KernelFailed => "kernel_failed",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.as_str(), self.code())
    }
}

impl Serialize for Status {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i32(self.code())
    }
}

impl<'de> Deserialize<'de> for Status {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = i32::deserialize(deserializer)?;
        Status::from_code(code)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown status code {}", code)))
    }
}

impl From<&HeapError> for Status {
    fn from(e: &HeapError) -> Self {
        match e {
            HeapError::InvalidId(_) => Status::InvalidId,
            HeapError::UnsupportedDtype(_) => Status::UnsupportedDtype,
            HeapError::AllocationFailure(_) => Status::AllocationFailure,
            HeapError::ShapeMismatch { .. } => Status::ShapeMismatch,
            HeapError::DtypeMismatch { .. } => Status::DtypeMismatch,
        }
    }
}

impl From<&Error> for Status {
    fn from(e: &Error) -> Self {
        match e {
            Error::Heap(e) => Status::from(e),
            Error::UnknownId(_) => Status::InvalidId,
            Error::RankMismatch { .. } => Status::ShapeMismatch,
            Error::InvalidArgument(_) => Status::InvalidArgument,
            Error::Unavailable => Status::Unavailable,
            Error::Kernel(_) => Status::KernelFailed,
        }
    }
}

impl<T> From<&crate::error::Result<T>> for Status {
    fn from(result: &crate::error::Result<T>) -> Self {
        match result {
            Ok(_) => Status::Ok,
            Err(e) => Status::from(e),
        }
    }
}
