//! Element type tags for heap buffers

use serde::{Deserialize, Serialize};
use std::fmt;

/// Wire tag for 32-bit signed integers
pub const TAG_INT32: i32 = 3;
/// Wire tag for 32-bit floats
pub const TAG_FLOAT32: i32 = 5;
/// Wire tag for 64-bit floats
pub const TAG_FLOAT64: i32 = 6;

/// Element type of a slot buffer
///
/// The numeric tags are the ones existing clients already send, so they
/// must never be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    Int32,
    Float32,
    Float64,
}

impl DType {
    /// Decode a wire tag, `None` for anything outside the closed set
    pub fn from_tag(tag: i32) -> Option<Self> {
        match tag {
            TAG_INT32 => Some(DType::Int32),
            TAG_FLOAT32 => Some(DType::Float32),
            TAG_FLOAT64 => Some(DType::Float64),
            _ => None,
        }
    }

    pub fn tag(self) -> i32 {
        match self {
            DType::Int32 => TAG_INT32,
            DType::Float32 => TAG_FLOAT32,
            DType::Float64 => TAG_FLOAT64,
        }
    }

    /// Size of one element in bytes
    pub fn element_size(self) -> usize {
        match self {
            DType::Int32 => std::mem::size_of::<i32>(),
            DType::Float32 => std::mem::size_of::<f32>(),
            DType::Float64 => std::mem::size_of::<f64>(),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DType::Int32 => "int32",
            DType::Float32 => "float32",
            DType::Float64 => "float64",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_historical_tags() {
        assert_eq!(DType::Int32.tag(), 3);
        assert_eq!(DType::Float32.tag(), 5);
        assert_eq!(DType::Float64.tag(), 6);

        for dtype in [DType::Int32, DType::Float32, DType::Float64] {
            assert_eq!(DType::from_tag(dtype.tag()), Some(dtype));
        }
    }

    #[test]
    fn test_unknown_tags_rejected() {
        for tag in [-1, 0, 1, 2, 4, 7, 100] {
            assert_eq!(DType::from_tag(tag), None, "tag {} should be rejected", tag);
        }
    }

    #[test]
    fn test_element_sizes() {
        assert_eq!(DType::Int32.element_size(), 4);
        assert_eq!(DType::Float32.element_size(), 4);
        assert_eq!(DType::Float64.element_size(), 8);
    }
}
