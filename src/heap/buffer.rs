//! Owned, zero-initialised typed buffers

use super::dtype::DType;
use super::HeapError;

/// Contiguous storage for one slot
///
/// Each variant owns its elements; dropping the buffer returns the memory.
#[derive(Debug, Clone, PartialEq)]
pub enum Buffer {
    Int32(Vec<i32>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
}

impl Buffer {
    /// Allocate `count` zeroed elements of `dtype`
    ///
    /// Uses fallible reservation so an exhausted allocator surfaces as
    /// `AllocationFailure` instead of aborting the process.
    pub fn zeroed(dtype: DType, count: usize) -> Result<Self, HeapError> {
        match dtype {
            DType::Int32 => zeroed_vec::<i32>(count).map(Buffer::Int32),
            DType::Float32 => zeroed_vec::<f32>(count).map(Buffer::Float32),
            DType::Float64 => zeroed_vec::<f64>(count).map(Buffer::Float64),
        }
    }

    pub fn dtype(&self) -> DType {
        match self {
            Buffer::Int32(_) => DType::Int32,
            Buffer::Float32(_) => DType::Float32,
            Buffer::Float64(_) => DType::Float64,
        }
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        match self {
            Buffer::Int32(v) => v.len(),
            Buffer::Float32(v) => v.len(),
            Buffer::Float64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn byte_len(&self) -> usize {
        self.len() * self.dtype().element_size()
    }
}

fn zeroed_vec<T: Copy + Default>(count: usize) -> Result<Vec<T>, HeapError> {
    let mut data = Vec::new();
    data.try_reserve_exact(count).map_err(|e| {
        HeapError::AllocationFailure(format!(
            "cannot reserve {} elements of {} bytes: {}",
            count,
            std::mem::size_of::<T>(),
            e
        ))
    })?;
    data.resize(count, T::default());
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zeroed_buffers() {
        let buf = Buffer::zeroed(DType::Int32, 4).unwrap();
        assert_eq!(buf, Buffer::Int32(vec![0; 4]));
        assert_eq!(buf.byte_len(), 16);

        let buf = Buffer::zeroed(DType::Float64, 3).unwrap();
        assert_eq!(buf, Buffer::Float64(vec![0.0; 3]));
        assert_eq!(buf.dtype(), DType::Float64);
        assert_eq!(buf.byte_len(), 24);
    }

    #[test]
    fn test_empty_buffer() {
        let buf = Buffer::zeroed(DType::Float32, 0).unwrap();
        assert!(buf.is_empty());
        assert_eq!(buf.byte_len(), 0);
    }

    #[test]
    fn test_impossible_reservation_fails() {
        let err = Buffer::zeroed(DType::Float64, usize::MAX / 2).unwrap_err();
        assert!(matches!(err, HeapError::AllocationFailure(_)));
    }
}
