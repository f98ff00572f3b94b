//! Transfer codec: moving flat value sequences in and out of typed buffers
//!
//! Values travel as one linear sequence in row-major order over the slot's
//! recorded shape. The same order is used in both directions, so whatever
//! a client writes it reads back unchanged.

use super::buffer::Buffer;
use super::dtype::DType;
use super::slot::Slot;
use super::HeapError;

mod sealed {
    pub trait Sealed {}
    impl Sealed for i32 {}
    impl Sealed for f32 {}
    impl Sealed for f64 {}
}

/// Element types that can be transferred to and from a [`Buffer`]
pub trait Element: sealed::Sealed + Copy + Default + Send + Sync + 'static {
    /// The dtype tag this element type corresponds to
    const DTYPE: DType;

    fn view(buffer: &Buffer) -> Option<&[Self]>;

    fn view_mut(buffer: &mut Buffer) -> Option<&mut [Self]>;
}

impl Element for i32 {
    const DTYPE: DType = DType::Int32;

    fn view(buffer: &Buffer) -> Option<&[Self]> {
        match buffer {
            Buffer::Int32(data) => Some(data),
            _ => None,
        }
    }

    fn view_mut(buffer: &mut Buffer) -> Option<&mut [Self]> {
        match buffer {
            Buffer::Int32(data) => Some(data),
            _ => None,
        }
    }
}

impl Element for f32 {
    const DTYPE: DType = DType::Float32;

    fn view(buffer: &Buffer) -> Option<&[Self]> {
        match buffer {
            Buffer::Float32(data) => Some(data),
            _ => None,
        }
    }

    fn view_mut(buffer: &mut Buffer) -> Option<&mut [Self]> {
        match buffer {
            Buffer::Float32(data) => Some(data),
            _ => None,
        }
    }
}

impl Element for f64 {
    const DTYPE: DType = DType::Float64;

    fn view(buffer: &Buffer) -> Option<&[Self]> {
        match buffer {
            Buffer::Float64(data) => Some(data),
            _ => None,
        }
    }

    fn view_mut(buffer: &mut Buffer) -> Option<&mut [Self]> {
        match buffer {
            Buffer::Float64(data) => Some(data),
            _ => None,
        }
    }
}

fn dtype_mismatch<T: Element>(slot: &Slot) -> HeapError {
    HeapError::DtypeMismatch {
        expected: slot.dtype(),
        actual: T::DTYPE,
    }
}

/// Overwrite the whole slot buffer with `values`
///
/// Checks the dtype first, then the element count; on any error the
/// buffer is left untouched.
pub fn unflatten_into<T: Element>(slot: &mut Slot, values: &[T]) -> Result<(), HeapError> {
    let mismatch = dtype_mismatch::<T>(slot);
    let target = T::view_mut(slot.buffer_mut()).ok_or(mismatch)?;
    if target.len() != values.len() {
        return Err(HeapError::ShapeMismatch {
            expected: target.len(),
            actual: values.len(),
        });
    }
    target.copy_from_slice(values);
    Ok(())
}

/// Copy the slot contents out as a flat sequence
pub fn flatten<T: Element>(slot: &Slot) -> Result<Vec<T>, HeapError> {
    T::view(slot.buffer())
        .map(<[T]>::to_vec)
        .ok_or_else(|| dtype_mismatch::<T>(slot))
}
