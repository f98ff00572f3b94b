//! Heap service façade
//!
//! One method per client-visible primitive. Each method validates the raw
//! request arguments, takes the store lock, makes exactly one store call
//! and releases the lock. The lock is never held across I/O or an await,
//! so `reset` is atomic with respect to every other operation.
//!
//! ```text
//! transport ─→ HeapService ─→ Mutex<BufferStore> ─→ SlotTable
//!                  │                              └→ codec
//!                  └─→ Option<Arc<dyn Kernel>>   (Execute hook)
//! ```

pub mod metrics;
pub mod status;

pub use metrics::HeapMetrics;
pub use status::Status;

use crate::error::{Error, Result};
use crate::heap::{BufferStore, DType, Element, HeapStats, SlotId};
use crate::plugin::{Kernel, KernelOutput};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Shape and contents returned by a typed receive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Received<T> {
    pub shape: Vec<usize>,
    pub data: Vec<T>,
}

/// The remote heap as seen by the transport
pub struct HeapService {
    store: Mutex<BufferStore>,
    kernel: Option<Arc<dyn Kernel>>,
    metrics: HeapMetrics,
}

impl std::fmt::Debug for HeapService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeapService")
            .field("kernel", &self.kernel.as_ref().map(|k| k.name().to_string()))
            .finish()
    }
}

impl HeapService {
    pub fn new(store: BufferStore, kernel: Option<Arc<dyn Kernel>>) -> prometheus::Result<Self> {
        Ok(Self {
            store: Mutex::new(store),
            kernel,
            metrics: HeapMetrics::new()?,
        })
    }

    /// Unlimited store, no execute kernel
    pub fn with_defaults() -> prometheus::Result<Self> {
        Self::new(BufferStore::new(), None)
    }

    pub fn has_kernel(&self) -> bool {
        self.kernel.is_some()
    }

    /// Lock the store, run `f`, refresh the heap gauges and count the
    /// outcome under `op`
    fn with_store<R>(&self, op: &'static str, f: impl FnOnce(&mut BufferStore) -> Result<R>) -> Result<R> {
        let mut store = self.store.lock();
        let result = f(&mut store);
        self.metrics.observe_heap(&store.stats());
        drop(store);

        let status = Status::from(&result);
        self.metrics.record(op, status);
        if let Err(e) = &result {
            debug!(op, status = %status, error = %e, "Request rejected");
        }
        result
    }

    /// Drop every slot and restart ids at 0; always succeeds
    pub fn reset(&self) {
        // The closure cannot fail.
        let _ = self.with_store("reset", |store| {
            store.reset_all();
            Ok(())
        });
    }

    pub fn allocate_variable(&self, dtype: i32, shape: &[i64]) -> Result<SlotId> {
        let parsed = DType::try_from(dtype).map_err(Error::from).and_then(|dtype| {
            let shape = parse_shape(shape)?;
            Ok((dtype, shape))
        });

        self.with_store("allocate_variable", |store| {
            let (dtype, shape) = parsed?;
            Ok(store.allocate(dtype, shape)?)
        })
    }

    pub fn free_variable(&self, id: i64) -> Result<()> {
        self.with_store("free_variable", |store| {
            let id = parse_id(id)?;
            Ok(store.free(id)?)
        })
    }

    /// Overwrite a slot with `values`; the three typed entry points below
    /// all land here
    pub fn send<T: Element>(&self, op: &'static str, id: i64, values: &[T]) -> Result<()> {
        self.with_store(op, |store| {
            let id = parse_id(id)?;
            Ok(store.write(id, values)?)
        })
    }

    pub fn recv<T: Element>(&self, op: &'static str, id: i64) -> Result<Received<T>> {
        self.with_store(op, |store| {
            let id = parse_id(id)?;
            let (shape, data) = store.read::<T>(id)?;
            Ok(Received { shape, data })
        })
    }

    pub fn send_int(&self, id: i64, values: &[i32]) -> Result<()> {
        self.send("send_int", id, values)
    }

    pub fn send_flt(&self, id: i64, values: &[f32]) -> Result<()> {
        self.send("send_flt", id, values)
    }

    pub fn send_dbl(&self, id: i64, values: &[f64]) -> Result<()> {
        self.send("send_dbl", id, values)
    }

    pub fn recv_int(&self, id: i64) -> Result<Received<i32>> {
        self.recv("recv_int", id)
    }

    pub fn recv_flt(&self, id: i64) -> Result<Received<f32>> {
        self.recv("recv_flt", id)
    }

    pub fn recv_dbl(&self, id: i64) -> Result<Received<f64>> {
        self.recv("recv_dbl", id)
    }

    /// Run the execute kernel in place over a Float64 matrix slot
    ///
    /// Without a kernel this reports [`Error::Unavailable`] and touches
    /// nothing.
    pub fn execute(&self, id: i64) -> Result<KernelOutput> {
        self.with_store("execute", |store| {
            let kernel = self.kernel.as_ref().ok_or(Error::Unavailable)?;
            let id = parse_id(id)?;

            store.with_elements_mut::<f64, _>(id, |shape, data| match shape {
                &[rows, cols] => {
                    debug!(id = %id, kernel = kernel.name(), rows, cols, "Executing kernel");
                    kernel.execute(rows, cols, data).map_err(Error::from)
                }
                _ => Err(Error::RankMismatch {
                    expected: 2,
                    actual: shape.len(),
                }),
            })?
        })
    }

    pub fn stats(&self) -> HeapStats {
        self.store.lock().stats()
    }

    pub fn is_live(&self, id: i64) -> bool {
        SlotId::from_wire(id).is_some_and(|id| self.store.lock().is_live(id))
    }

    pub fn metrics(&self) -> &HeapMetrics {
        &self.metrics
    }

    pub fn export_metrics(&self) -> String {
        self.metrics.export()
    }
}

fn parse_id(id: i64) -> Result<SlotId> {
    SlotId::from_wire(id).ok_or(Error::UnknownId(id))
}

fn parse_shape(shape: &[i64]) -> Result<Vec<usize>> {
    shape
        .iter()
        .map(|&dim| {
            usize::try_from(dim)
                .map_err(|_| Error::InvalidArgument(format!("dimension {} out of range in {:?}", dim, shape)))
        })
        .collect()
}
