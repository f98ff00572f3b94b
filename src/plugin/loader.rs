//! Kernel loader - resolves native routines from shared libraries

use super::traits::{Kernel, KernelError, KernelOutput};
use libloading::Library;
use std::ffi::OsStr;
use std::os::raw::c_int;
use std::sync::Arc;

/// `LAPACK_ROW_MAJOR` from lapacke.h
const LAPACK_ROW_MAJOR: c_int = 101;

const DGEQRF_SYMBOL: &[u8] = b"LAPACKE_dgeqrf\0";

type DgeqrfFn = unsafe extern "C" fn(
    matrix_layout: c_int,
    m: c_int,
    n: c_int,
    a: *mut f64,
    lda: c_int,
    tau: *mut f64,
) -> c_int;

/// QR factorization via `LAPACKE_dgeqrf` from a dynamically loaded library
///
/// On return the upper triangle of the matrix holds R and the entries below
/// the diagonal, together with `tau`, encode Q as Householder reflectors.
pub struct NativeQr {
    path: String,
    dgeqrf: DgeqrfFn,
    // Keeps `dgeqrf` valid; must outlive every call through it.
    _library: Library,
}

impl NativeQr {
    /// Open `path` and resolve `LAPACKE_dgeqrf`
    ///
    /// # Safety
    /// This loads external code and runs its initialisers. Only point it at
    /// a trusted LAPACKE build.
    pub fn open<P: AsRef<OsStr>>(path: P) -> Result<Self, KernelError> {
        let lib_path = path.as_ref().to_string_lossy().into_owned();

        // SAFETY: loading a trusted LAPACKE shared object; its initialisers
        // have no preconditions.
        let library = unsafe { Library::new(path.as_ref()) }.map_err(|e| KernelError::Load {
            path: lib_path.clone(),
            reason: e.to_string(),
        })?;

        // SAFETY: the signature matches lapacke.h for LAPACKE_dgeqrf.
        let dgeqrf = unsafe { library.get::<DgeqrfFn>(DGEQRF_SYMBOL) }
            .map(|symbol| *symbol)
            .map_err(|e| KernelError::Symbol {
                symbol: "LAPACKE_dgeqrf".to_string(),
                reason: e.to_string(),
            })?;

        tracing::info!(path = %lib_path, "Resolved LAPACKE_dgeqrf");

        Ok(Self {
            path: lib_path,
            dgeqrf,
            _library: library,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl std::fmt::Debug for NativeQr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeQr").field("path", &self.path).finish()
    }
}

impl Kernel for NativeQr {
    fn name(&self) -> &str {
        "LAPACKE_dgeqrf"
    }

    fn execute(&self, rows: usize, cols: usize, data: &mut [f64]) -> Result<KernelOutput, KernelError> {
        let too_large = || KernelError::TooLarge { rows, cols };
        let m = c_int::try_from(rows).map_err(|_| too_large())?;
        let n = c_int::try_from(cols).map_err(|_| too_large())?;
        if rows.checked_mul(cols) != Some(data.len()) {
            return Err(KernelError::Failed(format!(
                "buffer holds {} elements, expected {}x{}",
                data.len(),
                rows,
                cols
            )));
        }

        let lda = n.max(1);
        let mut tau = vec![0.0f64; rows.min(cols)];

        // SAFETY: `data` holds rows*cols elements laid out row-major with
        // leading dimension `lda`, and `tau` holds min(m, n) elements, which
        // is exactly what dgeqrf reads and writes.
        let info = unsafe { (self.dgeqrf)(LAPACK_ROW_MAJOR, m, n, data.as_mut_ptr(), lda, tau.as_mut_ptr()) };

        tracing::debug!(rows, cols, info, "LAPACKE_dgeqrf returned");
        Ok(KernelOutput { info, values: tau })
    }
}

/// Load the QR kernel, or `None` with a warning when it cannot be resolved
///
/// The service keeps running without the hook; `Execute` then reports
/// `Unavailable`.
pub fn load_kernel(path: &str) -> Option<Arc<dyn Kernel>> {
    match NativeQr::open(path) {
        Ok(kernel) => Some(Arc::new(kernel)),
        Err(e) => {
            tracing::warn!(error = %e, "Execute hook unavailable");
            None
        }
    }
}
