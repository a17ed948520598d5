//! Reduction operations.
//!
//! [`Operation`] is a plain handle: either one of the predefined reductions
//! (`MPI_SUM`, `MPI_MAX`, ...) or the handle of a [`UserOperation`].
//!
//! A user operation registers a Rust closure with the native library. The
//! library may call it from inside any collective that uses the operation, on
//! whichever thread it likes, so the closure is kept in a process-wide table
//! behind an `Arc` for as long as the operation is registered. The native
//! `MPI_User_function` signature carries no user data pointer; each table slot
//! therefore has its own `extern "C"` trampoline.

use std::mem;
use std::os::raw::{c_int, c_void};
use std::panic::{self, AssertUnwindSafe};
use std::slice;
use std::sync::{Arc, RwLock};

use crate::constants;
use crate::datatype::{Datatype, MpiDatatype};
use crate::error::{Error, Result};
use crate::ffi::{self, PredefinedOp};

/// Handle to a reduction operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operation {
    raw: ffi::MPI_Op,
}

unsafe impl Send for Operation {}
unsafe impl Sync for Operation {}

macro_rules! predefined_ops {
    ($($(#[$doc:meta])* $name:ident => $which:ident),* $(,)?) => {
        $(
            $(#[$doc])*
            pub fn $name() -> Operation {
                Operation::predefined(PredefinedOp::$which)
            }
        )*
    };
}

impl Operation {
    fn predefined(which: PredefinedOp) -> Operation {
        Operation {
            raw: constants::native().ops[which as usize],
        }
    }

    pub(crate) fn as_raw(self) -> ffi::MPI_Op {
        self.raw
    }

    /// `MPI_OP_NULL`.
    pub fn null() -> Operation {
        Operation {
            raw: constants::native().op_null,
        }
    }

    predefined_ops! {
        /// Maximum (`MPI_MAX`)
        max => Max,
        /// Minimum (`MPI_MIN`)
        min => Min,
        /// Sum (`MPI_SUM`)
        sum => Sum,
        /// Product (`MPI_PROD`)
        product => Prod,
        /// Logical and (`MPI_LAND`)
        logical_and => LogicalAnd,
        /// Bitwise and (`MPI_BAND`)
        bitwise_and => BitwiseAnd,
        /// Logical or (`MPI_LOR`)
        logical_or => LogicalOr,
        /// Bitwise or (`MPI_BOR`)
        bitwise_or => BitwiseOr,
        /// Logical exclusive or (`MPI_LXOR`)
        logical_xor => LogicalXor,
        /// Bitwise exclusive or (`MPI_BXOR`)
        bitwise_xor => BitwiseXor,
        /// Maximum and its location (`MPI_MAXLOC`)
        max_loc => MaxLoc,
        /// Minimum and its location (`MPI_MINLOC`)
        min_loc => MinLoc,
    }
}

/// Closure stored for a registered user operation.
///
/// Arguments: input vector, input/output vector, element count, datatype.
type UserFunction = dyn Fn(*const c_void, *mut c_void, usize, Datatype) + Send + Sync;

/// Maximum number of user operations registered at the same time.
pub const MAX_USER_OPERATIONS: usize = 16;

static USER_FUNCTIONS: RwLock<Vec<Option<Arc<UserFunction>>>> = RwLock::new(Vec::new());

fn lookup(slot: usize) -> Option<Arc<UserFunction>> {
    let table = USER_FUNCTIONS
        .read()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    table.get(slot).cloned().flatten()
}

unsafe fn dispatch(
    slot: usize,
    invec: *mut c_void,
    inoutvec: *mut c_void,
    len: *mut c_int,
    datatype: *mut ffi::MPI_Datatype,
) {
    // Clone the Arc out so the table lock is not held while user code runs.
    let Some(function) = lookup(slot) else {
        log::error!("native library invoked unregistered user operation slot {slot}");
        return;
    };
    let len = if len.is_null() { 0 } else { (*len).max(0) as usize };
    let datatype = Datatype::from_raw(*datatype);
    log::trace!("user operation slot {slot} reducing {len} element(s)");

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        function(invec.cast_const(), inoutvec, len, datatype);
    }));
    if outcome.is_err() {
        // Unwinding into the native library is undefined behaviour.
        log::error!("user operation in slot {slot} panicked; aborting");
        std::process::abort();
    }
}

macro_rules! trampolines {
    ($($name:ident = $slot:expr;)*) => {
        $(
            unsafe extern "C" fn $name(
                invec: *mut c_void,
                inoutvec: *mut c_void,
                len: *mut c_int,
                datatype: *mut ffi::MPI_Datatype,
            ) {
                dispatch($slot, invec, inoutvec, len, datatype);
            }
        )*

        const TRAMPOLINES: [ffi::MPI_User_function; MAX_USER_OPERATIONS] =
            [$($name as ffi::MPI_User_function),*];
    };
}

trampolines! {
    trampoline_0 = 0;
    trampoline_1 = 1;
    trampoline_2 = 2;
    trampoline_3 = 3;
    trampoline_4 = 4;
    trampoline_5 = 5;
    trampoline_6 = 6;
    trampoline_7 = 7;
    trampoline_8 = 8;
    trampoline_9 = 9;
    trampoline_10 = 10;
    trampoline_11 = 11;
    trampoline_12 = 12;
    trampoline_13 = 13;
    trampoline_14 = 14;
    trampoline_15 = 15;
}

fn claim_slot(function: Arc<UserFunction>) -> Result<usize> {
    let mut table = USER_FUNCTIONS
        .write()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    if table.len() < MAX_USER_OPERATIONS {
        table.resize(MAX_USER_OPERATIONS, None);
    }
    let slot = table
        .iter()
        .position(Option::is_none)
        .ok_or(Error::OperationSlotsExhausted)?;
    table[slot] = Some(function);
    Ok(slot)
}

fn release_slot(slot: usize) {
    let mut table = USER_FUNCTIONS
        .write()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    if let Some(entry) = table.get_mut(slot) {
        *entry = None;
    }
}

/// A reduction operation backed by a Rust closure.
///
/// Created with [`UserOperation::new`] (typed) or [`UserOperation::new_raw`]
/// (datatype-aware, untyped) and released with [`UserOperation::free`].
/// Dropping an operation that was not freed releases it as well.
///
/// The operation must not be freed while a collective using it is in flight.
///
/// # Example
///
/// ```no_run
/// use mpibind::{Mpi, UserOperation};
///
/// let mpi = Mpi::init().unwrap();
/// let world = mpi.world();
///
/// // Element-wise maximum of absolute values.
/// let abs_max = UserOperation::new(true, |input: &[f64], inout: &mut [f64]| {
///     for (x, y) in input.iter().zip(inout.iter_mut()) {
///         *y = x.abs().max(y.abs());
///     }
/// })
/// .unwrap();
///
/// let send = [-(world.rank().unwrap().get() as f64)];
/// let mut recv = [0.0];
/// world.allreduce(&send, &mut recv, abs_max.operation()).unwrap();
/// abs_max.free().unwrap();
/// ```
pub struct UserOperation {
    op: Operation,
    slot: usize,
    released: bool,
}

impl UserOperation {
    /// Register a typed reduction `inout[i] = f(input[i], inout[i])`.
    ///
    /// The operation may only be used with buffers of `T`. If the library
    /// calls it with another datatype the process aborts, since the element
    /// layout would be misread.
    pub fn new<T, F>(commute: bool, function: F) -> Result<Self>
    where
        T: MpiDatatype,
        F: Fn(&[T], &mut [T]) + Send + Sync + 'static,
    {
        let expected = T::datatype();
        Self::new_raw(commute, move |invec, inoutvec, len, datatype| {
            if datatype != expected {
                log::error!(
                    "typed user operation called with {datatype:?}, expected {expected:?}; aborting"
                );
                std::process::abort();
            }
            let (input, inout) = unsafe {
                (
                    slice::from_raw_parts(invec.cast::<T>(), len),
                    slice::from_raw_parts_mut(inoutvec.cast::<T>(), len),
                )
            };
            function(input, inout);
        })
    }

    /// Register an untyped reduction.
    ///
    /// `function(input, inout, len, datatype)` receives the two vectors as
    /// bare pointers to `len` elements of `datatype` and must combine `input`
    /// into `inout`.
    pub fn new_raw<F>(commute: bool, function: F) -> Result<Self>
    where
        F: Fn(*const c_void, *mut c_void, usize, Datatype) + Send + Sync + 'static,
    {
        let slot = claim_slot(Arc::new(function))?;
        let mut raw = constants::native().op_null;
        let ret = unsafe { ffi::MPI_Op_create(TRAMPOLINES[slot], c_int::from(commute), &mut raw) };
        if let Err(err) = Error::check(ret) {
            release_slot(slot);
            return Err(err);
        }
        log::debug!("registered user operation in slot {slot} (commute={commute})");
        Ok(UserOperation {
            op: Operation { raw },
            slot,
            released: false,
        })
    }

    /// Handle to pass to reductions.
    pub fn operation(&self) -> Operation {
        self.op
    }

    /// Release the native operation and its closure.
    pub fn free(mut self) -> Result<()> {
        self.release()
    }

    fn release(&mut self) -> Result<()> {
        if mem::replace(&mut self.released, true) {
            return Ok(());
        }
        let ret = unsafe { ffi::MPI_Op_free(&mut self.op.raw) };
        release_slot(self.slot);
        Error::check(ret)
    }
}

impl Drop for UserOperation {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        // Native handles are gone after finalize; only the slot needs clearing.
        if crate::Mpi::is_finalized().unwrap_or(true) {
            self.released = true;
            release_slot(self.slot);
            return;
        }
        if let Err(err) = self.release() {
            log::error!("failed to free user operation: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predefined_ops_are_idempotent_and_distinct() {
        assert_eq!(Operation::sum(), Operation::sum());
        assert_ne!(Operation::sum(), Operation::max());
        assert_ne!(Operation::min(), Operation::product());
        assert_ne!(Operation::sum(), Operation::null());
    }

    #[test]
    fn trampolines_are_distinct() {
        for (i, a) in TRAMPOLINES.iter().enumerate() {
            for b in &TRAMPOLINES[i + 1..] {
                assert_ne!(*a as usize, *b as usize);
            }
        }
    }

    #[test]
    fn dispatch_runs_registered_closure() {
        let slot = claim_slot(Arc::new(
            |input: *const c_void, inout: *mut c_void, len: usize, _: Datatype| {
                let input = unsafe { slice::from_raw_parts(input.cast::<i32>(), len) };
                let inout = unsafe { slice::from_raw_parts_mut(inout.cast::<i32>(), len) };
                for (x, y) in input.iter().zip(inout.iter_mut()) {
                    *y += *x;
                }
            },
        ))
        .unwrap();

        let mut input = [1i32, 2, 3];
        let mut inout = [10i32, 20, 30];
        let mut len: c_int = 3;
        let mut datatype = Datatype::int32().as_raw();
        unsafe {
            TRAMPOLINES[slot](
                input.as_mut_ptr().cast(),
                inout.as_mut_ptr().cast(),
                &mut len,
                &mut datatype,
            );
        }
        assert_eq!(inout, [11, 22, 33]);

        release_slot(slot);
        assert!(lookup(slot).is_none());
    }

    fn noop(_: *const c_void, _: *mut c_void, _: usize, _: Datatype) {}

    #[test]
    fn released_slots_are_reused() {
        let a = claim_slot(Arc::new(noop)).unwrap();
        release_slot(a);
        let b = claim_slot(Arc::new(noop)).unwrap();
        assert!(lookup(b).is_some());
        release_slot(b);
    }
}
