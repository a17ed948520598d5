//! Process-wide cache of the native library's predefined handles and sentinels.
//!
//! MPI implementations assign their own bit patterns to `MPI_COMM_WORLD`,
//! `MPI_DOUBLE`, `MPI_ANY_SOURCE` and friends, so nothing here is a literal.
//! The first accessor call copies the whole table out of the C shim; every
//! later call reads the same `&'static` value. Resolution does not require
//! MPI to be initialized.
//!
//! The typed accessors live on the handle types themselves
//! ([`Communicator::world`](crate::Communicator::world),
//! [`Datatype::double`](crate::Datatype::double),
//! [`Rank::any_source`](crate::Rank::any_source), ...). This module only
//! exposes the integer limits that have no better home.

use std::mem::MaybeUninit;
use std::sync::OnceLock;

use crate::ffi;

static NATIVE: OnceLock<ffi::NativeConstants> = OnceLock::new();

/// The resolved constants table.
pub(crate) fn native() -> &'static ffi::NativeConstants {
    NATIVE.get_or_init(|| {
        let mut table = MaybeUninit::<ffi::NativeConstants>::uninit();
        // SAFETY: the shim writes every field of the struct.
        let table = unsafe {
            ffi::mpibind_resolve_constants(table.as_mut_ptr());
            table.assume_init()
        };
        log::trace!(
            "resolved native MPI constants (any_source={}, any_tag={}, proc_null={})",
            table.any_source,
            table.any_tag,
            table.proc_null
        );
        table
    })
}

/// `MPI_UNDEFINED`, returned by queries that have no meaningful answer.
pub fn undefined() -> i32 {
    native().undefined
}

/// `MPI_BSEND_OVERHEAD`: bytes of bookkeeping added per buffered message.
pub fn bsend_overhead() -> i32 {
    native().bsend_overhead
}

/// `MPI_MAX_PROCESSOR_NAME`.
pub fn max_processor_name() -> i32 {
    native().max_processor_name
}

/// `MPI_MAX_ERROR_STRING`.
pub fn max_error_string() -> i32 {
    native().max_error_string
}

/// `MPI_MAX_LIBRARY_VERSION_STRING`.
pub fn max_library_version_string() -> i32 {
    native().max_library_version_string
}

/// Whether the native library was built as Open MPI.
///
/// Must agree with the `openmpi` cargo feature for handles and statuses to
/// be read correctly.
pub fn native_abi_is_openmpi() -> bool {
    unsafe { ffi::mpibind_abi_is_openmpi() != 0 }
}

/// Size in bytes of the native `MPI_Status`.
pub fn native_status_size() -> usize {
    unsafe { ffi::mpibind_status_size() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn resolution_is_idempotent() {
        let first = native();
        let second = native();
        assert!(std::ptr::eq(first, second));
        assert_eq!(first.any_source, second.any_source);
        assert_eq!(first.any_tag, second.any_tag);
    }

    #[test]
    fn concurrent_first_access_sees_one_table() {
        let addrs: Vec<usize> = (0..8)
            .map(|_| thread::spawn(|| native() as *const _ as usize))
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().unwrap())
            .collect();
        assert!(addrs.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn selected_abi_matches_native_library() {
        assert_eq!(native_abi_is_openmpi(), cfg!(feature = "openmpi"));
        assert_eq!(
            native_status_size(),
            std::mem::size_of::<ffi::MPI_Status>()
        );
    }

    #[test]
    fn string_limits_are_positive() {
        assert!(max_processor_name() > 0);
        assert!(max_error_string() > 0);
        assert!(max_library_version_string() > 0);
        assert!(bsend_overhead() >= 0);
    }

    #[test]
    fn sentinels_are_distinct() {
        let c = native();
        assert_ne!(c.any_source, c.proc_null);
        assert_ne!(c.any_source, c.root);
        assert_ne!(c.proc_null, c.root);
    }
}
