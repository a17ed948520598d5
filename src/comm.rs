//! Communicator handles, introspection and management.
//!
//! Point-to-point and collective operations are implemented on
//! [`Communicator`] in their own modules.

use std::mem;
use std::os::raw::c_int;

use crate::constants;
use crate::errhandler::ErrorHandler;
use crate::error::{Error, Result};
use crate::ffi;
use crate::group::{Comparison, Group};
use crate::rank::Rank;

/// An MPI communicator.
///
/// A communicator is a group of processes plus a private communication
/// context. Derived communicators (from [`duplicate`](Self::duplicate),
/// [`split`](Self::split) or [`create`](Self::create)) own their native
/// object: it is released by [`free`](Self::free) or when the value is
/// dropped. The handle is not `Clone`, so a derived communicator is
/// released exactly once.
///
/// ```compile_fail
/// use mpibind::Communicator;
///
/// let comm = Communicator::world();
/// let alias = comm;
/// comm.free().unwrap();
/// ```
///
/// # Example
///
/// ```no_run
/// use mpibind::Mpi;
///
/// let mpi = Mpi::init().unwrap();
/// let world = mpi.world();
///
/// println!("I am rank {} of {}", world.rank().unwrap(), world.size().unwrap());
/// ```
#[derive(Debug, PartialEq, Eq)]
pub struct Communicator {
    raw: ffi::MPI_Comm,
}

unsafe impl Send for Communicator {}
unsafe impl Sync for Communicator {}

impl Communicator {
    pub(crate) fn from_raw(raw: ffi::MPI_Comm) -> Self {
        Communicator { raw }
    }

    pub(crate) fn as_raw(&self) -> ffi::MPI_Comm {
        self.raw
    }

    /// `MPI_COMM_WORLD`.
    pub fn world() -> Self {
        Communicator::from_raw(constants::native().comm_world)
    }

    /// `MPI_COMM_SELF`.
    pub fn self_() -> Self {
        Communicator::from_raw(constants::native().comm_self)
    }

    /// `MPI_COMM_NULL`.
    pub fn null() -> Self {
        Communicator::from_raw(constants::native().comm_null)
    }

    /// Whether this is `MPI_COMM_NULL`.
    pub fn is_null(&self) -> bool {
        self.raw == constants::native().comm_null
    }

    fn is_predefined(&self) -> bool {
        let c = constants::native();
        self.raw == c.comm_world || self.raw == c.comm_self || self.raw == c.comm_null
    }

    /// Rank of the calling process in this communicator.
    pub fn rank(&self) -> Result<Rank> {
        let mut rank: c_int = 0;
        let ret = unsafe { ffi::MPI_Comm_rank(self.raw, &mut rank) };
        Error::check(ret)?;
        Ok(Rank::new(rank))
    }

    /// Number of processes in this communicator.
    pub fn size(&self) -> Result<i32> {
        let mut size: c_int = 0;
        let ret = unsafe { ffi::MPI_Comm_size(self.raw, &mut size) };
        Error::check(ret)?;
        Ok(size)
    }

    /// Compare with another communicator.
    pub fn compare(&self, other: &Communicator) -> Result<Comparison> {
        let mut result: c_int = 0;
        let ret = unsafe { ffi::MPI_Comm_compare(self.raw, other.raw, &mut result) };
        Error::check(ret)?;
        Comparison::from_raw(result)
    }

    /// The group of processes in this communicator.
    ///
    /// The returned group is released on drop or with [`Group::free`].
    pub fn group(&self) -> Result<Group> {
        let mut raw = constants::native().group_null;
        let ret = unsafe { ffi::MPI_Comm_group(self.raw, &mut raw) };
        Error::check(ret)?;
        Ok(Group::from_raw(raw))
    }

    // ========================================================================
    // Derived communicators
    // ========================================================================

    /// Duplicate this communicator.
    ///
    /// The copy has the same group but a new context, so its traffic never
    /// matches traffic on `self`. Collective.
    pub fn duplicate(&self) -> Result<Communicator> {
        let mut raw = constants::native().comm_null;
        let ret = unsafe { ffi::MPI_Comm_dup(self.raw, &mut raw) };
        Error::check(ret)?;
        Ok(Communicator::from_raw(raw))
    }

    /// Partition this communicator.
    ///
    /// Processes passing the same `color` end up in the same new
    /// communicator, ordered by `key` (ties broken by rank in `self`).
    /// Processes passing `None` receive `None`. Collective.
    pub fn split(&self, color: Option<i32>, key: i32) -> Result<Option<Communicator>> {
        let color = color.unwrap_or_else(constants::undefined);
        let mut raw = constants::native().comm_null;
        let ret = unsafe { ffi::MPI_Comm_split(self.raw, color, key, &mut raw) };
        Error::check(ret)?;
        let comm = Communicator::from_raw(raw);
        Ok((!comm.is_null()).then_some(comm))
    }

    /// Create a communicator over a subgroup of this communicator.
    ///
    /// Every process of `self` must call this with the same group; processes
    /// outside the group receive `None`. Collective.
    pub fn create(&self, group: &Group) -> Result<Option<Communicator>> {
        let mut raw = constants::native().comm_null;
        let ret = unsafe { ffi::MPI_Comm_create(self.raw, group.as_raw(), &mut raw) };
        Error::check(ret)?;
        let comm = Communicator::from_raw(raw);
        Ok((!comm.is_null()).then_some(comm))
    }

    /// Release a derived communicator. Collective.
    ///
    /// Freeing the world, self or null communicator is a no-op.
    pub fn free(mut self) -> Result<()> {
        self.release()
    }

    fn release(&mut self) -> Result<()> {
        if self.is_predefined() {
            return Ok(());
        }
        let mut raw = mem::replace(&mut self.raw, constants::native().comm_null);
        let ret = unsafe { ffi::MPI_Comm_free(&mut raw) };
        Error::check(ret)
    }

    // ========================================================================
    // Error handling
    // ========================================================================

    /// Install an error handler on this communicator.
    pub fn set_error_handler(&self, handler: ErrorHandler) -> Result<()> {
        let ret = unsafe { ffi::MPI_Comm_set_errhandler(self.raw, handler.as_raw()) };
        Error::check(ret)
    }

    /// The error handler currently installed on this communicator.
    pub fn error_handler(&self) -> Result<ErrorHandler> {
        let mut raw = constants::native().errhandler_null;
        let ret = unsafe { ffi::MPI_Comm_get_errhandler(self.raw, &mut raw) };
        Error::check(ret)?;
        Ok(ErrorHandler::from_raw(raw))
    }

    /// Terminate every process in this communicator's job.
    ///
    /// Only returns if the native call itself fails.
    pub fn abort(&self, code: i32) -> Error {
        log::error!("aborting MPI job with code {code}");
        let ret = unsafe { ffi::MPI_Abort(self.raw, code) };
        Error::from_code(ret)
    }
}

impl Drop for Communicator {
    fn drop(&mut self) {
        if self.is_predefined() {
            return;
        }
        // Native objects are gone after finalize.
        if crate::Mpi::is_finalized().unwrap_or(true) {
            return;
        }
        if let Err(err) = self.release() {
            log::warn!("failed to free communicator: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predefined_communicators_are_distinct() {
        assert_ne!(Communicator::world(), Communicator::self_());
        assert_ne!(Communicator::world(), Communicator::null());
        assert!(Communicator::null().is_null());
        assert!(!Communicator::world().is_null());
    }

    #[test]
    fn freeing_predefined_communicators_is_noop() {
        assert!(Communicator::world().free().is_ok());
        assert!(Communicator::self_().free().is_ok());
        assert!(Communicator::null().free().is_ok());
    }

    #[test]
    fn released_handle_becomes_null() {
        let mut comm = Communicator::null();
        comm.release().unwrap();
        assert!(comm.is_null());
        drop(comm);
        drop(Communicator::world());
        assert!(!Communicator::world().is_null());
    }

    #[test]
    fn accessors_are_idempotent() {
        assert_eq!(Communicator::world(), Communicator::world());
        assert_eq!(Communicator::world().as_raw(), constants::native().comm_world);
    }
}
