//! # mpibind
//!
//! Safe Rust bindings for MPI (Message Passing Interface), resolved against
//! whatever MPI library the crate is linked with.
//!
//! Predefined handles and sentinels (`MPI_COMM_WORLD`, `MPI_DOUBLE`,
//! `MPI_ANY_SOURCE`, ...) are read from the native library at run time, so the
//! same code works with MPICH-family and Open MPI builds. Select the Open MPI
//! ABI with the `openmpi` cargo feature.
//!
//! This crate provides:
//! - Environment lifecycle ([`Mpi`]) with thread levels and version queries
//! - Point-to-point messaging in standard, buffered, synchronous and ready mode
//! - Nonblocking operations tracked by [`Request`] and [`RequestSet`] within a [`scope`]
//! - Collectives and reductions, including user-defined [`UserOperation`]s
//! - Group and communicator management
//! - Structured errors ([`Error`], [`ErrorClass`]) for every native failure
//!
//! ## Quick Start
//!
//! ```no_run
//! use mpibind::{Mpi, Operation, Rank};
//!
//! fn main() -> Result<(), mpibind::Error> {
//!     let mpi = Mpi::init()?;
//!     let world = mpi.world();
//!
//!     let rank = world.rank()?;
//!     let size = world.size()?;
//!     println!("Hello from rank {} of {}", rank, size);
//!
//!     let mut data = vec![0.0f64; 100];
//!     if rank == Rank::new(0) {
//!         data.fill(42.0);
//!     }
//!     world.broadcast(&mut data[..], Rank::new(0))?;
//!
//!     let sum = world.allreduce_scalar(rank.get() as f64, Operation::sum())?;
//!     println!("Rank {rank}: sum of all ranks = {sum}");
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature   | Description |
//! |-----------|-------------|
//! | `openmpi` | Use Open MPI's handle and status layout instead of MPICH's |
//!
//! ## Logging
//!
//! Diagnostics go through the [`log`] facade: `debug` for lifecycle events,
//! `warn` when a pending request is dropped, `error` just before an abort.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::similar_names)]

mod collective;
mod comm;
pub mod constants;
mod datatype;
mod errhandler;
mod error;
mod ffi;
mod group;
mod op;
mod p2p;
mod rank;
mod request;
mod status;

pub use comm::Communicator;
pub use datatype::{Buffer, BufferMut, Datatype, MpiDatatype, RawBuffer, RawBufferMut};
pub use errhandler::ErrorHandler;
pub use error::{error_string, Error, ErrorClass, Result};
pub use group::{Comparison, Group};
pub use op::{Operation, UserOperation, MAX_USER_OPERATIONS};
pub use rank::{Rank, Tag};
pub use request::{scope, Completion, Request, RequestSet, Scope};
pub use status::Status;

use std::marker::PhantomData;
use std::os::raw::{c_char, c_int, c_void};
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};

/// Global flag tracking whether this crate initialized MPI
static MPI_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// MPI thread support levels, weakest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ThreadLevel {
    /// Only single-threaded execution
    Single,
    /// Multi-threaded, but MPI calls only from main thread
    Funneled,
    /// Multi-threaded, but MPI calls serialized by user
    Serialized,
    /// Full multi-threaded support
    Multiple,
}

impl ThreadLevel {
    const ALL: [ThreadLevel; ffi::NUM_THREAD_LEVELS] = [
        ThreadLevel::Single,
        ThreadLevel::Funneled,
        ThreadLevel::Serialized,
        ThreadLevel::Multiple,
    ];

    fn as_raw(self) -> c_int {
        constants::native().thread_levels[self as usize]
    }

    fn from_raw(raw: c_int) -> Result<Self> {
        constants::native()
            .thread_levels
            .iter()
            .position(|&level| level == raw)
            .map(|i| Self::ALL[i])
            .ok_or_else(|| Error::Internal(format!("unknown thread level {raw}")))
    }
}

/// Settings for [`Mpi::init_with`].
///
/// # Example
///
/// ```no_run
/// use mpibind::{InitOptions, Mpi, ThreadLevel};
///
/// let mpi = Mpi::init_with(
///     InitOptions::new()
///         .thread_level(ThreadLevel::Funneled)
///         .fatal_errors(false),
/// )
/// .unwrap();
/// assert!(mpi.thread_level() <= ThreadLevel::Funneled);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitOptions {
    thread_level: ThreadLevel,
    fatal_errors: bool,
}

impl Default for InitOptions {
    fn default() -> Self {
        InitOptions {
            thread_level: ThreadLevel::Single,
            fatal_errors: false,
        }
    }
}

impl InitOptions {
    /// Single-threaded, errors returned to the caller.
    pub fn new() -> Self {
        Self::default()
    }

    /// Thread support level to request.
    pub fn thread_level(mut self, level: ThreadLevel) -> Self {
        self.thread_level = level;
        self
    }

    /// Keep the library's default `MPI_ERRORS_ARE_FATAL` handler on the world
    /// and self communicators instead of installing `MPI_ERRORS_RETURN`.
    pub fn fatal_errors(mut self, fatal: bool) -> Self {
        self.fatal_errors = fatal;
        self
    }
}

/// MPI environment handle.
///
/// This type represents an initialized MPI environment. There can only be one
/// instance of this type per process, and MPI cannot be initialized again once
/// it has been finalized. Dropping the handle finalizes MPI.
///
/// # Example
///
/// ```no_run
/// use mpibind::Mpi;
///
/// let mpi = Mpi::init().expect("Failed to initialize MPI");
/// let world = mpi.world();
/// println!("Running on {} processes", world.size().unwrap());
/// // MPI is finalized when `mpi` goes out of scope
/// ```
pub struct Mpi {
    /// The thread level that was provided
    thread_level: ThreadLevel,
    /// Memory handed to `MPI_Buffer_attach`
    attached: Option<Vec<u8>>,
    finalized: bool,
    /// Marker to make Mpi !Send and !Sync
    _marker: PhantomData<*const ()>,
}

fn utf8(buf: &[u8], len: c_int, what: &str) -> Result<String> {
    let len = usize::try_from(len).unwrap_or(0).min(buf.len());
    std::str::from_utf8(&buf[..len])
        .map(str::to_owned)
        .map_err(|_| Error::Internal(format!("Invalid UTF-8 in {what}")))
}

impl Mpi {
    /// Initialize MPI with single-threaded support.
    ///
    /// # Errors
    ///
    /// Returns an error if MPI is already initialized or finalized, or if
    /// initialization fails.
    pub fn init() -> Result<Self> {
        Self::init_with(InitOptions::default())
    }

    /// Initialize MPI with the specified thread support level.
    ///
    /// The level actually provided can be queried with
    /// [`thread_level()`](Self::thread_level) and may be lower than `required`.
    pub fn init_thread(required: ThreadLevel) -> Result<Self> {
        Self::init_with(InitOptions::new().thread_level(required))
    }

    /// Initialize MPI with explicit options.
    pub fn init_with(options: InitOptions) -> Result<Self> {
        if Self::is_finalized()? {
            return Err(Error::AlreadyFinalized);
        }
        if MPI_INITIALIZED.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyInitialized);
        }
        if Self::is_initialized()? {
            // Initialized behind our back; the flag belongs to whoever did it.
            MPI_INITIALIZED.store(false, Ordering::SeqCst);
            return Err(Error::AlreadyInitialized);
        }

        let mut provided: c_int = 0;
        let ret = unsafe {
            ffi::MPI_Init_thread(
                ptr::null_mut(),
                ptr::null_mut(),
                options.thread_level.as_raw(),
                &mut provided,
            )
        };
        if ret != ffi::MPI_SUCCESS {
            MPI_INITIALIZED.store(false, Ordering::SeqCst);
            return Err(Error::from_code(ret));
        }

        let mut mpi = Mpi {
            thread_level: ThreadLevel::Single,
            attached: None,
            finalized: false,
            _marker: PhantomData,
        };
        mpi.thread_level = ThreadLevel::from_raw(provided)?;

        if !options.fatal_errors {
            let handler = ErrorHandler::errors_return();
            Communicator::world().set_error_handler(handler)?;
            Communicator::self_().set_error_handler(handler)?;
        }

        log::debug!(
            "MPI initialized: requested {:?}, provided {:?}, fatal errors {}",
            options.thread_level,
            mpi.thread_level,
            options.fatal_errors
        );
        Ok(mpi)
    }

    /// Get the thread support level that was provided.
    pub fn thread_level(&self) -> ThreadLevel {
        self.thread_level
    }

    /// Ask the library for the current thread support level.
    pub fn query_thread(&self) -> Result<ThreadLevel> {
        let mut provided: c_int = 0;
        let ret = unsafe { ffi::MPI_Query_thread(&mut provided) };
        Error::check(ret)?;
        ThreadLevel::from_raw(provided)
    }

    /// Whether the calling thread is the one that initialized MPI.
    pub fn is_thread_main(&self) -> Result<bool> {
        let mut flag: c_int = 0;
        let ret = unsafe { ffi::MPI_Is_thread_main(&mut flag) };
        Error::check(ret)?;
        Ok(flag != 0)
    }

    /// Get a handle to `MPI_COMM_WORLD`.
    pub fn world(&self) -> Communicator {
        Communicator::world()
    }

    /// Get a handle to `MPI_COMM_SELF`.
    pub fn self_comm(&self) -> Communicator {
        Communicator::self_()
    }

    /// Finalize MPI.
    ///
    /// Pending buffered sends are flushed first. Equivalent to dropping the
    /// handle, but reports failure.
    pub fn finalize(mut self) -> Result<()> {
        self.finalize_inner()
    }

    fn finalize_inner(&mut self) -> Result<()> {
        if self.finalized {
            return Ok(());
        }
        self.finalized = true;
        if let Err(err) = self.detach_buffer() {
            log::warn!("detaching the buffered-send buffer before finalize failed: {err}");
        }
        let ret = unsafe { ffi::MPI_Finalize() };
        Error::check(ret)?;
        log::debug!("MPI finalized");
        Ok(())
    }

    /// Attach `size` bytes for buffered-mode sends.
    ///
    /// Any previously attached buffer is detached first. Each buffered
    /// message needs its own size plus
    /// [`bsend_overhead`](constants::bsend_overhead) bytes.
    pub fn attach_buffer(&mut self, size: usize) -> Result<()> {
        if self.attached.is_some() {
            self.detach_buffer()?;
        }
        let count = Error::count(size)?;
        let mut buffer = vec![0u8; size];
        let ret = unsafe { ffi::MPI_Buffer_attach(buffer.as_mut_ptr().cast::<c_void>(), count) };
        Error::check(ret)?;
        self.attached = Some(buffer);
        Ok(())
    }

    /// Detach the buffered-send buffer, blocking until every message in it
    /// has been delivered.
    ///
    /// Returns the size of the detached buffer, or `None` if none was
    /// attached.
    pub fn detach_buffer(&mut self) -> Result<Option<usize>> {
        let Some(buffer) = self.attached.take() else {
            return Ok(None);
        };
        let mut addr: *mut c_void = ptr::null_mut();
        let mut size: c_int = 0;
        let ret = unsafe {
            ffi::MPI_Buffer_detach(ptr::addr_of_mut!(addr).cast::<c_void>(), &mut size)
        };
        if let Err(err) = Error::check(ret) {
            // The library may still reference the memory.
            self.attached = Some(buffer);
            return Err(err);
        }
        Ok(Some(buffer.len()))
    }

    /// Get the current wall-clock time in seconds.
    ///
    /// This is a high-resolution timer suitable for benchmarking.
    pub fn wtime() -> f64 {
        unsafe { ffi::mpibind_wtime() }
    }

    /// Resolution of [`wtime`](Self::wtime) in seconds.
    pub fn wtick() -> f64 {
        unsafe { ffi::mpibind_wtick() }
    }

    /// Version of the MPI standard implemented, as `(major, minor)`.
    pub fn version() -> Result<(i32, i32)> {
        let mut major: c_int = 0;
        let mut minor: c_int = 0;
        let ret = unsafe { ffi::MPI_Get_version(&mut major, &mut minor) };
        Error::check(ret)?;
        Ok((major, minor))
    }

    /// Get the MPI library version string.
    pub fn library_version() -> Result<String> {
        let capacity = constants::max_library_version_string().max(1) as usize;
        let mut buf = vec![0u8; capacity];
        let mut len: c_int = 0;
        let ret = unsafe {
            ffi::MPI_Get_library_version(buf.as_mut_ptr().cast::<c_char>(), &mut len)
        };
        Error::check(ret)?;
        utf8(&buf, len, "library version string")
    }

    /// Name of the processor this process runs on.
    pub fn processor_name() -> Result<String> {
        let capacity = constants::max_processor_name().max(1) as usize;
        let mut buf = vec![0u8; capacity];
        let mut len: c_int = 0;
        let ret =
            unsafe { ffi::MPI_Get_processor_name(buf.as_mut_ptr().cast::<c_char>(), &mut len) };
        Error::check(ret)?;
        utf8(&buf, len, "processor name")
    }

    /// Check if MPI has been initialized.
    pub fn is_initialized() -> Result<bool> {
        let mut flag: c_int = 0;
        let ret = unsafe { ffi::MPI_Initialized(&mut flag) };
        Error::check(ret)?;
        Ok(flag != 0)
    }

    /// Check if MPI has been finalized.
    pub fn is_finalized() -> Result<bool> {
        let mut flag: c_int = 0;
        let ret = unsafe { ffi::MPI_Finalized(&mut flag) };
        Error::check(ret)?;
        Ok(flag != 0)
    }
}

impl Drop for Mpi {
    fn drop(&mut self) {
        if let Err(err) = self.finalize_inner() {
            log::error!("MPI finalize failed: {err}");
        }
    }
}

// Mpi is not Send or Sync - MPI must be finalized from the thread that initialized it.
// This is enforced by PhantomData<*const ()> in the struct

#[cfg(test)]
mod tests {
    use super::*;

    // Calls that need an initialized library are exercised by the demos:
    // cargo build --examples && mpiexec -n 4 ./target/debug/examples/test_lifecycle

    #[test]
    fn thread_levels_map_to_native_values() {
        for level in ThreadLevel::ALL {
            assert_eq!(ThreadLevel::from_raw(level.as_raw()).unwrap(), level);
        }
    }

    #[test]
    fn thread_levels_are_ordered() {
        assert!(ThreadLevel::Single < ThreadLevel::Funneled);
        assert!(ThreadLevel::Funneled < ThreadLevel::Serialized);
        assert!(ThreadLevel::Serialized < ThreadLevel::Multiple);
        let c = constants::native();
        assert!(c.thread_levels.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn unknown_thread_level_is_internal_error() {
        let bogus = constants::native().thread_levels[3] + 100;
        assert!(matches!(
            ThreadLevel::from_raw(bogus),
            Err(Error::Internal(_))
        ));
    }

    #[test]
    fn init_options_builder() {
        let defaults = InitOptions::new();
        assert_eq!(defaults, InitOptions::default());
        assert_eq!(defaults.thread_level, ThreadLevel::Single);
        assert!(!defaults.fatal_errors);

        let opts = InitOptions::new()
            .thread_level(ThreadLevel::Multiple)
            .fatal_errors(true);
        assert_eq!(opts.thread_level, ThreadLevel::Multiple);
        assert!(opts.fatal_errors);
    }

    #[test]
    fn utf8_respects_reported_length() {
        let buf = b"node01\0garbage";
        assert_eq!(utf8(buf, 6, "name").unwrap(), "node01");
        assert_eq!(utf8(buf, -1, "name").unwrap(), "");
        assert_eq!(utf8(buf, 999, "name").unwrap().len(), buf.len());
        assert!(utf8(&[0xff, 0xfe], 2, "name").is_err());
    }
}
