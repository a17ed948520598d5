//! Error types for mpibind
//!
//! Every native call returns an integer code. [`Error::check`] is the single
//! point where that code is turned into a [`Result`]: success passes through,
//! anything else becomes [`Error::Mpi`] carrying the classified
//! [`ErrorClass`] and the library's own description of the code.
//!
//! Classification and message lookup never fail. If the native library cannot
//! classify a code (or cannot describe it) the result degrades to
//! [`ErrorClass::Unknown`] and a generic message instead of recursing into
//! another translation.

use std::os::raw::{c_char, c_int};

use thiserror::Error;

use crate::constants;
use crate::datatype::Datatype;
use crate::ffi;

/// Result type for MPI operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for MPI operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A native call returned a non-success code.
    #[error("MPI error ({class:?}, code {code}): {message}")]
    Mpi {
        /// Standard class the code belongs to.
        class: ErrorClass,
        /// Raw, implementation-specific error code.
        code: i32,
        /// Description returned by `MPI_Error_string`.
        message: String,
    },

    /// MPI has already been initialized in this process
    #[error("MPI has already been initialized")]
    AlreadyInitialized,

    /// MPI has already been finalized and cannot be initialized again
    #[error("MPI has already been finalized")]
    AlreadyFinalized,

    /// Two buffers that must have matching lengths do not
    #[error("Buffer length mismatch: expected {expected}, got {actual}")]
    BufferMismatch {
        /// Length required by the other operand.
        expected: usize,
        /// Length actually supplied.
        actual: usize,
    },

    /// Two buffers that must hold the same element type do not
    #[error("Buffer datatype mismatch: expected {expected:?}, got {actual:?}")]
    DatatypeMismatch {
        /// Datatype of the other operand.
        expected: Datatype,
        /// Datatype actually supplied.
        actual: Datatype,
    },

    /// A buffer or rank list is longer than a native count can express
    #[error("Count {0} exceeds the native count range")]
    CountOverflow(usize),

    /// Every user reduction slot is taken
    #[error("No free slot for another user-defined operation")]
    OperationSlotsExhausted,

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Translate a native return code.
    ///
    /// Returns `Ok(())` for `MPI_SUCCESS`, otherwise the classified error.
    pub fn check(code: i32) -> Result<()> {
        if code == ffi::MPI_SUCCESS {
            Ok(())
        } else {
            Err(Error::from_code(code))
        }
    }

    /// Build the structured error for a non-success code.
    pub fn from_code(code: i32) -> Self {
        Error::Mpi {
            class: ErrorClass::classify(code),
            code,
            message: error_string(code),
        }
    }

    /// Convert a Rust length to a native count.
    pub(crate) fn count(len: usize) -> Result<c_int> {
        c_int::try_from(len).map_err(|_| Error::CountOverflow(len))
    }

    /// The error class, if this error came from the native library.
    pub fn class(&self) -> Option<ErrorClass> {
        match self {
            Error::Mpi { class, .. } => Some(*class),
            _ => None,
        }
    }
}

/// Standard MPI error classes.
///
/// The numeric value of each class is taken from the native library at run
/// time. Codes whose class is not listed here map to [`ErrorClass::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// No error.
    Success,
    /// Invalid buffer pointer.
    Buffer,
    /// Invalid count argument.
    Count,
    /// Invalid datatype argument.
    Type,
    /// Invalid tag argument.
    Tag,
    /// Invalid communicator.
    Comm,
    /// Invalid rank.
    Rank,
    /// Invalid request handle.
    Request,
    /// Invalid root.
    Root,
    /// Invalid group.
    Group,
    /// Invalid operation.
    Op,
    /// Invalid topology.
    Topology,
    /// Invalid dimension argument.
    Dims,
    /// Invalid argument of some other kind.
    Arg,
    /// Unknown error.
    Unknown,
    /// Message truncated on receive.
    Truncate,
    /// Known error not in this list.
    Other,
    /// Internal MPI error.
    Intern,
    /// Error code is in the status array.
    InStatus,
    /// Pending request.
    Pending,
    /// Out of memory.
    NoMem,
    /// Invalid info argument.
    Info,
    /// Invalid attribute key.
    Keyval,
    /// Invalid service name.
    Name,
    /// Invalid port name.
    Port,
    /// Service lookup or publish failed.
    Service,
    /// Process spawn failed.
    Spawn,
    /// Operation not supported.
    UnsupportedOperation,
    /// Invalid window.
    Win,
    /// Invalid file handle.
    File,
    /// I/O error.
    Io,
    /// Permission denied.
    Access,
}

impl ErrorClass {
    /// Every class in declaration order, which is the order the C shim
    /// fills `error_classes`.
    pub const ALL: [ErrorClass; ffi::NUM_ERROR_CLASSES] = [
        ErrorClass::Success,
        ErrorClass::Buffer,
        ErrorClass::Count,
        ErrorClass::Type,
        ErrorClass::Tag,
        ErrorClass::Comm,
        ErrorClass::Rank,
        ErrorClass::Request,
        ErrorClass::Root,
        ErrorClass::Group,
        ErrorClass::Op,
        ErrorClass::Topology,
        ErrorClass::Dims,
        ErrorClass::Arg,
        ErrorClass::Unknown,
        ErrorClass::Truncate,
        ErrorClass::Other,
        ErrorClass::Intern,
        ErrorClass::InStatus,
        ErrorClass::Pending,
        ErrorClass::NoMem,
        ErrorClass::Info,
        ErrorClass::Keyval,
        ErrorClass::Name,
        ErrorClass::Port,
        ErrorClass::Service,
        ErrorClass::Spawn,
        ErrorClass::UnsupportedOperation,
        ErrorClass::Win,
        ErrorClass::File,
        ErrorClass::Io,
        ErrorClass::Access,
    ];

    /// Classify a native error code.
    ///
    /// Calls `MPI_Error_class` directly and never goes through [`Error::check`].
    pub fn classify(code: i32) -> ErrorClass {
        if code == ffi::MPI_SUCCESS {
            return ErrorClass::Success;
        }
        let mut class: c_int = 0;
        let ret = unsafe { ffi::MPI_Error_class(code, &mut class) };
        if ret != ffi::MPI_SUCCESS {
            return ErrorClass::Unknown;
        }
        ErrorClass::from_raw_class(class)
    }

    /// Map a native class value (not an arbitrary code) to its variant.
    pub fn from_raw_class(class: i32) -> ErrorClass {
        Self::from_table(&constants::native().error_classes, class)
    }

    fn from_table(table: &[c_int; ffi::NUM_ERROR_CLASSES], class: i32) -> ErrorClass {
        table
            .iter()
            .position(|&raw| raw == class)
            .map_or(ErrorClass::Unknown, |i| Self::ALL[i])
    }

    /// The native value of this class.
    pub fn as_raw(self) -> i32 {
        constants::native().error_classes[self as usize]
    }

    /// Whether this is [`ErrorClass::Success`].
    pub fn is_success(self) -> bool {
        self == ErrorClass::Success
    }
}

/// Description of an error code.
///
/// Falls back to a generic message when the library cannot describe it.
pub fn error_string(code: i32) -> String {
    let capacity = constants::max_error_string().max(1) as usize;
    let mut buf = vec![0u8; capacity];
    let mut len: c_int = 0;
    let ret = unsafe { ffi::MPI_Error_string(code, buf.as_mut_ptr().cast::<c_char>(), &mut len) };
    if ret != ffi::MPI_SUCCESS {
        return format!("MPI error code {code}");
    }
    buf.truncate((len.max(0) as usize).min(capacity));
    String::from_utf8_lossy(&buf).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_success_is_ok() {
        assert_eq!(Error::check(ffi::MPI_SUCCESS), Ok(()));
    }

    #[test]
    fn success_code_classifies_without_native_call() {
        assert_eq!(ErrorClass::classify(0), ErrorClass::Success);
        assert!(ErrorClass::classify(0).is_success());
    }

    #[test]
    fn class_table_round_trips() {
        for class in ErrorClass::ALL {
            assert_eq!(ErrorClass::from_raw_class(class.as_raw()), class);
        }
    }

    #[test]
    fn success_class_is_zero() {
        assert_eq!(ErrorClass::Success.as_raw(), 0);
    }

    #[test]
    fn unlisted_class_is_unknown() {
        let table: [c_int; ffi::NUM_ERROR_CLASSES] = std::array::from_fn(|i| i as c_int);
        assert_eq!(ErrorClass::from_table(&table, 3), ErrorClass::Type);
        assert_eq!(ErrorClass::from_table(&table, 10_000), ErrorClass::Unknown);
        assert_eq!(ErrorClass::from_table(&table, -7), ErrorClass::Unknown);
    }

    #[test]
    fn classes_are_distinct_in_native_table() {
        let table = &constants::native().error_classes;
        for (i, a) in table.iter().enumerate() {
            for b in &table[i + 1..] {
                assert_ne!(a, b, "duplicate native error class value {a}");
            }
        }
    }

    #[test]
    fn count_conversion_rejects_overflow() {
        assert_eq!(Error::count(12), Ok(12));
        let too_big = c_int::MAX as usize + 1;
        assert_eq!(Error::count(too_big), Err(Error::CountOverflow(too_big)));
    }

    #[test]
    fn local_errors_have_no_class() {
        assert_eq!(Error::AlreadyInitialized.class(), None);
        let err = Error::BufferMismatch {
            expected: 4,
            actual: 3,
        };
        assert_eq!(err.class(), None);
        assert_eq!(
            err.to_string(),
            "Buffer length mismatch: expected 4, got 3"
        );
    }

    #[test]
    fn structured_error_display() {
        let err = Error::Mpi {
            class: ErrorClass::Rank,
            code: 6,
            message: "invalid rank".into(),
        };
        assert_eq!(err.class(), Some(ErrorClass::Rank));
        assert_eq!(err.to_string(), "MPI error (Rank, code 6): invalid rank");
    }
}
