//! Error handler handles.
//!
//! Only the two predefined handlers are exposed. `MPI_ERRORS_RETURN` makes
//! failing calls hand their code back, which is what the rest of this crate
//! relies on to produce [`Error`](crate::Error) values; [`Mpi::init`](crate::Mpi::init)
//! installs it on the world and self communicators unless asked not to.

use crate::constants;
use crate::ffi;

/// Handle to an MPI error handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorHandler {
    raw: ffi::MPI_Errhandler,
}

unsafe impl Send for ErrorHandler {}
unsafe impl Sync for ErrorHandler {}

impl ErrorHandler {
    pub(crate) fn from_raw(raw: ffi::MPI_Errhandler) -> Self {
        ErrorHandler { raw }
    }

    pub(crate) fn as_raw(self) -> ffi::MPI_Errhandler {
        self.raw
    }

    /// `MPI_ERRORS_ARE_FATAL`: any error aborts the job.
    pub fn errors_are_fatal() -> Self {
        ErrorHandler::from_raw(constants::native().errors_are_fatal)
    }

    /// `MPI_ERRORS_RETURN`: errors are returned to the caller.
    pub fn errors_return() -> Self {
        ErrorHandler::from_raw(constants::native().errors_return)
    }

    /// `MPI_ERRHANDLER_NULL`.
    pub fn null() -> Self {
        ErrorHandler::from_raw(constants::native().errhandler_null)
    }

    /// Whether this is `MPI_ERRHANDLER_NULL`.
    pub fn is_null(self) -> bool {
        self == Self::null()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predefined_handlers_are_distinct() {
        assert_ne!(ErrorHandler::errors_are_fatal(), ErrorHandler::errors_return());
        assert_ne!(ErrorHandler::errors_return(), ErrorHandler::null());
        assert!(ErrorHandler::null().is_null());
        assert!(!ErrorHandler::errors_return().is_null());
    }
}
