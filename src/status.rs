//! MPI message status information.
//!
//! A [`Status`] is produced by receives, probes and request completion. The
//! native struct layout differs between implementations; [`Status::from_raw`]
//! is the only place that reads it.

use std::os::raw::c_int;

use crate::datatype::{Datatype, MpiDatatype};
use crate::error::{Error, ErrorClass, Result};
use crate::ffi;
use crate::rank::{Rank, Tag};

/// Information about a received or probed MPI message.
///
/// # Example
///
/// ```no_run
/// # use mpibind::{Mpi, Rank, Tag};
/// let mpi = Mpi::init().unwrap();
/// let world = mpi.world();
///
/// let status = world.probe(Rank::any_source(), Tag::any()).unwrap();
/// let count = status.count::<f64>().unwrap();
/// println!("Message from rank {} with tag {}, {} elements",
///          status.source, status.tag, count);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Status {
    /// Source rank of the message.
    pub source: Rank,
    /// Tag of the message.
    pub tag: Tag,
    /// Per-request outcome. Only differs from [`ErrorClass::Success`] in
    /// statuses returned by [`RequestSet::wait_all`](crate::RequestSet::wait_all)
    /// when some requests failed.
    pub error: ErrorClass,
    /// Whether the operation was cancelled.
    pub cancelled: bool,
    /// Message size in bytes.
    pub byte_count: i64,
    raw: ffi::MPI_Status,
}

impl Status {
    /// Convert a native status.
    ///
    /// The native error slot is only meaningful after a multi-completion call
    /// reported `MPI_ERR_IN_STATUS`, so it is not read here; see
    /// [`Status::from_raw_with_error`].
    pub(crate) fn from_raw(raw: ffi::MPI_Status) -> Self {
        Status {
            source: Rank::new(raw.MPI_SOURCE),
            tag: Tag::new(raw.MPI_TAG),
            error: ErrorClass::Success,
            cancelled: raw.cancelled(),
            byte_count: raw.byte_count(),
            raw,
        }
    }

    /// Convert a native status whose error slot has been filled in.
    pub(crate) fn from_raw_with_error(raw: ffi::MPI_Status) -> Self {
        Status {
            error: ErrorClass::classify(raw.MPI_ERROR),
            ..Status::from_raw(raw)
        }
    }

    /// Number of `datatype` elements in the message.
    ///
    /// Returns `None` when the byte count is not a whole number of elements
    /// (`MPI_UNDEFINED`).
    pub fn count_of(&self, datatype: Datatype) -> Result<Option<i32>> {
        let mut count: c_int = 0;
        let ret = unsafe { ffi::MPI_Get_count(&self.raw, datatype.as_raw(), &mut count) };
        Error::check(ret)?;
        if count == crate::constants::undefined() {
            Ok(None)
        } else {
            Ok(Some(count))
        }
    }

    /// Number of `T` elements in the message.
    pub fn count<T: MpiDatatype>(&self) -> Result<Option<i32>> {
        self.count_of(T::datatype())
    }

    /// Whether the request this status belongs to completed successfully.
    pub fn is_ok(&self) -> bool {
        self.error.is_success()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(not(feature = "openmpi"))]
    fn raw_status(source: i32, tag: i32, bytes: i64, cancelled: bool) -> ffi::MPI_Status {
        ffi::MPI_Status {
            count_lo: bytes as u32 as i32,
            count_hi_and_cancelled: (((bytes >> 32) as i32) << 1) | i32::from(cancelled),
            MPI_SOURCE: source,
            MPI_TAG: tag,
            MPI_ERROR: 0,
        }
    }

    #[cfg(feature = "openmpi")]
    fn raw_status(source: i32, tag: i32, bytes: i64, cancelled: bool) -> ffi::MPI_Status {
        ffi::MPI_Status {
            MPI_SOURCE: source,
            MPI_TAG: tag,
            MPI_ERROR: 0,
            _cancelled: i32::from(cancelled),
            _ucount: bytes as usize,
        }
    }

    #[test]
    fn conversion_reads_envelope() {
        let status = Status::from_raw(raw_status(3, 77, 24, false));
        assert_eq!(status.source, Rank::new(3));
        assert_eq!(status.tag, Tag::new(77));
        assert_eq!(status.byte_count, 24);
        assert!(!status.cancelled);
        assert!(status.is_ok());
    }

    #[test]
    fn conversion_reads_cancelled_flag() {
        let status = Status::from_raw(raw_status(0, 0, 0, true));
        assert!(status.cancelled);
    }

    #[test]
    fn conversion_handles_large_counts() {
        let bytes = (5_i64 << 32) + 17;
        let status = Status::from_raw(raw_status(1, 2, bytes, true));
        assert_eq!(status.byte_count, bytes);
        assert!(status.cancelled);
    }

    #[test]
    fn plain_conversion_ignores_error_slot() {
        let mut raw = raw_status(1, 1, 8, false);
        raw.MPI_ERROR = 12345;
        assert_eq!(Status::from_raw(raw).error, ErrorClass::Success);
    }

    #[test]
    fn error_slot_conversion_with_success() {
        let raw = raw_status(1, 1, 8, false);
        assert_eq!(Status::from_raw_with_error(raw).error, ErrorClass::Success);
    }
}
