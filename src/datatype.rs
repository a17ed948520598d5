//! Datatype handles, the Rust-type mapping, and buffer descriptors.
//!
//! A [`Datatype`] describes the binary layout of one element. The predefined
//! ones are resolved from the native library on first use.
//!
//! [`MpiDatatype`] is a sealed trait mapping Rust primitives to their
//! predefined datatype:
//!
//! | Rust Type | MPI Equivalent   |
//! |-----------|------------------|
//! | `f32`     | `MPI_FLOAT`      |
//! | `f64`     | `MPI_DOUBLE`     |
//! | `i8`      | `MPI_INT8_T`     |
//! | `i16`     | `MPI_INT16_T`    |
//! | `i32`     | `MPI_INT32_T`    |
//! | `i64`     | `MPI_INT64_T`    |
//! | `u8`      | `MPI_UINT8_T`    |
//! | `u16`     | `MPI_UINT16_T`   |
//! | `u32`     | `MPI_UINT32_T`   |
//! | `u64`     | `MPI_UINT64_T`   |
//! | `bool`    | `MPI_C_BOOL`     |
//!
//! Communication calls take a memory region as a [`Buffer`] / [`BufferMut`]:
//! an address, an element count and a datatype. Slices, vectors and arrays of
//! [`MpiDatatype`] elements implement both. [`RawBuffer`] and
//! [`RawBufferMut`] build a region from a bare pointer for layers that
//! serialize their own data.

use std::os::raw::c_void;

use crate::constants;
use crate::ffi::{self, PredefinedDatatype};

/// Handle to a native datatype.
///
/// Equality is handle equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Datatype {
    raw: ffi::MPI_Datatype,
}

// Handles are opaque values owned by the native library.
unsafe impl Send for Datatype {}
unsafe impl Sync for Datatype {}

macro_rules! predefined_datatypes {
    ($($(#[$doc:meta])* $name:ident => $which:ident),* $(,)?) => {
        $(
            $(#[$doc])*
            pub fn $name() -> Datatype {
                Datatype::predefined(PredefinedDatatype::$which)
            }
        )*
    };
}

impl Datatype {
    fn predefined(which: PredefinedDatatype) -> Datatype {
        Datatype {
            raw: constants::native().datatypes[which as usize],
        }
    }

    pub(crate) fn from_raw(raw: ffi::MPI_Datatype) -> Datatype {
        Datatype { raw }
    }

    pub(crate) fn as_raw(self) -> ffi::MPI_Datatype {
        self.raw
    }

    /// `MPI_DATATYPE_NULL`.
    pub fn null() -> Datatype {
        Datatype {
            raw: constants::native().datatype_null,
        }
    }

    /// Whether this is `MPI_DATATYPE_NULL`.
    pub fn is_null(self) -> bool {
        self == Datatype::null()
    }

    predefined_datatypes! {
        /// `MPI_CHAR`
        char => Char,
        /// `MPI_SIGNED_CHAR`
        signed_char => SignedChar,
        /// `MPI_UNSIGNED_CHAR`
        unsigned_char => UnsignedChar,
        /// `MPI_BYTE`
        byte => Byte,
        /// `MPI_SHORT`
        short => Short,
        /// `MPI_UNSIGNED_SHORT`
        unsigned_short => UnsignedShort,
        /// `MPI_INT`
        int => Int,
        /// `MPI_UNSIGNED`
        unsigned => Unsigned,
        /// `MPI_LONG`
        long => Long,
        /// `MPI_UNSIGNED_LONG`
        unsigned_long => UnsignedLong,
        /// `MPI_LONG_LONG`
        long_long => LongLong,
        /// `MPI_UNSIGNED_LONG_LONG`
        unsigned_long_long => UnsignedLongLong,
        /// `MPI_FLOAT`
        float => Float,
        /// `MPI_DOUBLE`
        double => Double,
        /// `MPI_LONG_DOUBLE`
        long_double => LongDouble,
        /// `MPI_PACKED`
        packed => Packed,
        /// `MPI_INT8_T`
        int8 => Int8,
        /// `MPI_INT16_T`
        int16 => Int16,
        /// `MPI_INT32_T`
        int32 => Int32,
        /// `MPI_INT64_T`
        int64 => Int64,
        /// `MPI_UINT8_T`
        uint8 => Uint8,
        /// `MPI_UINT16_T`
        uint16 => Uint16,
        /// `MPI_UINT32_T`
        uint32 => Uint32,
        /// `MPI_UINT64_T`
        uint64 => Uint64,
        /// `MPI_C_BOOL`
        c_bool => CBool,
        /// `MPI_WCHAR`
        wchar => WChar,
    }
}

/// Seals [`MpiDatatype`] against external implementations.
mod sealed {
    pub trait Sealed {}
}

/// Rust types with a predefined native datatype of identical layout.
///
/// This is a **sealed trait**. Data of other types goes through
/// [`RawBuffer`] with an explicit datatype.
pub trait MpiDatatype: sealed::Sealed + Copy + Send + 'static {
    /// The matching predefined datatype.
    fn datatype() -> Datatype;
}

macro_rules! impl_mpi_datatype {
    ($ty:ty, $ctor:ident) => {
        impl sealed::Sealed for $ty {}
        impl MpiDatatype for $ty {
            fn datatype() -> Datatype {
                Datatype::$ctor()
            }
        }
    };
}

impl_mpi_datatype!(f32, float);
impl_mpi_datatype!(f64, double);
impl_mpi_datatype!(i8, int8);
impl_mpi_datatype!(i16, int16);
impl_mpi_datatype!(i32, int32);
impl_mpi_datatype!(i64, int64);
impl_mpi_datatype!(u8, uint8);
impl_mpi_datatype!(u16, uint16);
impl_mpi_datatype!(u32, uint32);
impl_mpi_datatype!(u64, uint64);
impl_mpi_datatype!(bool, c_bool);

/// A readable memory region: address, element count and element datatype.
///
/// # Safety
///
/// `as_ptr` must point to at least `len` readable elements laid out as
/// `datatype` describes, valid for as long as `self` is borrowed.
pub unsafe trait Buffer {
    /// Start of the region.
    fn as_ptr(&self) -> *const c_void;
    /// Number of elements.
    fn len(&self) -> usize;
    /// Layout of each element.
    fn datatype(&self) -> Datatype;

    /// Whether the region holds no elements.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A writable memory region.
///
/// # Safety
///
/// As for [`Buffer`], and the region must also be writable.
pub unsafe trait BufferMut: Buffer {
    /// Start of the region.
    fn as_mut_ptr(&mut self) -> *mut c_void;
}

unsafe impl<T: MpiDatatype> Buffer for [T] {
    fn as_ptr(&self) -> *const c_void {
        <[T]>::as_ptr(self).cast()
    }
    fn len(&self) -> usize {
        <[T]>::len(self)
    }
    fn datatype(&self) -> Datatype {
        T::datatype()
    }
}

unsafe impl<T: MpiDatatype> BufferMut for [T] {
    fn as_mut_ptr(&mut self) -> *mut c_void {
        <[T]>::as_mut_ptr(self).cast()
    }
}

unsafe impl<T: MpiDatatype> Buffer for Vec<T> {
    fn as_ptr(&self) -> *const c_void {
        self.as_slice().as_ptr().cast()
    }
    fn len(&self) -> usize {
        Vec::len(self)
    }
    fn datatype(&self) -> Datatype {
        T::datatype()
    }
}

unsafe impl<T: MpiDatatype> BufferMut for Vec<T> {
    fn as_mut_ptr(&mut self) -> *mut c_void {
        self.as_mut_slice().as_mut_ptr().cast()
    }
}

unsafe impl<T: MpiDatatype, const N: usize> Buffer for [T; N] {
    fn as_ptr(&self) -> *const c_void {
        self.as_slice().as_ptr().cast()
    }
    fn len(&self) -> usize {
        N
    }
    fn datatype(&self) -> Datatype {
        T::datatype()
    }
}

unsafe impl<T: MpiDatatype, const N: usize> BufferMut for [T; N] {
    fn as_mut_ptr(&mut self) -> *mut c_void {
        self.as_mut_slice().as_mut_ptr().cast()
    }
}

/// A read-only region described by a bare pointer.
#[derive(Debug, Clone, Copy)]
pub struct RawBuffer {
    ptr: *const c_void,
    len: usize,
    datatype: Datatype,
}

impl RawBuffer {
    /// Describe `len` elements of `datatype` starting at `ptr`.
    ///
    /// # Safety
    ///
    /// The region must be readable, laid out as `datatype` describes, and stay
    /// valid for every operation this descriptor is passed to (including
    /// until completion of a nonblocking one).
    pub unsafe fn new(ptr: *const c_void, len: usize, datatype: Datatype) -> Self {
        RawBuffer { ptr, len, datatype }
    }
}

unsafe impl Buffer for RawBuffer {
    fn as_ptr(&self) -> *const c_void {
        self.ptr
    }
    fn len(&self) -> usize {
        self.len
    }
    fn datatype(&self) -> Datatype {
        self.datatype
    }
}

/// A writable region described by a bare pointer.
#[derive(Debug)]
pub struct RawBufferMut {
    ptr: *mut c_void,
    len: usize,
    datatype: Datatype,
}

impl RawBufferMut {
    /// Describe `len` writable elements of `datatype` starting at `ptr`.
    ///
    /// # Safety
    ///
    /// As for [`RawBuffer::new`], and the region must also be writable and
    /// not aliased while in use.
    pub unsafe fn new(ptr: *mut c_void, len: usize, datatype: Datatype) -> Self {
        RawBufferMut { ptr, len, datatype }
    }
}

unsafe impl Buffer for RawBufferMut {
    fn as_ptr(&self) -> *const c_void {
        self.ptr.cast_const()
    }
    fn len(&self) -> usize {
        self.len
    }
    fn datatype(&self) -> Datatype {
        self.datatype
    }
}

unsafe impl BufferMut for RawBufferMut {
    fn as_mut_ptr(&mut self) -> *mut c_void {
        self.ptr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predefined_accessors_are_idempotent() {
        assert_eq!(Datatype::double(), Datatype::double());
        assert_eq!(Datatype::byte(), Datatype::byte());
        assert_eq!(Datatype::int32(), Datatype::int32());
    }

    #[test]
    fn rust_types_map_to_predefined() {
        assert_eq!(f32::datatype(), Datatype::float());
        assert_eq!(f64::datatype(), Datatype::double());
        assert_eq!(i8::datatype(), Datatype::int8());
        assert_eq!(i16::datatype(), Datatype::int16());
        assert_eq!(i32::datatype(), Datatype::int32());
        assert_eq!(i64::datatype(), Datatype::int64());
        assert_eq!(u8::datatype(), Datatype::uint8());
        assert_eq!(u16::datatype(), Datatype::uint16());
        assert_eq!(u32::datatype(), Datatype::uint32());
        assert_eq!(u64::datatype(), Datatype::uint64());
        assert_eq!(bool::datatype(), Datatype::c_bool());
    }

    #[test]
    fn distinct_types_have_distinct_handles() {
        assert_ne!(Datatype::float(), Datatype::double());
        assert_ne!(Datatype::int32(), Datatype::int64());
        assert_ne!(Datatype::byte(), Datatype::packed());
    }

    #[test]
    fn null_datatype() {
        assert!(Datatype::null().is_null());
        assert!(!Datatype::double().is_null());
    }

    #[test]
    fn slice_buffer_describes_region() {
        let data = [1.0f64, 2.0, 3.0];
        let slice: &[f64] = &data;
        assert_eq!(Buffer::len(slice), 3);
        assert_eq!(Buffer::as_ptr(slice), data.as_ptr().cast());
        assert_eq!(Buffer::datatype(slice), Datatype::double());
    }

    #[test]
    fn vec_and_array_buffers() {
        let mut v = vec![0u32; 5];
        assert_eq!(Buffer::len(&v), 5);
        assert_eq!(Buffer::datatype(&v), Datatype::uint32());
        let p = BufferMut::as_mut_ptr(&mut v);
        assert_eq!(p, v.as_mut_ptr().cast());

        let a = [0i16; 4];
        assert_eq!(Buffer::len(&a), 4);
        assert!(!Buffer::is_empty(&a));
        let empty: [u8; 0] = [];
        assert!(Buffer::is_empty(&empty));
    }

    #[test]
    fn raw_buffer_keeps_descriptor() {
        let bytes = [0u8; 16];
        let raw = unsafe { RawBuffer::new(bytes.as_ptr().cast(), 2, Datatype::double()) };
        assert_eq!(raw.len(), 2);
        assert_eq!(raw.datatype(), Datatype::double());
        assert_eq!(raw.as_ptr(), bytes.as_ptr().cast());
    }

    #[test]
    fn trait_is_implemented() {
        fn assert_mpi_datatype<T: MpiDatatype>() {}
        assert_mpi_datatype::<f32>();
        assert_mpi_datatype::<f64>();
        assert_mpi_datatype::<i8>();
        assert_mpi_datatype::<i16>();
        assert_mpi_datatype::<i32>();
        assert_mpi_datatype::<i64>();
        assert_mpi_datatype::<u8>();
        assert_mpi_datatype::<u16>();
        assert_mpi_datatype::<u32>();
        assert_mpi_datatype::<u64>();
        assert_mpi_datatype::<bool>();
    }
}
