//! Raw FFI declarations for the native MPI library and the constant shim.
//!
//! These are low-level unsafe functions. Use the safe wrappers in the parent module.
//!
//! Handle representation and the `MPI_Status` layout are vendor-specific and are
//! selected by the `openmpi` cargo feature. Everything outside this module goes
//! through the type aliases below and [`crate::Status::from_raw`], so no other
//! code depends on the selected layout.

#![allow(dead_code)]
#![allow(non_camel_case_types)]
#![allow(non_snake_case)]

use std::os::raw::{c_char, c_double, c_int, c_void};

#[cfg(not(feature = "openmpi"))]
mod abi {
    use std::os::raw::c_int;

    pub type MPI_Comm = c_int;
    pub type MPI_Group = c_int;
    pub type MPI_Datatype = c_int;
    pub type MPI_Op = c_int;
    pub type MPI_Errhandler = c_int;
    pub type MPI_Request = c_int;

    /// MPICH-family status layout.
    ///
    /// The element count is split across two words; the low bit of the second
    /// word carries the cancellation flag.
    #[repr(C)]
    #[derive(Debug, Clone, Copy, Default)]
    pub struct MPI_Status {
        pub count_lo: c_int,
        pub count_hi_and_cancelled: c_int,
        pub MPI_SOURCE: c_int,
        pub MPI_TAG: c_int,
        pub MPI_ERROR: c_int,
    }

    impl MPI_Status {
        pub fn byte_count(&self) -> i64 {
            let hi = i64::from((self.count_hi_and_cancelled as u32) >> 1);
            (hi << 32) | i64::from(self.count_lo as u32)
        }

        pub fn cancelled(&self) -> bool {
            self.count_hi_and_cancelled & 1 != 0
        }
    }
}

#[cfg(feature = "openmpi")]
mod abi {
    use std::os::raw::{c_int, c_void};

    pub type MPI_Comm = *mut c_void;
    pub type MPI_Group = *mut c_void;
    pub type MPI_Datatype = *mut c_void;
    pub type MPI_Op = *mut c_void;
    pub type MPI_Errhandler = *mut c_void;
    pub type MPI_Request = *mut c_void;

    /// Open MPI status layout.
    #[repr(C)]
    #[derive(Debug, Clone, Copy, Default)]
    pub struct MPI_Status {
        pub MPI_SOURCE: c_int,
        pub MPI_TAG: c_int,
        pub MPI_ERROR: c_int,
        pub _cancelled: c_int,
        pub _ucount: usize,
    }

    impl MPI_Status {
        pub fn byte_count(&self) -> i64 {
            self._ucount as i64
        }

        pub fn cancelled(&self) -> bool {
            self._cancelled != 0
        }
    }
}

pub use abi::*;

pub const MPI_SUCCESS: c_int = 0;

pub type MPI_User_function =
    unsafe extern "C" fn(*mut c_void, *mut c_void, *mut c_int, *mut MPI_Datatype);

// ============================================================
// Predefined constants table (mirrors `mpibind_constants`)
// ============================================================

pub const NUM_DATATYPES: usize = 26;
pub const NUM_OPS: usize = 12;
pub const NUM_THREAD_LEVELS: usize = 4;
pub const NUM_COMPARISONS: usize = 4;
pub const NUM_ERROR_CLASSES: usize = 32;

/// Index into [`NativeConstants::datatypes`]; order matches the C shim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum PredefinedDatatype {
    Char = 0,
    SignedChar,
    UnsignedChar,
    Byte,
    Short,
    UnsignedShort,
    Int,
    Unsigned,
    Long,
    UnsignedLong,
    LongLong,
    UnsignedLongLong,
    Float,
    Double,
    LongDouble,
    Packed,
    Int8,
    Int16,
    Int32,
    Int64,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    CBool,
    WChar,
}

/// Index into [`NativeConstants::ops`]; order matches the C shim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum PredefinedOp {
    Max = 0,
    Min,
    Sum,
    Prod,
    LogicalAnd,
    BitwiseAnd,
    LogicalOr,
    BitwiseOr,
    LogicalXor,
    BitwiseXor,
    MaxLoc,
    MinLoc,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct NativeConstants {
    pub comm_world: MPI_Comm,
    pub comm_self: MPI_Comm,
    pub comm_null: MPI_Comm,

    pub group_empty: MPI_Group,
    pub group_null: MPI_Group,

    pub datatype_null: MPI_Datatype,
    pub datatypes: [MPI_Datatype; NUM_DATATYPES],

    pub op_null: MPI_Op,
    pub ops: [MPI_Op; NUM_OPS],

    pub errhandler_null: MPI_Errhandler,
    pub errors_are_fatal: MPI_Errhandler,
    pub errors_return: MPI_Errhandler,

    pub request_null: MPI_Request,

    pub in_place: *mut c_void,

    pub any_source: c_int,
    pub any_tag: c_int,
    pub proc_null: c_int,
    pub root: c_int,
    pub undefined: c_int,

    pub bsend_overhead: c_int,
    pub max_processor_name: c_int,
    pub max_error_string: c_int,
    pub max_library_version_string: c_int,

    pub thread_levels: [c_int; NUM_THREAD_LEVELS],
    pub comparisons: [c_int; NUM_COMPARISONS],
    pub error_classes: [c_int; NUM_ERROR_CLASSES],
}

// The table only holds handle values and integers copied out of the native
// headers; it is never written after resolution.
unsafe impl Send for NativeConstants {}
unsafe impl Sync for NativeConstants {}

extern "C" {
    // ============================================================
    // Shim
    // ============================================================

    pub fn mpibind_resolve_constants(out: *mut NativeConstants);
    pub fn mpibind_status_size() -> usize;
    pub fn mpibind_abi_is_openmpi() -> c_int;
    pub fn mpibind_wtime() -> c_double;
    pub fn mpibind_wtick() -> c_double;

    // ============================================================
    // Environment
    // ============================================================

    pub fn MPI_Init_thread(
        argc: *mut c_int,
        argv: *mut *mut *mut c_char,
        required: c_int,
        provided: *mut c_int,
    ) -> c_int;
    pub fn MPI_Finalize() -> c_int;
    pub fn MPI_Initialized(flag: *mut c_int) -> c_int;
    pub fn MPI_Finalized(flag: *mut c_int) -> c_int;
    pub fn MPI_Query_thread(provided: *mut c_int) -> c_int;
    pub fn MPI_Is_thread_main(flag: *mut c_int) -> c_int;
    pub fn MPI_Get_version(version: *mut c_int, subversion: *mut c_int) -> c_int;
    pub fn MPI_Get_library_version(version: *mut c_char, resultlen: *mut c_int) -> c_int;
    pub fn MPI_Get_processor_name(name: *mut c_char, resultlen: *mut c_int) -> c_int;
    pub fn MPI_Abort(comm: MPI_Comm, errorcode: c_int) -> c_int;
    pub fn MPI_Buffer_attach(buffer: *mut c_void, size: c_int) -> c_int;
    pub fn MPI_Buffer_detach(buffer_addr: *mut c_void, size: *mut c_int) -> c_int;

    // ============================================================
    // Errors
    // ============================================================

    pub fn MPI_Error_class(errorcode: c_int, errorclass: *mut c_int) -> c_int;
    pub fn MPI_Error_string(errorcode: c_int, string: *mut c_char, resultlen: *mut c_int)
        -> c_int;
    pub fn MPI_Comm_set_errhandler(comm: MPI_Comm, errhandler: MPI_Errhandler) -> c_int;
    pub fn MPI_Comm_get_errhandler(comm: MPI_Comm, errhandler: *mut MPI_Errhandler) -> c_int;

    // ============================================================
    // Communicators
    // ============================================================

    pub fn MPI_Comm_rank(comm: MPI_Comm, rank: *mut c_int) -> c_int;
    pub fn MPI_Comm_size(comm: MPI_Comm, size: *mut c_int) -> c_int;
    pub fn MPI_Comm_compare(comm1: MPI_Comm, comm2: MPI_Comm, result: *mut c_int) -> c_int;
    pub fn MPI_Comm_dup(comm: MPI_Comm, newcomm: *mut MPI_Comm) -> c_int;
    pub fn MPI_Comm_split(comm: MPI_Comm, color: c_int, key: c_int, newcomm: *mut MPI_Comm)
        -> c_int;
    pub fn MPI_Comm_create(comm: MPI_Comm, group: MPI_Group, newcomm: *mut MPI_Comm) -> c_int;
    pub fn MPI_Comm_free(comm: *mut MPI_Comm) -> c_int;
    pub fn MPI_Comm_group(comm: MPI_Comm, group: *mut MPI_Group) -> c_int;

    // ============================================================
    // Groups
    // ============================================================

    pub fn MPI_Group_size(group: MPI_Group, size: *mut c_int) -> c_int;
    pub fn MPI_Group_rank(group: MPI_Group, rank: *mut c_int) -> c_int;
    pub fn MPI_Group_compare(group1: MPI_Group, group2: MPI_Group, result: *mut c_int) -> c_int;
    pub fn MPI_Group_union(group1: MPI_Group, group2: MPI_Group, newgroup: *mut MPI_Group)
        -> c_int;
    pub fn MPI_Group_intersection(
        group1: MPI_Group,
        group2: MPI_Group,
        newgroup: *mut MPI_Group,
    ) -> c_int;
    pub fn MPI_Group_difference(
        group1: MPI_Group,
        group2: MPI_Group,
        newgroup: *mut MPI_Group,
    ) -> c_int;
    pub fn MPI_Group_incl(
        group: MPI_Group,
        n: c_int,
        ranks: *const c_int,
        newgroup: *mut MPI_Group,
    ) -> c_int;
    pub fn MPI_Group_excl(
        group: MPI_Group,
        n: c_int,
        ranks: *const c_int,
        newgroup: *mut MPI_Group,
    ) -> c_int;
    pub fn MPI_Group_translate_ranks(
        group1: MPI_Group,
        n: c_int,
        ranks1: *const c_int,
        group2: MPI_Group,
        ranks2: *mut c_int,
    ) -> c_int;
    pub fn MPI_Group_free(group: *mut MPI_Group) -> c_int;

    // ============================================================
    // Point-to-Point
    // ============================================================

    pub fn MPI_Send(
        buf: *const c_void,
        count: c_int,
        datatype: MPI_Datatype,
        dest: c_int,
        tag: c_int,
        comm: MPI_Comm,
    ) -> c_int;
    pub fn MPI_Bsend(
        buf: *const c_void,
        count: c_int,
        datatype: MPI_Datatype,
        dest: c_int,
        tag: c_int,
        comm: MPI_Comm,
    ) -> c_int;
    pub fn MPI_Ssend(
        buf: *const c_void,
        count: c_int,
        datatype: MPI_Datatype,
        dest: c_int,
        tag: c_int,
        comm: MPI_Comm,
    ) -> c_int;
    pub fn MPI_Rsend(
        buf: *const c_void,
        count: c_int,
        datatype: MPI_Datatype,
        dest: c_int,
        tag: c_int,
        comm: MPI_Comm,
    ) -> c_int;
    pub fn MPI_Recv(
        buf: *mut c_void,
        count: c_int,
        datatype: MPI_Datatype,
        source: c_int,
        tag: c_int,
        comm: MPI_Comm,
        status: *mut MPI_Status,
    ) -> c_int;
    pub fn MPI_Isend(
        buf: *const c_void,
        count: c_int,
        datatype: MPI_Datatype,
        dest: c_int,
        tag: c_int,
        comm: MPI_Comm,
        request: *mut MPI_Request,
    ) -> c_int;
    pub fn MPI_Ibsend(
        buf: *const c_void,
        count: c_int,
        datatype: MPI_Datatype,
        dest: c_int,
        tag: c_int,
        comm: MPI_Comm,
        request: *mut MPI_Request,
    ) -> c_int;
    pub fn MPI_Issend(
        buf: *const c_void,
        count: c_int,
        datatype: MPI_Datatype,
        dest: c_int,
        tag: c_int,
        comm: MPI_Comm,
        request: *mut MPI_Request,
    ) -> c_int;
    pub fn MPI_Irsend(
        buf: *const c_void,
        count: c_int,
        datatype: MPI_Datatype,
        dest: c_int,
        tag: c_int,
        comm: MPI_Comm,
        request: *mut MPI_Request,
    ) -> c_int;
    pub fn MPI_Irecv(
        buf: *mut c_void,
        count: c_int,
        datatype: MPI_Datatype,
        source: c_int,
        tag: c_int,
        comm: MPI_Comm,
        request: *mut MPI_Request,
    ) -> c_int;
    pub fn MPI_Sendrecv(
        sendbuf: *const c_void,
        sendcount: c_int,
        sendtype: MPI_Datatype,
        dest: c_int,
        sendtag: c_int,
        recvbuf: *mut c_void,
        recvcount: c_int,
        recvtype: MPI_Datatype,
        source: c_int,
        recvtag: c_int,
        comm: MPI_Comm,
        status: *mut MPI_Status,
    ) -> c_int;
    pub fn MPI_Probe(source: c_int, tag: c_int, comm: MPI_Comm, status: *mut MPI_Status)
        -> c_int;
    pub fn MPI_Iprobe(
        source: c_int,
        tag: c_int,
        comm: MPI_Comm,
        flag: *mut c_int,
        status: *mut MPI_Status,
    ) -> c_int;
    pub fn MPI_Get_count(
        status: *const MPI_Status,
        datatype: MPI_Datatype,
        count: *mut c_int,
    ) -> c_int;

    // ============================================================
    // Request completion
    // ============================================================

    pub fn MPI_Wait(request: *mut MPI_Request, status: *mut MPI_Status) -> c_int;
    pub fn MPI_Test(request: *mut MPI_Request, flag: *mut c_int, status: *mut MPI_Status)
        -> c_int;
    pub fn MPI_Waitall(
        count: c_int,
        requests: *mut MPI_Request,
        statuses: *mut MPI_Status,
    ) -> c_int;
    pub fn MPI_Waitany(
        count: c_int,
        requests: *mut MPI_Request,
        index: *mut c_int,
        status: *mut MPI_Status,
    ) -> c_int;
    pub fn MPI_Cancel(request: *mut MPI_Request) -> c_int;

    // ============================================================
    // Collectives
    // ============================================================

    pub fn MPI_Barrier(comm: MPI_Comm) -> c_int;
    pub fn MPI_Bcast(
        buf: *mut c_void,
        count: c_int,
        datatype: MPI_Datatype,
        root: c_int,
        comm: MPI_Comm,
    ) -> c_int;
    pub fn MPI_Scatter(
        sendbuf: *const c_void,
        sendcount: c_int,
        sendtype: MPI_Datatype,
        recvbuf: *mut c_void,
        recvcount: c_int,
        recvtype: MPI_Datatype,
        root: c_int,
        comm: MPI_Comm,
    ) -> c_int;
    pub fn MPI_Scatterv(
        sendbuf: *const c_void,
        sendcounts: *const c_int,
        displs: *const c_int,
        sendtype: MPI_Datatype,
        recvbuf: *mut c_void,
        recvcount: c_int,
        recvtype: MPI_Datatype,
        root: c_int,
        comm: MPI_Comm,
    ) -> c_int;
    pub fn MPI_Gather(
        sendbuf: *const c_void,
        sendcount: c_int,
        sendtype: MPI_Datatype,
        recvbuf: *mut c_void,
        recvcount: c_int,
        recvtype: MPI_Datatype,
        root: c_int,
        comm: MPI_Comm,
    ) -> c_int;
    pub fn MPI_Gatherv(
        sendbuf: *const c_void,
        sendcount: c_int,
        sendtype: MPI_Datatype,
        recvbuf: *mut c_void,
        recvcounts: *const c_int,
        displs: *const c_int,
        recvtype: MPI_Datatype,
        root: c_int,
        comm: MPI_Comm,
    ) -> c_int;
    pub fn MPI_Allgather(
        sendbuf: *const c_void,
        sendcount: c_int,
        sendtype: MPI_Datatype,
        recvbuf: *mut c_void,
        recvcount: c_int,
        recvtype: MPI_Datatype,
        comm: MPI_Comm,
    ) -> c_int;
    pub fn MPI_Allgatherv(
        sendbuf: *const c_void,
        sendcount: c_int,
        sendtype: MPI_Datatype,
        recvbuf: *mut c_void,
        recvcounts: *const c_int,
        displs: *const c_int,
        recvtype: MPI_Datatype,
        comm: MPI_Comm,
    ) -> c_int;
    pub fn MPI_Alltoall(
        sendbuf: *const c_void,
        sendcount: c_int,
        sendtype: MPI_Datatype,
        recvbuf: *mut c_void,
        recvcount: c_int,
        recvtype: MPI_Datatype,
        comm: MPI_Comm,
    ) -> c_int;
    pub fn MPI_Alltoallv(
        sendbuf: *const c_void,
        sendcounts: *const c_int,
        sdispls: *const c_int,
        sendtype: MPI_Datatype,
        recvbuf: *mut c_void,
        recvcounts: *const c_int,
        rdispls: *const c_int,
        recvtype: MPI_Datatype,
        comm: MPI_Comm,
    ) -> c_int;
    pub fn MPI_Reduce(
        sendbuf: *const c_void,
        recvbuf: *mut c_void,
        count: c_int,
        datatype: MPI_Datatype,
        op: MPI_Op,
        root: c_int,
        comm: MPI_Comm,
    ) -> c_int;
    pub fn MPI_Allreduce(
        sendbuf: *const c_void,
        recvbuf: *mut c_void,
        count: c_int,
        datatype: MPI_Datatype,
        op: MPI_Op,
        comm: MPI_Comm,
    ) -> c_int;
    pub fn MPI_Reduce_scatter(
        sendbuf: *const c_void,
        recvbuf: *mut c_void,
        recvcounts: *const c_int,
        datatype: MPI_Datatype,
        op: MPI_Op,
        comm: MPI_Comm,
    ) -> c_int;
    pub fn MPI_Scan(
        sendbuf: *const c_void,
        recvbuf: *mut c_void,
        count: c_int,
        datatype: MPI_Datatype,
        op: MPI_Op,
        comm: MPI_Comm,
    ) -> c_int;
    pub fn MPI_Exscan(
        sendbuf: *const c_void,
        recvbuf: *mut c_void,
        count: c_int,
        datatype: MPI_Datatype,
        op: MPI_Op,
        comm: MPI_Comm,
    ) -> c_int;

    // ============================================================
    // User-defined reduction operations
    // ============================================================

    pub fn MPI_Op_create(function: MPI_User_function, commute: c_int, op: *mut MPI_Op) -> c_int;
    pub fn MPI_Op_free(op: *mut MPI_Op) -> c_int;
}
