//! Point-to-point communication.
//!
//! Four send modes are available in blocking and immediate form:
//!
//! | mode        | blocking            | immediate            | completes when                        |
//! |-------------|---------------------|----------------------|---------------------------------------|
//! | standard    | [`send`]            | [`isend`]            | the library is done with the buffer   |
//! | buffered    | [`bsend`]           | [`ibsend`]           | the message is copied to the attached buffer |
//! | synchronous | [`ssend`]           | [`issend`]           | the matching receive has started      |
//! | ready       | [`rsend`]           | [`irsend`]           | as standard; the receive must already be posted |
//!
//! Messages between one pair of processes on one communicator are never
//! reordered when their envelopes match.
//!
//! [`send`]: Communicator::send
//! [`isend`]: Communicator::isend
//! [`bsend`]: Communicator::bsend
//! [`ibsend`]: Communicator::ibsend
//! [`ssend`]: Communicator::ssend
//! [`issend`]: Communicator::issend
//! [`rsend`]: Communicator::rsend
//! [`irsend`]: Communicator::irsend

use std::os::raw::{c_int, c_void};

use crate::comm::Communicator;
use crate::constants;
use crate::datatype::{Buffer, BufferMut};
use crate::error::{Error, Result};
use crate::ffi;
use crate::rank::{Rank, Tag};
use crate::request::{Request, RequestSet, Scope};
use crate::status::Status;

type BlockingSend = unsafe extern "C" fn(
    *const c_void,
    c_int,
    ffi::MPI_Datatype,
    c_int,
    c_int,
    ffi::MPI_Comm,
) -> c_int;

type ImmediateSend = unsafe extern "C" fn(
    *const c_void,
    c_int,
    ffi::MPI_Datatype,
    c_int,
    c_int,
    ffi::MPI_Comm,
    *mut ffi::MPI_Request,
) -> c_int;

impl Communicator {
    fn blocking_send<B: Buffer + ?Sized>(
        &self,
        f: BlockingSend,
        buf: &B,
        dest: Rank,
        tag: Tag,
    ) -> Result<()> {
        let count = Error::count(buf.len())?;
        let ret = unsafe {
            f(
                buf.as_ptr(),
                count,
                buf.datatype().as_raw(),
                dest.get(),
                tag.get(),
                self.as_raw(),
            )
        };
        Error::check(ret)
    }

    fn immediate_send<'a, B: Buffer + ?Sized>(
        &self,
        f: ImmediateSend,
        buf: &'a B,
        dest: Rank,
        tag: Tag,
        scope: &Scope<'a>,
    ) -> Result<Request<'a>> {
        let count = Error::count(buf.len())?;
        let mut raw = constants::native().request_null;
        let ret = unsafe {
            f(
                buf.as_ptr(),
                count,
                buf.datatype().as_raw(),
                dest.get(),
                tag.get(),
                self.as_raw(),
                &mut raw,
            )
        };
        Error::check(ret)?;
        Ok(Request::from_raw(raw, scope))
    }

    fn immediate_send_into<'a, B: Buffer + ?Sized>(
        &self,
        f: ImmediateSend,
        buf: &'a B,
        dest: Rank,
        tag: Tag,
        requests: &mut RequestSet<'a>,
    ) -> Result<usize> {
        let count = Error::count(buf.len())?;
        let (ptr, datatype, comm) = (buf.as_ptr(), buf.datatype().as_raw(), self.as_raw());
        requests.post(|slot| unsafe { f(ptr, count, datatype, dest.get(), tag.get(), comm, slot) })
    }

    // ========================================================================
    // Blocking
    // ========================================================================

    /// Standard-mode send.
    pub fn send<B: Buffer + ?Sized>(&self, buf: &B, dest: Rank, tag: Tag) -> Result<()> {
        self.blocking_send(ffi::MPI_Send, buf, dest, tag)
    }

    /// Buffered-mode send.
    ///
    /// Needs a buffer attached with
    /// [`Mpi::attach_buffer`](crate::Mpi::attach_buffer) large enough for the
    /// message plus [`bsend_overhead`](crate::constants::bsend_overhead).
    pub fn bsend<B: Buffer + ?Sized>(&self, buf: &B, dest: Rank, tag: Tag) -> Result<()> {
        self.blocking_send(ffi::MPI_Bsend, buf, dest, tag)
    }

    /// Synchronous-mode send.
    pub fn ssend<B: Buffer + ?Sized>(&self, buf: &B, dest: Rank, tag: Tag) -> Result<()> {
        self.blocking_send(ffi::MPI_Ssend, buf, dest, tag)
    }

    /// Ready-mode send. The matching receive must already be posted.
    pub fn rsend<B: Buffer + ?Sized>(&self, buf: &B, dest: Rank, tag: Tag) -> Result<()> {
        self.blocking_send(ffi::MPI_Rsend, buf, dest, tag)
    }

    /// Blocking receive into `buf`.
    ///
    /// `source` may be [`Rank::any_source`] and `tag` may be [`Tag::any`];
    /// the returned status names the actual sender and tag. Receiving a
    /// message longer than `buf` fails with
    /// [`ErrorClass::Truncate`](crate::ErrorClass::Truncate).
    pub fn recv<B: BufferMut + ?Sized>(&self, buf: &mut B, source: Rank, tag: Tag) -> Result<Status> {
        let count = Error::count(buf.len())?;
        let datatype = buf.datatype().as_raw();
        let mut status = ffi::MPI_Status::default();
        let ret = unsafe {
            ffi::MPI_Recv(
                buf.as_mut_ptr(),
                count,
                datatype,
                source.get(),
                tag.get(),
                self.as_raw(),
                &mut status,
            )
        };
        Error::check(ret)?;
        Ok(Status::from_raw(status))
    }

    /// Send `send` to `dest` and receive into `recv` from `source` in one
    /// call, without deadlocking on the exchange.
    pub fn sendrecv<S, R>(
        &self,
        send: &S,
        dest: Rank,
        send_tag: Tag,
        recv: &mut R,
        source: Rank,
        recv_tag: Tag,
    ) -> Result<Status>
    where
        S: Buffer + ?Sized,
        R: BufferMut + ?Sized,
    {
        let send_count = Error::count(send.len())?;
        let recv_count = Error::count(recv.len())?;
        let recv_type = recv.datatype().as_raw();
        let mut status = ffi::MPI_Status::default();
        let ret = unsafe {
            ffi::MPI_Sendrecv(
                send.as_ptr(),
                send_count,
                send.datatype().as_raw(),
                dest.get(),
                send_tag.get(),
                recv.as_mut_ptr(),
                recv_count,
                recv_type,
                source.get(),
                recv_tag.get(),
                self.as_raw(),
                &mut status,
            )
        };
        Error::check(ret)?;
        Ok(Status::from_raw(status))
    }

    /// Block until a matching message is available, without receiving it.
    pub fn probe(&self, source: Rank, tag: Tag) -> Result<Status> {
        let mut status = ffi::MPI_Status::default();
        let ret = unsafe { ffi::MPI_Probe(source.get(), tag.get(), self.as_raw(), &mut status) };
        Error::check(ret)?;
        Ok(Status::from_raw(status))
    }

    /// Check for a matching message without blocking.
    pub fn iprobe(&self, source: Rank, tag: Tag) -> Result<Option<Status>> {
        let mut flag: c_int = 0;
        let mut status = ffi::MPI_Status::default();
        let ret = unsafe {
            ffi::MPI_Iprobe(source.get(), tag.get(), self.as_raw(), &mut flag, &mut status)
        };
        Error::check(ret)?;
        Ok((flag != 0).then(|| Status::from_raw(status)))
    }

    // ========================================================================
    // Immediate
    // ========================================================================

    /// Immediate standard-mode send.
    ///
    /// `buf` stays borrowed until the end of `scope`.
    pub fn isend<'a, B: Buffer + ?Sized>(
        &self,
        buf: &'a B,
        dest: Rank,
        tag: Tag,
        scope: &Scope<'a>,
    ) -> Result<Request<'a>> {
        self.immediate_send(ffi::MPI_Isend, buf, dest, tag, scope)
    }

    /// Immediate buffered-mode send.
    pub fn ibsend<'a, B: Buffer + ?Sized>(
        &self,
        buf: &'a B,
        dest: Rank,
        tag: Tag,
        scope: &Scope<'a>,
    ) -> Result<Request<'a>> {
        self.immediate_send(ffi::MPI_Ibsend, buf, dest, tag, scope)
    }

    /// Immediate synchronous-mode send.
    pub fn issend<'a, B: Buffer + ?Sized>(
        &self,
        buf: &'a B,
        dest: Rank,
        tag: Tag,
        scope: &Scope<'a>,
    ) -> Result<Request<'a>> {
        self.immediate_send(ffi::MPI_Issend, buf, dest, tag, scope)
    }

    /// Immediate ready-mode send.
    pub fn irsend<'a, B: Buffer + ?Sized>(
        &self,
        buf: &'a B,
        dest: Rank,
        tag: Tag,
        scope: &Scope<'a>,
    ) -> Result<Request<'a>> {
        self.immediate_send(ffi::MPI_Irsend, buf, dest, tag, scope)
    }

    /// Immediate receive.
    ///
    /// `buf` stays mutably borrowed until the end of `scope`.
    pub fn irecv<'a, B: BufferMut + ?Sized>(
        &self,
        buf: &'a mut B,
        source: Rank,
        tag: Tag,
        scope: &Scope<'a>,
    ) -> Result<Request<'a>> {
        let count = Error::count(buf.len())?;
        let datatype = buf.datatype().as_raw();
        let mut raw = constants::native().request_null;
        let ret = unsafe {
            ffi::MPI_Irecv(
                buf.as_mut_ptr(),
                count,
                datatype,
                source.get(),
                tag.get(),
                self.as_raw(),
                &mut raw,
            )
        };
        Error::check(ret)?;
        Ok(Request::from_raw(raw, scope))
    }

    /// [`isend`](Self::isend) writing its request into `requests`.
    ///
    /// Returns the slot index.
    pub fn isend_into<'a, B: Buffer + ?Sized>(
        &self,
        buf: &'a B,
        dest: Rank,
        tag: Tag,
        requests: &mut RequestSet<'a>,
    ) -> Result<usize> {
        self.immediate_send_into(ffi::MPI_Isend, buf, dest, tag, requests)
    }

    /// [`ibsend`](Self::ibsend) writing its request into `requests`.
    pub fn ibsend_into<'a, B: Buffer + ?Sized>(
        &self,
        buf: &'a B,
        dest: Rank,
        tag: Tag,
        requests: &mut RequestSet<'a>,
    ) -> Result<usize> {
        self.immediate_send_into(ffi::MPI_Ibsend, buf, dest, tag, requests)
    }

    /// [`issend`](Self::issend) writing its request into `requests`.
    pub fn issend_into<'a, B: Buffer + ?Sized>(
        &self,
        buf: &'a B,
        dest: Rank,
        tag: Tag,
        requests: &mut RequestSet<'a>,
    ) -> Result<usize> {
        self.immediate_send_into(ffi::MPI_Issend, buf, dest, tag, requests)
    }

    /// [`irsend`](Self::irsend) writing its request into `requests`.
    pub fn irsend_into<'a, B: Buffer + ?Sized>(
        &self,
        buf: &'a B,
        dest: Rank,
        tag: Tag,
        requests: &mut RequestSet<'a>,
    ) -> Result<usize> {
        self.immediate_send_into(ffi::MPI_Irsend, buf, dest, tag, requests)
    }

    /// [`irecv`](Self::irecv) writing its request into `requests`.
    pub fn irecv_into<'a, B: BufferMut + ?Sized>(
        &self,
        buf: &'a mut B,
        source: Rank,
        tag: Tag,
        requests: &mut RequestSet<'a>,
    ) -> Result<usize> {
        let count = Error::count(buf.len())?;
        let datatype = buf.datatype().as_raw();
        let ptr = buf.as_mut_ptr();
        let comm = self.as_raw();
        requests.post(|slot| unsafe {
            ffi::MPI_Irecv(ptr, count, datatype, source.get(), tag.get(), comm, slot)
        })
    }
}
