//! Request handles for nonblocking MPI operations.
//!
//! A [`Request`] is `Pending` until it is completed by [`Request::wait`] or a
//! successful [`Request::test`]; both consume it, so a finished request cannot
//! be waited on twice. Cancellation ([`Request::cancel`]) only asks the
//! library to cancel; the outcome is observed by completing the request and
//! checking [`Status::cancelled`].
//!
//! [`RequestSet`] holds many pending requests in one native array so they can
//! be completed together with `MPI_Waitall` / `MPI_Waitany`. The `*_into`
//! variants of the nonblocking sends and receives write their request
//! straight into a set.
//!
//! Every request is registered with a [`Scope`] opened by [`scope`]. The
//! buffers a request was posted with must outlive the scope, so they cannot
//! be touched or freed until the whole scope has ended. Dropping a request
//! that is still pending waits for it. A request that escapes its scope
//! without completing (for example through [`std::mem::forget`]) is caught
//! when the scope closes, and the process aborts instead of letting the
//! library write into freed memory.

use std::marker::PhantomData;
use std::mem;
use std::os::raw::c_int;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::constants;
use crate::error::{Error, ErrorClass, Result};
use crate::ffi;
use crate::status::Status;

fn null_request() -> ffi::MPI_Request {
    constants::native().request_null
}

/// Invariant in `'a`, so a scope cannot be narrowed to accept shorter borrows.
type Buffers<'a> = PhantomData<fn(&'a ()) -> &'a ()>;

/// Region within which nonblocking operations may borrow buffers.
///
/// Obtained from [`scope`]. Buffers passed to the immediate calls must
/// outlive `'a`, which in turn outlives the whole [`scope`] call.
pub struct Scope<'a> {
    outstanding: Arc<AtomicUsize>,
    _buffers: Buffers<'a>,
}

impl<'a> Scope<'a> {
    fn new() -> Self {
        Scope {
            outstanding: Arc::new(AtomicUsize::new(0)),
            _buffers: PhantomData,
        }
    }

    pub(crate) fn register(&self) -> Registration {
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        Registration {
            outstanding: Arc::clone(&self.outstanding),
        }
    }

    /// Requests and request sets of this scope that have not been dropped
    /// or completed.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }
}

impl Drop for Scope<'_> {
    fn drop(&mut self) {
        let leaked = self.outstanding();
        if leaked != 0 {
            log::error!("{leaked} request(s) escaped their scope while pending; aborting");
            std::process::abort();
        }
    }
}

/// Run `f` with a fresh [`Scope`] for nonblocking operations.
///
/// Every request registered with the scope is completed or dropped (and
/// therefore waited for) before `scope` returns.
///
/// # Example
///
/// ```no_run
/// use mpibind::{Mpi, Rank, Tag};
///
/// let mpi = Mpi::init().unwrap();
/// let world = mpi.world();
/// let mut recv = [0i32; 4];
/// let send = [1i32; 4];
///
/// mpibind::scope(|scope| {
///     let r = world.irecv(&mut recv, Rank::new(0), Tag::new(0), scope).unwrap();
///     let s = world.isend(&send, Rank::new(0), Tag::new(0), scope).unwrap();
///     s.wait().unwrap();
///     r.wait().unwrap();
/// });
/// ```
///
/// Buffers that do not outlive the scope are rejected:
///
/// ```compile_fail
/// use mpibind::{Mpi, Rank, Tag};
///
/// let mpi = Mpi::init().unwrap();
/// let world = mpi.world();
/// mpibind::scope(|scope| {
///     let mut local = [0i32; 4];
///     let request = world.irecv(&mut local, Rank::new(0), Tag::new(0), scope).unwrap();
///     std::mem::forget(request);
/// });
/// ```
pub fn scope<'a, F, R>(f: F) -> R
where
    F: FnOnce(&Scope<'a>) -> R,
{
    f(&Scope::new())
}

/// Membership of a request or request set in its [`Scope`].
pub(crate) struct Registration {
    outstanding: Arc<AtomicUsize>,
}

impl Registration {
    fn share(&self) -> Registration {
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        Registration {
            outstanding: Arc::clone(&self.outstanding),
        }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.outstanding.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A handle to a nonblocking MPI operation.
///
/// # Example
///
/// ```no_run
/// use mpibind::{Mpi, Rank, Tag};
///
/// let mpi = Mpi::init().unwrap();
/// let world = mpi.world();
/// let rank = world.rank().unwrap().get();
/// let size = world.size().unwrap();
///
/// let send = vec![rank as f64; 10];
/// let mut recv = vec![0.0; 10];
///
/// let next = Rank::new((rank + 1) % size);
/// let prev = Rank::new((rank + size - 1) % size);
/// mpibind::scope(|scope| {
///     let recv_req = world.irecv(&mut recv[..], prev, Tag::new(7), scope).unwrap();
///     let send_req = world.isend(&send[..], next, Tag::new(7), scope).unwrap();
///
///     send_req.wait().unwrap();
///     let status = recv_req.wait().unwrap();
///     println!("got {} bytes from {}", status.byte_count, status.source);
/// });
/// ```
#[must_use = "a pending request must be waited on or tested to completion"]
pub struct Request<'a> {
    raw: ffi::MPI_Request,
    registration: Registration,
    _buffers: Buffers<'a>,
}

unsafe impl Send for Request<'_> {}

/// Outcome of [`Request::test`].
#[must_use]
pub enum Completion<'a> {
    /// The operation has not finished; the request is handed back unchanged.
    Pending(Request<'a>),
    /// The operation finished and the request is gone.
    Complete(Status),
}

impl<'a> Request<'a> {
    pub(crate) fn from_raw(raw: ffi::MPI_Request, scope: &Scope<'a>) -> Self {
        Request {
            raw,
            registration: scope.register(),
            _buffers: PhantomData,
        }
    }

    fn take_raw(&mut self) -> ffi::MPI_Request {
        mem::replace(&mut self.raw, null_request())
    }

    /// Block until the operation completes.
    ///
    /// After this returns, the associated buffers are released.
    pub fn wait(mut self) -> Result<Status> {
        let mut raw = self.take_raw();
        let mut status = ffi::MPI_Status::default();
        let ret = unsafe { ffi::MPI_Wait(&mut raw, &mut status) };
        Error::check(ret)?;
        Ok(Status::from_raw(status))
    }

    /// Check for completion without blocking.
    ///
    /// Returns the request unchanged while it is pending, so it can be tested
    /// again. Once complete, the request is consumed.
    pub fn test(mut self) -> Result<Completion<'a>> {
        let mut flag: c_int = 0;
        let mut status = ffi::MPI_Status::default();
        let ret = unsafe { ffi::MPI_Test(&mut self.raw, &mut flag, &mut status) };
        if ret != ffi::MPI_SUCCESS {
            // The handle's state is unknown after a failed test; do not wait on it in drop.
            self.take_raw();
            return Err(Error::from_code(ret));
        }
        if flag != 0 {
            self.take_raw();
            Ok(Completion::Complete(Status::from_raw(status)))
        } else {
            Ok(Completion::Pending(self))
        }
    }

    /// Ask the library to cancel the operation.
    ///
    /// The request stays pending; complete it with [`wait`](Self::wait) or
    /// [`test`](Self::test) and inspect [`Status::cancelled`] to learn whether
    /// the cancellation took effect.
    pub fn cancel(&mut self) -> Result<()> {
        let ret = unsafe { ffi::MPI_Cancel(&mut self.raw) };
        Error::check(ret)
    }

    /// Whether the handle is still attached to an operation.
    pub fn is_pending(&self) -> bool {
        self.raw != null_request()
    }

    /// Wait for all requests in a collection to complete.
    ///
    /// See [`RequestSet::wait_all`].
    pub fn wait_all(requests: Vec<Request<'a>>) -> Result<Vec<Status>> {
        let Some(first) = requests.first() else {
            return Ok(Vec::new());
        };
        let mut set = RequestSet {
            raw: Vec::with_capacity(requests.len()),
            _registration: first.registration.share(),
            _buffers: PhantomData,
        };
        for request in requests {
            set.push(request);
        }
        set.wait_all()
    }
}

impl Drop for Request<'_> {
    fn drop(&mut self) {
        if self.is_pending() {
            log::warn!("pending request dropped; waiting for it to complete");
            let mut status = ffi::MPI_Status::default();
            unsafe { ffi::MPI_Wait(&mut self.raw, &mut status) };
        }
    }
}

/// A batch of pending requests stored contiguously for the native
/// multi-completion calls.
#[must_use = "pending requests must be waited on"]
pub struct RequestSet<'a> {
    raw: Vec<ffi::MPI_Request>,
    _registration: Registration,
    _buffers: Buffers<'a>,
}

unsafe impl Send for RequestSet<'_> {}

impl<'a> RequestSet<'a> {
    /// An empty set registered with `scope`.
    pub fn new(scope: &Scope<'a>) -> Self {
        Self::with_capacity(scope, 0)
    }

    /// An empty set with room for `capacity` requests.
    pub fn with_capacity(scope: &Scope<'a>, capacity: usize) -> Self {
        RequestSet {
            raw: Vec::with_capacity(capacity),
            _registration: scope.register(),
            _buffers: PhantomData,
        }
    }

    /// Move a request into the set. Returns its slot index.
    pub fn push(&mut self, mut request: Request<'a>) -> usize {
        self.raw.push(request.take_raw());
        self.raw.len() - 1
    }

    /// Reserve a slot and let `post` write a new request into it.
    ///
    /// The slot is released again if the native call fails.
    pub(crate) fn post<F>(&mut self, post: F) -> Result<usize>
    where
        F: FnOnce(*mut ffi::MPI_Request) -> c_int,
    {
        self.raw.push(null_request());
        let index = self.raw.len() - 1;
        let ret = post(&mut self.raw[index]);
        if ret != ffi::MPI_SUCCESS {
            self.raw.pop();
            return Err(Error::from_code(ret));
        }
        Ok(index)
    }

    /// Number of slots, including completed ones.
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    /// Whether the set has no slots.
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Number of slots still attached to an operation.
    pub fn pending(&self) -> usize {
        let null = null_request();
        self.raw.iter().filter(|r| **r != null).count()
    }

    /// Block until every request completes.
    ///
    /// Returns one [`Status`] per slot, in slot order. If some requests failed
    /// the call still completes the whole batch: each status carries its own
    /// [`ErrorClass`] in [`Status::error`], and the call itself succeeds. Any
    /// other failure of the native call is returned as an error.
    pub fn wait_all(mut self) -> Result<Vec<Status>> {
        if self.raw.is_empty() {
            return Ok(Vec::new());
        }
        let count = Error::count(self.raw.len())?;
        let mut statuses = vec![ffi::MPI_Status::default(); self.raw.len()];
        let ret = unsafe { ffi::MPI_Waitall(count, self.raw.as_mut_ptr(), statuses.as_mut_ptr()) };
        // Every handle is either completed or in an undefined state now.
        self.raw.clear();

        if ret == ffi::MPI_SUCCESS {
            return Ok(statuses.into_iter().map(Status::from_raw).collect());
        }
        if ErrorClass::classify(ret) == ErrorClass::InStatus {
            let statuses: Vec<Status> = statuses
                .into_iter()
                .map(Status::from_raw_with_error)
                .collect();
            log::debug!(
                "wait_all completed with {} failed request(s)",
                statuses.iter().filter(|s| !s.is_ok()).count()
            );
            return Ok(statuses);
        }
        Err(Error::from_code(ret))
    }

    /// Block until any one pending request completes.
    ///
    /// Returns its slot index and status, or `None` if no request is pending.
    /// The slot stays in the set but is no longer pending.
    pub fn wait_any(&mut self) -> Result<Option<(usize, Status)>> {
        if self.raw.is_empty() {
            return Ok(None);
        }
        let count = Error::count(self.raw.len())?;
        let mut index: c_int = 0;
        let mut status = ffi::MPI_Status::default();
        let ret =
            unsafe { ffi::MPI_Waitany(count, self.raw.as_mut_ptr(), &mut index, &mut status) };
        Error::check(ret)?;
        if index == constants::undefined() {
            return Ok(None);
        }
        Ok(Some((index as usize, Status::from_raw(status))))
    }
}

impl Drop for RequestSet<'_> {
    fn drop(&mut self) {
        let pending = self.pending();
        if pending == 0 {
            return;
        }
        log::warn!("request set dropped with {pending} pending request(s); waiting");
        if let Ok(count) = Error::count(self.raw.len()) {
            let mut statuses = vec![ffi::MPI_Status::default(); self.raw.len()];
            unsafe { ffi::MPI_Waitall(count, self.raw.as_mut_ptr(), statuses.as_mut_ptr()) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Null requests never reach the native library, so set bookkeeping can be
    // exercised without an MPI job.

    #[test]
    fn null_request_is_not_pending() {
        scope(|scope| {
            let request = Request::from_raw(null_request(), scope);
            assert!(!request.is_pending());
        });
    }

    #[test]
    fn empty_set_waits_trivially() {
        scope(|scope| {
            let set = RequestSet::new(scope);
            assert!(set.is_empty());
            assert_eq!(set.wait_all().unwrap().len(), 0);
        });
    }

    #[test]
    fn empty_set_wait_any_is_none() {
        scope(|scope| {
            let mut set = RequestSet::new(scope);
            assert!(set.wait_any().unwrap().is_none());
        });
    }

    #[test]
    fn push_assigns_sequential_slots() {
        scope(|scope| {
            let mut set = RequestSet::with_capacity(scope, 3);
            assert_eq!(set.push(Request::from_raw(null_request(), scope)), 0);
            assert_eq!(set.push(Request::from_raw(null_request(), scope)), 1);
            assert_eq!(set.len(), 2);
            assert_eq!(set.pending(), 0);
        });
    }

    #[test]
    fn successful_post_keeps_slot() {
        scope(|scope| {
            let mut set = RequestSet::new(scope);
            let index = set.post(|slot| {
                unsafe { *slot = null_request() };
                ffi::MPI_SUCCESS
            });
            assert_eq!(index.unwrap(), 0);
            assert_eq!(set.len(), 1);
        });
    }

    #[test]
    fn scope_tracks_requests_until_completed() {
        scope(|scope| {
            assert_eq!(scope.outstanding(), 0);
            let a = Request::from_raw(null_request(), scope);
            let b = Request::from_raw(null_request(), scope);
            assert_eq!(scope.outstanding(), 2);
            drop(a);
            assert_eq!(scope.outstanding(), 1);
            drop(b);
            assert_eq!(scope.outstanding(), 0);
        });
    }

    #[test]
    fn set_holds_one_registration() {
        scope(|scope| {
            let mut set = RequestSet::new(scope);
            set.push(Request::from_raw(null_request(), scope));
            set.push(Request::from_raw(null_request(), scope));
            assert_eq!(scope.outstanding(), 1);
            drop(set);
            assert_eq!(scope.outstanding(), 0);

            assert!(Request::wait_all(Vec::new()).unwrap().is_empty());
            assert_eq!(scope.outstanding(), 0);
        });
    }

    #[test]
    fn forgotten_request_stays_outstanding() {
        let scope = Scope::new();
        mem::forget(Request::from_raw(null_request(), &scope));
        assert_eq!(scope.outstanding(), 1);
        // Settle the count so closing the scope does not abort the test run.
        scope.outstanding.store(0, Ordering::SeqCst);
    }
}
