//! Collective operations.
//!
//! Every process of the communicator must call the same collective in the
//! same order. Arguments marked "significant only at root" are ignored on the
//! other processes, but a buffer of the right type must still be passed.
//!
//! Regular collectives derive per-process counts from buffer lengths and
//! check, before any native call, that both buffers hold the same datatype
//! and that their lengths agree with the communicator size. The `v` variants
//! take explicit count and displacement arrays, which are handed to the
//! library as given.

use std::os::raw::c_int;

use crate::comm::Communicator;
use crate::constants;
use crate::datatype::{Buffer, BufferMut, Datatype, MpiDatatype};
use crate::error::{Error, Result};
use crate::ffi;
use crate::op::Operation;
use crate::rank::Rank;

fn same_length(expected: usize, actual: usize) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(Error::BufferMismatch { expected, actual })
    }
}

fn same_datatype(expected: Datatype, actual: Datatype) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(Error::DatatypeMismatch { expected, actual })
    }
}

/// Length of a buffer holding one `block`-sized block per process.
fn all_blocks(block: usize, size: i32) -> Result<usize> {
    let size = usize::try_from(size.max(1)).unwrap_or(1);
    block
        .checked_mul(size)
        .ok_or(Error::CountOverflow(block))
}

/// This process's entry in a per-process count array.
fn own_count(counts: &[i32], size: i32, rank: Rank) -> Result<usize> {
    same_length(usize::try_from(size).unwrap_or(0), counts.len())?;
    let count = usize::try_from(rank.get())
        .ok()
        .and_then(|i| counts.get(i))
        .copied()
        .ok_or_else(|| Error::Internal(format!("rank {rank} outside count array")))?;
    usize::try_from(count).map_err(|_| Error::Internal(format!("negative count {count}")))
}

/// Per-process share of a buffer holding one block for each of `size`
/// processes.
fn per_process(len: usize, size: i32) -> Result<c_int> {
    let size = usize::try_from(size.max(1)).unwrap_or(1);
    if len % size != 0 {
        return Err(Error::BufferMismatch {
            expected: (len / size + 1) * size,
            actual: len,
        });
    }
    Error::count(len / size)
}

impl Communicator {
    // ========================================================================
    // Synchronization
    // ========================================================================

    /// Block until every process has entered the barrier.
    pub fn barrier(&self) -> Result<()> {
        let ret = unsafe { ffi::MPI_Barrier(self.as_raw()) };
        Error::check(ret)
    }

    // ========================================================================
    // Data movement
    // ========================================================================

    /// Broadcast `buf` from `root` to every process.
    ///
    /// # Arguments
    ///
    /// * `buf` - Input at root, output elsewhere
    /// * `root` - Rank of the root process
    pub fn broadcast<B: BufferMut + ?Sized>(&self, buf: &mut B, root: Rank) -> Result<()> {
        let count = Error::count(buf.len())?;
        let datatype = buf.datatype().as_raw();
        let ret =
            unsafe { ffi::MPI_Bcast(buf.as_mut_ptr(), count, datatype, root.get(), self.as_raw()) };
        Error::check(ret)
    }

    /// Distribute equal blocks of `send` from `root`.
    ///
    /// Each process receives `recv.len()` elements; `send` (significant only
    /// at root) holds one such block per process in rank order, so at root its
    /// length must be `recv.len()` times the communicator size.
    pub fn scatter<S, R>(&self, send: &S, recv: &mut R, root: Rank) -> Result<()>
    where
        S: Buffer + ?Sized,
        R: BufferMut + ?Sized,
    {
        same_datatype(recv.datatype(), send.datatype())?;
        let count = Error::count(recv.len())?;
        if self.rank()? == root {
            same_length(all_blocks(recv.len(), self.size()?)?, send.len())?;
        }
        let recv_type = recv.datatype().as_raw();
        let ret = unsafe {
            ffi::MPI_Scatter(
                send.as_ptr(),
                count,
                send.datatype().as_raw(),
                recv.as_mut_ptr(),
                count,
                recv_type,
                root.get(),
                self.as_raw(),
            )
        };
        Error::check(ret)
    }

    /// Distribute blocks of varying size from `root`.
    ///
    /// Block `i` is `counts[i]` elements of `send` starting at `displs[i]`.
    /// `send`, `counts` and `displs` are significant only at root.
    pub fn scatterv<S, R>(
        &self,
        send: &S,
        counts: &[i32],
        displs: &[i32],
        recv: &mut R,
        root: Rank,
    ) -> Result<()>
    where
        S: Buffer + ?Sized,
        R: BufferMut + ?Sized,
    {
        let recv_count = Error::count(recv.len())?;
        let recv_type = recv.datatype().as_raw();
        let ret = unsafe {
            ffi::MPI_Scatterv(
                send.as_ptr(),
                counts.as_ptr(),
                displs.as_ptr(),
                send.datatype().as_raw(),
                recv.as_mut_ptr(),
                recv_count,
                recv_type,
                root.get(),
                self.as_raw(),
            )
        };
        Error::check(ret)
    }

    /// Collect equal blocks at `root`.
    ///
    /// Every process contributes `send.len()` elements; `recv` (significant
    /// only at root, and there `send.len()` times the communicator size)
    /// receives them in rank order.
    pub fn gather<S, R>(&self, send: &S, recv: &mut R, root: Rank) -> Result<()>
    where
        S: Buffer + ?Sized,
        R: BufferMut + ?Sized,
    {
        same_datatype(send.datatype(), recv.datatype())?;
        let count = Error::count(send.len())?;
        if self.rank()? == root {
            same_length(all_blocks(send.len(), self.size()?)?, recv.len())?;
        }
        let recv_type = recv.datatype().as_raw();
        let ret = unsafe {
            ffi::MPI_Gather(
                send.as_ptr(),
                count,
                send.datatype().as_raw(),
                recv.as_mut_ptr(),
                count,
                recv_type,
                root.get(),
                self.as_raw(),
            )
        };
        Error::check(ret)
    }

    /// Collect blocks of varying size at `root`.
    ///
    /// Process `i`'s contribution lands at `displs[i]` in `recv` and must be
    /// `counts[i]` elements. `recv`, `counts` and `displs` are significant
    /// only at root.
    pub fn gatherv<S, R>(
        &self,
        send: &S,
        recv: &mut R,
        counts: &[i32],
        displs: &[i32],
        root: Rank,
    ) -> Result<()>
    where
        S: Buffer + ?Sized,
        R: BufferMut + ?Sized,
    {
        let send_count = Error::count(send.len())?;
        let recv_type = recv.datatype().as_raw();
        let ret = unsafe {
            ffi::MPI_Gatherv(
                send.as_ptr(),
                send_count,
                send.datatype().as_raw(),
                recv.as_mut_ptr(),
                counts.as_ptr(),
                displs.as_ptr(),
                recv_type,
                root.get(),
                self.as_raw(),
            )
        };
        Error::check(ret)
    }

    /// Gather equal blocks to every process.
    ///
    /// `recv` must hold `send.len()` elements per process.
    pub fn allgather<S, R>(&self, send: &S, recv: &mut R) -> Result<()>
    where
        S: Buffer + ?Sized,
        R: BufferMut + ?Sized,
    {
        same_datatype(send.datatype(), recv.datatype())?;
        let count = Error::count(send.len())?;
        same_length(all_blocks(send.len(), self.size()?)?, recv.len())?;
        let recv_type = recv.datatype().as_raw();
        let ret = unsafe {
            ffi::MPI_Allgather(
                send.as_ptr(),
                count,
                send.datatype().as_raw(),
                recv.as_mut_ptr(),
                count,
                recv_type,
                self.as_raw(),
            )
        };
        Error::check(ret)
    }

    /// Gather blocks of varying size to every process.
    pub fn allgatherv<S, R>(&self, send: &S, recv: &mut R, counts: &[i32], displs: &[i32]) -> Result<()>
    where
        S: Buffer + ?Sized,
        R: BufferMut + ?Sized,
    {
        let send_count = Error::count(send.len())?;
        let recv_type = recv.datatype().as_raw();
        let ret = unsafe {
            ffi::MPI_Allgatherv(
                send.as_ptr(),
                send_count,
                send.datatype().as_raw(),
                recv.as_mut_ptr(),
                counts.as_ptr(),
                displs.as_ptr(),
                recv_type,
                self.as_raw(),
            )
        };
        Error::check(ret)
    }

    /// Personalized all-to-all exchange of equal blocks.
    ///
    /// Both buffers hold one block per process in rank order, so their
    /// lengths must be multiples of the communicator size.
    pub fn alltoall<S, R>(&self, send: &S, recv: &mut R) -> Result<()>
    where
        S: Buffer + ?Sized,
        R: BufferMut + ?Sized,
    {
        same_datatype(send.datatype(), recv.datatype())?;
        same_length(send.len(), recv.len())?;
        let size = self.size()?;
        let send_count = per_process(send.len(), size)?;
        let recv_count = per_process(recv.len(), size)?;
        let recv_type = recv.datatype().as_raw();
        let ret = unsafe {
            ffi::MPI_Alltoall(
                send.as_ptr(),
                send_count,
                send.datatype().as_raw(),
                recv.as_mut_ptr(),
                recv_count,
                recv_type,
                self.as_raw(),
            )
        };
        Error::check(ret)
    }

    /// Personalized all-to-all exchange of blocks of varying size.
    #[allow(clippy::too_many_arguments)]
    pub fn alltoallv<S, R>(
        &self,
        send: &S,
        send_counts: &[i32],
        send_displs: &[i32],
        recv: &mut R,
        recv_counts: &[i32],
        recv_displs: &[i32],
    ) -> Result<()>
    where
        S: Buffer + ?Sized,
        R: BufferMut + ?Sized,
    {
        let recv_type = recv.datatype().as_raw();
        let ret = unsafe {
            ffi::MPI_Alltoallv(
                send.as_ptr(),
                send_counts.as_ptr(),
                send_displs.as_ptr(),
                send.datatype().as_raw(),
                recv.as_mut_ptr(),
                recv_counts.as_ptr(),
                recv_displs.as_ptr(),
                recv_type,
                self.as_raw(),
            )
        };
        Error::check(ret)
    }

    // ========================================================================
    // Reductions
    // ========================================================================

    /// Combine `send` from every process with `op`; the result lands in
    /// `recv` at `root`.
    ///
    /// # Arguments
    ///
    /// * `send` - Data to send from this process
    /// * `recv` - Buffer for result (only significant at root, same length as `send`)
    /// * `op` - Reduction operation
    /// * `root` - Rank of the root process
    pub fn reduce<S, R>(&self, send: &S, recv: &mut R, op: Operation, root: Rank) -> Result<()>
    where
        S: Buffer + ?Sized,
        R: BufferMut + ?Sized,
    {
        same_datatype(send.datatype(), recv.datatype())?;
        same_length(send.len(), recv.len())?;
        let count = Error::count(send.len())?;
        let ret = unsafe {
            ffi::MPI_Reduce(
                send.as_ptr(),
                recv.as_mut_ptr(),
                count,
                send.datatype().as_raw(),
                op.as_raw(),
                root.get(),
                self.as_raw(),
            )
        };
        Error::check(ret)
    }

    /// [`reduce`](Self::reduce) where the root's contribution is taken from
    /// and replaced by `buf`. At other processes `buf` is only read.
    pub fn reduce_in_place<B: BufferMut + ?Sized>(
        &self,
        buf: &mut B,
        op: Operation,
        root: Rank,
    ) -> Result<()> {
        let count = Error::count(buf.len())?;
        let datatype = buf.datatype().as_raw();
        let ret = if self.rank()? == root {
            unsafe {
                ffi::MPI_Reduce(
                    constants::native().in_place.cast_const(),
                    buf.as_mut_ptr(),
                    count,
                    datatype,
                    op.as_raw(),
                    root.get(),
                    self.as_raw(),
                )
            }
        } else {
            unsafe {
                ffi::MPI_Reduce(
                    buf.as_ptr(),
                    std::ptr::null_mut(),
                    count,
                    datatype,
                    op.as_raw(),
                    root.get(),
                    self.as_raw(),
                )
            }
        };
        Error::check(ret)
    }

    /// Combine `send` from every process with `op`; every process receives
    /// the result in `recv`.
    pub fn allreduce<S, R>(&self, send: &S, recv: &mut R, op: Operation) -> Result<()>
    where
        S: Buffer + ?Sized,
        R: BufferMut + ?Sized,
    {
        same_datatype(send.datatype(), recv.datatype())?;
        same_length(send.len(), recv.len())?;
        let count = Error::count(send.len())?;
        let ret = unsafe {
            ffi::MPI_Allreduce(
                send.as_ptr(),
                recv.as_mut_ptr(),
                count,
                send.datatype().as_raw(),
                op.as_raw(),
                self.as_raw(),
            )
        };
        Error::check(ret)
    }

    /// [`allreduce`](Self::allreduce) in place.
    pub fn allreduce_in_place<B: BufferMut + ?Sized>(&self, buf: &mut B, op: Operation) -> Result<()> {
        let count = Error::count(buf.len())?;
        let datatype = buf.datatype().as_raw();
        let ret = unsafe {
            ffi::MPI_Allreduce(
                constants::native().in_place.cast_const(),
                buf.as_mut_ptr(),
                count,
                datatype,
                op.as_raw(),
                self.as_raw(),
            )
        };
        Error::check(ret)
    }

    /// All-reduce a single value.
    pub fn allreduce_scalar<T: MpiDatatype>(&self, value: T, op: Operation) -> Result<T> {
        let send = [value];
        let mut recv = [value];
        self.allreduce(&send, &mut recv, op)?;
        Ok(recv[0])
    }

    /// Reduce `send` element-wise, then scatter the result.
    ///
    /// Process `i` receives `recv_counts[i]` elements; `recv_counts` has one
    /// entry per process, `send` must hold the sum of all counts and `recv`
    /// exactly this process's share.
    pub fn reduce_scatter<S, R>(
        &self,
        send: &S,
        recv: &mut R,
        recv_counts: &[i32],
        op: Operation,
    ) -> Result<()>
    where
        S: Buffer + ?Sized,
        R: BufferMut + ?Sized,
    {
        same_datatype(send.datatype(), recv.datatype())?;
        let total: i64 = recv_counts.iter().map(|&c| i64::from(c)).sum();
        same_length(usize::try_from(total).unwrap_or(0), send.len())?;
        let share = own_count(recv_counts, self.size()?, self.rank()?)?;
        same_length(share, recv.len())?;
        let ret = unsafe {
            ffi::MPI_Reduce_scatter(
                send.as_ptr(),
                recv.as_mut_ptr(),
                recv_counts.as_ptr(),
                send.datatype().as_raw(),
                op.as_raw(),
                self.as_raw(),
            )
        };
        Error::check(ret)
    }

    /// Inclusive prefix reduction: process `i` receives the combination of
    /// the contributions of processes `0..=i`.
    pub fn scan<S, R>(&self, send: &S, recv: &mut R, op: Operation) -> Result<()>
    where
        S: Buffer + ?Sized,
        R: BufferMut + ?Sized,
    {
        same_datatype(send.datatype(), recv.datatype())?;
        same_length(send.len(), recv.len())?;
        let count = Error::count(send.len())?;
        let ret = unsafe {
            ffi::MPI_Scan(
                send.as_ptr(),
                recv.as_mut_ptr(),
                count,
                send.datatype().as_raw(),
                op.as_raw(),
                self.as_raw(),
            )
        };
        Error::check(ret)
    }

    /// Exclusive prefix reduction: process `i` receives the combination of
    /// processes `0..i`. The result at process 0 is undefined.
    pub fn exscan<S, R>(&self, send: &S, recv: &mut R, op: Operation) -> Result<()>
    where
        S: Buffer + ?Sized,
        R: BufferMut + ?Sized,
    {
        same_datatype(send.datatype(), recv.datatype())?;
        same_length(send.len(), recv.len())?;
        let count = Error::count(send.len())?;
        let ret = unsafe {
            ffi::MPI_Exscan(
                send.as_ptr(),
                recv.as_mut_ptr(),
                count,
                send.datatype().as_raw(),
                op.as_raw(),
                self.as_raw(),
            )
        };
        Error::check(ret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mismatched_reduction_lengths_are_rejected_locally() {
        let comm = Communicator::world();
        let send = [1.0f64, 2.0, 3.0];
        let mut recv = [0.0f64; 2];
        let err = comm
            .allreduce(&send, &mut recv, Operation::sum())
            .unwrap_err();
        assert_eq!(
            err,
            Error::BufferMismatch {
                expected: 3,
                actual: 2
            }
        );
        assert!(comm.reduce(&send, &mut recv, Operation::sum(), Rank::new(0)).is_err());
        assert!(comm.scan(&send, &mut recv, Operation::sum()).is_err());
        assert!(comm.exscan(&send, &mut recv, Operation::sum()).is_err());
    }

    #[test]
    fn mismatched_reduction_datatypes_are_rejected_locally() {
        let comm = Communicator::world();
        let send = [1.0f64; 3];
        let mut recv = [0u8; 3];
        let err = comm
            .allreduce(&send, &mut recv, Operation::sum())
            .unwrap_err();
        assert_eq!(
            err,
            Error::DatatypeMismatch {
                expected: Datatype::double(),
                actual: Datatype::uint8()
            }
        );
        let root = Rank::new(0);
        assert!(matches!(
            comm.reduce(&send, &mut recv, Operation::sum(), root),
            Err(Error::DatatypeMismatch { .. })
        ));
        assert!(matches!(
            comm.scan(&send, &mut recv, Operation::sum()),
            Err(Error::DatatypeMismatch { .. })
        ));
        assert!(matches!(
            comm.exscan(&send, &mut recv, Operation::sum()),
            Err(Error::DatatypeMismatch { .. })
        ));
        assert!(matches!(
            comm.reduce_scatter(&send, &mut recv, &[3], Operation::sum()),
            Err(Error::DatatypeMismatch { .. })
        ));
    }

    #[test]
    fn mismatched_block_datatypes_are_rejected_locally() {
        let comm = Communicator::world();
        let root = Rank::new(0);
        let wide = [0i64; 4];
        let mut narrow = [0i16; 4];
        for result in [
            comm.scatter(&wide, &mut narrow, root),
            comm.gather(&wide, &mut narrow, root),
            comm.allgather(&wide, &mut narrow),
            comm.alltoall(&wide, &mut narrow),
        ] {
            assert!(matches!(result, Err(Error::DatatypeMismatch { .. })));
        }
    }

    #[test]
    fn alltoall_rejects_unequal_lengths() {
        let comm = Communicator::world();
        let send = [0i32; 4];
        let mut recv = [0i32; 2];
        assert_eq!(
            comm.alltoall(&send, &mut recv).unwrap_err(),
            Error::BufferMismatch {
                expected: 4,
                actual: 2
            }
        );
    }

    #[test]
    fn block_buffer_lengths() {
        assert_eq!(all_blocks(3, 4).unwrap(), 12);
        assert_eq!(all_blocks(0, 4).unwrap(), 0);
        assert_eq!(all_blocks(5, 1).unwrap(), 5);
        assert!(matches!(
            all_blocks(usize::MAX, 2),
            Err(Error::CountOverflow(_))
        ));
    }

    #[test]
    fn own_count_picks_this_rank() {
        let counts = [2, 0, 5];
        assert_eq!(own_count(&counts, 3, Rank::new(0)).unwrap(), 2);
        assert_eq!(own_count(&counts, 3, Rank::new(1)).unwrap(), 0);
        assert_eq!(own_count(&counts, 3, Rank::new(2)).unwrap(), 5);
        assert_eq!(
            own_count(&counts, 4, Rank::new(0)).unwrap_err(),
            Error::BufferMismatch {
                expected: 4,
                actual: 3
            }
        );
        assert!(matches!(
            own_count(&[1, -1], 2, Rank::new(1)),
            Err(Error::Internal(_))
        ));
    }

    #[test]
    fn reduce_scatter_checks_total_count() {
        let comm = Communicator::world();
        let send = [0i32; 5];
        let mut recv = [0i32; 2];
        let err = comm
            .reduce_scatter(&send, &mut recv, &[2, 2], Operation::sum())
            .unwrap_err();
        assert_eq!(
            err,
            Error::BufferMismatch {
                expected: 4,
                actual: 5
            }
        );
    }

    #[test]
    fn per_process_share() {
        assert_eq!(per_process(12, 4).unwrap(), 3);
        assert_eq!(per_process(0, 4).unwrap(), 0);
        assert_eq!(per_process(5, 1).unwrap(), 5);
        assert!(matches!(
            per_process(10, 4),
            Err(Error::BufferMismatch {
                expected: 12,
                actual: 10
            })
        ));
    }
}
