//! Integration test for collective operations.
//!
//! Exercises barrier, broadcast, scatter/gather (regular and v variants),
//! allgather, alltoall, the reductions with predefined and user-defined
//! operations, and the in-place forms.
//!
//! Run with: mpiexec -n 4 ./target/debug/examples/test_collectives

use mpibind::{Error, Mpi, Operation, Rank, UserOperation};

fn main() {
    env_logger::init();

    let mpi = Mpi::init().expect("MPI init failed");
    let world = mpi.world();
    let rank = world.rank().expect("rank failed").get();
    let size = world.size().expect("size failed");
    let root = Rank::new(0);
    let n = size as usize;

    world.barrier().expect("barrier failed");

    // ========================================================================
    // Test 1: broadcast
    // ========================================================================
    {
        let mut data = if rank == 0 { vec![3.25f64; 10] } else { vec![0.0; 10] };
        world.broadcast(&mut data[..], root).expect("broadcast failed");
        assert!(data.iter().all(|&x| x == 3.25));
        if rank == 0 {
            println!("PASS: broadcast");
        }
    }

    // ========================================================================
    // Test 2: scatter then gather restores the original
    // ========================================================================
    {
        let full: Vec<i32> = (0..(2 * size)).collect();
        let mut mine = [0i32; 2];
        world.scatter(&full[..], &mut mine, root).expect("scatter failed");
        assert_eq!(mine, [2 * rank, 2 * rank + 1]);

        mine.iter_mut().for_each(|x| *x *= 10);
        let mut gathered = vec![0i32; 2 * n];
        world.gather(&mine, &mut gathered[..], root).expect("gather failed");
        if rank == 0 {
            assert_eq!(gathered, full.iter().map(|x| x * 10).collect::<Vec<_>>());
            println!("PASS: scatter / gather");
        }
    }

    // ========================================================================
    // Test 3: scatterv / gatherv with rank-dependent block sizes
    // ========================================================================
    {
        let counts: Vec<i32> = (1..=size).collect();
        let displs: Vec<i32> = counts
            .iter()
            .scan(0, |acc, &c| {
                let d = *acc;
                *acc += c;
                Some(d)
            })
            .collect();
        let total: i32 = counts.iter().sum();

        let full: Vec<f32> = (0..total).map(|x| x as f32).collect();
        let mut mine = vec![0.0f32; (rank + 1) as usize];
        world
            .scatterv(&full[..], &counts, &displs, &mut mine[..], root)
            .expect("scatterv failed");
        let start = displs[rank as usize];
        assert_eq!(mine, (start..start + rank + 1).map(|x| x as f32).collect::<Vec<_>>());

        let mut back = vec![0.0f32; total as usize];
        world
            .gatherv(&mine[..], &mut back[..], &counts, &displs, root)
            .expect("gatherv failed");
        if rank == 0 {
            assert_eq!(back, full);
        }

        let mut everywhere = vec![0.0f32; total as usize];
        world
            .allgatherv(&mine[..], &mut everywhere[..], &counts, &displs)
            .expect("allgatherv failed");
        assert_eq!(everywhere, full);
        if rank == 0 {
            println!("PASS: scatterv / gatherv / allgatherv");
        }
    }

    // ========================================================================
    // Test 4: allgather and alltoall
    // ========================================================================
    {
        let mut all = vec![0u32; n];
        world.allgather(&[rank as u32], &mut all[..]).expect("allgather failed");
        assert_eq!(all, (0..size as u32).collect::<Vec<_>>());

        // Block j of rank i's send buffer goes to rank j.
        let send: Vec<i64> = (0..size).map(|j| i64::from(rank * 100 + j)).collect();
        let mut recv = vec![0i64; n];
        world.alltoall(&send[..], &mut recv[..]).expect("alltoall failed");
        assert_eq!(recv, (0..size).map(|i| i64::from(i * 100 + rank)).collect::<Vec<_>>());

        let ones = vec![1i32; n];
        let offsets: Vec<i32> = (0..size).collect();
        let mut got = vec![0i32; n];
        world
            .alltoallv(&ones[..], &vec![1; n], &offsets, &mut got[..], &vec![1; n], &offsets)
            .expect("alltoallv failed");
        assert_eq!(got, vec![1; n]);

        let uneven = vec![0i64; n + 1];
        if size > 1 {
            assert!(matches!(
                world.alltoall(&uneven[..], &mut recv[..]),
                Err(Error::BufferMismatch { .. })
            ));
        }
        if rank == 0 {
            println!("PASS: allgather / alltoall / alltoallv");
        }
    }

    // ========================================================================
    // Test 5: reductions with predefined operations
    // ========================================================================
    {
        let expected_sum = f64::from(size * (size - 1) / 2);

        let mut sum = [0.0f64];
        world
            .reduce(&[f64::from(rank)], &mut sum, Operation::sum(), root)
            .expect("reduce failed");
        if rank == 0 {
            assert_eq!(sum[0], expected_sum);
        }

        let max = world
            .allreduce_scalar(rank, Operation::max())
            .expect("allreduce max failed");
        assert_eq!(max, size - 1);

        let mut bits = [0u32];
        world
            .allreduce(&[1u32 << rank], &mut bits, Operation::bitwise_or())
            .expect("allreduce bor failed");
        assert_eq!(bits[0], (1u32 << size) - 1);

        let mut in_place = [f64::from(rank), 1.0];
        world
            .allreduce_in_place(&mut in_place, Operation::sum())
            .expect("allreduce_in_place failed");
        assert_eq!(in_place, [expected_sum, f64::from(size)]);

        let mut at_root = [f64::from(rank)];
        world
            .reduce_in_place(&mut at_root, Operation::sum(), root)
            .expect("reduce_in_place failed");
        if rank == 0 {
            assert_eq!(at_root[0], expected_sum);
        }
        if rank == 0 {
            println!("PASS: reduce / allreduce / in place");
        }
    }

    // ========================================================================
    // Test 6: prefix reductions and reduce_scatter
    // ========================================================================
    {
        let mut prefix = [0i32];
        world
            .scan(&[rank + 1], &mut prefix, Operation::sum())
            .expect("scan failed");
        assert_eq!(prefix[0], (rank + 1) * (rank + 2) / 2);

        let mut exclusive = [0i32];
        world
            .exscan(&[rank + 1], &mut exclusive, Operation::sum())
            .expect("exscan failed");
        if rank > 0 {
            assert_eq!(exclusive[0], rank * (rank + 1) / 2);
        }

        let contributions = vec![1i32; n];
        let mut share = [0i32];
        world
            .reduce_scatter(&contributions[..], &mut share, &vec![1; n], Operation::sum())
            .expect("reduce_scatter failed");
        assert_eq!(share[0], size);
        if rank == 0 {
            println!("PASS: scan / exscan / reduce_scatter");
        }
    }

    // ========================================================================
    // Test 7: user-defined operations
    // ========================================================================
    {
        // Non-commutative: keep the left (lower-rank) operand, so the result
        // is rank 0's value.
        let first = UserOperation::new(false, |input: &[i32], inout: &mut [i32]| {
            inout.copy_from_slice(input);
        })
        .expect("create non-commutative op");
        // Element-wise maximum of absolute values.
        let abs_max = UserOperation::new(true, |input: &[f64], inout: &mut [f64]| {
            for (x, y) in input.iter().zip(inout.iter_mut()) {
                *y = x.abs().max(y.abs());
            }
        })
        .expect("create abs_max op");

        let mut leftmost = [0i32];
        world
            .allreduce(&[rank + 7], &mut leftmost, first.operation())
            .expect("allreduce with user op failed");
        assert_eq!(leftmost[0], 7);

        let send = [-f64::from(rank), f64::from(rank) * 0.5];
        let mut recv = [0.0f64; 2];
        world
            .allreduce(&send, &mut recv, abs_max.operation())
            .expect("allreduce with abs_max failed");
        assert_eq!(recv, [f64::from(size - 1), f64::from(size - 1) * 0.5]);

        first.free().expect("free user op");
        abs_max.free().expect("free user op");
        if rank == 0 {
            println!("PASS: user-defined operations");
        }
    }

    world.barrier().unwrap();
    if rank == 0 {
        println!("\n========================================");
        println!("All collective tests passed!");
        println!("========================================");
    }
}
