//! Integration test for nonblocking operations and request completion.
//!
//! Exercises isend/irecv with wait, polling with test, cancellation,
//! request sets filled through the `*_into` calls, wait_any, wait_all
//! with one failing request, and scope bookkeeping.
//!
//! Run with: mpiexec -n 4 ./target/debug/examples/test_requests

use mpibind::{Completion, ErrorClass, Mpi, Rank, Request, RequestSet, Tag};

fn main() {
    env_logger::init();

    let mut mpi = Mpi::init().expect("MPI init failed");
    let world = mpi.world();
    let rank = world.rank().expect("rank failed").get();
    let size = world.size().expect("size failed");

    assert!(size >= 2, "test_requests requires at least 2 processes, got {size}");
    let next = Rank::new((rank + 1) % size);
    let prev = Rank::new((rank + size - 1) % size);

    // ========================================================================
    // Test 1: isend / irecv ring with wait
    // ========================================================================
    {
        let send = vec![rank as f64 * 10.0 + 1.0, rank as f64 * 10.0 + 2.0];
        let mut recv = vec![0.0f64; 2];

        let status = mpibind::scope(|scope| {
            let recv_req = world
                .irecv(&mut recv[..], prev, Tag::new(1), scope)
                .expect("irecv failed");
            let send_req = world
                .isend(&send[..], next, Tag::new(1), scope)
                .expect("isend failed");
            assert_eq!(scope.outstanding(), 2);
            send_req.wait().expect("isend wait failed");
            let status = recv_req.wait().expect("irecv wait failed");
            assert_eq!(scope.outstanding(), 0);
            status
        });

        assert_eq!(status.source, prev);
        assert_eq!(recv, vec![prev.get() as f64 * 10.0 + 1.0, prev.get() as f64 * 10.0 + 2.0]);
        if rank == 0 {
            println!("PASS: isend/irecv ring");
        }
    }
    world.barrier().unwrap();

    // ========================================================================
    // Test 2: poll with test until complete
    // ========================================================================
    {
        let mut value = [0i32];
        let mut polls = 0u64;
        let status = mpibind::scope(|scope| {
            let mut request = world.irecv(&mut value, prev, Tag::new(2), scope).unwrap();
            world.barrier().unwrap();
            world.send(&[rank * 3], next, Tag::new(2)).unwrap();

            loop {
                match request.test().expect("test failed") {
                    Completion::Pending(pending) => {
                        request = pending;
                        polls += 1;
                    }
                    Completion::Complete(status) => break status,
                }
            }
        });
        assert_eq!(status.source, prev);
        assert_eq!(value[0], prev.get() * 3);
        if rank == 0 {
            println!("PASS: test polling ({polls} pending polls)");
        }
    }
    world.barrier().unwrap();

    // ========================================================================
    // Test 3: cancel a receive that will never match
    // ========================================================================
    {
        let mut never = [0u8; 4];
        mpibind::scope(|scope| {
            let mut request = world.irecv(&mut never, prev, Tag::new(999), scope).unwrap();
            assert!(request.is_pending());
            request.cancel().expect("cancel failed");
            let status = request.wait().expect("wait after cancel failed");
            assert!(status.cancelled, "receive should report cancelled");
        });
        if rank == 0 {
            println!("PASS: cancel");
        }
    }
    world.barrier().unwrap();

    // ========================================================================
    // Test 4: request sets, filled directly and completed with wait_all
    // ========================================================================
    {
        let sends: Vec<Vec<i64>> = (0..3).map(|i| vec![(rank * 100 + i) as i64; 4]).collect();
        let mut recvs: Vec<Vec<i64>> = vec![vec![0; 4]; 3];

        let statuses = mpibind::scope(|scope| {
            let mut set = RequestSet::with_capacity(scope, 6);
            for (i, buf) in recvs.iter_mut().enumerate() {
                let slot = world
                    .irecv_into(buf, prev, Tag::new(40 + i as i32), &mut set)
                    .unwrap();
                assert_eq!(slot, i);
            }
            for (i, buf) in sends.iter().enumerate() {
                world
                    .isend_into(buf, next, Tag::new(40 + i as i32), &mut set)
                    .unwrap();
            }
            assert_eq!(set.pending(), 6);
            set.wait_all().expect("wait_all failed")
        });

        assert_eq!(statuses.len(), 6);
        assert!(statuses.iter().all(|s| s.is_ok()));
        for (i, buf) in recvs.iter().enumerate() {
            assert_eq!(buf, &vec![(prev.get() * 100 + i as i32) as i64; 4]);
            assert_eq!(statuses[i].tag, Tag::new(40 + i as i32));
        }
        if rank == 0 {
            println!("PASS: *_into + wait_all");
        }
    }
    world.barrier().unwrap();

    // ========================================================================
    // Test 5: wait_any drains a set one request at a time
    // ========================================================================
    {
        let mut inbox = [[0u16; 2]; 2];
        let [first, second] = &mut inbox;
        let mut done = mpibind::scope(|scope| {
            let mut set = RequestSet::new(scope);
            set.push(world.irecv(first, prev, Tag::new(50), scope).unwrap());
            set.push(world.irecv(second, prev, Tag::new(51), scope).unwrap());

            world.send(&[1u16, 1], next, Tag::new(51)).unwrap();
            world.send(&[0u16, 0], next, Tag::new(50)).unwrap();

            let mut done = Vec::new();
            while let Some((index, status)) = set.wait_any().expect("wait_any failed") {
                assert_eq!(status.tag, Tag::new(50 + index as i32));
                done.push(index);
            }
            assert_eq!(set.pending(), 0);
            done
        });
        done.sort_unstable();
        assert_eq!(done, vec![0, 1]);
        assert_eq!(inbox, [[0, 0], [1, 1]]);
        if rank == 0 {
            println!("PASS: wait_any");
        }
    }
    world.barrier().unwrap();

    // ========================================================================
    // Test 6: wait_all completes the batch when one request fails
    // ========================================================================
    {
        let mut ok = [0i32];
        let mut short = [0i32; 1];
        let statuses = mpibind::scope(|scope| {
            let requests = vec![
                world.irecv(&mut ok, prev, Tag::new(60), scope).unwrap(),
                world.irecv(&mut short, prev, Tag::new(61), scope).unwrap(),
            ];

            world.send(&[rank], next, Tag::new(60)).unwrap();
            world.send(&[rank; 8], next, Tag::new(61)).unwrap();

            Request::wait_all(requests).expect("wait_all should report per-request errors")
        });
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[0].error, ErrorClass::Success);
        assert_eq!(statuses[1].error, ErrorClass::Truncate);
        assert_eq!(ok[0], prev.get());
        if rank == 0 {
            println!("PASS: wait_all with a failed request");
        }
    }
    world.barrier().unwrap();

    // ========================================================================
    // Test 7: immediate buffered and synchronous sends
    // ========================================================================
    {
        let payload = [rank as u64; 8];
        let needed = std::mem::size_of_val(&payload) + mpibind::constants::bsend_overhead() as usize;
        mpi.attach_buffer(needed).unwrap();

        let mut a = [0u64; 8];
        let mut b = [0u64; 8];
        let statuses = mpibind::scope(|scope| {
            let ra = world.irecv(&mut a, prev, Tag::new(70), scope).unwrap();
            let rb = world.irecv(&mut b, prev, Tag::new(71), scope).unwrap();
            let sa = world.ibsend(&payload, next, Tag::new(70), scope).unwrap();
            let sb = world.issend(&payload, next, Tag::new(71), scope).unwrap();
            Request::wait_all(vec![ra, rb, sa, sb]).unwrap()
        });
        assert!(statuses.iter().all(|s| s.is_ok()));
        assert_eq!(a, [prev.get() as u64; 8]);
        assert_eq!(b, [prev.get() as u64; 8]);
        mpi.detach_buffer().unwrap();
        if rank == 0 {
            println!("PASS: ibsend / issend");
        }
    }
    world.barrier().unwrap();

    // ========================================================================
    // Test 8: dropping a pending request inside its scope waits for it
    // ========================================================================
    {
        let mut late = [0i32];
        mpibind::scope(|scope| {
            let pending = world.irecv(&mut late, prev, Tag::new(80), scope).unwrap();
            world.send(&[rank + 1], next, Tag::new(80)).unwrap();
            drop(pending);
            assert_eq!(scope.outstanding(), 0);
        });
        assert_eq!(late[0], prev.get() + 1);
        if rank == 0 {
            println!("PASS: drop waits for a pending request");
        }
    }
    world.barrier().unwrap();

    if rank == 0 {
        println!("\n========================================");
        println!("All request tests passed!");
        println!("========================================");
    }
}
