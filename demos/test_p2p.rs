//! Integration test for blocking point-to-point communication.
//!
//! Exercises the four send modes, non-overtaking delivery, wildcard
//! receives, probe/iprobe, sendrecv and truncation errors.
//!
//! Run with: mpiexec -n 4 ./target/debug/examples/test_p2p

use mpibind::{Error, ErrorClass, Mpi, Rank, Tag};

const ROUNDS: usize = 50;

fn main() {
    env_logger::init();

    let mpi = Mpi::init().expect("MPI init failed");
    let world = mpi.world();
    let rank = world.rank().expect("rank failed").get();
    let size = world.size().expect("size failed");

    assert!(size >= 2, "test_p2p requires at least 2 processes, got {size}");
    let next = Rank::new((rank + 1) % size);
    let prev = Rank::new((rank + size - 1) % size);

    // ========================================================================
    // Test 1: messages with the same envelope arrive in send order
    // ========================================================================
    if rank == 0 {
        for i in 0..ROUNDS {
            world
                .send(&[i as i64], Rank::new(1), Tag::new(5))
                .expect("send failed");
        }
    } else if rank == 1 {
        for i in 0..ROUNDS {
            let mut value = [0i64];
            world
                .recv(&mut value, Rank::new(0), Tag::new(5))
                .expect("recv failed");
            assert_eq!(value[0], i as i64, "message overtaken at round {i}");
        }
        println!("PASS: non-overtaking ({ROUNDS} messages)");
    }
    world.barrier().unwrap();

    // ========================================================================
    // Test 2: synchronous and ready modes
    // ========================================================================
    if rank == 0 {
        world
            .ssend(&[1.5f64, 2.5], Rank::new(1), Tag::new(10))
            .expect("ssend failed");
        // Rank 1 signals once its receive for the ready send is posted.
        let mut go = [0u8];
        world.recv(&mut go, Rank::new(1), Tag::new(11)).unwrap();
        world
            .rsend(&[42u32], Rank::new(1), Tag::new(12))
            .expect("rsend failed");
    } else if rank == 1 {
        let mut data = [0.0f64; 2];
        let status = world.recv(&mut data, Rank::new(0), Tag::new(10)).unwrap();
        assert_eq!(data, [1.5, 2.5]);
        assert_eq!(status.count::<f64>().unwrap(), Some(2));

        let mut ready = [0u32];
        mpibind::scope(|scope| {
            let request = world
                .irecv(&mut ready, Rank::new(0), Tag::new(12), scope)
                .unwrap();
            world.send(&[1u8], Rank::new(0), Tag::new(11)).unwrap();
            request.wait().unwrap();
        });
        assert_eq!(ready[0], 42);
        println!("PASS: ssend and rsend");
    }
    world.barrier().unwrap();

    // ========================================================================
    // Test 3: wildcard receive reports the actual envelope
    // ========================================================================
    if rank != 0 {
        world
            .send(&[rank], Rank::new(0), Tag::new(100 + rank))
            .unwrap();
    } else {
        let mut seen = vec![false; size as usize];
        for _ in 1..size {
            let mut value = [0i32];
            let status = world
                .recv(&mut value, Rank::any_source(), Tag::any())
                .unwrap();
            assert_eq!(status.source.get(), value[0]);
            assert_eq!(status.tag.get(), 100 + value[0]);
            assert_eq!(status.byte_count, 4);
            seen[value[0] as usize] = true;
        }
        assert!(seen[1..].iter().all(|s| *s));
        println!("PASS: any_source / any_tag");
    }
    world.barrier().unwrap();

    // ========================================================================
    // Test 4: probe before receive
    // ========================================================================
    {
        let payload: Vec<i16> = (0..(rank as i16 + 3)).collect();
        world.send(&payload[..], next, Tag::new(20)).unwrap();

        let status = world.probe(prev, Tag::new(20)).expect("probe failed");
        let count = status.count::<i16>().unwrap().expect("whole number of i16");
        assert_eq!(count, prev.get() + 3);
        let mut incoming = vec![0i16; count as usize];
        world.recv(&mut incoming[..], prev, Tag::new(20)).unwrap();
        assert_eq!(incoming, (0..(prev.get() as i16 + 3)).collect::<Vec<_>>());

        assert!(world.iprobe(prev, Tag::new(21)).unwrap().is_none());
        if rank == 0 {
            println!("PASS: probe / iprobe");
        }
    }
    world.barrier().unwrap();

    // ========================================================================
    // Test 5: sendrecv around the ring
    // ========================================================================
    {
        let send = [rank as f32; 3];
        let mut recv = [0.0f32; 3];
        let status = world
            .sendrecv(&send, next, Tag::new(30), &mut recv, prev, Tag::new(30))
            .expect("sendrecv failed");
        assert_eq!(recv, [prev.get() as f32; 3]);
        assert_eq!(status.source, prev);
        if rank == 0 {
            println!("PASS: sendrecv ring");
        }
    }
    world.barrier().unwrap();

    // ========================================================================
    // Test 6: receiving into a short buffer is a truncation error
    // ========================================================================
    if rank == 0 {
        world.send(&[0u8; 64], Rank::new(1), Tag::new(40)).unwrap();
    } else if rank == 1 {
        let mut short = [0u8; 8];
        match world.recv(&mut short, Rank::new(0), Tag::new(40)) {
            Err(err @ Error::Mpi { .. }) => {
                assert_eq!(err.class(), Some(ErrorClass::Truncate), "got {err}");
            }
            other => panic!("expected truncation error, got {other:?}"),
        }
        println!("PASS: truncation reported");
    }
    world.barrier().unwrap();

    if rank == 0 {
        println!("\n========================================");
        println!("All point-to-point tests passed!");
        println!("========================================");
    }
}
