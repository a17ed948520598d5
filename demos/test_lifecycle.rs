//! Integration test for environment lifecycle and introspection.
//!
//! Exercises init options, thread queries, version strings, timers, the
//! buffered-send buffer, error handlers and finalize.
//!
//! Run with: mpiexec -n 2 ./target/debug/examples/test_lifecycle

use mpibind::{
    constants, error_string, Communicator, Error, ErrorClass, ErrorHandler, InitOptions, Mpi,
    Rank, Tag, ThreadLevel,
};

fn main() {
    env_logger::init();

    assert!(
        !Mpi::is_initialized().expect("is_initialized failed"),
        "is_initialized should be false before init"
    );

    let mut mpi = Mpi::init_with(InitOptions::new().thread_level(ThreadLevel::Funneled))
        .expect("MPI init failed");
    let world = mpi.world();
    let rank = world.rank().expect("rank failed");
    let size = world.size().expect("size failed");

    assert!(Mpi::is_initialized().unwrap(), "is_initialized should be true after init");
    assert!(!Mpi::is_finalized().unwrap(), "is_finalized should be false before finalize");
    println!("PASS: initialized flags");

    // Thread support
    let level = mpi.thread_level();
    assert_eq!(mpi.query_thread().expect("query_thread failed"), level);
    assert!(mpi.is_thread_main().expect("is_thread_main failed"));
    println!("PASS: thread level = {level:?}");

    // Versions
    let (major, minor) = Mpi::version().expect("version failed");
    assert!(major >= 3, "expected MPI-3 or newer, got {major}.{minor}");
    let library = Mpi::library_version().expect("library_version failed");
    assert!(!library.is_empty(), "library version should not be empty");
    let name = Mpi::processor_name().expect("processor_name failed");
    assert!(!name.is_empty(), "processor name should not be empty");
    println!("PASS: MPI {major}.{minor} on {name}");

    // Timers
    let t1 = Mpi::wtime();
    let t2 = Mpi::wtime();
    assert!(t2 >= t1, "wtime should be monotonic");
    assert!(Mpi::wtick() > 0.0, "wtick should be positive");
    println!("PASS: wtime/wtick");

    // World and self
    assert!(rank.get() >= 0 && rank.get() < size);
    let me = mpi.self_comm();
    assert_eq!(me.size().unwrap(), 1);
    assert_eq!(me.rank().unwrap(), Rank::new(0));
    println!("PASS: world rank={rank} size={size}");

    // Errors are returned, not fatal
    assert_eq!(world.error_handler().unwrap(), ErrorHandler::errors_return());
    let bad = world.send(&[1i32], Rank::new(size + 10), Tag::new(0));
    match bad {
        Err(Error::Mpi { class, code, ref message }) => {
            assert_eq!(class, ErrorClass::Rank, "unexpected class for code {code}");
            assert!(!message.is_empty());
        }
        other => panic!("send to invalid rank should fail, got {other:?}"),
    }
    println!("PASS: invalid rank reported as ErrorClass::Rank");

    // Codes the library never issued still classify and describe cleanly
    for code in [i32::MAX, -12345, i32::MIN] {
        let class = ErrorClass::classify(code);
        assert_ne!(class, ErrorClass::Success, "code {code} classified as success");
        let message = error_string(code);
        assert!(!message.is_empty(), "empty message for code {code}");
        assert_eq!(Error::from_code(code).class(), Some(class));
    }
    println!("PASS: unknown codes classify without failing");

    // Buffered send through an attached buffer, to ourselves
    let payload = [7u64; 16];
    let needed = std::mem::size_of_val(&payload) + constants::bsend_overhead() as usize;
    mpi.attach_buffer(needed).expect("attach_buffer failed");
    world.bsend(&payload, rank, Tag::new(1)).expect("bsend failed");
    let mut back = [0u64; 16];
    world.recv(&mut back, rank, Tag::new(1)).expect("recv failed");
    assert_eq!(back, payload);
    assert_eq!(mpi.detach_buffer().unwrap(), Some(needed));
    assert_eq!(mpi.detach_buffer().unwrap(), None);
    println!("PASS: bsend with attached buffer");

    // Communication with the null process completes immediately
    let status = world
        .recv(&mut back, Rank::proc_null(), Tag::any())
        .expect("recv from proc_null failed");
    assert_eq!(status.source, Rank::proc_null());
    assert_eq!(status.byte_count, 0);
    println!("PASS: proc_null receive");

    world.barrier().unwrap();
    assert_eq!(Communicator::world(), world);
    mpi.finalize().expect("finalize failed");
    assert!(Mpi::is_finalized().unwrap());

    if rank == Rank::new(0) {
        println!("\n========================================");
        println!("All lifecycle tests passed!");
        println!("========================================");
    }
}
