//! Integration test for the one-init-per-process rule.
//!
//! A second init while MPI is running and any init after finalize must both
//! fail locally without touching the running environment.
//!
//! Run with: mpiexec -n 2 ./target/debug/examples/test_double_init

use mpibind::{Error, InitOptions, Mpi, ThreadLevel};

fn main() {
    env_logger::init();

    let mpi = Mpi::init().expect("MPI init failed");
    let rank = mpi.world().rank().expect("rank failed");

    match Mpi::init() {
        Err(Error::AlreadyInitialized) => {}
        Err(other) => panic!("expected AlreadyInitialized, got {other}"),
        Ok(_) => panic!("second init should fail"),
    }
    match Mpi::init_thread(ThreadLevel::Multiple) {
        Err(Error::AlreadyInitialized) => {}
        Err(other) => panic!("expected AlreadyInitialized, got {other}"),
        Ok(_) => panic!("init_thread after init should fail"),
    }
    println!("PASS: rank {rank} rejected double init");

    // The original environment is untouched
    mpi.world().barrier().expect("barrier after failed init");
    mpi.finalize().expect("finalize failed");

    match Mpi::init_with(InitOptions::new()) {
        Err(Error::AlreadyFinalized) => {}
        Err(other) => panic!("expected AlreadyFinalized, got {other}"),
        Ok(_) => panic!("init after finalize should fail"),
    }
    println!("PASS: rank {rank} rejected init after finalize");
}
