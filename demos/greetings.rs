//! Greetings - every non-root rank sends a text message to rank 0, which
//! prints them in arrival order.
//!
//! Run with: mpiexec -n 4 ./target/debug/examples/greetings

use mpibind::{Mpi, Rank, Result, Tag};

const GREETING: Tag = Tag::new(0);
const MAX_LEN: usize = 128;

fn main() -> Result<()> {
    env_logger::init();

    let mpi = Mpi::init()?;
    let world = mpi.world();
    let rank = world.rank()?;
    let size = world.size()?;

    if rank != Rank::new(0) {
        let message = format!("Greetings from process {rank}!");
        world.send(message.as_bytes(), Rank::new(0), GREETING)?;
    } else {
        println!("Greetings from process {rank} of {size}!");
        let mut buf = [0u8; MAX_LEN];
        for _ in 1..size {
            let status = world.recv(&mut buf, Rank::any_source(), GREETING)?;
            let len = status.count::<u8>()?.unwrap_or(0) as usize;
            println!("{}", String::from_utf8_lossy(&buf[..len]));
        }
    }

    // MPI is finalized when `mpi` is dropped
    Ok(())
}
