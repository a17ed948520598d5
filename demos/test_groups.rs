//! Integration test for groups and communicator management.
//!
//! Exercises group queries and set operations, rank translation, comparisons,
//! and derived communicators built with duplicate, split and create.
//!
//! Run with: mpiexec -n 4 ./target/debug/examples/test_groups

use mpibind::{Comparison, Group, Mpi, Operation, Rank, Tag};

fn main() {
    env_logger::init();

    let mpi = Mpi::init().expect("MPI init failed");
    let world = mpi.world();
    let rank = world.rank().expect("rank failed");
    let size = world.size().expect("size failed");
    let r = rank.get();

    assert!(size >= 2, "test_groups requires at least 2 processes, got {size}");

    // ========================================================================
    // Test 1: world group mirrors the communicator
    // ========================================================================
    let world_group = world.group().expect("group failed");
    assert_eq!(world_group.size().unwrap(), size);
    assert_eq!(world_group.rank().unwrap(), Some(rank));
    assert_eq!(Group::empty().size().unwrap(), 0);
    assert_eq!(Group::empty().rank().unwrap(), None);
    if r == 0 {
        println!("PASS: group size / rank");
    }

    // ========================================================================
    // Test 2: include, exclude and the set operations
    // ========================================================================
    {
        let evens: Vec<Rank> = (0..size).step_by(2).map(Rank::new).collect();
        let even_group = world_group.include(&evens).unwrap();
        let odd_group = world_group.exclude(&evens).unwrap();
        assert_eq!(even_group.size().unwrap() + odd_group.size().unwrap(), size);
        assert_eq!(even_group.rank().unwrap().is_some(), r % 2 == 0);

        let union = even_group.union(&odd_group).unwrap();
        assert_eq!(union.size().unwrap(), size);
        // Evens first, then odds: only worlds of one or two processes keep
        // rank order.
        let expected = if size <= 2 {
            Comparison::Identical
        } else {
            Comparison::Similar
        };
        assert_eq!(union.compare(&world_group).unwrap(), expected);

        let none = even_group.intersection(&odd_group).unwrap();
        assert_eq!(none.size().unwrap(), 0);
        let same = world_group.difference(&odd_group).unwrap();
        assert_eq!(same.compare(&even_group).unwrap(), Comparison::Identical);

        // Reversed order: same members, different order.
        let reversed: Vec<Rank> = (0..size).rev().map(Rank::new).collect();
        let reversed_group = world_group.include(&reversed).unwrap();
        assert_eq!(reversed_group.compare(&world_group).unwrap(), Comparison::Similar);
        assert_eq!(world_group.compare(&Group::empty()).unwrap(), Comparison::Unequal);

        // Rank translation: world rank k sits at position size-1-k of the reversed group.
        let all: Vec<Rank> = (0..size).map(Rank::new).collect();
        let translated = world_group.translate_ranks(&all, &reversed_group).unwrap();
        for (k, t) in translated.iter().enumerate() {
            assert_eq!(*t, Some(Rank::new(size - 1 - k as i32)));
        }
        let into_evens = world_group.translate_ranks(&all, &even_group).unwrap();
        for (k, t) in into_evens.iter().enumerate() {
            assert_eq!(t.is_some(), k % 2 == 0);
        }

        for group in [even_group, odd_group, union, none, same, reversed_group] {
            group.free().expect("group free failed");
        }
        if r == 0 {
            println!("PASS: include / exclude / union / intersection / difference / translate");
        }
    }

    // ========================================================================
    // Test 3: duplicate has its own context
    // ========================================================================
    {
        let dup = world.duplicate().expect("duplicate failed");
        assert_eq!(dup.compare(&world).unwrap(), Comparison::Congruent);
        assert_eq!(world.compare(&world).unwrap(), Comparison::Identical);
        assert_eq!(dup.rank().unwrap(), rank);

        // A message on the duplicate is invisible to the original.
        let next = Rank::new((r + 1) % size);
        let prev = Rank::new((r + size - 1) % size);
        dup.send(&[r], next, Tag::new(1)).unwrap();
        world.barrier().unwrap();
        assert!(world.iprobe(prev, Tag::new(1)).unwrap().is_none());
        let mut got = [0i32];
        dup.recv(&mut got, prev, Tag::new(1)).unwrap();
        assert_eq!(got[0], prev.get());

        dup.free().expect("free duplicate failed");
        if r == 0 {
            println!("PASS: duplicate");
        }
    }

    // ========================================================================
    // Test 4: split by parity, reversed key order
    // ========================================================================
    {
        let half = world
            .split(Some(r % 2), -r)
            .expect("split failed")
            .expect("every rank passed a color");
        let half_size = half.size().unwrap();
        assert_eq!(half_size, (size + 1 - r % 2) / 2);
        // Highest world rank gets rank 0 in each half.
        let expected_rank = (half_size - 1) - r / 2;
        assert_eq!(half.rank().unwrap(), Rank::new(expected_rank));

        let total = half.allreduce_scalar(r, Operation::sum()).unwrap();
        let expected: i32 = (0..size).filter(|k| k % 2 == r % 2).sum();
        assert_eq!(total, expected);
        half.free().unwrap();

        let only_zero = world
            .split(if r == 0 { Some(0) } else { None }, 0)
            .expect("split with undefined color failed");
        assert_eq!(only_zero.is_some(), r == 0);
        if let Some(comm) = only_zero {
            assert_eq!(comm.size().unwrap(), 1);
            comm.free().unwrap();
        }
        if r == 0 {
            println!("PASS: split");
        }
    }

    // ========================================================================
    // Test 5: create from a subgroup
    // ========================================================================
    {
        let first_two = world_group
            .include(&[Rank::new(0), Rank::new(1)])
            .unwrap();
        let sub = world.create(&first_two).expect("create failed");
        assert_eq!(sub.is_some(), r < 2);
        if let Some(comm) = sub {
            assert_eq!(comm.size().unwrap(), 2);
            assert_eq!(comm.rank().unwrap(), rank);
            let sub_group = comm.group().unwrap();
            assert_eq!(sub_group.compare(&first_two).unwrap(), Comparison::Identical);
            sub_group.free().unwrap();
            comm.free().unwrap();
        }
        first_two.free().unwrap();
        if r == 0 {
            println!("PASS: create");
        }
    }

    world_group.free().unwrap();
    world.barrier().unwrap();
    if r == 0 {
        println!("\n========================================");
        println!("All group tests passed!");
        println!("========================================");
    }
}
