//! Test-only adapters that live inside the domain crate for convenience.
//!
//! These are intended purely for unit testing and local demos. The real
//! relational adapter lives in the `sqlite-adapter` crate.

pub mod memory_repo;
