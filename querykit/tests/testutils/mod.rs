//! Test utilities for querykit integration tests
//!
//! TestFixture wires an isolated in-memory store, a key/value table `t` and a
//! QueryHelper with short, deterministic backoff.

pub mod test_fixture;
