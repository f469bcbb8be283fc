// SPDX-License-Identifier: GPL-3.0-only

//! Test support for the installer workspace
//!
//! `FakeBackend` stands in for the system: it records every mutating
//! operation, simulates the mount table and fails on request. Scenario tests
//! live in `tests/`.

pub mod fake;
pub mod fixtures;

pub use fake::{Call, FakeBackend, Op};
