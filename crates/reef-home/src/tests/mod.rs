//! Tests for the reef-home crate.

mod helpers;
