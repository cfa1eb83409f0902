//! Test fixtures

pub mod two_node;
