//! Implementation of search domains.
//!
//! These expose a generic search space so we can plan against a generic
//! graph-like API where from a given state we can find actions that take us to
//! new states.

pub mod grid_world;
