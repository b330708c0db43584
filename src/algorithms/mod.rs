//! Implementation of real-time and anytime search algorithms.
//!
//! These algorithms plan on generic search domains under a budget.

pub mod ara_star;
pub mod lss_lrta_star;
