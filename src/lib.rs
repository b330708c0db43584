use shadow_rs::shadow;

shadow!(build);

// Internals
// ---------
pub mod data_structures;
pub mod derank;
pub mod heap_primitives;

// Search space and problems
// -------------------------
pub mod cost;
pub mod float_cost;
pub mod search;
pub mod space;
pub mod termination;

// Problems
// --------
pub mod problems;

// Algorithms
// ----------
pub mod algorithms;
pub mod planner;

// Driver
// ------
pub mod agent;
