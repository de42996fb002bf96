//! evdata - cross-database query equivalence and performance harness
//! for the EV analytics corpus

pub mod engine;
