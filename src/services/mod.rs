pub mod generation;
pub mod queue;
