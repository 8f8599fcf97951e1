pub mod barrier;
pub mod recorder;
