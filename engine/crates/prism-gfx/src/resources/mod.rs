pub mod buffer;
pub mod factory;
pub mod handles;
pub mod image;
pub mod sampler;
