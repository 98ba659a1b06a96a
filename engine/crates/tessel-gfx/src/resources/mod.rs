pub mod buffer;
pub mod image;
pub mod memory;
pub mod sampler;
