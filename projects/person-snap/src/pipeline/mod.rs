pub mod cropper;
pub mod sampler;
pub mod types;
