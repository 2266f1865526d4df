#![doc = include_str!(concat!("../", env!("CARGO_PKG_README")))]

#[doc(inline)]
pub use stereoscope_image as image;

#[doc(inline)]
pub use stereoscope_3d as k3d;

#[doc(inline)]
pub use stereoscope_pipeline as pipeline;
