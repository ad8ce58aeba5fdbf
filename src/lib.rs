pub mod config;
pub mod draw;
pub mod error;
pub mod flow_field;
pub mod image;
pub mod kernels;
pub mod my_types;
pub mod pyramid;
pub mod session;
pub mod strategy;

#[cfg(feature = "opencv")]
pub mod camera;
#[cfg(feature = "opencv")]
pub mod visualization;
