pub mod annotate;
pub mod camera;
pub mod classifier;
pub mod config;
pub mod error;
pub mod inventory;
pub mod stream;
pub mod vision;

pub use error::{Result, StreamError};
