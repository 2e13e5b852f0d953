pub mod analysis;
pub mod cli;
pub mod commands;
pub mod error;
pub mod model;
pub mod recording;
pub mod sampler;
pub mod source;
pub mod storage;

pub use error::{Error, Result};
