pub mod blob;
pub mod catalog;
pub mod cli;
pub mod config;
mod db;
pub mod embed;
pub mod engine;
pub mod error;
pub mod index;
mod lock;
pub mod metrics;
mod utils;

pub use config::Opts;
pub use engine::{EngineBuilder, NewImage, SearchEngine, SearchHit};

/// 图片 ID，由目录分配，严格递增且永不复用
pub type ImageId = u64;
