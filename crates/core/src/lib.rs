pub mod config;
pub mod error;
pub mod post;
pub mod rule;
pub mod staging;

pub use config::{BatchSizeSource, Config, EnvBatchSize, FixedBatchSize};
pub use error::*;
pub use post::*;
pub use rule::*;
