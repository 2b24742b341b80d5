pub mod env_helper;
pub mod local_config;

pub use local_config::{FeaturesConfig, IndexerConfig, LocalConfig, ScalingConfig};
