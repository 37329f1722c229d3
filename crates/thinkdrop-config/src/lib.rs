pub mod loader;
pub mod model;

pub use loader::ConfigLoader;
pub use model::{
    AppConfig, DatabaseConfig, EmbeddingConfig, MonitorConfig, RetentionConfig, SearchConfig,
    ServerConfig,
};
