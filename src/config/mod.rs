pub mod settings;

pub use settings::{HttpConfig, PublishConfig, Settings};
