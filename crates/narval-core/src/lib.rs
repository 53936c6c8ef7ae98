pub mod ansi;
pub mod config;
pub mod paths;
pub mod types;

pub use config::Config;
pub use paths::Paths;
pub use types::*;
