mod completions;
mod config;
mod get;

pub use completions::run_completions;
pub use config::run_config;
pub use get::run_get;
