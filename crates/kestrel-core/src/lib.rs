//! Configuration loading, secret handling and component wiring.

pub mod bootstrap;
pub mod config;
pub mod vault;

pub use bootstrap::App;
pub use config::Config;
