pub mod config;
pub mod db;
pub mod fetch;
pub mod loader;
pub mod logging;
pub mod normalize;
pub mod schema;
pub mod source;
