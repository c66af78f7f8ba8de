pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod services;
pub mod subjects;
pub mod types;
pub mod workers;

pub use config::{Config, CoreConfig};
pub use db::Database;
pub use error::{CoreError, CoreResult};
