pub mod config;
pub mod db;
pub mod error;
pub mod history;
pub mod identity;

pub use config::RecordsConfig;
pub use db::Db;
pub use error::ValidationError;
pub use rusqlite;
