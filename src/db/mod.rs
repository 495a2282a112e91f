// Re-export all public items from the db modules
pub use self::core::Db;
pub use transaction::DbTransaction;
pub use types::*;

pub mod beneficiaries;
pub mod changes;
pub mod core;
pub mod timestamp;
pub mod transaction;
pub mod types;
