pub mod connection;
pub mod migration_runner;
pub mod preferences;
pub mod trade_store;

pub use connection::Database;
pub use preferences::SqlitePreferenceStore;
pub use trade_store::SqliteTradeStore;
