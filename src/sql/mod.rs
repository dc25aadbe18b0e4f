// SQLite persistence for Q-values, attempt history and learner profiles

pub mod connection;
pub mod history;
pub mod profiles;
pub mod q_table;
pub mod query;

pub use connection::{ConnectionType, DbConnection};
pub use history::SqliteAttemptHistory;
pub use profiles::SqliteProfileStore;
pub use q_table::SqliteQTable;
pub use query::{format_table, TableView};
