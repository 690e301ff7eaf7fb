//! SQLite database driver implementation

mod connection;
mod driver;
mod error;
mod routines;
mod statement;
mod values;

pub use connection::SqliteConnection;
pub use driver::SqliteDriver;
pub use statement::SqliteStatement;
