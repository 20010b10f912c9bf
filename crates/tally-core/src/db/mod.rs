//! Local cache database: connection handling, migrations, and the record store

mod connection;
mod migrations;
mod store;

pub use store::LocalStore;
