pub mod migrations;
pub mod sqlite;
pub mod store;
pub mod writer;
