//! Database module for the SQLite-backed warehouse.

pub mod connection;
pub mod ddl;
pub mod repository;
pub mod schema;

pub use connection::{Warehouse, WarehouseError};
pub use ddl::{CATALOG, TableDef};
pub use repository::IntegrityViolation;
