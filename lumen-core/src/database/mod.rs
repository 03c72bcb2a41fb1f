//! Catalog persistence: the transaction ports the scanner talks to and
//! their PostgreSQL and in-memory adapters.

pub mod memory;
pub mod ports;
pub mod postgres;

pub use memory::{CatalogDump, InMemoryCatalog};
pub use ports::{Catalog, CatalogTx};
pub use postgres::{MIGRATOR, PostgresCatalog};
