//! Bulk loads a tabular extract into the range-partitioned store by writing
//! partition-aligned SST files and adopting them, bypassing the store's
//! write path.

pub mod application;
pub mod config;
pub mod infrastructure;
