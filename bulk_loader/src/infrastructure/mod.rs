pub mod committer;
pub mod generator;
pub mod sorter;
pub mod spill;
pub mod sst;
pub mod staging;
