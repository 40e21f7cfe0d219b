pub mod ports;
pub mod report;
pub mod service;
