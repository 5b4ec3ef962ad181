pub mod csv;
pub mod service;
