// Library for tests to access modules

pub mod aggregator;
pub mod cli;
pub mod collector;
pub mod config;
pub mod error;
pub mod models;
pub mod render;
pub mod sorter;
pub mod transport;
pub mod version;
