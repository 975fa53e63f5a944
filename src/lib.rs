pub mod app;
pub mod archive;
pub mod commons;
pub mod config;
pub mod domain;
pub mod drs;
pub mod error;
pub mod execution;
pub mod geo;
pub mod http;
pub mod intake;
pub mod monitor;
pub mod output;
pub mod provision;
pub mod returns;
pub mod sra;
pub mod staging;
pub mod store;
pub mod tui;
