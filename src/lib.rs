pub mod app;
pub mod archive;
pub mod catalog;
pub mod config;
pub mod datasets;
pub mod domain;
pub mod error;
pub mod isic;
pub mod output;
pub mod store;
pub mod transport;
pub mod workflow;
