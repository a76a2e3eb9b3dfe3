pub mod app;
pub mod config;
pub mod convert;
pub mod domain;
pub mod error;
pub mod identity;
pub mod model;
pub mod output;
pub mod processor;
pub mod reader;
pub mod registry;
pub mod repository;
pub mod source;
pub mod store;
