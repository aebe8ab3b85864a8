pub mod app;
pub mod config;
pub mod deploy;
pub mod domain;
pub mod entities;
pub mod error;
pub mod genes;
pub mod output;
pub mod relations;
pub mod report;
pub mod samples;
pub mod search;
pub mod store;
pub mod tsv;
pub mod tui;
