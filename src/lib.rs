pub mod api;
pub mod config;
pub mod document;
pub mod fetch;
pub mod forwarder;
pub mod humanize;
pub mod observability;
pub mod scrape;
pub mod shape;
pub mod worker;
