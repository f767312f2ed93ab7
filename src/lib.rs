pub mod classify;
pub mod config;
pub mod data;
pub mod error;
pub mod fetch;
pub mod normalize;
pub mod report;
pub mod resolve;
pub mod table;
pub mod timeline;
