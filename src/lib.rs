pub mod app;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod domain;
pub mod error;
pub mod extract;
pub mod fs_util;
pub mod http_util;
pub mod object_store;
pub mod output;
pub mod server;
