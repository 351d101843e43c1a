//! Ground: a browser front end for one host's home directories, users and power.

pub mod api;
pub mod archive;
pub mod assets;
pub mod config;
pub mod error;
pub mod files;
pub mod gateway;
pub mod health;
pub mod listing;
pub mod naming;
pub mod os;
pub mod pages;
pub mod paths;
pub mod ratelimit;
pub mod server;
pub mod session;
pub mod ssh;
pub mod system;
pub mod trash;
pub mod upload;
pub mod users;
