// Library for tests to access modules

pub mod cache;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod history_repo;
pub mod models;
pub mod network_rate;
pub mod parsers;
pub mod pool;
pub mod routes;
pub mod ssh;
pub mod unraid_repo;
pub mod version;
