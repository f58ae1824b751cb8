// Library for tests to access modules

pub mod cert_manager;
pub mod cert_repo;
pub mod config;
pub mod error;
pub mod executor;
pub mod health;
pub mod jobs;
pub mod models;
pub mod notifier;
pub mod orchestrator;
pub mod renderer;
pub mod routes;
pub mod scheduler;
pub mod site_repo;
pub mod sysinfo_repo;
