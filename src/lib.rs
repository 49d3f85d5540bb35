// Library for tests to access modules

pub mod cluster;
pub mod config;
pub mod dump;
pub mod error;
pub mod listener;
pub mod metrics_calculator;
pub mod metrics_repo;
pub mod models;
pub mod node_protection;
pub mod publisher;
pub mod routes;
pub mod runtime_probe;
pub mod server_service;
pub mod worker;
pub mod workload;
