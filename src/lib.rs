pub mod aggregation;
pub mod checkpoint;
pub mod config;
pub mod database_ops;
pub mod env_boot;
pub mod rest;
pub mod scheduler;
pub mod tracing;
pub mod updater;

pub mod util {
    pub mod env;
}
