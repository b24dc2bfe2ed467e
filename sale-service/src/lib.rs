pub mod api;
pub mod cache;
pub mod checkout;
pub mod clock;
pub mod config;
pub mod models;
pub mod purchase;
pub mod scheduler;
pub mod schema;
pub mod service;
pub mod store;
