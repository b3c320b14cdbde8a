pub mod api;
pub mod auth;
pub mod chat;
pub mod config;
pub mod dashboard;
pub mod errors;
pub mod events;
pub mod logging;
pub mod models;
pub mod realtime;
pub mod sync;

pub use dashboard::Dashboard;
