pub mod config;
pub mod error;
pub mod export;
pub mod ledger;
pub mod models;
pub mod notify;
pub mod platform;
pub mod reconcile;
pub mod retry;
pub mod utils;

pub use config::Config;
pub use error::{ReconcileError, Result};
