pub mod config;
pub mod db;
pub mod error;
pub mod http;
pub mod mock;
pub mod model;
pub mod models;
pub mod payload;
pub mod preview;
pub mod reconcile;
pub mod selection;
pub mod store;

pub use crate::error::{Error, Result};
pub use crate::models::*;
