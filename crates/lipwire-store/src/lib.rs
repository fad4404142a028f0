pub mod calls;
pub mod contacts;
pub mod database;
pub mod migrations;
pub mod models;
pub mod refresh_tokens;
pub mod users;

mod error;

pub use database::Store;
pub use error::{Result, StoreError};
pub use models::*;
