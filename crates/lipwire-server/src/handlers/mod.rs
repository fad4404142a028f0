pub mod auth;
pub mod contacts;
pub mod history;
pub mod preference;
