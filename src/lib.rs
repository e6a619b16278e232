pub mod common;
pub mod references_resolver;
pub mod reports;
pub mod routes_resolver;
pub mod services;
pub mod state;
pub mod translator;

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Result<T> = std::result::Result<T, Error>;
