pub mod http;
pub mod types;

pub use http::{normalize_package_path, HttpServer};
