pub mod http;

pub use http::ApiServer;
