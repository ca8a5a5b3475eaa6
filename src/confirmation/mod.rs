pub mod http;
pub mod mock;
pub mod variant;

pub use http::HttpConfirmationSource;
pub use mock::{delivered_payload, MockConfirmationSource, MockResponse};
pub use variant::ConfirmationSourceVariant;
