pub mod error;
pub mod logging;

pub use error::{ErrorBody, ErrorResponse};
pub use logging::log_requests;
