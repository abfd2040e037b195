pub mod error;
pub mod logging;

pub use error::{ErrorResponse, SuccessResponse};
pub use logging::{request_logging_middleware, UuidRequestId};
