pub mod error;
pub mod logger;
pub mod result;

pub use error::{AppError, AppResponse};
pub use logger::init_logger;
pub use result::AppResult;
