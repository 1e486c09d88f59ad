pub mod error;
pub mod lifecycle;

pub use error::AppError;
pub use lifecycle::LifecycleError;
