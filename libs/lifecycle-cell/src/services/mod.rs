pub mod coordinator;
pub mod retry;

pub use coordinator::*;
pub use retry::*;
