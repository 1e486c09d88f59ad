pub mod allocator;
pub mod state_machine;

pub use allocator::*;
pub use state_machine::*;
