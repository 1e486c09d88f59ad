pub mod linker;

pub use linker::*;
