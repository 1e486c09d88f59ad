pub mod conflict;
pub mod lifecycle;

pub use conflict::*;
pub use lifecycle::*;
