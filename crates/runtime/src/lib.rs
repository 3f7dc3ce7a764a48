pub mod backoff;
pub mod cancel;
pub mod event_bus;

pub use backoff::*;
pub use cancel::*;
pub use event_bus::*;
