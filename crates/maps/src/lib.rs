pub mod cloud;
pub mod engine;
pub mod job;
pub mod lifecycle;
pub mod location;
pub mod poller;
pub mod pose;
pub mod ranking;
pub mod registry;
pub mod residency;
pub mod service;

#[cfg(test)]
pub(crate) mod testing;

pub use cloud::*;
pub use engine::*;
pub use job::*;
pub use lifecycle::*;
pub use location::*;
pub use poller::*;
pub use pose::*;
pub use ranking::*;
pub use registry::*;
pub use residency::*;
pub use service::*;
