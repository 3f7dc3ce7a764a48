//! Geo-anchored AR objects: records, the live change feed, local
//! placeholders, and the per-scene sync that ties them together.

pub mod feed;
pub mod manager;
pub mod object;
pub mod placeholders;
pub mod store;
pub mod sync;

pub use feed::*;
pub use manager::*;
pub use object::*;
pub use placeholders::*;
pub use store::*;
pub use sync::*;
