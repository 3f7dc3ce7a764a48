pub mod ecef;
pub mod geodesy;
pub mod local;
pub mod map_space;
pub mod precision;

pub use ecef::*;
pub use geodesy::*;
pub use local::*;
pub use map_space::*;
pub use precision::*;
