// Shared primitives
pub mod primitives;
pub mod error;
pub mod units;

pub use primitives::*;
pub use error::*;
pub use units::*;
