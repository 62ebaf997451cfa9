//! Safe SQL builder: identifiers from the catalog only, values as parameters.

mod builder;
mod clause;
pub mod params;
pub use builder::*;
pub use clause::*;
pub use params::*;
