pub mod adapter;
pub mod definitions;
pub mod error;
pub mod failover;
pub mod probe;
pub mod script;
pub mod types;
pub mod util;

pub use adapter::*;
pub use definitions::*;
pub use error::*;
pub use failover::*;
pub use probe::*;
pub use script::*;
pub use types::*;
pub use util::*;
