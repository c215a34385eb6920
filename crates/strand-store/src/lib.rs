pub mod atomic;
pub mod error;
pub mod lock;
pub mod paths;
pub mod store;

pub use atomic::*;
pub use error::*;
pub use lock::*;
pub use paths::*;
pub use store::*;
