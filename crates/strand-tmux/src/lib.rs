pub mod client;
pub mod command;
pub mod error;
pub mod layout;

pub use client::*;
pub use command::*;
pub use error::*;
pub use layout::*;
