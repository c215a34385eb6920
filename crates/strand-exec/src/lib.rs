pub mod backend;
pub mod collect;
pub mod dispatch;
pub mod error;
pub mod legacy;
pub mod manifest;
pub mod markers;
pub mod pager;
pub mod request;
pub mod resolver;
pub mod resume;
pub mod tmux_backend;
pub mod watcher;

#[cfg(test)]
mod testing;

pub use backend::*;
pub use collect::*;
pub use dispatch::*;
pub use error::*;
pub use legacy::*;
pub use manifest::*;
pub use markers::*;
pub use pager::*;
pub use request::*;
pub use resolver::*;
pub use resume::*;
pub use tmux_backend::*;
pub use watcher::*;
