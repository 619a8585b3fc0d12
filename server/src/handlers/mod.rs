//! Request handlers for object storage.

mod batch;
mod objects;

pub use batch::*;
pub use objects::*;
