//! Configuration module - the path-addressable tree and its schemas.

mod schema;
mod tree;

pub use schema::*;
pub use tree::*;
