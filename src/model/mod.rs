pub mod common;
pub mod resource;
pub mod schema;
pub mod table;

pub use common::*;
pub use resource::*;
pub use schema::*;
pub use table::*;
