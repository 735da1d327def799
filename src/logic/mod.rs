pub mod delete;
pub mod patch;
pub mod query;
pub mod resolve;
pub mod serialize;
pub mod validate;
pub mod write;

pub use delete::*;
pub use patch::*;
pub use query::*;
pub use resolve::*;
pub use serialize::*;
pub use validate::*;
pub use write::*;
