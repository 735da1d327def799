pub mod memory;
pub mod traits;
pub mod transaction;

pub use memory::*;
pub use traits::*;
pub use transaction::*;
