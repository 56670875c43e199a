pub mod main;
pub mod reconcile;
pub mod source;
pub mod sync;
pub mod types;
pub mod validation;

pub use main::*;
pub use source::*;
pub use sync::*;
pub use types::*;
pub use validation::*;
