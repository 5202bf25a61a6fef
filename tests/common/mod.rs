pub mod builders;
pub mod doubles;
pub mod strategies;

pub use builders::*;
pub use doubles::*;
