pub mod strategies;

pub use builders::*;
