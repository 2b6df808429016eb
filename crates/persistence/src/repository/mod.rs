//! Repository implementations for database operations

pub mod genomes;
pub mod runs;

pub use genomes::*;
pub use runs::*;
