//! Helpers shared by the backup operations.

pub mod fs;
pub mod name;
pub mod retention;
