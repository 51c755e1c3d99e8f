// src/models/mod.rs

pub mod checklist;
pub mod production;
pub mod scan;
pub mod token;

// Re-export so structs are reachable as crate::models::StructName
pub use checklist::*;
pub use production::*;
pub use scan::*;
pub use token::*;
