pub mod column;
pub mod identifiers;
pub mod value;
