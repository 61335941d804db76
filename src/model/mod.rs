pub mod column;
pub mod destination;
pub mod identity;
pub mod source;
