//! Core types for Hafiz

mod copy;
mod object;
mod range;

pub use copy::*;
pub use object::*;
pub use range::*;
