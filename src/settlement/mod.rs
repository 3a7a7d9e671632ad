//! Settlement module containing balance calculation and debt simplification

pub mod balance;
pub mod builder;

pub use balance::*;
pub use builder::*;
