//! Type definitions

pub mod contact;
pub mod context;
pub mod error;

pub use contact::*;
pub use context::*;
pub use error::*;
