//! Query parameters, filter trees and the algebra that merges them.

pub mod combine;
pub mod filter;
pub mod param;

pub use combine::*;
pub use filter::*;
pub use param::*;
