//! Route handlers for registered models and decoding of their dynamic payloads.

mod model;
pub mod payload;

pub use model::{default_store_accessor, ModelHandlers, StoreAccessor};
pub use payload::FieldUpdateRequest;
