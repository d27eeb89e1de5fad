//! Cross-cutting handler services: the best-effort transaction combinator and the validation gate.

mod tx;
mod validation;
pub use tx::run_in_tx;
pub use validation::{validate_fn, validate_model, FieldRules, ValidateFn, VALIDATION_FAILED};
