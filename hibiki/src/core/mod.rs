/// Error types.
pub mod error;

/// Subject paths, matchers and validation.
pub mod subject;

/// Conversion of published values into bytes.
pub mod payload;
