//! Question sourcing
//!
//! External trivia APIs, the embedded local bank, validation, caching and the
//! [`QuestionSupplier`] that ties them together.

pub mod cache;
pub mod local;
pub mod opentdb;
pub mod source;
pub mod supplier;
pub mod trivia_api;
pub mod validator;

pub use cache::{CacheStats, QuestionCache};
pub use local::LocalQuestionBank;
pub use source::{HttpFetcher, HttpSourceConfig, QuestionSource, SourceKind};
pub use supplier::{QuestionSupplier, SourceStats, SupplierConfig};
pub use validator::{validate_question, ValidationResult};
