//! Query guard: read-only enforcement and staged validation of Cypher text
//!
//! ```text
//! query ──► write_intent ──► pipeline ──► checker (syntax / schema / properties)
//!                               │
//!                               └──► ValidationReport | ValidationError
//! ```

pub mod checker;
pub mod error;
pub mod lexical;
pub mod pipeline;
pub mod report;
#[cfg(feature = "structural-checks")]
pub mod schema_checker;
pub mod write_intent;

pub use checker::{
    CheckerAvailability, CheckerError, CheckerResult, PropertyCheck, PropertyScore, SchemaCheck,
    StructuralChecker, SyntaxCheck,
};
pub use error::{ValidationError, ValidationResult};
pub use pipeline::{ValidationPipeline, ValidationPolicy};
pub use report::{Metadata, Stage, StageStatus, ValidationReport};
#[cfg(feature = "structural-checks")]
pub use schema_checker::{score_properties, score_schema, SchemaAwareChecker};
pub use write_intent::{check_read_only, WriteIntentFinding, WriteOperation, FOREACH_LOOKAHEAD};
