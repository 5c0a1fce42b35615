/// Dependency install and build.
pub mod build;
/// Source generation.
pub mod generate;
/// Lint script.
pub mod lint;
/// Production-readiness review.
pub mod validate;

pub use build::BuildStage;
pub use generate::GenerateStage;
pub use lint::LintStage;
pub use test::TestStage;
pub use validate::ValidateStage;
