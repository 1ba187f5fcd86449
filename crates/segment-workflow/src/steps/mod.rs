//! Pasos concretos del pipeline. Cada paso implementa
//! `jobflow::PipelineStep`; los que envían jobs externos declaran su
//! `JobKind` y los locales devuelven su salida en la misma invocación.
pub mod customer_update;
pub mod import;
pub mod materialize_segment;
pub mod resolve;
pub mod segment;
pub mod solution;
pub mod solution_version;

pub use customer_update::IntegratedCustomerUpdateStep;
pub use import::ImportStep;
pub use materialize_segment::MaterializeSegmentStep;
pub use resolve::ResolveStep;
pub use segment::{latest_solution_version, BatchSegmentStep, SolutionVersionSource};
pub use solution::{prune_solutions, TrainSolutionStep};
pub use solution_version::TrainSolutionVersionStep;

use crate::errors::WorkflowError;
use jobflow::JobError;

pub const RESOLVE: &str = "resolve";
pub const CUSTOMER_UPDATE: &str = "integrated-customer-update";
pub const IMPORT: &str = "import";
pub const TRAIN_SOLUTION: &str = "train-solution";
pub const TRAIN_SOLUTION_VERSION: &str = "train-solution-version";
pub const BATCH_SEGMENT: &str = "batch-segment";
pub const MATERIALIZE_SEGMENT: &str = "materialize-segment";

/// Un fallo al consultar estado es transitorio para el poller.
pub(crate) fn fetch_error(e: WorkflowError) -> JobError {
    JobError::TransientFetch(e.to_string())
}

pub(crate) fn with_trailing_slash(prefix: &str) -> String {
    if prefix.is_empty() || prefix.ends_with('/') {
        prefix.to_string()
    } else {
        format!("{}/", prefix)
    }
}
