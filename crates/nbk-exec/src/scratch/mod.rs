//! `scratch`: a tiny statement language used as the kernel's reference backend.
//!
//! ```text
//! int x = 1 + 2;
//! String greeting = "hi " + x;
//! x = x * 10;
//! sleep(50);
//! print(greeting);
//! fail("boom");
//! x
//! ```

mod ast;
mod backend;
mod interp;
mod oracle;
mod parser;

use std::sync::Arc;

pub use ast::Value;
pub use backend::ScratchBackend;
pub use oracle::ScratchOracle;

use crate::evaluator::CodeEvaluator;
use crate::output::Output;
use crate::provider::ExecutionControlProvider;

pub const LANGUAGE: &str = "scratch";
pub const LANGUAGE_VERSION: &str = "1.0";
pub const MIMETYPE: &str = "text/x-scratch";
pub const FILE_EXTENSION: &str = ".scratch";

/// Evaluator wired to the scratch backend and oracle.
pub fn evaluator(
    provider: Arc<ExecutionControlProvider>,
    control_id: impl Into<String>,
    startup: Vec<String>,
) -> CodeEvaluator {
    let output = Arc::new(Output::default());
    CodeEvaluator::new(
        provider,
        control_id,
        Box::new(ScratchBackend::new(output.clone())),
        Arc::new(ScratchOracle::new()),
        startup,
    )
    .with_output(output)
}
