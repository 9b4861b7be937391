//! Prints the report; failed runs go to stderr.

use super::{EmitError, Emitter};
use async_trait::async_trait;
use autopatch_common::{Outcome, Report, RunResult};

#[derive(Debug, Default)]
pub struct StdioEmitter;

impl StdioEmitter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Emitter for StdioEmitter {
    fn name(&self) -> &'static str {
        "stdio"
    }

    async fn emit(&self, result: &RunResult, report: &Report) -> Result<(), EmitError> {
        match result.outcome {
            Outcome::Aborted | Outcome::PartialFailure => eprintln!("{}", report.full_text()),
            _ => println!("{}", report.full_text()),
        }
        Ok(())
    }
}
