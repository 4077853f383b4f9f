//! Execution core: resolve a request, run the KCL tool, derive its identity

pub mod error;
pub mod identity;
pub mod planner;
pub mod runner;

pub use error::ExecError;
pub use identity::identify;
pub use planner::Planner;
pub use runner::run;

use std::collections::{BTreeMap, HashMap};
use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;
use tfplug::context::Context;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Declared inputs of one execution
#[derive(Debug, Clone, PartialEq)]
pub struct ExecRequest {
    pub source_dir: PathBuf,
    pub args: Vec<String>,
    pub environment: BTreeMap<String, String>,
    pub timeout: Duration,
}

impl ExecRequest {
    pub fn new(source_dir: impl Into<PathBuf>) -> Self {
        Self {
            source_dir: source_dir.into(),
            args: Vec::new(),
            environment: BTreeMap::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Everything needed to spawn the tool, fixed before it runs
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedInvocation {
    pub work_dir: PathBuf,
    pub command: String,
    pub args: Vec<String>,
    /// Ambient variables followed by overrides; later entries win
    pub env: Vec<(OsString, OsString)>,
    pub timeout: Duration,
}

impl ResolvedInvocation {
    /// Environment as the child sees it
    pub fn effective_env(&self) -> HashMap<OsString, OsString> {
        self.env.iter().cloned().collect()
    }

    pub fn id(&self) -> String {
        identify(&self.work_dir, &self.command, &self.args, &self.env)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecResult {
    pub id: String,
    /// Combined stdout and stderr, trimmed
    pub output: String,
}

/// Plan, run and identify one request
pub async fn execute(
    ctx: &Context,
    planner: &Planner,
    request: &ExecRequest,
) -> Result<ExecResult, ExecError> {
    let invocation = planner.plan(request)?;
    let output = run(ctx, &invocation).await?;

    Ok(ExecResult {
        id: invocation.id(),
        output: output.trim().to_string(),
    })
}
