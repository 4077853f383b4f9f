use super::{ExecError, ExecRequest, ResolvedInvocation};
use std::ffi::OsString;
use std::io;
use std::path::{Component, Path, PathBuf};

const DEFAULT_COMMAND: &str = "kcl";

/// Turns declared inputs into a concrete invocation
#[derive(Debug, Clone, Default)]
pub struct Planner {
    kcl_path: Option<String>,
}

impl Planner {
    /// `kcl_path` overrides the command; `None` or empty means `kcl` from `PATH`
    pub fn new(kcl_path: Option<String>) -> Self {
        Self { kcl_path }
    }

    pub fn command(&self) -> &str {
        match self.kcl_path.as_deref() {
            Some(path) if !path.is_empty() => path,
            _ => DEFAULT_COMMAND,
        }
    }

    /// Resolve against the current process environment
    pub fn plan(&self, request: &ExecRequest) -> Result<ResolvedInvocation, ExecError> {
        self.plan_with_ambient(request, std::env::vars_os())
    }

    pub fn plan_with_ambient<I>(
        &self,
        request: &ExecRequest,
        ambient: I,
    ) -> Result<ResolvedInvocation, ExecError>
    where
        I: IntoIterator<Item = (OsString, OsString)>,
    {
        let work_dir = resolve_dir(&request.source_dir)?;

        let mut env: Vec<(OsString, OsString)> = ambient.into_iter().collect();
        env.extend(
            request
                .environment
                .iter()
                .map(|(key, value)| (OsString::from(key), OsString::from(value))),
        );

        let invocation = ResolvedInvocation {
            work_dir,
            command: self.command().to_string(),
            args: request.args.clone(),
            env,
            timeout: request.timeout,
        };

        tracing::debug!(
            work_dir = %invocation.work_dir.display(),
            command = %invocation.command,
            args = ?invocation.args,
            overrides = request.environment.len(),
            "resolved invocation"
        );

        Ok(invocation)
    }
}

fn resolve_dir(source_dir: &Path) -> Result<PathBuf, ExecError> {
    let absolute = std::path::absolute(source_dir).map_err(|e| ExecError::PathResolution {
        path: source_dir.to_path_buf(),
        reason: e.to_string(),
    })?;
    let path = normalize(&absolute);

    match std::fs::metadata(&path) {
        Ok(meta) if meta.is_dir() => Ok(path),
        Ok(_) => Err(ExecError::NotADirectory { path }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(ExecError::DirectoryNotFound { path }),
        Err(e) => Err(ExecError::PathResolution {
            path,
            reason: e.to_string(),
        }),
    }
}

/// Drop `.` and fold `..` without touching the filesystem
fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }
    normalized
}
