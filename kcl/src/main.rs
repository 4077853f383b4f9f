use clap::{Args, Parser, Subcommand};
use kcl::KclProvider;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::path::{Path, PathBuf};
use tfplug::types::{AttributePath, Diagnostic, DiagnosticsExt, Dynamic, DynamicValue};
use tfplug::{PlannedAction, ProviderServer};
use tracing_subscriber::EnvFilter;

type BoxError = Box<dyn Error + Send + Sync>;

const RESOURCE_TYPE: &str = "kcl_exec";
const STATE_VERSION: u32 = 1;

/// Drive the kcl_exec resource lifecycle from JSON files
#[derive(Debug, Parser)]
#[command(name = "kclx", version, about)]
struct Cli {
    /// Path to the kcl executable (falls back to KCL_PATH, then kcl on PATH)
    #[arg(long, global = true)]
    kcl_path: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show what apply would do
    Plan(ChangeArgs),
    /// Run the planned change and record the new state
    Apply(ChangeArgs),
    /// Forget the resource and remove its state file
    Destroy(StateArgs),
    /// Print the recorded id and output
    Show(StateArgs),
}

#[derive(Debug, Args)]
struct ChangeArgs {
    #[command(flatten)]
    state: StateArgs,

    /// JSON object with the resource attributes
    #[arg(long)]
    config: PathBuf,
}

#[derive(Debug, Args)]
struct StateArgs {
    /// State file; a missing file means the resource does not exist
    #[arg(long)]
    state: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct StateFile {
    version: u32,
    resource_type: String,
    attributes: serde_json::Value,
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let server = ProviderServer::new(KclProvider::new());
    let diagnostics = server.configure(provider_config(cli.kcl_path.as_deref())?).await;
    report(&diagnostics)?;

    match cli.command {
        Command::Plan(args) => {
            let prior = load_state(&args.state.state)?;
            let config = load_config(&args.config)?;
            let plan = server.plan(RESOURCE_TYPE, &prior, &config).await?;
            report(&plan.diagnostics)?;
            print_plan(&plan)?;
        }
        Command::Apply(args) => {
            let prior = load_state(&args.state.state)?;
            let config = load_config(&args.config)?;
            let plan = server.plan(RESOURCE_TYPE, &prior, &config).await?;
            report(&plan.diagnostics)?;
            print_plan(&plan)?;

            let applied = server.apply(RESOURCE_TYPE, &prior, &plan, &config).await?;
            save_state(&args.state.state, &applied.new_state)?;
            report(&applied.diagnostics)?;
            print_state(&applied.new_state);
        }
        Command::Destroy(args) => {
            let prior = load_state(&args.state)?;
            let null = DynamicValue::null();
            let plan = server.plan(RESOURCE_TYPE, &prior, &null).await?;
            let applied = server.apply(RESOURCE_TYPE, &prior, &plan, &null).await?;
            save_state(&args.state, &applied.new_state)?;
            report(&applied.diagnostics)?;
            println!("{}: {}", RESOURCE_TYPE, plan.action);
        }
        Command::Show(args) => {
            let state = load_state(&args.state)?;
            let read = server.read(RESOURCE_TYPE, &state).await?;
            report(&read.diagnostics)?;
            print_state(&read.new_state);
        }
    }

    Ok(())
}

fn provider_config(kcl_path: Option<&str>) -> Result<DynamicValue, BoxError> {
    let mut config = DynamicValue::object();
    if let Some(path) = kcl_path {
        config.set_string(&AttributePath::new("kcl_path"), path)?;
    }
    Ok(config)
}

fn load_config(path: &Path) -> Result<DynamicValue, BoxError> {
    let data = std::fs::read(path)
        .map_err(|e| format!("failed to read config {}: {}", path.display(), e))?;
    let config = DynamicValue::decode_json(&data)?;
    if !matches!(config.value, Dynamic::Map(_)) {
        return Err(format!("config {} must be a JSON object", path.display()).into());
    }
    Ok(config)
}

fn load_state(path: &Path) -> Result<DynamicValue, BoxError> {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(DynamicValue::null()),
        Err(e) => return Err(format!("failed to read state {}: {}", path.display(), e).into()),
    };

    let file: StateFile = serde_json::from_slice(&data)
        .map_err(|e| format!("invalid state file {}: {}", path.display(), e))?;
    if file.resource_type != RESOURCE_TYPE {
        return Err(format!(
            "state file {} holds a {} resource, expected {}",
            path.display(),
            file.resource_type,
            RESOURCE_TYPE
        )
        .into());
    }

    Ok(DynamicValue::new(Dynamic::from(file.attributes)))
}

fn save_state(path: &Path, state: &DynamicValue) -> Result<(), BoxError> {
    if state.is_null() {
        return match std::fs::remove_file(path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        };
    }

    let file = StateFile {
        version: STATE_VERSION,
        resource_type: RESOURCE_TYPE.to_string(),
        attributes: state.value.to_json(),
    };
    std::fs::write(path, serde_json::to_vec_pretty(&file)?)?;
    tracing::debug!(path = %path.display(), "state written");
    Ok(())
}

/// Print diagnostics to stderr; fail if any is an error
fn report(diagnostics: &[Diagnostic]) -> Result<(), BoxError> {
    for diagnostic in diagnostics {
        eprintln!("{}\n", diagnostic);
    }
    if diagnostics.has_errors() {
        return Err(format!("{} error(s)", diagnostics.errors().len()).into());
    }
    Ok(())
}

fn print_plan(plan: &tfplug::Plan) -> Result<(), BoxError> {
    print!("{}", render_plan(plan)?);
    Ok(())
}

/// Action, replacement reasons and the planned attributes for changes
fn render_plan(plan: &tfplug::Plan) -> Result<String, BoxError> {
    let mut text = format!("{}: {}\n", RESOURCE_TYPE, plan.action);
    for path in &plan.requires_replace {
        text.push_str(&format!("  {} forces replacement\n", path));
    }
    if matches!(
        plan.action,
        PlannedAction::Create | PlannedAction::Update | PlannedAction::Replace
    ) {
        text.push_str(&String::from_utf8_lossy(&plan.planned_state.encode_json()?));
        text.push('\n');
    }
    Ok(text)
}

fn print_state(state: &DynamicValue) {
    if state.is_null() {
        println!("{}: absent", RESOURCE_TYPE);
        return;
    }
    for name in ["id", "output"] {
        if let Ok(value) = state.get_string(&AttributePath::new(name)) {
            println!("{} = {}", name, value);
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;

    #[test]
    fn cli_accepts_global_kcl_path_after_subcommand() {
        let cli = Cli::try_parse_from([
            "kclx",
            "apply",
            "--state",
            "s.json",
            "--config",
            "c.json",
            "--kcl-path",
            "/opt/kcl",
        ])
        .unwrap();

        assert_eq!(cli.kcl_path.as_deref(), Some("/opt/kcl"));
        assert!(matches!(cli.command, Command::Apply(ref args) if args.config == Path::new("c.json")));
    }

    #[test]
    fn plan_requires_a_config_file() {
        assert!(Cli::try_parse_from(["kclx", "plan", "--state", "s.json"]).is_err());
    }

    #[test]
    fn missing_state_file_means_absent() {
        let dir = tempfile::tempdir().unwrap();

        let state = load_state(&dir.path().join("state.json")).unwrap();

        assert!(state.is_null());
    }

    #[test]
    fn state_file_survives_a_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let mut state = DynamicValue::object();
        state.set_string(&AttributePath::new("id"), "0123").unwrap();
        state.set_string(&AttributePath::new("source_dir"), "/src").unwrap();

        save_state(&path, &state).unwrap();
        assert_eq!(load_state(&path).unwrap(), state);

        save_state(&path, &DynamicValue::null()).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn planned_unknowns_are_shown_as_known_after_apply() {
        let mut planned_state = DynamicValue::object();
        planned_state
            .set_string(&AttributePath::new("source_dir"), "/src")
            .unwrap();
        planned_state.mark_unknown(&AttributePath::new("id")).unwrap();
        let plan = tfplug::Plan {
            action: PlannedAction::Create,
            planned_state,
            requires_replace: vec![],
            diagnostics: vec![],
        };

        let text = render_plan(&plan).unwrap();

        assert!(text.starts_with("kcl_exec: create\n"), "{}", text);
        assert!(text.contains("\"id\": \"(known after apply)\""), "{}", text);
        assert!(text.contains("\"source_dir\": \"/src\""), "{}", text);
    }

    #[test]
    fn state_for_another_resource_type_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(
            &path,
            r#"{"version":1,"resource_type":"other","attributes":{}}"#,
        )
        .unwrap();

        assert!(load_state(&path).is_err());
    }
}
