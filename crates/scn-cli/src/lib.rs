use std::ffi::OsString;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use scn_api::{lower_scenario_from_xml, LowerScenarioOptions};
use scn_core::ScenarioError;
use scn_lower::{
    CachedProjection, CatalogStore, InMemoryCatalog, LoweringConfig, LoweringOutput,
    PlanarProjection, ProjectionOracle,
};
use tracing::info;

mod cli_args;
mod error_map;
mod models;
mod source_loader;

pub(crate) use cli_args::{Cli, LowerArgs, Mode};
pub(crate) use error_map::{
    emit_error, map_cli_scene_encode, map_cli_scene_write, map_cli_source_path,
    map_cli_source_read, map_cli_source_scan,
};
pub(crate) use models::{LoadedScenario, SceneFile};
pub(crate) use source_loader::load_scenarios;
#[cfg(test)]
pub(crate) use source_loader::scenario_paths_in;

/// Installs the stderr log formatter; `RUST_LOG` overrides the `warn` default.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .try_init();
}

pub fn run_cli_from_args<I, T>(args: I) -> i32
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) => return error.exit_code(),
    };
    match run(cli) {
        Ok(code) => code,
        Err(error) => emit_error(error),
    }
}

fn run(cli: Cli) -> Result<i32, ScenarioError> {
    match cli.command {
        Mode::Lower(args) => run_lower(args),
    }
}

fn run_lower(args: LowerArgs) -> Result<i32, ScenarioError> {
    let config = match &args.config {
        Some(path) => LoweringConfig::load(Path::new(path))?,
        None => LoweringConfig::default(),
    };
    let catalog: Option<Arc<dyn CatalogStore>> = match &args.catalog {
        Some(path) => Some(Arc::new(InMemoryCatalog::load(Path::new(path))?)),
        None => None,
    };
    // Shared across scenarios so repeated map queries hit the cache.
    let projection: Arc<dyn ProjectionOracle> =
        Arc::new(CachedProjection::new(PlanarProjection::default()));
    let scenarios = load_scenarios(&args.input)?;
    if let Some(out) = &args.out {
        fs::create_dir_all(out).map_err(map_cli_scene_write)?;
    }

    let mut lowered = Vec::with_capacity(scenarios.len());
    for scenario in &scenarios {
        let mut options = LowerScenarioOptions::new(scenario.source.clone());
        options.config = config.clone();
        options.catalog = catalog.clone();
        options.projection = Some(projection.clone());
        let output = lower_scenario_from_xml(options).map_err(|error| {
            ScenarioError::new(
                error.code,
                format!("{}: {}", scenario.path.display(), error.message),
            )
        })?;
        info!(scenario = %scenario.name, "lowered");
        lowered.push(output);
    }

    println!("RESULT:OK");
    for (scenario, output) in scenarios.iter().zip(&lowered) {
        emit_scene(scenario, output, args.out.as_deref())?;
    }
    Ok(0)
}

fn emit_scene(
    scenario: &LoadedScenario,
    output: &LoweringOutput,
    out: Option<&str>,
) -> Result<(), ScenarioError> {
    let scene = &output.scene;
    let event_count = scene.events.len() + scene.all_ego_events().count();
    println!("SCENARIO:{}", scenario.name);
    println!(
        "ENTITIES:{}",
        scene.egos.len() + scene.vehicles.len() + scene.pedestrians.len() + scene.obstacles.len()
    );
    println!("EVENTS:{}", event_count);
    println!("DIAGNOSTICS:{}", output.diagnostics.len());
    for diagnostic in output.diagnostics.iter() {
        println!(
            "DIAGNOSTIC_JSON:{}",
            serde_json::to_string(diagnostic).map_err(map_cli_scene_encode)?
        );
    }

    let file = SceneFile {
        source: scenario.path.display().to_string(),
        scene,
        diagnostics: &output.diagnostics,
    };
    match out {
        Some(out) => {
            let path = Path::new(out).join(format!("{}.scene.json", scenario.name));
            let encoded = serde_json::to_string_pretty(&file).map_err(map_cli_scene_encode)?;
            fs::write(&path, encoded).map_err(map_cli_scene_write)?;
            println!("SCENE:{}", path.display());
        }
        None => {
            let encoded = serde_json::to_string(&file).map_err(map_cli_scene_encode)?;
            println!("SCENE_JSON:{}", encoded);
        }
    }
    Ok(())
}
