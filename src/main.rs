use anyhow::{Context, Result};
use rental_pipeline::{
    artifacts::{ArtifactRef, ArtifactStore, LocalArtifactStore},
    cli::{
        commands::{
            ArtifactsCommand, Attribution, CheckCommand, CleanCommand, HistoryCommand,
            PromoteCommand, RunCommand, TrainCommand, ValidateCommand,
        },
        output::*,
        Cli, Command,
    },
    core::{config::stratify_column, Pipeline, RunConfig, RunContext, Stage},
    execution::{ExecutionEngine, ExecutionEvent},
    model::FeatureColumns,
    persistence::{create_summary, InMemoryRunStore, RunStore, RunSummary, SqliteRunStore},
    stages::{
        BasicCleaningStage, CleaningRules, DataCheckStage, GateConfig, TrainRandomForestStage,
        TrainSettings,
    },
};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tracing::{error, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Stage timeout for standalone stage commands
const STAGE_TIMEOUT: Duration = Duration::from_secs(3600);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging; RUST_LOG wins over --verbose
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.as_str().to_lowercase()));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    match &cli.command {
        Command::Run(cmd) => run_pipeline(cmd, &cli).await?,
        Command::Validate(cmd) => validate_config(cmd)?,
        Command::Clean(cmd) => clean(cmd, &cli).await?,
        Command::Check(cmd) => check(cmd, &cli).await?,
        Command::Train(cmd) => train(cmd, &cli).await?,
        Command::Artifacts(cmd) => list_artifacts(cmd, &cli).await?,
        Command::Promote(cmd) => promote(cmd, &cli).await?,
        Command::History(cmd) => show_history(cmd, &cli).await?,
    }

    Ok(())
}

fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("rental-pipeline")
}

async fn open_store(cli: &Cli) -> Result<Arc<dyn ArtifactStore>> {
    let store = match &cli.store {
        Some(dir) => LocalArtifactStore::open(dir).await,
        None => LocalArtifactStore::with_default_path().await,
    }
    .context("Failed to open artifact store")?;
    Ok(Arc::new(store))
}

async fn open_history(cli: &Cli, disabled: bool) -> Result<Arc<dyn RunStore>> {
    if disabled {
        return Ok(Arc::new(InMemoryRunStore::new()));
    }
    let store = match &cli.store {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let path = dir.join("runs.db");
            let path = path.to_str().context("Store path is not valid UTF-8")?;
            SqliteRunStore::new(path).await?
        }
        None => SqliteRunStore::with_default_path().await?,
    };
    Ok(Arc::new(store))
}

/// Resolve a relative sample path against the configuration file's directory
/// when it does not exist relative to the working directory
fn resolve_sample(config: &mut RunConfig, config_file: &Path) {
    let sample = &config.etl.sample;
    if sample.is_absolute() || sample.exists() {
        return;
    }
    if let Some(parent) = config_file.parent() {
        let candidate = parent.join(sample);
        if candidate.exists() {
            config.etl.sample = candidate;
        }
    }
}

fn load_config(file: &Path, overrides: &[(String, String)]) -> Result<RunConfig> {
    let mut config = RunConfig::from_file_with_overrides(file, overrides)
        .with_context(|| format!("Failed to load run configuration {}", file.display()))?;
    resolve_sample(&mut config, file);
    Ok(config)
}

async fn run_pipeline(cmd: &RunCommand, cli: &Cli) -> Result<()> {
    let mut overrides = cmd.overrides.clone();
    if let Some(steps) = &cmd.steps {
        overrides.push(("main.steps".to_string(), steps.clone()));
    }

    let config = match load_config(&cmd.file, &overrides) {
        Ok(config) => config,
        Err(e) => {
            println!("{} {}", CROSS, style(format!("{:#}", e)).red());
            std::process::exit(1);
        }
    };

    println!(
        "{} Loaded configuration: {}/{}",
        INFO,
        style(&config.main.project_name).bold(),
        config.main.experiment_name
    );
    for (key, value) in &overrides {
        println!(
            "{} Override: {} = {}",
            INFO,
            style(key).cyan(),
            style(value).dim()
        );
    }

    let store = open_store(cli).await?;
    let history = open_history(cli, cmd.no_history).await?;
    let work_root = cmd.work_dir.clone().unwrap_or_else(|| data_dir().join("runs"));

    let mut pipeline = Pipeline::from_config(&config)?;
    let ctx = RunContext::from_config(&config, &work_root);

    let progress = create_progress_bar(pipeline.execution_order().len());
    let mut engine = ExecutionEngine::new(store);
    let bar = progress.clone();
    engine.add_event_handler(move |event| {
        bar.println(format_execution_event(&event));
        match &event {
            ExecutionEvent::StageStarted { stage, .. } => bar.set_message(stage.to_string()),
            ExecutionEvent::StageCompleted { .. } => bar.inc(1),
            _ => {}
        }
    });

    println!();
    let result = engine.execute(&mut pipeline, &config, &ctx).await;
    progress.finish_and_clear();

    println!();
    for kind in pipeline.execution_order() {
        if let Some(state) = pipeline.stage(*kind) {
            println!("  {:<24} {}", kind.name(), format_stage_state(state));
        }
    }

    if !cmd.no_history {
        let summary = create_summary(&pipeline, &ctx, result.as_ref().err());
        history.save_run(&summary).await?;
        println!(
            "\n{} Run saved to history (ID: {})",
            INFO,
            style(&summary.run_id.to_string()[..8]).dim()
        );
    }

    match result {
        Ok(published) => {
            if !cmd.keep_work_dir {
                discard_work_dir(&ctx).await;
            }
            println!(
                "\n{} {} completed {} ({} artifact version(s))",
                CHECK,
                style(&pipeline.name).bold(),
                style("successfully").green(),
                published.len()
            );
            Ok(())
        }
        Err(e) => {
            println!(
                "\n{} {} {}",
                CROSS,
                style(&pipeline.name).bold(),
                style("failed").red()
            );
            error!("{}", e);
            println!("  Scratch files kept in {}", style(ctx.work_dir().display()).dim());
            std::process::exit(1);
        }
    }
}

/// Remove a finished run's scratch directory; failing to is only worth a warning
async fn discard_work_dir(ctx: &RunContext) {
    if let Err(e) = ctx.remove_work_dir().await {
        warn!("Could not remove {}: {}", ctx.work_dir().display(), e);
    }
}

fn validate_config(cmd: &ValidateCommand) -> Result<()> {
    println!("{} Validating configuration...", INFO);

    match load_config(&cmd.file, &cmd.overrides) {
        Ok(config) => {
            let stages = config.active_stages()?;
            println!("{} Configuration is valid!", CHECK);
            println!("  Project: {}", style(&config.main.project_name).bold());
            println!("  Run group: {}", style(&config.main.experiment_name).bold());
            println!(
                "  Stages: {}",
                style(
                    stages
                        .iter()
                        .map(|s| s.name())
                        .collect::<Vec<_>>()
                        .join(", ")
                )
                .cyan()
            );

            if cmd.json {
                let json = serde_json::to_string_pretty(&config)?;
                println!("\n{}", json);
            }
            Ok(())
        }
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(format!("{:#}", e)).red());
            std::process::exit(1);
        }
    }
}

/// Run one stage outside a full pipeline run
async fn run_single_stage(
    cli: &Cli,
    store: Arc<dyn ArtifactStore>,
    stage: Box<dyn Stage>,
    attribution: &Attribution,
) -> Result<()> {
    let mut engine = ExecutionEngine::new(store);
    engine.add_event_handler(|event| println!("{}", format_execution_event(&event)));

    let mut pipeline = Pipeline::with_active(&attribution.project, vec![stage.kind()]);
    let ctx = RunContext::new(&attribution.project, &attribution.group, &data_dir().join("runs"));
    let result = engine
        .execute_with(&mut pipeline, &ctx, vec![stage], STAGE_TIMEOUT)
        .await;

    let history = open_history(cli, false).await?;
    history
        .save_run(&create_summary(&pipeline, &ctx, result.as_ref().err()))
        .await?;

    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }
    discard_work_dir(&ctx).await;
    Ok(())
}

async fn clean(cmd: &CleanCommand, cli: &Cli) -> Result<()> {
    let store = open_store(cli).await?;
    let stage = BasicCleaningStage::new(
        ArtifactRef::parse(&cmd.input_artifact)?,
        &cmd.output_artifact,
        &cmd.output_type,
        &cmd.output_description,
        CleaningRules::new(cmd.min_price, cmd.max_price, Default::default()),
    );
    run_single_stage(cli, store.clone(), Box::new(stage), &cmd.attribution).await?;

    if let Some(path) = &cmd.output_file {
        let artifact = store
            .fetch(&ArtifactRef::latest(&cmd.output_artifact))
            .await?;
        tokio::fs::write(path, &artifact.payload)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("{} Wrote {}", INFO, style(path.display()).dim());
    }
    Ok(())
}

async fn check(cmd: &CheckCommand, cli: &Cli) -> Result<()> {
    let store = open_store(cli).await?;
    let reference = match &cmd.reference {
        Some(value) => Some(ArtifactRef::parse(value)?),
        None => None,
    };
    let stage = DataCheckStage::new(
        ArtifactRef::parse(&cmd.csv)?,
        reference,
        GateConfig::new(cmd.kl_threshold, cmd.min_price, cmd.max_price),
    );
    run_single_stage(cli, store, Box::new(stage), &cmd.attribution).await
}

async fn train(cmd: &TrainCommand, cli: &Cli) -> Result<()> {
    let store = open_store(cli).await?;
    let stage = TrainRandomForestStage::new(
        ArtifactRef::parse(&cmd.trainval_file)?,
        &cmd.rf_config,
        TrainSettings {
            val_size: cmd.val_size,
            random_seed: cmd.random_seed,
            stratify_by: stratify_column(&cmd.stratify_by).map(str::to_string),
            max_tfidf_features: cmd.max_tfidf_features,
            output_artifact: cmd.output_artifact.clone(),
            columns: FeatureColumns::default(),
        },
    );
    run_single_stage(cli, store, Box::new(stage), &cmd.attribution).await
}

async fn list_artifacts(cmd: &ArtifactsCommand, cli: &Cli) -> Result<()> {
    let store = open_store(cli).await?;
    let versions = store.list_versions(cmd.name.as_deref()).await?;

    if cmd.json {
        let data = serde_json::json!({ "versions": versions });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    if versions.is_empty() {
        println!("{} No artifacts found", INFO);
        return Ok(());
    }

    println!("{} Artifact versions:", INFO);
    for version in &versions {
        println!("  {}", format_artifact_version(version));
    }
    Ok(())
}

async fn promote(cmd: &PromoteCommand, cli: &Cli) -> Result<()> {
    let store = open_store(cli).await?;
    let reference = ArtifactRef::parse(&cmd.reference)?;
    let version = store
        .set_alias(&reference, &cmd.alias)
        .await
        .with_context(|| format!("Failed to promote {}", reference))?;
    println!(
        "{} {} is now {}:{}",
        CHECK,
        style(version.tag()).bold(),
        version.name,
        style(&cmd.alias).green()
    );
    Ok(())
}

async fn show_history(cmd: &HistoryCommand, cli: &Cli) -> Result<()> {
    let store = open_history(cli, false).await?;

    if let Some(run_id) = &cmd.run_id {
        let run_id = uuid::Uuid::parse_str(run_id).context("Invalid run ID format")?;
        match store.load_run(run_id).await? {
            Some(summary) => print_run_details(&summary, cmd.json)?,
            None => println!("{} Run not found", WARN),
        }
        return Ok(());
    }

    let runs = store.list_runs(cmd.project.as_deref(), cmd.limit).await?;

    if cmd.json {
        let data = serde_json::json!({ "runs": runs });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    if runs.is_empty() {
        println!("{} No runs found", INFO);
        return Ok(());
    }

    println!("{} Run history (showing latest {}):", INFO, cmd.limit);
    for summary in &runs {
        println!("  {}", format_run_summary(summary));
    }

    Ok(())
}

fn print_run_details(summary: &RunSummary, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }

    println!("{} Run Details", INFO);
    println!("  ID: {}", style(summary.run_id).cyan());
    println!(
        "  Project: {}/{}",
        style(&summary.project).bold(),
        summary.run_group
    );
    println!("  Status: {}", format_status(summary.status));
    println!("  Stages: {}", summary.active_stages.join(", "));
    println!("  Started: {}", style(summary.started_at.to_rfc3339()).dim());
    if let Some(completed) = summary.completed_at {
        println!("  Completed: {}", style(completed.to_rfc3339()).dim());
        if let Ok(duration) = completed.signed_duration_since(summary.started_at).to_std() {
            println!("  Duration: {}", style(format_duration(duration)).dim());
        }
    }
    println!(
        "  Progress: {} ({}/{})",
        style(format!("{:.0}%", summary.progress() * 100.0)).cyan(),
        summary.completed_stages,
        summary.total_stages
    );
    if let Some(error) = &summary.error {
        println!("  Error: {}", style(error).red());
    }

    Ok(())
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
