//! Refract CLI - wires settings, oracles, search and ledger together

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod settings;

use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use refract_candidate::{PromptPair, RunId};
use refract_ledger::{finalize_run, AssetLayout, CsvScoreLog, RunSummaryDocument};
use refract_oracle::{CommandScorer, HttpSynthesisBackend, OllamaRefiner, OutputWatcher, PromptTemplate};
use refract_search::{Oracles, SearchCoordinator, SearchError};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

pub use settings::{Settings, SettingsError, DEFAULT_NEGATIVE};

/// Filter used when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "warn,refract=info";

/// Build the `refract` command line
#[must_use]
pub fn build_command() -> Command {
    Command::new("refract")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Multi-branch hill-climbing search over image generation prompts")
        .arg(
            Arg::new("prompt")
                .long("prompt")
                .required(true)
                .help("Seed positive prompt"),
        )
        .arg(
            Arg::new("negative")
                .long("negative")
                .default_value(DEFAULT_NEGATIVE)
                .help("Seed negative prompt"),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .value_parser(value_parser!(PathBuf))
                .help("TOML settings file"),
        )
        .arg(Arg::new("project").long("project").help("Project name"))
        .arg(Arg::new("part").long("part").help("Part name"))
        .arg(
            Arg::new("output-root")
                .long("output-root")
                .value_parser(value_parser!(PathBuf))
                .help("Assets root directory"),
        )
        .arg(
            Arg::new("branches")
                .long("branches")
                .value_parser(value_parser!(u32))
                .help("Independent branches to run"),
        )
        .arg(
            Arg::new("attempts")
                .long("attempts")
                .value_parser(value_parser!(u32))
                .help("Attempts per branch"),
        )
        .arg(
            Arg::new("variants")
                .long("variants")
                .value_parser(value_parser!(u32))
                .help("Renders per attempt"),
        )
        .arg(
            Arg::new("max-stale")
                .long("max-stale")
                .value_parser(value_parser!(u32))
                .help("Non-improving attempts before a branch stops"),
        )
        .arg(
            Arg::new("target-score")
                .long("target-score")
                .value_parser(value_parser!(f64))
                .help("Stop a branch once its best total reaches this"),
        )
        .arg(
            Arg::new("retry")
                .long("retry")
                .value_parser(value_parser!(u32))
                .help("Dispatch attempts per job"),
        )
        .arg(
            Arg::new("delay")
                .long("delay")
                .value_parser(settings::parse_seconds)
                .help("Seconds between attempts"),
        )
        .arg(
            Arg::new("final-variants")
                .long("final-variants")
                .value_parser(value_parser!(u32))
                .help("Confidence renders of the winner"),
        )
        .arg(
            Arg::new("seed")
                .long("seed")
                .value_parser(value_parser!(u64))
                .help("Random seed for reproducible synthesis seeds"),
        )
        .arg(
            Arg::new("concurrent")
                .long("concurrent")
                .action(ArgAction::SetTrue)
                .help("Run branches concurrently"),
        )
        .arg(
            Arg::new("no-reanchor")
                .long("no-reanchor")
                .action(ArgAction::SetTrue)
                .help("Keep refining from the last attempt after a regression"),
        )
        .arg(
            Arg::new("multimodal")
                .long("multimodal")
                .action(ArgAction::SetTrue)
                .help("Send the previous image along with refinement requests"),
        )
        .arg(Arg::new("synthesis-url").long("synthesis-url").help("Renderer endpoint"))
        .arg(
            Arg::new("render-dir")
                .long("render-dir")
                .value_parser(value_parser!(PathBuf))
                .help("Directory the renderer writes images into"),
        )
        .arg(
            Arg::new("scorer")
                .long("scorer")
                .value_parser(value_parser!(PathBuf))
                .help("Scoring program"),
        )
        .arg(Arg::new("refinement-url").long("refinement-url").help("Refinement server root"))
        .arg(Arg::new("model").long("model").help("Refinement model"))
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_parser(["text", "json"])
                .default_value("text")
                .help("Log output format"),
        )
}

/// Install the global tracing subscriber
pub fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Resolve settings from file, environment and flags
///
/// # Errors
/// Returns an error if the settings file cannot be loaded.
pub fn resolve_settings(
    matches: &ArgMatches,
    env: impl Fn(&str) -> Option<String>,
) -> Result<Settings, SettingsError> {
    let mut settings = match matches.get_one::<PathBuf>("config") {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };
    settings.fill_from_env(env);
    settings.apply_matches(matches);
    Ok(settings)
}

/// Process exit status for a failed run
#[must_use]
pub fn exit_code(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<SearchError>().map_or(1, SearchError::exit_code)
}

/// Run a full search from parsed arguments
///
/// # Errors
/// Setup failures and [`SearchError`] (recoverable via downcast).
pub async fn run(matches: &ArgMatches) -> anyhow::Result<RunSummaryDocument> {
    let settings = resolve_settings(matches, |key| std::env::var(key).ok())?;
    let run_id = RunId::new();
    let config = settings.search_config(run_id);
    let seed = PromptPair::new(
        matches.get_one::<String>("prompt").cloned().unwrap_or_default(),
        matches
            .get_one::<String>("negative")
            .cloned()
            .unwrap_or_else(|| DEFAULT_NEGATIVE.to_string()),
    );
    let output = &settings.output;
    let layout = AssetLayout::new(&output.root, &output.project, &output.part);

    tracing::info!(
        %run_id,
        job_prefix = %config.job_prefix,
        project = %output.project,
        part = %output.part,
        branches = config.max_branches,
        attempts = config.max_attempts_per_branch,
        synthesis = settings.synthesis_endpoint(),
        refinement = settings.refinement_url(),
        model = settings.refinement_model(),
        "starting prompt search"
    );

    let watcher =
        OutputWatcher::new(&settings.synthesis.output_dir).with_poll_interval(settings.synthesis.poll_interval());
    let synthesis = HttpSynthesisBackend::new(settings.synthesis_endpoint(), watcher)
        .context("invalid synthesis endpoint")?
        .with_settings(settings.synthesis.graph.clone());
    let scorer = CommandScorer::new(&settings.scoring.program).with_args(settings.scoring.args.clone());
    let mut refiner = OllamaRefiner::new(settings.refinement_url(), settings.refinement_model())
        .context("invalid refinement endpoint")?;
    if let Some(template) = &settings.refinement.template {
        refiner = refiner.with_template(PromptTemplate::new(template.clone()));
    }
    let oracles = Oracles::new(Arc::new(synthesis), Arc::new(scorer), Arc::new(refiner));

    let sink = CsvScoreLog::open(layout.score_log()).context("cannot open score log")?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling search");
            on_signal.cancel();
        }
    });

    let coordinator = SearchCoordinator::new(config.clone(), oracles, Arc::new(sink), cancel)?.with_run_id(run_id);
    let summary = coordinator.run(seed).await?;

    let document = finalize_run(&layout, &summary, &output.project, &output.part, &config)
        .context("cannot write run summary")?;
    tracing::info!(
        run_id = %document.run_id,
        branch = document.winning_branch,
        score = document.best_score,
        "search complete"
    );
    Ok(document)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_is_well_formed() {
        build_command().debug_assert();
    }

    #[test]
    fn bad_delay_is_rejected_by_parser() {
        for delay in ["-1", "NaN", "inf"] {
            let result = build_command().try_get_matches_from(["refract", "--prompt", "p", "--delay", delay]);
            assert!(result.is_err(), "{delay} accepted");
        }
    }

    #[test]
    fn search_errors_keep_their_exit_code() {
        let err = anyhow::Error::new(SearchError::NoWinner { branches: 2 });
        assert_eq!(exit_code(&err), 2);
        assert_eq!(exit_code(&anyhow::anyhow!("bad endpoint")), 1);
    }
}
