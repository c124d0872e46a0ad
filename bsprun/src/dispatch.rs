// Copyright (c) The bsprun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    ExpectedError,
    errors::Result,
    output::{OutputContext, OutputOpts, ReporterStyles, clap_styles},
    reporter::TerminalReporter,
    selection::{build_tree, select_targets},
};
use bsprun_metadata::{BsprunExitCode, BuildTarget};
use bsprun_runner::{
    cancel::CancelSource,
    client::{BspClient, ClientSettings, TracingClientSink},
    config::{BsprunConfig, ConfigOverrides},
    connection::{ConnectionManager, ProcessLauncher},
    coverage::CoverageAggregator,
    helpers::plural,
    run::{ExecutorSettings, RunFactory, RunProfile, RunRequest, TargetExecutor},
    signal::SignalHandlerKind,
};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Parser, Subcommand};
use owo_colors::OwoColorize;
use std::{
    io::{self, BufWriter, Write},
    sync::Arc,
    time::Instant,
};
use tracing::{debug, info};

/// Runs tests through a Build Server Protocol server.
///
/// bsprun launches the BSP server described by a connection file in the workspace, lists its
/// build targets and asks it to test them, reporting results as they arrive.
#[derive(Debug, Parser)]
#[command(version, styles = clap_styles::style(), max_term_width = 100)]
pub struct BsprunApp {
    #[command(flatten)]
    common: CommonOpts,

    #[command(subcommand)]
    command: Command,
}

impl BsprunApp {
    /// Initializes the output context.
    pub fn init_output(&self) -> OutputContext {
        self.common.output.init()
    }

    /// Executes the app, returning the process exit code.
    pub fn exec(self, output: OutputContext) -> Result<i32> {
        let workspace_root = self.common.workspace_root()?;
        let config = self.common.make_config(&workspace_root)?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("bsprun-runtime")
            .build()
            .map_err(|err| ExpectedError::TokioRuntimeCreateError { err })?;

        runtime.block_on(async move {
            let client = make_client(&config);
            let result = match self.command {
                Command::Targets(opts) => opts.exec(&client, output).await,
                Command::Run(opts) => opts.exec(&client, &config, output).await,
            };
            client.shutdown().await;
            result
        })
    }
}

#[derive(Debug, Args)]
struct CommonOpts {
    /// Workspace root [default: current directory]
    #[arg(long, global = true, value_name = "DIR", env = "BSPRUN_WORKSPACE_ROOT")]
    workspace_root: Option<Utf8PathBuf>,

    /// Config file [default: workspace-root/.config/bsprun.toml]
    #[arg(long, global = true, value_name = "PATH")]
    config_file: Option<Utf8PathBuf>,

    /// Name of the BSP server to launch, overriding `server.name` in config
    #[arg(long, global = true, value_name = "NAME")]
    server_name: Option<String>,

    #[command(flatten)]
    output: OutputOpts,
}

impl CommonOpts {
    fn workspace_root(&self) -> Result<Utf8PathBuf> {
        match &self.workspace_root {
            Some(workspace_root) => {
                if workspace_root.is_dir() {
                    Ok(workspace_root.clone())
                } else {
                    Err(ExpectedError::WorkspaceRootInvalid {
                        workspace_root: workspace_root.clone(),
                    })
                }
            }
            None => {
                let current_dir = std::env::current_dir()
                    .map_err(|err| ExpectedError::CurrentDirFailed { err })?;
                Utf8PathBuf::try_from(current_dir)
                    .map_err(|err| ExpectedError::WorkspaceRootInvalidUtf8 { err })
            }
        }
    }

    fn make_config(&self, workspace_root: &Utf8Path) -> Result<BsprunConfig> {
        let overrides = ConfigOverrides {
            server_name: self.server_name.clone(),
        };
        Ok(BsprunConfig::from_sources(
            workspace_root,
            self.config_file.as_deref(),
            &overrides,
        )?)
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List build targets in the workspace
    ///
    /// Test-capable targets are marked. Use --json to get machine-readable output.
    Targets(TargetsOpts),

    /// Run tests
    ///
    /// Selects test-capable targets matching any of the given patterns (all of them if none
    /// are given) and asks the build server to test each one in turn.
    Run(RunOpts),
}

#[derive(Debug, Args)]
struct TargetsOpts {
    /// Print targets as JSON
    #[arg(long)]
    json: bool,
}

impl TargetsOpts {
    async fn exec(&self, client: &BspClient, output: OutputContext) -> Result<i32> {
        let mut targets = client.workspace_build_targets().await?.targets;
        targets.sort_by(|a, b| a.id.cmp(&b.id));

        let mut writer = BufWriter::new(io::stdout());
        write_targets(&targets, self.json, &output.reporter_styles(), &mut writer)
            .and_then(|()| writer.flush())
            .map_err(ExpectedError::write_output_error)?;
        Ok(BsprunExitCode::OK)
    }
}

fn write_targets(
    targets: &[BuildTarget],
    json: bool,
    styles: &ReporterStyles,
    writer: &mut dyn Write,
) -> io::Result<()> {
    if json {
        serde_json::to_writer_pretty(&mut *writer, targets)?;
        return writeln!(writer);
    }

    for target in targets {
        write!(writer, "{}", target.label().style(styles.label))?;
        if target.label() != target.id.uri {
            write!(writer, " ({})", target.id.uri)?;
        }
        if target.capabilities.can_test {
            write!(writer, " {}", "[test]".style(styles.pass))?;
        }
        writeln!(writer)?;
    }
    Ok(())
}

#[derive(Debug, Args)]
struct RunOpts {
    /// Run only targets whose label or URI contains one of these patterns
    #[arg(value_name = "TARGET-PATTERN")]
    patterns: Vec<String>,

    /// Collect line coverage
    #[arg(long)]
    coverage: bool,

    /// Don't list the sources of each target
    #[arg(long)]
    no_sources: bool,
}

impl RunOpts {
    async fn exec(
        self,
        client: &BspClient,
        config: &BsprunConfig,
        output: OutputContext,
    ) -> Result<i32> {
        let cancel = CancelSource::new();
        let signal_task = SignalHandlerKind::Standard
            .build()?
            .cancel_on_shutdown(cancel.clone());

        let targets = client.workspace_build_targets().await?.targets;
        let targets = select_targets(targets, &self.patterns);
        if targets.is_empty() {
            return Err(ExpectedError::NoTestsSelected {
                patterns: self.patterns,
            });
        }

        let sources = if self.no_sources {
            Vec::new()
        } else {
            let ids = targets.iter().map(|target| target.id.clone()).collect();
            client.build_target_sources(ids).await?.items
        };
        let selected = build_tree(config.workspace_root(), &targets, sources);
        info!(
            "running {} {}",
            targets.len(),
            plural::targets_str(targets.len())
        );

        let mut factory = RunFactory::new(client.clone());
        let profile = if self.coverage {
            factory = factory.with_coverage(
                CoverageAggregator::new(config.workspace_root()),
                config.coverage_roots(),
            );
            RunProfile::Coverage
        } else {
            RunProfile::Run
        };

        let reporter = Arc::new(TerminalReporter::new(
            Box::new(io::stdout()),
            output.reporter_styles(),
            output.verbose,
            config.workspace_root(),
        ));
        let run = factory.begin_run(
            Arc::new(selected.tree),
            RunRequest::new(selected.targets).with_profile(profile),
            reporter.clone(),
            cancel.token(),
        );
        debug!("starting {profile} {}", run.origin_id());

        let executor =
            TargetExecutor::new(client.clone(), ExecutorSettings::from_config(config.run()));
        let start = Instant::now();
        let summary = run
            .execute(|run, node| {
                let executor = executor.clone();
                async move { executor.run_node(run, node).await }
            })
            .await?;
        signal_task.abort();

        reporter.write_summary(&summary, start.elapsed());
        if let Some(err) = reporter.take_error() {
            return Err(ExpectedError::write_output_error(err));
        }

        if summary.cancelled {
            Err(ExpectedError::RunCancelled)
        } else if !summary.is_success() {
            Err(ExpectedError::TestRunFailed)
        } else {
            Ok(BsprunExitCode::OK)
        }
    }
}

fn make_client(config: &BsprunConfig) -> BspClient {
    let connections = ConnectionManager::new(
        Arc::new(ProcessLauncher::new(config)),
        config.cancel_grace_period(),
    );
    BspClient::new(
        connections,
        ClientSettings::from_config(config),
        Arc::new(TracingClientSink),
    )
}
