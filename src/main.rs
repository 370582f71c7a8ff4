use anyhow::Context;
use clap::Parser;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cli::Cli;
use crate::config::{SyncConfig, SyncState};
use crate::content::StorageConverter;
use crate::domain::{PageId, SyncSummary};
use crate::error::{ExitCode, SyncError};
use crate::merge::tool::MergeTool;
use crate::output::OutputHandler;
use crate::parser::frontmatter;
use crate::remote::api::Credentials;
use crate::remote::RemoteClient;
use crate::sync::{SpaceEngine, SyncMode};

mod cli;
mod config;
mod content;
mod domain;
mod error;
mod merge;
mod output;
mod parser;
mod paths;
mod remote;
mod store;
mod sync;


#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    if let Err(e) = init_logging(&cli) {
        eprintln!("failed to initialize logging: {e}");
        std::process::exit(ExitCode::GeneralError.code());
    }

    let output = OutputHandler::new(cli.verbosity, cli.no_color);
    let code = run(cli, &output).await;
    std::process::exit(code.code());
}

fn init_logging(cli: &Cli) -> anyhow::Result<()> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::EnvFilter;

    let level = match cli.verbosity {
        0 => "wikisync=warn",
        1 => "wikisync=info",
        _ => "wikisync=debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(!cli.no_color)
        .with_target(false);

    match &cli.logdir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("cannot create log directory {}", dir.display()))?;
            let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
            let path = dir.join(format!("wikisync_{stamp}.log"));
            let file = std::fs::File::create(&path)
                .with_context(|| format!("cannot create log file {}", path.display()))?;
            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(std::sync::Mutex::new(file))
                .with_ansi(false);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .with(file_layer)
                .init();
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .init();
        }
    }
    Ok(())
}

async fn run(cli: Cli, output: &OutputHandler) -> ExitCode {
    if cli.init || cli.local.is_some() || cli.url.is_some() {
        return run_init(&cli, output);
    }
    match run_sync(&cli, output).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "sync failed");
            output.error(&format!("Error: {e}"));
            ExitCode::from(&e)
        }
    }
}

fn run_init(cli: &Cli, output: &OutputHandler) -> ExitCode {
    let (Some(local), Some(url)) = (&cli.local, &cli.url) else {
        output.error("--init requires both --local <folder> and --url <page-url>");
        return ExitCode::GeneralError;
    };

    let config = match SyncConfig::from_init(local, url, cli.exclude_parent) {
        Ok(config) => config,
        Err(e) => {
            output.error(&format!("Initialization failed: {e}"));
            return ExitCode::GeneralError;
        }
    };

    if let Err(e) = std::fs::create_dir_all(local) {
        output.error(&format!(
            "Cannot create local folder {}: {e}",
            local.display()
        ));
        return ExitCode::GeneralError;
    }

    if let Err(e) = config.save(Path::new(config::CONFIG_FILE)) {
        output.error(&format!("Initialization failed: {e}"));
        return ExitCode::GeneralError;
    }

    let space = &config.spaces[0];
    output.success("Configuration initialized");
    output.print(&format!("  Space:        {}", space.space_key));
    output.print(&format!("  Root page:    {}", space.root_page_id));
    output.print(&format!("  Local folder: {}", local.display()));
    if space.exclude_root {
        output.print("  Root page excluded: only children will sync");
    }
    output.print("");
    output.print("Next steps:");
    output.print(&format!("  1. Review {}", config::CONFIG_FILE));
    output.print("  2. Run 'wikisync' to start syncing");
    ExitCode::Success
}

async fn run_sync(cli: &Cli, output: &OutputHandler) -> Result<ExitCode, SyncError> {
    let config_path = Path::new(config::CONFIG_FILE);
    if !config_path.exists() {
        output.getting_started();
        return Ok(ExitCode::GeneralError);
    }

    let mut config = SyncConfig::load(config_path)?;

    // CLI exclusions become configuration before the engine ever runs.
    let exclusion_ids = resolve_cli_exclusions(cli)?;
    if !exclusion_ids.is_empty() {
        let added = config.add_exclusions(&exclusion_ids);
        config.save(config_path)?;
        output.info(&format!(
            "Persisted {} exclusion(s) to {} ({added} new)",
            exclusion_ids.len(),
            config::CONFIG_FILE
        ));
    }

    let state_path = Path::new(config::STATE_FILE);
    let mut state = SyncState::load(state_path)?;

    let credentials = Credentials::from_env()?;
    let converter = Arc::new(StorageConverter);

    let merge_tool = match &config.merge_tool {
        Some(name) => match MergeTool::new(name, config.merge_tool_command.as_deref()) {
            Ok(tool) => Some(tool),
            Err(e) => {
                tracing::warn!(error = %e, "merge tool misconfigured, conflicts stay on disk");
                None
            }
        },
        None => None,
    };

    let mode = if cli.dry_run {
        SyncMode::DryRun
    } else if cli.force_push {
        SyncMode::ForcePush
    } else if cli.force_pull {
        SyncMode::ForcePull
    } else {
        SyncMode::Bidirectional
    };

    let mut total = SyncSummary::default();
    // Whole-tree syncs rebuild the tracked map from discovery; single-file
    // syncs patch the existing map in place.
    let mut new_tracked: BTreeMap<PageId, PathBuf> = if cli.file.is_some() {
        state.tracked_pages.clone()
    } else {
        BTreeMap::new()
    };

    // Single-file mode runs only the binding that owns the file.
    let bindings: Vec<_> = match &cli.file {
        Some(file) => {
            let owner = config
                .spaces
                .iter()
                .find(|s| file.starts_with(&s.local_path) || s.local_path == Path::new("."))
                .cloned()
                .ok_or_else(|| {
                    SyncError::General(format!(
                        "{} is not under any configured local path",
                        file.display()
                    ))
                })?;
            vec![owner]
        }
        None => config.spaces.clone(),
    };

    for binding in bindings {
        output.info(&format!(
            "Syncing space '{}' <-> {}",
            binding.space_key,
            binding.local_path.display()
        ));

        let remote = Arc::new(RemoteClient::new(
            &binding.base_url,
            &binding.space_key,
            binding.root_page_id.clone(),
            credentials.clone(),
            converter.clone(),
        )?);

        let engine = SpaceEngine::new(
            binding,
            remote,
            converter.clone(),
            config.page_limit,
        )
        .with_merge_tool(merge_tool.clone())
        .with_tiebreak(config.new_page_tiebreak);

        let cycle = tokio::select! {
            result = engine.run_cycle(&state, mode, cli.file.as_deref()) => result?,
            _ = tokio::signal::ctrl_c() => {
                output.error("Interrupted; partial changes already applied were kept.");
                return Ok(ExitCode::GeneralError);
            }
        };

        new_tracked.extend(cycle.tracked);
        merge_summaries(&mut total, cycle.summary);
    }

    if mode == SyncMode::DryRun {
        output.print_dry_run(&total);
        return Ok(if total.has_conflicts() {
            ExitCode::Conflicts
        } else {
            ExitCode::Success
        });
    }

    // Persist state: new tracked map; the global timestamp moves only for
    // whole-tree syncs that left no conflicts behind, so conflicted pages
    // stay in the change window for the next cycle.
    state.tracked_pages = new_tracked;
    if cli.file.is_none() && !total.has_conflicts() {
        state.last_synced = Some(chrono::Utc::now());
    }
    state.save(state_path)?;

    output.print_summary(&total);

    Ok(if total.has_conflicts() {
        ExitCode::Conflicts
    } else if !total.failures.is_empty() {
        ExitCode::GeneralError
    } else {
        ExitCode::Success
    })
}

fn merge_summaries(total: &mut SyncSummary, part: SyncSummary) {
    total.pushed += part.pushed;
    total.pulled += part.pulled;
    total.merged += part.merged;
    total.unchanged += part.unchanged;
    total.deleted_local += part.deleted_local;
    total.deleted_remote += part.deleted_remote;
    total.moved_local += part.moved_local;
    total.moved_remote += part.moved_remote;
    total.conflict_paths.extend(part.conflict_paths);
    total.failures.extend(part.failures);
    total.plan.extend(part.plan);
}

/// Resolve `--exclude-confluence` URLs and `--exclude-local` paths/globs to
/// page ids. Any entry that cannot be resolved is an error; silently syncing
/// a page the user asked to exclude is worse than stopping.
fn resolve_cli_exclusions(cli: &Cli) -> Result<Vec<PageId>, SyncError> {
    let mut ids = Vec::new();

    for url in &cli.exclude_confluence {
        match frontmatter::parse_wiki_url(url) {
            Some((_, id)) => ids.push(PageId::new(id)),
            None => {
                return Err(SyncError::General(format!(
                    "invalid wiki page URL in --exclude-confluence: {url}"
                )));
            }
        }
    }

    for pattern in &cli.exclude_local {
        for path in expand_local_pattern(pattern)? {
            let content = std::fs::read_to_string(&path).map_err(|e| {
                SyncError::General(format!("cannot read excluded file {}: {e}", path.display()))
            })?;
            match frontmatter::page_id_of(&content) {
                Some(id) => ids.push(id),
                None => {
                    return Err(SyncError::General(format!(
                        "excluded file {} has no page id in its front-matter",
                        path.display()
                    )));
                }
            }
        }
    }

    Ok(ids)
}

/// A pattern without wildcards is a literal path; with wildcards it matches
/// file names inside its parent directory.
fn expand_local_pattern(pattern: &str) -> Result<Vec<PathBuf>, SyncError> {
    if !pattern.contains('*') && !pattern.contains('?') {
        return Ok(vec![PathBuf::from(pattern)]);
    }

    let path = Path::new(pattern);
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    let file_pattern = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| SyncError::General(format!("invalid pattern: {pattern}")))?;

    let glob = globset::Glob::new(file_pattern)
        .map_err(|e| SyncError::General(format!("invalid pattern {pattern}: {e}")))?
        .compile_matcher();

    let mut matches = Vec::new();
    let entries = std::fs::read_dir(dir)
        .map_err(|e| SyncError::General(format!("cannot read {}: {e}", dir.display())))?;
    for entry in entries.flatten() {
        if entry.file_type().map(|t| t.is_file()).unwrap_or(false)
            && glob.is_match(entry.file_name().to_string_lossy().as_ref())
        {
            matches.push(entry.path());
        }
    }

    if matches.is_empty() {
        tracing::warn!(pattern = %pattern, "no files matched exclusion pattern");
    }
    Ok(matches)
}
