use clap::Parser;
use std::path::PathBuf;

/// Bidirectional sync between a wiki space and local markdown files.
#[derive(Debug, Parser)]
#[command(
    name = "wikisync",
    version,
    about = "Bidirectional sync between a wiki space and local markdown files",
    after_help = "\
QUICK START:
  wikisync                                            # run 2-way sync
  wikisync --init --local ./docs --url <page-url>     # initialize
  wikisync --dry-run                                  # preview changes
  wikisync --force-push                               # local -> wiki
  wikisync --force-pull                               # wiki -> local

Excluded pages are not deleted, just ignored during sync."
)]
pub struct Cli {
    /// Initialize sync configuration (requires --local and --url)
    #[arg(long)]
    pub init: bool,

    /// Local folder for synced files (used with --init)
    #[arg(long, value_name = "FOLDER", requires = "init")]
    pub local: Option<PathBuf>,

    /// Wiki page URL of the root page (used with --init)
    #[arg(long, value_name = "URL", requires = "init")]
    pub url: Option<String>,

    /// With --init: exclude the root page itself, sync only its children
    #[arg(long = "exclude-parent", requires = "init")]
    pub exclude_parent: bool,

    /// Optional single file to sync (all other pages are ignored)
    #[arg(value_name = "FILE")]
    pub file: Option<PathBuf>,

    /// Preview changes without applying them
    #[arg(long = "dry-run", conflicts_with_all = ["force_push", "force_pull"])]
    pub dry_run: bool,

    /// Overwrite the wiki with local content unconditionally
    #[arg(long = "force-push", conflicts_with = "force_pull")]
    pub force_push: bool,

    /// Overwrite local files with wiki content unconditionally
    #[arg(long = "force-pull")]
    pub force_pull: bool,

    /// Wiki page URL(s) to exclude from sync (repeatable)
    #[arg(long = "exclude-confluence", value_name = "URL")]
    pub exclude_confluence: Vec<String>,

    /// Local file path(s) or glob(s) to exclude from sync (repeatable)
    #[arg(long = "exclude-local", value_name = "PATH")]
    pub exclude_local: Vec<String>,

    /// Verbosity: 0 = summary, 1 = progress, 2 = debug
    #[arg(long, short = 'v', default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=2))]
    pub verbosity: u8,

    /// Disable colored output
    #[arg(long = "no-color")]
    pub no_color: bool,

    /// Directory for timestamped log files
    #[arg(long, value_name = "DIR")]
    pub logdir: Option<PathBuf>,
}
