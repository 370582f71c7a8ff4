//! User-facing terminal output, kept apart from the tracing logs.
//!
//! Verbosity 0 prints summaries and errors only; 1 adds progress lines;
//! the debug level lives in the tracing layer, not here.

use crate::domain::SyncSummary;
use colored::Colorize;

pub struct OutputHandler {
    verbosity: u8,
}

impl OutputHandler {
    pub fn new(verbosity: u8, no_color: bool) -> Self {
        if no_color {
            colored::control::set_override(false);
        }
        Self { verbosity }
    }

    pub fn info(&self, message: &str) {
        if self.verbosity >= 1 {
            println!("{message}");
        }
    }

    pub fn print(&self, message: &str) {
        println!("{message}");
    }

    pub fn success(&self, message: &str) {
        println!("{}", message.green());
    }

    pub fn warning(&self, message: &str) {
        eprintln!("{}", message.yellow());
    }

    pub fn error(&self, message: &str) {
        eprintln!("{}", message.red());
    }

    pub fn print_summary(&self, summary: &SyncSummary) {
        println!();
        if summary.touched() == 0 && summary.failures.is_empty() {
            println!("Everything in sync ({} unchanged).", summary.unchanged);
            return;
        }
        println!("Sync summary:");
        println!("  pushed:    {}", summary.pushed);
        println!("  pulled:    {}", summary.pulled);
        println!("  merged:    {}", summary.merged);
        println!("  unchanged: {}", summary.unchanged);
        if summary.deleted_local + summary.deleted_remote > 0 {
            println!(
                "  deleted:   {} local, {} remote",
                summary.deleted_local, summary.deleted_remote
            );
        }
        if summary.moved_local + summary.moved_remote > 0 {
            println!(
                "  moved:     {} local, {} remote",
                summary.moved_local, summary.moved_remote
            );
        }
        if !summary.failures.is_empty() {
            println!("  failed:    {}", summary.failures.len());
            for (id, message) in &summary.failures {
                self.error(&format!("    page {id}: {message}"));
            }
        }
        if !summary.conflict_paths.is_empty() {
            println!();
            self.warning(&format!(
                "{} file(s) contain conflict markers and need manual resolution:",
                summary.conflict_paths.len()
            ));
            for path in &summary.conflict_paths {
                self.warning(&format!("  {}", path.display()));
            }
        }
    }

    pub fn print_dry_run(&self, summary: &SyncSummary) {
        println!("Dry run — no changes were made.\n");
        if summary.plan.is_empty() {
            println!("Nothing to do; both sides are in sync.");
            return;
        }
        println!("Planned actions:");
        for line in &summary.plan {
            println!("  {line}");
        }
        if !summary.conflict_paths.is_empty() {
            println!();
            self.warning(&format!(
                "{} page(s) would conflict and require manual resolution",
                summary.conflict_paths.len()
            ));
        }
    }

    pub fn getting_started(&self) {
        println!("No sync configuration found.\n");
        println!("To get started, bind a local folder to a wiki page:\n");
        println!("  wikisync --init --local ./docs --url https://company.example.com/wiki/spaces/TEAM/pages/123456\n");
        println!("Required environment variables:");
        println!("  WIKI_USER        your account email");
        println!("  WIKI_API_TOKEN   an API token for that account\n");
        println!("Run 'wikisync --help' for all options.");
    }
}
