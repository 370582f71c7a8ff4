pub mod converter;

pub use converter::StorageConverter;

use anyhow::Result;

/// Bidirectional format conversion between local markdown and the remote's
/// document-tree (storage XHTML) form. The sync engine only ever talks to
/// this trait; the fidelity of the conversion is this collaborator's problem.
pub trait ContentConverter: Send + Sync {
    fn markdown_to_storage(&self, markdown: &str) -> Result<String>;
    fn storage_to_markdown(&self, storage: &str) -> Result<String>;
}
