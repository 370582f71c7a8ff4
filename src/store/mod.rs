pub mod baseline;
pub mod version_cache;

pub use baseline::BaselineStore;
pub use version_cache::VersionCache;
