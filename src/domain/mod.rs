pub mod ops;
pub mod page;

pub use ops::{DeleteInfo, MoveDirection, MoveInfo, SyncSummary};
pub use page::{Classification, LocalPage, PageId, RemotePage, RemotePageMeta};
