pub mod client;
pub mod replay;
pub mod types;
pub mod watcher;

pub use client::{KubeSourceProvider, NamespaceScope, PodScope, SourceProvider};
pub use replay::{ChannelFeed, ChannelFeeds, ChannelSourceProvider};
pub use types::{PodRecord, ResourceKind};
pub use watcher::{ResourceEventHandler, SyncHandle, Tombstone, WatchSource};
