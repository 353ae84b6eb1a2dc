pub mod cache;
pub mod config;
pub mod error;
pub mod gateway;
pub mod model;
pub mod session;
pub mod sync;
pub mod testing;

pub mod prelude {
    pub use crate::cache::{FileCache, InMemoryCache, SnapshotCache};
    pub use crate::config::ClientConfig;
    pub use crate::error::{MemolinkError, Result};
    pub use crate::gateway::{HttpGateway, RemoteGateway};
    pub use crate::model::{Connection, EntityId, Memory, MemoryDraft, MemoryPatch, Position};
    pub use crate::session::{Session, SessionHandle};
    pub use crate::sync::MemorySync;
    pub use crate::sync::query::{AlbumQuery, SortOrder};
}
