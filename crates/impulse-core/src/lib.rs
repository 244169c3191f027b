pub mod document;
pub mod event;
pub mod index;
pub mod mirror;
pub mod sqlite_store;
pub mod store;

pub use document::*;
pub use event::*;
pub use index::*;
pub use mirror::*;
pub use sqlite_store::SqliteDocumentStore;
pub use store::*;
