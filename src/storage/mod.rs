pub mod local;
pub mod remote;

pub use local::{FileLocalStore, LocalStore, MemoryLocalStore, StoreKeys};
pub use remote::{BlobRef, BlobStore, FileApi, FileQuery, RootScope};
