pub mod backend;
pub mod local;
pub mod memory;
pub mod s3;

pub use backend::{ListEntry, ListPage, ObjectHead, PutOptions, RemoteStore};
pub use local::{slash_path, LocalEntry, LocalFs};
pub use memory::MemoryStore;
pub use s3::{Credentials, S3Store};
