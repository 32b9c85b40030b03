pub mod cursor;
pub mod document;
pub mod engine;
pub mod evaluate;
pub mod http;
pub mod memory;

pub use cursor::{CountSource, Cursor, PageMeta, ResultSet};
pub use document::{DateFormats, Document, DocumentMeta, InsertResult, RevisionResult, Value};
pub use engine::Engine;
pub use http::HttpEngine;
pub use memory::MemoryEngine;
