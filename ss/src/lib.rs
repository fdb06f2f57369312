//! SnapStore - file-backed JSON snapshot store
//!
//! Stores one JSON document per key. Writes go to a temporary sibling file
//! which is synced and renamed over the target, so readers never observe a
//! half-written snapshot.
//!
//! # Layout
//!
//! ```text
//! .snapstore/
//! ├── .lock                  # advisory lock held during writes
//! ├── requirements.json
//! ├── codegen.json
//! └── ...
//! ```
//!
//! # Example
//!
//! ```ignore
//! use snapstore::SnapStore;
//!
//! let store = SnapStore::open(".snapstore")?;
//! store.put("requirements", &serde_json::json!({"functional": []}))?;
//! let value = store.get("requirements")?;
//! ```

mod store;

pub use store::{SnapStore, sanitize_key};

/// File extension used for snapshot documents
pub const SNAPSHOT_EXT: &str = "json";
