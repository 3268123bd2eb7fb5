mod kv;
mod objects;
mod schema;
mod settings;
mod sqlite;
mod types;

pub use kv::{load, load_meta, save, save_meta, KeyValueStore, MemoryStore, SharedStore};
pub use objects::{ObjectStore, REGISTER_KEY};
pub use schema::Database;
pub use settings::{RuntimeSettings, SETTINGS_KEY};
pub use types::{DataKind, ObjectIndex, StoreError};
