pub mod local;
pub mod memory;
pub mod provider;

pub use local::LocalStorageProvider;
pub use memory::MemoryStorageProvider;
pub use provider::StorageProvider;

use sha2::{Digest, Sha256};

/// Fresh, never reused location for a sealed payload:
/// `objects/<h0h1>/<h2h3>/<uuid>`, fanned out by a hash of the id.
pub fn new_storage_key() -> String {
    let id = uuid::Uuid::now_v7().simple().to_string();
    let digest = hex::encode(Sha256::digest(id.as_bytes()));
    format!("objects/{}/{}/{id}", &digest[..2], &digest[2..4])
}
