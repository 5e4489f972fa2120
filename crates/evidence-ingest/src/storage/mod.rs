pub mod filesystem;
pub mod optimizer;

use sha2::{Digest, Sha256};

pub use filesystem::{FileStorage, StoredObject, Tier};
pub use optimizer::{
    CleanupPolicy, CleanupReport, OptimizationMethod, OptimizationResult, StorageMonitor,
    StorageOptimizer, UtilizationAction, UtilizationReport,
};

/// Lower-case hex SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}
