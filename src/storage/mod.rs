//! Object store gateway abstraction

mod memory;
mod retry;
mod s3;
mod traits;

pub use memory::MemoryStore;
pub use retry::with_retry;
pub use s3::S3Store;
pub use traits::{
    ByteReader, ByteStream, ListedObject, ObjectStat, ObjectStore, PartEtag, StorageError,
};

/// S3 caps multipart uploads at 10 000 parts.
pub const MAX_PARTS: u64 = 10_000;

/// Adaptive part size, indexed by object size. Returns `None` below the
/// multipart threshold (single PUT). Bounds per-part memory on a modest host
/// while staying within the part cap up to ~320 GiB.
pub fn adaptive_part_size(size: u64, multipart_threshold: u64) -> Option<u64> {
    const MIB: u64 = 1024 * 1024;
    const GIB: u64 = 1024 * MIB;

    if size < multipart_threshold {
        None
    } else if size < 500 * MIB {
        Some(8 * MIB)
    } else if size < GIB {
        Some(16 * MIB)
    } else {
        Some(32 * MIB)
    }
}

/// Number of parts an object of `size` splits into at `part_size`.
pub fn part_count(size: u64, part_size: u64) -> u64 {
    size.div_ceil(part_size)
}
