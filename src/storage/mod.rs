//! Storage layer: disk I/O and page management.
//!
//! This module reads and writes pages of the database file, owns the file
//! lock, and defines the on-disk meta pages and free list.

mod disk_manager;
mod durability;
mod file_header;
mod freelist;
mod lock;

pub use disk_manager::{DiskManager, DiskManagerImpl};
pub use durability::durable_sync;
pub use file_header::{FileHeader, MAX_BUCKET_NAME};
pub use freelist::{FreeList, IDS_PER_PAGE};
