//! Meta pages.
//!
//! Pages 0 and 1 each hold a copy of the file header. Commit `txid` writes
//! its header into page `txid % 2`, so the previous commit's header is
//! never overwritten by the one being published. On open, the valid header
//! with the highest transaction id wins; a torn write fails its checksum.

use crate::error::{Result, StorageError};
use crate::types::{PageId, META_PAGE_COUNT, PAGE_SIZE};
use tracing::warn;

/// Magic bytes to identify a valid database file
pub const MAGIC: &[u8; 16] = b"docstore.meta.v1";

/// Longest bucket name the header can record
pub const MAX_BUCKET_NAME: usize = 64;

const CHECKSUM_OFFSET: usize = 109;

/// Database file header
///
/// Layout:
/// ```text
/// Offset  Size  Description
/// 0       16    Magic string "docstore.meta.v1"
/// 16      4     Page size (currently always 4096)
/// 20      8     Transaction id of the commit that wrote this header
/// 28      4     Root page of the bucket tree (0 if empty)
/// 32      4     Tree height
/// 36      4     Total page count (high-water mark)
/// 40      4     First free-list page (0 if none)
/// 44      1     Bucket name length (0 until the bucket is created)
/// 45      64    Bucket name
/// 109     4     Checksum of bytes 0..109 (CRC32)
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    /// Page size in bytes
    pub page_size: u32,
    /// Id of the commit that produced this header
    pub txid: u64,
    /// Root page of the bucket tree
    pub root_page: PageId,
    /// Height of the B-tree (0 when empty)
    pub tree_height: u32,
    /// Total number of pages in the file, meta pages included
    pub page_count: u32,
    /// Head of the persisted free-list chain
    pub freelist_page: PageId,
    /// Name of the bucket stored in this file
    pub bucket: String,
}

impl FileHeader {
    /// Header for a freshly created database
    pub fn new() -> Self {
        Self {
            page_size: PAGE_SIZE as u32,
            txid: 0,
            root_page: PageId::NONE,
            tree_height: 0,
            page_count: META_PAGE_COUNT,
            freelist_page: PageId::NONE,
            bucket: String::new(),
        }
    }

    /// Meta page this header is written to
    pub fn slot(&self) -> PageId {
        PageId::new((self.txid % META_PAGE_COUNT as u64) as u32)
    }

    /// Whether the bucket has been created
    pub fn has_bucket(&self) -> bool {
        !self.bucket.is_empty()
    }

    /// Read a file header from bytes
    pub fn read(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < CHECKSUM_OFFSET + 4 {
            return Err(StorageError::invalid_db("header too short"));
        }

        if &bytes[0..16] != MAGIC {
            return Err(StorageError::invalid_db("invalid magic bytes"));
        }

        let stored_checksum = be_u32(&bytes[CHECKSUM_OFFSET..]);
        if stored_checksum != crc32fast::hash(&bytes[..CHECKSUM_OFFSET]) {
            return Err(StorageError::corruption("header checksum mismatch"));
        }

        let page_size = be_u32(&bytes[16..]);
        if page_size != PAGE_SIZE as u32 {
            return Err(StorageError::invalid_db(format!(
                "unsupported page size: {} (expected {})",
                page_size, PAGE_SIZE
            )));
        }

        let mut txid = [0u8; 8];
        txid.copy_from_slice(&bytes[20..28]);

        let bucket_len = bytes[44] as usize;
        if bucket_len > MAX_BUCKET_NAME {
            return Err(StorageError::corruption("bucket name length out of range"));
        }
        let bucket = std::str::from_utf8(&bytes[45..45 + bucket_len])
            .map_err(|_| StorageError::corruption("bucket name is not UTF-8"))?
            .to_string();

        let header = Self {
            page_size,
            txid: u64::from_be_bytes(txid),
            root_page: PageId::from_be_slice(&bytes[28..32]),
            tree_height: be_u32(&bytes[32..]),
            page_count: be_u32(&bytes[36..]),
            freelist_page: PageId::from_be_slice(&bytes[40..44]),
            bucket,
        };
        header.validate()?;
        Ok(header)
    }

    fn validate(&self) -> Result<()> {
        if self.page_count < META_PAGE_COUNT {
            return Err(StorageError::corruption("page count below meta pages"));
        }
        for (what, page) in [("root", self.root_page), ("free list", self.freelist_page)] {
            if !page.is_none() && (page.value() < META_PAGE_COUNT || page.value() >= self.page_count) {
                return Err(StorageError::corruption(format!(
                    "{} page {} outside file of {} pages",
                    what, page, self.page_count
                )));
            }
        }
        if self.root_page.is_none() != (self.tree_height == 0) {
            return Err(StorageError::corruption("root page and tree height disagree"));
        }
        Ok(())
    }

    /// Write this header to bytes
    pub fn write(&self, bytes: &mut [u8]) {
        bytes[..PAGE_SIZE].fill(0);

        bytes[0..16].copy_from_slice(MAGIC);
        bytes[16..20].copy_from_slice(&self.page_size.to_be_bytes());
        bytes[20..28].copy_from_slice(&self.txid.to_be_bytes());
        bytes[28..32].copy_from_slice(&self.root_page.to_be_bytes());
        bytes[32..36].copy_from_slice(&self.tree_height.to_be_bytes());
        bytes[36..40].copy_from_slice(&self.page_count.to_be_bytes());
        bytes[40..44].copy_from_slice(&self.freelist_page.to_be_bytes());

        let name = self.bucket.as_bytes();
        let name_len = name.len().min(MAX_BUCKET_NAME);
        bytes[44] = name_len as u8;
        bytes[45..45 + name_len].copy_from_slice(&name[..name_len]);

        let checksum = crc32fast::hash(&bytes[..CHECKSUM_OFFSET]);
        bytes[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4].copy_from_slice(&checksum.to_be_bytes());
    }

    /// Pick the header to open from the two meta pages.
    ///
    /// Prefers the highest valid transaction id; fails only when neither
    /// page holds a valid header.
    pub fn select(first: &[u8], second: &[u8]) -> Result<Self> {
        match (Self::read(first), Self::read(second)) {
            (Ok(a), Ok(b)) => Ok(if b.txid > a.txid { b } else { a }),
            (Ok(a), Err(e)) | (Err(e), Ok(a)) => {
                warn!(txid = a.txid, error = %e, "one meta page is invalid, using the other");
                Ok(a)
            }
            (Err(e), Err(_)) => Err(e),
        }
    }
}

impl Default for FileHeader {
    fn default() -> Self {
        Self::new()
    }
}

fn be_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FileHeader {
        FileHeader {
            page_size: PAGE_SIZE as u32,
            txid: 7,
            root_page: PageId::new(5),
            tree_height: 2,
            page_count: 100,
            freelist_page: PageId::new(50),
            bucket: "gwkDocuments".to_string(),
        }
    }

    #[test]
    fn test_header_roundtrip() {
        let header = sample();
        let mut bytes = vec![0u8; PAGE_SIZE];
        header.write(&mut bytes);

        assert_eq!(FileHeader::read(&bytes).unwrap(), header);
        assert_eq!(header.slot(), PageId::new(1));
    }

    #[test]
    fn test_invalid_magic() {
        let mut bytes = vec![0u8; PAGE_SIZE];
        bytes[0..16].copy_from_slice(b"InvalidMagic0000");

        assert!(FileHeader::read(&bytes).is_err());
    }

    #[test]
    fn test_checksum_validation() {
        let mut bytes = vec![0u8; PAGE_SIZE];
        sample().write(&mut bytes);

        bytes[30] ^= 0xFF;

        assert!(matches!(
            FileHeader::read(&bytes),
            Err(StorageError::Corruption(_))
        ));
    }

    #[test]
    fn test_select_prefers_newest_valid() {
        let older = FileHeader { txid: 6, ..sample() };
        let newer = sample();

        let mut a = vec![0u8; PAGE_SIZE];
        let mut b = vec![0u8; PAGE_SIZE];
        older.write(&mut a);
        newer.write(&mut b);
        assert_eq!(FileHeader::select(&a, &b).unwrap().txid, 7);

        // torn newest header falls back to the previous commit
        b[100] ^= 0x55;
        assert_eq!(FileHeader::select(&a, &b).unwrap().txid, 6);

        a[3] ^= 0x55;
        assert!(FileHeader::select(&a, &b).is_err());
    }

    #[test]
    fn test_root_outside_file_rejected() {
        let header = FileHeader {
            root_page: PageId::new(500),
            ..sample()
        };
        let mut bytes = vec![0u8; PAGE_SIZE];
        header.write(&mut bytes);
        assert!(FileHeader::read(&bytes).is_err());
    }
}
