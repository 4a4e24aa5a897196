use std::fs::Metadata;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

/// Process-unique identity of one open pack handle.
///
/// Reopening the same file yields a new `PackId`, so blocks cached for a
/// replaced file can never be served for its successor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackId(u64);

impl PackId {
    /// Allocate a fresh id.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

/// Identity of a file on disk, compared to notice that a path now names
/// a different file (replaced or rewritten).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileIdentity {
    device: u64,
    inode: u64,
    len: u64,
    modified: Option<SystemTime>,
}

impl FileIdentity {
    pub fn from_metadata(meta: &Metadata) -> Self {
        #[cfg(unix)]
        let (device, inode) = {
            use std::os::unix::fs::MetadataExt;
            (meta.dev(), meta.ino())
        };
        #[cfg(not(unix))]
        let (device, inode) = (0, 0);

        Self {
            device,
            inode,
            len: meta.len(),
            modified: meta.modified().ok(),
        }
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn modified(&self) -> Option<SystemTime> {
        self.modified
    }
}

/// Random-access byte source whose contents the cache holds in blocks.
///
/// Implementations must be immutable for the lifetime of their `PackId`.
pub trait BlockSource: Send + Sync {
    /// Identity the cache keys blocks by.
    fn pack_id(&self) -> PackId;

    /// Total size in bytes.
    fn size(&self) -> u64;

    /// Fill `buf` from `position`. Short reads are errors.
    fn read_exact_at(&self, position: u64, buf: &mut [u8]) -> io::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn pack_ids_are_unique() {
        let a = PackId::next();
        let b = PackId::next();
        assert_ne!(a, b);
        assert!(b.get() > a.get());
    }

    #[test]
    fn identity_changes_when_file_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pack");
        std::fs::write(&path, b"first").unwrap();
        let first = FileIdentity::from_metadata(&std::fs::metadata(&path).unwrap());
        assert_eq!(
            first,
            FileIdentity::from_metadata(&std::fs::metadata(&path).unwrap())
        );

        let tmp = dir.path().join("pack.tmp");
        let mut f = std::fs::File::create(&tmp).unwrap();
        f.write_all(b"second, longer").unwrap();
        drop(f);
        std::fs::rename(&tmp, &path).unwrap();

        let second = FileIdentity::from_metadata(&std::fs::metadata(&path).unwrap());
        assert_ne!(first, second);
        assert_eq!(second.len(), 14);
    }
}
