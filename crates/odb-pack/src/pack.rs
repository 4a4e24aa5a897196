use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use flate2::read::ZlibDecoder;
use odb_cache::{BlockCache, BlockSource, FileIdentity, PackId};
use odb_types::{hash_object, AbbreviatedObjectId, HashAlgorithm, ObjectId, ObjectKind};
use serde::Serialize;
use tracing::debug;

use crate::cursor::PackCursor;
use crate::delta::MAX_PREALLOC;
use crate::error::{PackError, PackResult};
use crate::header::{
    parse_entry_header, EntryHeader, EntryKind, PackHeader, MAX_ENTRY_HEADER_LEN,
    PACK_HEADER_LEN,
};
use crate::index::PackIndex;
use crate::resolver::{DeltaResolver, ObjectInfo, PackObject, ResolveMemo};

/// An open pack file and its index.
///
/// Reads go through the shared [`BlockCache`]. The handle keeps its file
/// open for as long as it lives, so readers holding an `Arc<PackFile>` are
/// unaffected when the file is later replaced or deleted.
pub struct PackFile {
    path: PathBuf,
    name: String,
    file: File,
    identity: FileIdentity,
    size: u64,
    header: PackHeader,
    index: PackIndex,
    checksum: ObjectId,
    id: PackId,
    cache: Arc<BlockCache>,
}

/// Result of [`PackFile::verify`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
    pub checksum: ObjectId,
    pub objects: usize,
    pub whole: usize,
    pub deltas: usize,
    pub commits: usize,
    pub trees: usize,
    pub blobs: usize,
    pub tags: usize,
}

impl PackFile {
    /// Open `path` (a `.pack`) and its sibling `.idx`.
    ///
    /// Checks the pack header, that the object counts agree, and that the
    /// pack trailer equals the checksum recorded in the index.
    pub fn open(path: &Path, algorithm: HashAlgorithm, cache: Arc<BlockCache>) -> PackResult<Self> {
        let file = File::open(path)?;
        let meta = file.metadata()?;
        let identity = FileIdentity::from_metadata(&meta);
        let size = meta.len();
        let hash_len = algorithm.raw_len() as u64;
        if size < PACK_HEADER_LEN + hash_len {
            return Err(PackError::corrupt(0, "pack file too short"));
        }

        let mut head = [0u8; PACK_HEADER_LEN as usize];
        read_at(&file, 0, &mut head)?;
        let header = PackHeader::parse(&head)?;

        let index = PackIndex::open(&path.with_extension("idx"), algorithm)?;
        if header.object_count as usize != index.object_count() {
            return Err(PackError::corrupt(
                8,
                format!(
                    "pack holds {} objects but its index lists {}",
                    header.object_count,
                    index.object_count()
                ),
            ));
        }

        let trailer_at = size - hash_len;
        let mut trailer = vec![0u8; hash_len as usize];
        read_at(&file, trailer_at, &mut trailer)?;
        let checksum =
            ObjectId::from_raw(&trailer).map_err(|e| PackError::corrupt(trailer_at, e.to_string()))?;
        if checksum != index.pack_checksum() {
            return Err(PackError::corrupt(
                trailer_at,
                "pack trailer does not match its index",
            ));
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let id = PackId::next();
        debug!(pack = %name, objects = index.object_count(), pack_id = id.get(), "opened pack");

        Ok(Self {
            path: path.to_path_buf(),
            name,
            file,
            identity,
            size,
            header,
            index,
            checksum,
            id,
            cache,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name, e.g. `pack-<checksum>.pack`.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pack_id(&self) -> PackId {
        self.id
    }

    pub fn identity(&self) -> &FileIdentity {
        &self.identity
    }

    pub fn index(&self) -> &PackIndex {
        &self.index
    }

    pub fn version(&self) -> u32 {
        self.header.version
    }

    pub fn object_count(&self) -> usize {
        self.index.object_count()
    }

    /// Trailer checksum; also the name of the pack.
    pub fn checksum(&self) -> ObjectId {
        self.checksum
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.index.algorithm()
    }

    pub fn cache(&self) -> &BlockCache {
        &self.cache
    }

    /// Position where the trailer starts; no entry extends past it.
    pub(crate) fn data_end(&self) -> u64 {
        self.size - self.algorithm().raw_len() as u64
    }

    pub fn contains(&self, id: &ObjectId) -> bool {
        self.index.contains(id)
    }

    pub fn find_offset(&self, id: &ObjectId) -> PackResult<Option<u64>> {
        self.index.find_offset(id)
    }

    pub fn resolve_prefix(&self, prefix: &AbbreviatedObjectId, limit: usize, out: &mut Vec<ObjectId>) {
        self.index.resolve_prefix(prefix, limit, out)
    }

    /// `true` when the path no longer names the file this handle opened.
    pub fn is_stale(&self) -> bool {
        match fs::metadata(&self.path) {
            Ok(meta) => FileIdentity::from_metadata(&meta) != self.identity,
            Err(_) => true,
        }
    }

    /// Decode the entry header at `offset`.
    pub fn entry_header(&self, offset: u64) -> PackResult<EntryHeader> {
        if offset < PACK_HEADER_LEN || offset >= self.data_end() {
            return Err(PackError::corrupt(offset, "entry offset outside the pack"));
        }
        let mut buf = [0u8; MAX_ENTRY_HEADER_LEN];
        let mut cursor = PackCursor::new(self, offset);
        let n = cursor
            .read_up_to(&mut buf)
            .map_err(|e| PackError::from_read(offset, e))?;
        parse_entry_header(&buf[..n], offset, self.algorithm())
    }

    /// Inflate the full payload of the entry at `offset`.
    pub fn inflate(&self, offset: u64, header: &EntryHeader) -> PackResult<Vec<u8>> {
        let size = usize::try_from(header.size)
            .map_err(|_| PackError::corrupt(offset, "entry too large for memory"))?;
        let mut decoder = self.decoder(offset, header);
        let mut out = Vec::with_capacity(size.min(MAX_PREALLOC));
        (&mut decoder)
            .take(header.size)
            .read_to_end(&mut out)
            .map_err(|e| PackError::from_read(offset, e))?;
        if out.len() != size {
            return Err(PackError::corrupt(
                offset,
                format!("inflated {} bytes, header says {size}", out.len()),
            ));
        }
        let mut extra = [0u8; 1];
        if decoder
            .read(&mut extra)
            .map_err(|e| PackError::from_read(offset, e))?
            != 0
        {
            return Err(PackError::corrupt(offset, "payload longer than its header says"));
        }
        Ok(out)
    }

    /// Inflate at most `limit` leading bytes of the entry's payload.
    pub(crate) fn inflate_prefix(
        &self,
        offset: u64,
        header: &EntryHeader,
        limit: usize,
    ) -> PackResult<Vec<u8>> {
        let want = header.size.min(limit as u64);
        let mut out = Vec::with_capacity((want as usize).min(MAX_PREALLOC));
        self.decoder(offset, header)
            .take(want)
            .read_to_end(&mut out)
            .map_err(|e| PackError::from_read(offset, e))?;
        Ok(out)
    }

    fn decoder<'a>(&'a self, offset: u64, header: &EntryHeader) -> ZlibDecoder<PackCursor<&'a PackFile>> {
        ZlibDecoder::new(PackCursor::new(self, offset + header.header_len as u64))
    }

    /// Kind and size of the object at `offset` without reconstructing it.
    pub fn object_info(&self, offset: u64, resolver: &DeltaResolver) -> PackResult<ObjectInfo> {
        resolver.object_info(self, offset)
    }

    /// Reconstruct the object at `offset`.
    pub fn load(
        &self,
        offset: u64,
        resolver: &DeltaResolver,
        memo: &mut ResolveMemo,
    ) -> PackResult<PackObject> {
        resolver.resolve(self, offset, memo)
    }

    /// Stream a whole (non-delta) object without materializing it.
    ///
    /// Returns `None` for delta entries, which must be reconstructed with
    /// [`load`](Self::load).
    pub fn open_stream(self: &Arc<Self>, offset: u64) -> PackResult<Option<PackStream>> {
        let header = self.entry_header(offset)?;
        let EntryKind::Whole(kind) = header.kind else {
            return Ok(None);
        };
        let cursor = PackCursor::new(Arc::clone(self), offset + header.header_len as u64);
        Ok(Some(PackStream {
            inner: ZlibDecoder::new(cursor),
            kind,
            size: header.size,
            remaining: header.size,
            offset,
        }))
    }

    /// Check the whole pack: trailer hash, per-entry CRC-32, and that every
    /// object hashes to the identifier the index gives it.
    pub fn verify(&self, resolver: &DeltaResolver) -> PackResult<VerifyReport> {
        let algorithm = self.algorithm();
        let end = self.data_end();

        let mut hasher = algorithm.hasher();
        let mut buf = vec![0u8; 64 * 1024];
        let mut position = 0;
        while position < end {
            let n = (end - position).min(buf.len() as u64) as usize;
            read_at(&self.file, position, &mut buf[..n])?;
            hasher.update(&buf[..n]);
            position += n as u64;
        }
        if hasher.finish() != self.checksum {
            return Err(PackError::corrupt(end, "pack checksum mismatch"));
        }

        let entries = self.index.entries_by_offset()?;
        let mut report = VerifyReport {
            checksum: self.checksum,
            objects: entries.len(),
            whole: 0,
            deltas: 0,
            commits: 0,
            trees: 0,
            blobs: 0,
            tags: 0,
        };
        let mut memo = ResolveMemo::new();
        for (i, entry) in entries.iter().enumerate() {
            let next = entries.get(i + 1).map_or(end, |e| e.offset);
            if next <= entry.offset {
                return Err(PackError::corrupt(entry.offset, "overlapping entries"));
            }
            let mut raw = vec![0u8; (next - entry.offset) as usize];
            read_at(&self.file, entry.offset, &mut raw)?;
            if crc32fast::hash(&raw) != entry.crc32 {
                return Err(PackError::corrupt(entry.offset, "CRC-32 mismatch"));
            }

            if self.entry_header(entry.offset)?.kind.is_delta() {
                report.deltas += 1;
            } else {
                report.whole += 1;
            }
            // Bound the memo; deltas mostly refer to nearby bases.
            if memo.len() > 1024 {
                memo.clear();
            }
            let object = self.load(entry.offset, resolver, &mut memo)?;
            if hash_object(algorithm, object.kind, &object.data) != entry.id {
                return Err(PackError::corrupt(
                    entry.offset,
                    format!("object does not hash to {}", entry.id),
                ));
            }
            match object.kind {
                ObjectKind::Commit => report.commits += 1,
                ObjectKind::Tree => report.trees += 1,
                ObjectKind::Blob => report.blobs += 1,
                ObjectKind::Tag => report.tags += 1,
            }
        }
        Ok(report)
    }
}

impl BlockSource for PackFile {
    fn pack_id(&self) -> PackId {
        self.id
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn read_exact_at(&self, position: u64, buf: &mut [u8]) -> io::Result<()> {
        read_at(&self.file, position, buf)
    }
}

impl Drop for PackFile {
    fn drop(&mut self) {
        self.cache.remove_pack(self.id);
    }
}

impl std::fmt::Debug for PackFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackFile")
            .field("name", &self.name)
            .field("objects", &self.object_count())
            .field("size", &self.size)
            .field("pack_id", &self.id)
            .finish()
    }
}

/// Inflating reader over one whole packed object.
pub struct PackStream {
    inner: ZlibDecoder<PackCursor<Arc<PackFile>>>,
    kind: ObjectKind,
    size: u64,
    remaining: u64,
    offset: u64,
}

impl PackStream {
    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

impl Read for PackStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let want = self.remaining.min(buf.len() as u64) as usize;
        let n = self.inner.read(&mut buf[..want])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("pack entry at {} ended early", self.offset),
            ));
        }
        self.remaining -= n as u64;
        Ok(n)
    }
}

#[cfg(unix)]
fn read_at(file: &File, position: u64, buf: &mut [u8]) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, position)
}

#[cfg(windows)]
fn read_at(file: &File, position: u64, buf: &mut [u8]) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    let mut done = 0;
    while done < buf.len() {
        let n = file.seek_read(&mut buf[done..], position + done as u64)?;
        if n == 0 {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        done += n;
    }
    Ok(())
}
