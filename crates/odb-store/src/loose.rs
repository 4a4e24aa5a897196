use std::fs::{self, File};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use odb_types::{hash_object, object_header, AbbreviatedObjectId, HashAlgorithm, ObjectId, ObjectKind};

use crate::error::{StoreError, StoreResult};

/// Longest `"<type> <size>\0"` header accepted in a loose object.
const MAX_HEADER_LEN: usize = 32;

/// Loose objects: one zlib file per object at `objects/xx/yyyy…`.
#[derive(Clone, Debug)]
pub struct LooseObjects {
    dir: PathBuf,
    algorithm: HashAlgorithm,
    compression: u32,
}

impl LooseObjects {
    pub fn new(dir: impl Into<PathBuf>, algorithm: HashAlgorithm, compression: u32) -> Self {
        Self {
            dir: dir.into(),
            algorithm,
            compression: compression.min(9),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.dir
    }

    /// `objects/xx/yyyy…` for `id`.
    pub fn path_for(&self, id: &ObjectId) -> PathBuf {
        let hex = id.to_hex();
        self.dir.join(&hex[..2]).join(&hex[2..])
    }

    pub fn has(&self, id: &ObjectId) -> bool {
        self.path_for(id).is_file()
    }

    /// Kind and size of a loose object, inflating only its header.
    pub fn read_header(&self, id: &ObjectId) -> StoreResult<Option<(ObjectKind, u64)>> {
        let Some(mut reader) = self.open_decoder(id)? else {
            return Ok(None);
        };
        read_header(id, &mut reader).map(Some)
    }

    /// Inflate and verify a loose object.
    pub fn read(&self, id: &ObjectId) -> StoreResult<Option<(ObjectKind, Vec<u8>)>> {
        let Some(mut reader) = self.open_decoder(id)? else {
            return Ok(None);
        };
        let (kind, size) = read_header(id, &mut reader)?;
        let mut data = Vec::with_capacity(size.min(64 * 1024 * 1024) as usize);
        reader
            .read_to_end(&mut data)
            .map_err(|e| decode_error(id, e))?;
        if data.len() as u64 != size {
            return Err(StoreError::corrupt(
                *id,
                format!("header says {size} bytes, found {}", data.len()),
            ));
        }
        if hash_object(self.algorithm, kind, &data) != *id {
            return Err(StoreError::corrupt(*id, "content does not hash to its name"));
        }
        Ok(Some((kind, data)))
    }

    /// Stream a loose object's content without holding it in memory.
    pub fn open_stream(&self, id: &ObjectId) -> StoreResult<Option<LooseStream>> {
        let Some(mut reader) = self.open_decoder(id)? else {
            return Ok(None);
        };
        let (kind, size) = read_header(id, &mut reader)?;
        Ok(Some(LooseStream {
            inner: reader,
            id: *id,
            kind,
            size,
            remaining: size,
        }))
    }

    /// Hash and store an object, returning its identifier.
    pub fn write(&self, kind: ObjectKind, data: &[u8]) -> StoreResult<ObjectId> {
        let id = hash_object(self.algorithm, kind, data);
        self.write_with_id(&id, kind, data)?;
        Ok(id)
    }

    /// Store an object under an identifier the caller already computed.
    ///
    /// Returns `false` without touching the disk when the object already
    /// exists. The file is written under a temporary name in the objects
    /// directory and renamed into place, so readers never see a partial
    /// object.
    pub fn write_with_id(&self, id: &ObjectId, kind: ObjectKind, data: &[u8]) -> StoreResult<bool> {
        let path = self.path_for(id);
        if path.is_file() {
            return Ok(false);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp = tempfile::Builder::new()
            .prefix(".tmp-obj-")
            .tempfile_in(&self.dir)?;
        let mut encoder = ZlibEncoder::new(tmp, Compression::new(self.compression));
        encoder.write_all(&object_header(kind, data.len() as u64))?;
        encoder.write_all(data)?;
        let tmp = encoder.finish()?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| e.error)?;
        Ok(true)
    }

    /// Delete a loose object. Returns `false` if there was none.
    pub fn remove(&self, id: &ObjectId) -> StoreResult<bool> {
        match fs::remove_file(self.path_for(id)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Every loose object, in no particular order. Files whose names are
    /// not identifiers are ignored.
    pub fn list(&self) -> StoreResult<Vec<ObjectId>> {
        let mut out = Vec::new();
        self.scan(|_| true, |id| {
            out.push(id);
            true
        })?;
        Ok(out)
    }

    /// Append loose objects matching `prefix` to `out`, stopping once `out`
    /// holds `limit` entries.
    pub fn resolve_prefix(
        &self,
        prefix: &AbbreviatedObjectId,
        limit: usize,
        out: &mut Vec<ObjectId>,
    ) -> StoreResult<()> {
        let name = prefix.name();
        let fan_out = &name[..name.len().min(2)];
        self.scan(
            |dir| dir.starts_with(fan_out),
            |id| {
                if id.starts_with(prefix) && !out.contains(&id) {
                    out.push(id);
                }
                out.len() < limit
            },
        )
    }

    /// Visit loose objects in fan-out directories accepted by `want_dir`
    /// until `visit` returns `false`.
    fn scan(
        &self,
        want_dir: impl Fn(&str) -> bool,
        mut visit: impl FnMut(ObjectId) -> bool,
    ) -> StoreResult<()> {
        let top = match fs::read_dir(&self.dir) {
            Ok(top) => top,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let rest_len = self.algorithm.hex_len() - 2;
        for entry in top {
            let entry = entry?;
            let dir_name = entry.file_name();
            let Some(dir_name) = dir_name.to_str() else {
                continue;
            };
            if dir_name.len() != 2 || !want_dir(dir_name) || !entry.file_type()?.is_dir() {
                continue;
            }
            for file in fs::read_dir(entry.path())? {
                let file = file?;
                let file_name = file.file_name();
                let Some(file_name) = file_name.to_str() else {
                    continue;
                };
                if file_name.len() != rest_len {
                    continue;
                }
                let Ok(id) = ObjectId::from_hex(&format!("{dir_name}{file_name}")) else {
                    continue;
                };
                if !visit(id) {
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    fn open_decoder(&self, id: &ObjectId) -> StoreResult<Option<ZlibDecoder<BufReader<File>>>> {
        match File::open(self.path_for(id)) {
            Ok(file) => Ok(Some(ZlibDecoder::new(BufReader::new(file)))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Inflating reader over one loose object's content.
pub struct LooseStream {
    inner: ZlibDecoder<BufReader<File>>,
    id: ObjectId,
    kind: ObjectKind,
    size: u64,
    remaining: u64,
}

impl LooseStream {
    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

impl Read for LooseStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let want = self.remaining.min(buf.len() as u64) as usize;
        let n = self.inner.read(&mut buf[..want])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("loose object {} ended early", self.id),
            ));
        }
        self.remaining -= n as u64;
        Ok(n)
    }
}

/// Read `"<type> <size>\0"` from the front of an inflated loose object,
/// leaving `reader` at the first content byte.
fn read_header(id: &ObjectId, reader: &mut impl Read) -> StoreResult<(ObjectKind, u64)> {
    let mut head = Vec::with_capacity(MAX_HEADER_LEN);
    let mut byte = [0u8; 1];
    loop {
        let n = reader.read(&mut byte).map_err(|e| decode_error(id, e))?;
        if n == 0 {
            return Err(StoreError::corrupt(*id, "truncated object header"));
        }
        if byte[0] == 0 {
            break;
        }
        if head.len() == MAX_HEADER_LEN {
            return Err(StoreError::corrupt(*id, "object header too long"));
        }
        head.push(byte[0]);
    }
    parse_header(id, &head)
}

fn parse_header(id: &ObjectId, head: &[u8]) -> StoreResult<(ObjectKind, u64)> {
    let space = head
        .iter()
        .position(|&b| b == b' ')
        .ok_or_else(|| StoreError::corrupt(*id, "object header has no size"))?;
    let kind = ObjectKind::from_name(&head[..space]).ok_or_else(|| {
        StoreError::corrupt(
            *id,
            format!("unknown object type {:?}", String::from_utf8_lossy(&head[..space])),
        )
    })?;
    let size = &head[space + 1..];
    if size.is_empty() || !size.iter().all(u8::is_ascii_digit) || (size.len() > 1 && size[0] == b'0') {
        return Err(StoreError::corrupt(*id, "malformed object size"));
    }
    let size = std::str::from_utf8(size)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(|| StoreError::corrupt(*id, "object size out of range"))?;
    Ok((kind, size))
}

fn decode_error(id: &ObjectId, err: io::Error) -> StoreError {
    match err.kind() {
        io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => {
            StoreError::corrupt(*id, err.to_string())
        }
        _ => StoreError::Io(err),
    }
}
