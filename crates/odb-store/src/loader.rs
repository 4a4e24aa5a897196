use std::io::{Cursor, Read};
use std::sync::Arc;

use bytes::Bytes;
use odb_pack::{DeltaResolver, PackFile, ResolveMemo};
use odb_types::{ObjectId, ObjectKind};
use serde::Serialize;

use crate::error::{StoreError, StoreResult};
use crate::loose::LooseObjects;

/// Where an [`ObjectLoader`] found its object.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ObjectSource {
    Loose,
    Pack { name: String, offset: u64 },
}

enum Content {
    Cached(Bytes),
    Loose(LooseObjects),
    Packed {
        pack: Arc<PackFile>,
        offset: u64,
        resolver: DeltaResolver,
    },
}

/// An object located by [`ObjectDatabase::open`](crate::ObjectDatabase::open).
///
/// Objects at or below the streaming threshold are read eagerly, so the
/// loader owns their bytes. Larger ones are read on demand; a packed one
/// keeps its pack handle, and with it the open file, alive.
pub struct ObjectLoader {
    id: ObjectId,
    kind: ObjectKind,
    size: u64,
    limit: u64,
    source: ObjectSource,
    content: Content,
}

impl ObjectLoader {
    pub(crate) fn cached(id: ObjectId, kind: ObjectKind, data: Bytes, limit: u64, source: ObjectSource) -> Self {
        Self {
            id,
            kind,
            size: data.len() as u64,
            limit,
            source,
            content: Content::Cached(data),
        }
    }

    pub(crate) fn large_loose(
        id: ObjectId,
        kind: ObjectKind,
        size: u64,
        limit: u64,
        loose: LooseObjects,
    ) -> Self {
        Self {
            id,
            kind,
            size,
            limit,
            source: ObjectSource::Loose,
            content: Content::Loose(loose),
        }
    }

    pub(crate) fn large_packed(
        id: ObjectId,
        kind: ObjectKind,
        size: u64,
        limit: u64,
        pack: Arc<PackFile>,
        offset: u64,
        resolver: DeltaResolver,
    ) -> Self {
        Self {
            id,
            kind,
            size,
            limit,
            source: ObjectSource::Pack {
                name: pack.name().to_string(),
                offset,
            },
            content: Content::Packed {
                pack,
                offset,
                resolver,
            },
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    /// Inflated size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// `true` when the object exceeds the streaming threshold.
    pub fn is_large(&self) -> bool {
        self.size > self.limit
    }

    pub fn source(&self) -> &ObjectSource {
        &self.source
    }

    /// The object's bytes, refusing objects above the streaming threshold.
    pub fn cached_bytes(&self) -> StoreResult<Bytes> {
        if self.is_large() {
            return Err(StoreError::ObjectTooLarge {
                id: self.id,
                size: self.size,
                limit: self.limit,
            });
        }
        self.bytes()
    }

    /// The object's bytes, however large.
    pub fn bytes(&self) -> StoreResult<Bytes> {
        match &self.content {
            Content::Cached(data) => Ok(data.clone()),
            Content::Loose(loose) => match loose.read(&self.id)? {
                Some((_, data)) => Ok(Bytes::from(data)),
                None => Err(StoreError::MissingObject(self.id)),
            },
            Content::Packed {
                pack,
                offset,
                resolver,
            } => {
                let object = pack.load(*offset, resolver, &mut ResolveMemo::new())?;
                Ok(object.data)
            }
        }
    }

    /// A reader over the object's content.
    ///
    /// Whole objects stream from their file without being held in memory;
    /// a delta-encoded object is reconstructed first.
    pub fn open_stream(&self) -> StoreResult<Box<dyn Read + Send>> {
        match &self.content {
            Content::Cached(data) => Ok(Box::new(Cursor::new(data.clone()))),
            Content::Loose(loose) => match loose.open_stream(&self.id)? {
                Some(stream) => Ok(Box::new(stream)),
                None => Err(StoreError::MissingObject(self.id)),
            },
            Content::Packed { pack, offset, .. } => match pack.open_stream(*offset)? {
                Some(stream) => Ok(Box::new(stream)),
                None => Ok(Box::new(Cursor::new(self.bytes()?))),
            },
        }
    }
}

impl std::fmt::Debug for ObjectLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectLoader")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("size", &self.size)
            .field("source", &self.source)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use odb_types::{hash_object, HashAlgorithm};

    #[test]
    fn cached_loader_serves_bytes_and_stream() {
        let id = hash_object(HashAlgorithm::Sha1, ObjectKind::Blob, b"abc");
        let loader = ObjectLoader::cached(id, ObjectKind::Blob, Bytes::from_static(b"abc"), 10, ObjectSource::Loose);
        assert_eq!(loader.size(), 3);
        assert!(!loader.is_large());
        assert_eq!(&loader.cached_bytes().unwrap()[..], b"abc");
        let mut out = Vec::new();
        loader.open_stream().unwrap().read_to_end(&mut out).unwrap();
        assert_eq!(out, b"abc");
    }

    #[test]
    fn large_loose_object_refuses_cached_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let loose = LooseObjects::new(dir.path(), HashAlgorithm::Sha1, 1);
        let data = vec![b'z'; 4096];
        let id = loose.write(ObjectKind::Blob, &data).unwrap();
        let loader = ObjectLoader::large_loose(id, ObjectKind::Blob, 4096, 1024, loose);
        assert!(loader.is_large());
        assert!(matches!(
            loader.cached_bytes(),
            Err(StoreError::ObjectTooLarge { size: 4096, limit: 1024, .. })
        ));
        assert_eq!(loader.bytes().unwrap().len(), 4096);
        let mut out = Vec::new();
        loader.open_stream().unwrap().read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn source_serializes_tagged() {
        let source = ObjectSource::Pack {
            name: "pack-1.pack".into(),
            offset: 12,
        };
        let json = serde_json::to_value(&source).unwrap();
        assert_eq!(json["type"], "pack");
        assert_eq!(json["offset"], 12);
        assert_eq!(serde_json::to_value(ObjectSource::Loose).unwrap()["type"], "loose");
    }
}
