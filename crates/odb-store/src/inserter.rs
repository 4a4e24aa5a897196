use std::fs;

use bytes::Bytes;
use odb_collections::ObjectIdSet;
use odb_pack::PackWriter;
use odb_types::{hash_object, ObjectId, ObjectKind};
use tracing::{debug, warn};

use crate::database::ObjectDatabase;
use crate::error::StoreResult;

struct Pending {
    id: ObjectId,
    kind: ObjectKind,
    data: Bytes,
}

/// Buffers new objects for an [`ObjectDatabase`].
///
/// Nothing is written until [`flush`](Self::flush). Dropping an inserter
/// with buffered objects discards them.
pub struct ObjectInserter<'db> {
    db: &'db ObjectDatabase,
    pending: Vec<Pending>,
    seen: ObjectIdSet,
}

impl<'db> ObjectInserter<'db> {
    pub(crate) fn new(db: &'db ObjectDatabase) -> Self {
        Self {
            db,
            pending: Vec::new(),
            seen: ObjectIdSet::default(),
        }
    }

    /// The identifier `data` would be stored under.
    pub fn id_for(&self, kind: ObjectKind, data: &[u8]) -> ObjectId {
        hash_object(self.db.algorithm(), kind, data)
    }

    /// Buffer an object and return its identifier.
    pub fn insert(&mut self, kind: ObjectKind, data: impl Into<Bytes>) -> ObjectId {
        let data = data.into();
        let id = self.id_for(kind, &data);
        if self.seen.insert(id) {
            self.pending.push(Pending { id, kind, data });
        }
        id
    }

    /// Objects buffered since the last flush.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Write every buffered object and make it visible to the database.
    ///
    /// Objects the database already holds are skipped. When at least
    /// `inserter_pack_threshold` remain they are written as one pack,
    /// otherwise as loose objects. Returns how many were written.
    ///
    /// On error the buffer is kept, so the flush can be retried.
    pub fn flush(&mut self) -> StoreResult<usize> {
        let fresh: Vec<&Pending> = self
            .pending
            .iter()
            .filter(|p| !self.db.has_local_now(&p.id))
            .collect();
        let count = fresh.len();
        if count > 0 {
            self.write(&fresh)?;
        }
        self.pending.clear();
        self.seen.clear();
        Ok(count)
    }

    fn write(&self, objects: &[&Pending]) -> StoreResult<()> {
        let config = self.db.config();
        if objects.len() >= config.inserter_pack_threshold {
            let mut writer = PackWriter::new(self.db.algorithm(), config.writer.clone());
            for object in objects {
                writer.add_with_id(object.id, object.kind, object.data.clone());
            }
            let pack_dir = self.db.pack_dir();
            fs::create_dir_all(&pack_dir)?;
            let written = writer.finish(&pack_dir)?;
            self.db.rescan_packs()?;
            debug!(objects = objects.len(), pack = %written.pack_path.display(), "flushed inserter to pack");
        } else {
            for object in objects {
                self.db
                    .loose()
                    .write_with_id(&object.id, object.kind, &object.data)?;
            }
            debug!(objects = objects.len(), "flushed inserter to loose objects");
        }
        Ok(())
    }
}

impl Drop for ObjectInserter<'_> {
    fn drop(&mut self) {
        if !self.pending.is_empty() {
            warn!(
                discarded = self.pending.len(),
                "object inserter dropped without flush"
            );
        }
    }
}
