use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use odb_cache::BlockCache;
use odb_pack::{DeltaResolver, PackFile, PackWriter, ResolveMemo};
use odb_types::{AbbreviatedObjectId, HashAlgorithm, ObjectId, ObjectKind};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::alternates::{append_alternate, database_identity, read_alternates};
use crate::config::DatabaseConfig;
use crate::error::{StoreError, StoreResult};
use crate::inserter::ObjectInserter;
use crate::loader::{ObjectLoader, ObjectSource};
use crate::loose::LooseObjects;
use crate::pack_directory::{DirectorySnapshot, PackList};

/// Most identifiers [`ObjectDatabase::resolve`] reports for one prefix.
pub const RESOLVE_LIMIT: usize = 256;

/// Databases already searched during one lookup, by canonical objects
/// directory.
type Visited = HashSet<PathBuf>;

/// Outcome of [`ObjectDatabase::repack`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RepackReport {
    /// Objects in the new pack.
    pub objects: usize,
    /// How many of them are stored as deltas.
    pub deltas: usize,
    /// File name of the new pack; `None` when there was nothing to pack.
    pub pack: Option<String>,
    pub packs_removed: usize,
    pub loose_pruned: usize,
}

/// One repository's objects: a loose directory, the packs under
/// `objects/pack`, and any alternate databases.
///
/// Reads take no global lock. The pack list is an immutable snapshot that
/// rescans and repacks replace; loaders keep the pack handles they were
/// created from.
pub struct ObjectDatabase {
    objects_dir: PathBuf,
    identity: PathBuf,
    config: DatabaseConfig,
    loose: LooseObjects,
    cache: Arc<BlockCache>,
    resolver: DeltaResolver,
    packs: RwLock<Arc<PackList>>,
    /// Held while scanning and swapping the pack list.
    scan_lock: Mutex<()>,
    /// Held for a whole repack.
    repack_lock: Mutex<()>,
    /// The pack directory as of the last scan.
    scanned: Mutex<Option<DirectorySnapshot>>,
    alternates: Mutex<Option<Arc<Vec<Arc<ObjectDatabase>>>>>,
}

impl ObjectDatabase {
    /// Open the objects directory at `objects_dir` with its own block cache.
    pub fn load(objects_dir: impl Into<PathBuf>, config: DatabaseConfig) -> StoreResult<Self> {
        let config = config.validate()?;
        let cache = Arc::new(BlockCache::new(config.cache.clone())?);
        Self::load_with_cache(objects_dir, config, cache)
    }

    /// Open `objects_dir`, reading packs through an existing cache.
    pub fn load_with_cache(
        objects_dir: impl Into<PathBuf>,
        config: DatabaseConfig,
        cache: Arc<BlockCache>,
    ) -> StoreResult<Self> {
        let objects_dir = objects_dir.into();
        let config = config.validate()?;
        let db = Self {
            identity: database_identity(&objects_dir),
            loose: LooseObjects::new(&objects_dir, config.hash, config.compression_level),
            resolver: DeltaResolver::new(config.max_delta_depth),
            objects_dir,
            config,
            cache,
            packs: RwLock::new(Arc::new(PackList::empty())),
            scan_lock: Mutex::new(()),
            repack_lock: Mutex::new(()),
            scanned: Mutex::new(None),
            alternates: Mutex::new(None),
        };
        db.rescan_packs()?;
        Ok(db)
    }

    /// Create `objects_dir` with its `pack` and `info` subdirectories, then
    /// open it.
    pub fn init(objects_dir: impl Into<PathBuf>, config: DatabaseConfig) -> StoreResult<Self> {
        let objects_dir = objects_dir.into();
        fs::create_dir_all(objects_dir.join("pack"))?;
        fs::create_dir_all(objects_dir.join("info"))?;
        Self::load(objects_dir, config)
    }

    pub fn objects_dir(&self) -> &Path {
        &self.objects_dir
    }

    pub fn pack_dir(&self) -> PathBuf {
        self.objects_dir.join("pack")
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.config.hash
    }

    pub fn cache(&self) -> &Arc<BlockCache> {
        &self.cache
    }

    pub fn resolver(&self) -> &DeltaResolver {
        &self.resolver
    }

    pub fn loose(&self) -> &LooseObjects {
        &self.loose
    }

    /// The current pack snapshot.
    pub fn list_packs(&self) -> Arc<PackList> {
        self.packs.read().clone()
    }

    /// Start buffering new objects.
    pub fn new_inserter(&self) -> ObjectInserter<'_> {
        ObjectInserter::new(self)
    }

    /// Whether `id` is stored here or in any alternate.
    pub fn has(&self, id: &ObjectId) -> StoreResult<bool> {
        self.has_visiting(id, &mut Visited::new())
    }

    /// Locate `id`, checking its kind when `expected` is given.
    pub fn open(&self, id: &ObjectId, expected: Option<ObjectKind>) -> StoreResult<ObjectLoader> {
        let loader = self
            .open_visiting(id, &mut Visited::new())?
            .ok_or(StoreError::MissingObject(*id))?;
        match expected {
            Some(expected) if expected != loader.kind() => Err(StoreError::IncorrectObjectType {
                id: *id,
                expected,
                actual: loader.kind(),
            }),
            _ => Ok(loader),
        }
    }

    /// Every identifier starting with `prefix`, sorted, across loose
    /// objects, packs and alternates. At most [`RESOLVE_LIMIT`] are
    /// returned.
    pub fn resolve(&self, prefix: &AbbreviatedObjectId) -> StoreResult<Vec<ObjectId>> {
        let mut out = Vec::new();
        self.resolve_visiting(prefix, &mut out, &mut Visited::new())?;
        out.sort();
        out.dedup();
        out.truncate(RESOLVE_LIMIT);
        Ok(out)
    }

    /// Re-read the pack directory and swap in a new snapshot if its
    /// contents changed. Returns `true` on a swap.
    ///
    /// Handles dropped from the snapshot are retired in the cache; readers
    /// still holding them keep working, uncached.
    pub fn rescan_packs(&self) -> StoreResult<bool> {
        let _scan = self.scan_lock.lock();
        let pack_dir = self.pack_dir();
        let snapshot = DirectorySnapshot::take(&pack_dir);
        let current = self.list_packs();
        let scanned = PackList::scan(&pack_dir, self.algorithm(), &self.cache, &current)?;
        *self.scanned.lock() = Some(snapshot);
        if scanned.same_packs(&current) {
            return Ok(false);
        }
        let retired: Vec<Arc<PackFile>> = current
            .iter()
            .filter(|p| !scanned.holds(p))
            .cloned()
            .collect();
        debug!(
            dir = %self.objects_dir.display(),
            packs = scanned.len(),
            retired = retired.len(),
            "swapped pack list"
        );
        *self.packs.write() = Arc::new(scanned);
        for pack in retired {
            self.cache.invalidate(pack.pack_id());
        }
        Ok(true)
    }

    /// Rewrite every object of this database (loose and packed, not
    /// alternates) into one new pack.
    ///
    /// The new pack replaces the old ones in the snapshot before they are
    /// deleted, and loose objects that were packed are pruned. Loaders
    /// opened earlier stay valid: they hold their pack handles, whose files
    /// remain open after deletion.
    pub fn repack(&self) -> StoreResult<RepackReport> {
        let _repack = self.repack_lock.lock();
        self.rescan_packs()?;
        let snapshot = self.list_packs();

        let mut writer = PackWriter::new(self.algorithm(), self.config.writer.clone());
        let loose_ids = self.loose.list()?;
        for id in &loose_ids {
            if let Some((kind, data)) = self.loose.read(id)? {
                writer.add_with_id(*id, kind, data);
            }
        }
        for pack in snapshot.iter() {
            let mut memo = ResolveMemo::new();
            for entry in pack.index().entries_by_offset()? {
                if writer.contains(&entry.id) {
                    continue;
                }
                let object = pack.load(entry.offset, &self.resolver, &mut memo)?;
                writer.add_with_id(entry.id, object.kind, object.data);
                if memo.len() > 1024 {
                    memo.clear();
                }
            }
        }

        if writer.is_empty() {
            return Ok(RepackReport::default());
        }

        let pack_dir = self.pack_dir();
        fs::create_dir_all(&pack_dir)?;
        let written = writer.finish(&pack_dir)?;
        let fresh_name = written
            .pack_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let retired: Vec<Arc<PackFile>> = snapshot
            .iter()
            .filter(|p| p.name() != fresh_name)
            .cloned()
            .collect();
        {
            let _scan = self.scan_lock.lock();
            let current = self.list_packs();
            let fresh = match current.get(&fresh_name) {
                Some(pack) => Arc::clone(pack),
                None => Arc::new(PackFile::open(
                    &written.pack_path,
                    self.algorithm(),
                    Arc::clone(&self.cache),
                )?),
            };
            // Packs that appeared since the snapshot (concurrent inserts)
            // stay, behind the new pack.
            let kept = current
                .iter()
                .filter(|p| p.name() != fresh_name && !retired.iter().any(|r| r.pack_id() == p.pack_id()))
                .cloned();
            let next = PackList::from_packs(std::iter::once(fresh).chain(kept));
            *self.packs.write() = Arc::new(next);

            for pack in &retired {
                self.cache.invalidate(pack.pack_id());
                remove_pack_files(pack.path());
            }
        }

        let mut loose_pruned = 0;
        for id in &loose_ids {
            if self.loose.remove(id)? {
                loose_pruned += 1;
            }
        }

        let report = RepackReport {
            objects: written.object_count,
            deltas: written.deltas,
            pack: Some(fresh_name),
            packs_removed: retired.len(),
            loose_pruned,
        };
        info!(
            objects = report.objects,
            deltas = report.deltas,
            packs_removed = report.packs_removed,
            loose_pruned = report.loose_pruned,
            "repacked"
        );
        Ok(report)
    }

    /// Databases named in `objects/info/alternates`, opened on first use.
    ///
    /// Alternates share this database's block cache. Entries that cannot
    /// be opened are skipped with a warning.
    pub fn alternates(&self) -> StoreResult<Arc<Vec<Arc<ObjectDatabase>>>> {
        let mut slot = self.alternates.lock();
        if let Some(loaded) = slot.as_ref() {
            return Ok(Arc::clone(loaded));
        }
        let mut opened = Vec::new();
        for path in read_alternates(&self.objects_dir)? {
            if !path.is_dir() {
                warn!(alternate = %path.display(), "skipping missing alternate");
                continue;
            }
            match Self::load_with_cache(&path, self.config.clone(), Arc::clone(&self.cache)) {
                Ok(db) => opened.push(Arc::new(db)),
                Err(e) => warn!(alternate = %path.display(), error = %e, "skipping unreadable alternate"),
            }
        }
        let opened = Arc::new(opened);
        *slot = Some(Arc::clone(&opened));
        Ok(opened)
    }

    /// Record `objects_dir` as an alternate of this database.
    pub fn add_alternate(&self, objects_dir: &Path) -> StoreResult<()> {
        append_alternate(&self.objects_dir, objects_dir)?;
        *self.alternates.lock() = None;
        Ok(())
    }

    /// Whether `id` is stored in this database itself, ignoring
    /// alternates and without rescanning.
    pub(crate) fn has_local_now(&self, id: &ObjectId) -> bool {
        self.loose.has(id) || self.list_packs().iter().any(|p| p.contains(id))
    }

    /// Rescan after a lookup missed, unless the pack directory is known
    /// not to have changed since the last scan.
    fn rescan_after_miss(&self) -> StoreResult<bool> {
        let unchanged = self
            .scanned
            .lock()
            .is_some_and(|snapshot| snapshot.is_unmodified(&self.pack_dir()));
        if unchanged {
            return Ok(false);
        }
        self.rescan_packs()
    }

    fn has_visiting(&self, id: &ObjectId, visited: &mut Visited) -> StoreResult<bool> {
        if !visited.insert(self.identity.clone()) {
            return Ok(false);
        }
        if self.has_local_now(id) {
            return Ok(true);
        }
        if self.rescan_after_miss()? && self.list_packs().iter().any(|p| p.contains(id)) {
            return Ok(true);
        }
        for alternate in self.alternates()?.iter() {
            if alternate.has_visiting(id, visited)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn open_visiting(&self, id: &ObjectId, visited: &mut Visited) -> StoreResult<Option<ObjectLoader>> {
        if !visited.insert(self.identity.clone()) {
            return Ok(None);
        }
        if let Some(loader) = self.open_loose(id)? {
            return Ok(Some(loader));
        }
        if let Some(loader) = self.open_packed(&self.list_packs(), id)? {
            return Ok(Some(loader));
        }
        if self.rescan_after_miss()? {
            if let Some(loader) = self.open_packed(&self.list_packs(), id)? {
                return Ok(Some(loader));
            }
        }
        for alternate in self.alternates()?.iter() {
            if let Some(loader) = alternate.open_visiting(id, visited)? {
                return Ok(Some(loader));
            }
        }
        Ok(None)
    }

    fn open_loose(&self, id: &ObjectId) -> StoreResult<Option<ObjectLoader>> {
        let limit = self.config.streaming_threshold;
        let Some((kind, size)) = self.loose.read_header(id)? else {
            return Ok(None);
        };
        if size > limit {
            return Ok(Some(ObjectLoader::large_loose(
                *id,
                kind,
                size,
                limit,
                self.loose.clone(),
            )));
        }
        // Pruned by a concurrent repack since the header read: fall
        // through to the packs.
        Ok(self.loose.read(id)?.map(|(kind, data)| {
            ObjectLoader::cached(*id, kind, Bytes::from(data), limit, ObjectSource::Loose)
        }))
    }

    fn open_packed(&self, packs: &PackList, id: &ObjectId) -> StoreResult<Option<ObjectLoader>> {
        let limit = self.config.streaming_threshold;
        for pack in packs.iter() {
            let Some(offset) = pack.find_offset(id)? else {
                continue;
            };
            let info = pack.object_info(offset, &self.resolver)?;
            if info.size > limit {
                return Ok(Some(ObjectLoader::large_packed(
                    *id,
                    info.kind,
                    info.size,
                    limit,
                    Arc::clone(pack),
                    offset,
                    self.resolver,
                )));
            }
            let object = pack.load(offset, &self.resolver, &mut ResolveMemo::new())?;
            let source = ObjectSource::Pack {
                name: pack.name().to_string(),
                offset,
            };
            return Ok(Some(ObjectLoader::cached(*id, object.kind, object.data, limit, source)));
        }
        Ok(None)
    }

    fn resolve_visiting(
        &self,
        prefix: &AbbreviatedObjectId,
        out: &mut Vec<ObjectId>,
        visited: &mut Visited,
    ) -> StoreResult<()> {
        if !visited.insert(self.identity.clone()) {
            return Ok(());
        }
        self.loose.resolve_prefix(prefix, RESOLVE_LIMIT, out)?;
        for pack in self.list_packs().iter() {
            pack.resolve_prefix(prefix, RESOLVE_LIMIT, out);
        }
        for alternate in self.alternates()?.iter() {
            alternate.resolve_visiting(prefix, out, visited)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for ObjectDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectDatabase")
            .field("objects_dir", &self.objects_dir)
            .field("packs", &self.list_packs())
            .finish()
    }
}

/// Delete a retired pack and its index. Failures are logged; the pack has
/// already left the snapshot.
fn remove_pack_files(pack_path: &Path) {
    for path in [pack_path.to_path_buf(), pack_path.with_extension("idx")] {
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "could not delete retired pack file"),
        }
    }
}
