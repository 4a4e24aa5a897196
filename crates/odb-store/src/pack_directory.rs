use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use odb_cache::{BlockCache, FileIdentity};
use odb_collections::{Named, SortedList, SortedListBuilder};
use odb_pack::PackFile;
use odb_types::HashAlgorithm;
use tracing::warn;

use crate::error::StoreResult;

/// A pack in a [`PackList`], keyed by its file name.
#[derive(Clone)]
struct PackEntry {
    name: String,
    pack: Arc<PackFile>,
}

impl Named for PackEntry {
    fn name(&self) -> &str {
        &self.name
    }
}

/// Immutable snapshot of the packs in a database's `objects/pack`
/// directory.
///
/// Lookups search packs most recently modified first. A database replaces
/// its snapshot wholesale; readers holding an older one keep using its
/// handles.
#[derive(Clone)]
pub struct PackList {
    by_name: SortedList<PackEntry>,
    order: Vec<Arc<PackFile>>,
}

impl PackList {
    pub fn empty() -> Self {
        Self {
            by_name: SortedList::empty(),
            order: Vec::new(),
        }
    }

    /// Build a list from open handles. The order given is the search order.
    pub fn from_packs(packs: impl IntoIterator<Item = Arc<PackFile>>) -> Self {
        let order: Vec<Arc<PackFile>> = packs.into_iter().collect();
        let mut builder = SortedListBuilder::with_capacity(order.len());
        for pack in &order {
            builder.add(PackEntry {
                name: pack.name().to_string(),
                pack: Arc::clone(pack),
            });
        }
        // Stable sort: a name listed twice keeps its first handle in
        // search order.
        builder.sort();
        builder.dedupe(|earlier, _| earlier);
        let by_name = builder.build();
        let order = order
            .into_iter()
            .filter(|p| {
                by_name
                    .get_by_name(p.name())
                    .is_some_and(|e| e.pack.pack_id() == p.pack_id())
            })
            .collect();
        Self { by_name, order }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Packs in search order.
    pub fn iter(&self) -> std::slice::Iter<'_, Arc<PackFile>> {
        self.order.iter()
    }

    /// The pack with file name `name` (`pack-<hex>.pack`).
    pub fn get(&self, name: &str) -> Option<&Arc<PackFile>> {
        self.by_name.get_by_name(name).map(|e| &e.pack)
    }

    /// `true` when this snapshot holds exactly the handle `pack`.
    pub fn holds(&self, pack: &PackFile) -> bool {
        self.get(pack.name())
            .is_some_and(|p| p.pack_id() == pack.pack_id())
    }

    /// `true` when both snapshots hold the same handles in the same order.
    pub fn same_packs(&self, other: &PackList) -> bool {
        self.order.len() == other.order.len()
            && self
                .order
                .iter()
                .zip(&other.order)
                .all(|(a, b)| a.pack_id() == b.pack_id())
    }

    /// Scan `dir` for `*.pack` files.
    ///
    /// Handles in `previous` are reused when the file at their path is
    /// still the one they opened; anything new or replaced is opened
    /// afresh. Packs that fail to open are skipped with a warning.
    pub fn scan(
        dir: &Path,
        algorithm: HashAlgorithm,
        cache: &Arc<BlockCache>,
        previous: &PackList,
    ) -> StoreResult<PackList> {
        let listing = match fs::read_dir(dir) {
            Ok(listing) => listing,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(PackList::empty()),
            Err(e) => return Err(e.into()),
        };

        let mut found: Vec<(Option<SystemTime>, Arc<PackFile>)> = Vec::new();
        for entry in listing {
            let entry = entry?;
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') || path.extension().map_or(true, |e| e != "pack") {
                continue;
            }
            let meta = match entry.metadata() {
                Ok(meta) if meta.is_file() => meta,
                Ok(_) => continue,
                // Deleted between listing and stat.
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            let identity = FileIdentity::from_metadata(&meta);

            if let Some(pack) = previous.get(&name) {
                if *pack.identity() == identity {
                    found.push((identity.modified(), Arc::clone(pack)));
                    continue;
                }
            }
            match PackFile::open(&path, algorithm, Arc::clone(cache)) {
                Ok(pack) => found.push((pack.identity().modified(), Arc::new(pack))),
                Err(e) => warn!(pack = %name, error = %e, "skipping unreadable pack"),
            }
        }

        found.sort_by(|(a_time, a), (b_time, b)| {
            b_time.cmp(a_time).then_with(|| a.name().cmp(b.name()))
        });
        Ok(PackList::from_packs(found.into_iter().map(|(_, p)| p)))
    }
}

/// A pack directory whose modification time is this close to the scan
/// that observed it may have changed again within the same timestamp tick.
const RACY_WINDOW: Duration = Duration::from_secs(2);

/// What a pack directory looked like when it was last scanned.
#[derive(Clone, Copy, Debug)]
pub(crate) struct DirectorySnapshot {
    modified: Option<SystemTime>,
    taken: SystemTime,
}

impl DirectorySnapshot {
    /// Record `dir` before listing it.
    pub(crate) fn take(dir: &Path) -> Self {
        Self {
            modified: directory_mtime(dir),
            taken: SystemTime::now(),
        }
    }

    /// `true` when `dir` cannot have gained or lost a pack since the
    /// snapshot: its mtime is unchanged and was already old at scan time.
    pub(crate) fn is_unmodified(&self, dir: &Path) -> bool {
        let Some(modified) = self.modified else {
            return false;
        };
        let settled = self
            .taken
            .duration_since(modified)
            .is_ok_and(|age| age > RACY_WINDOW);
        settled && directory_mtime(dir) == Some(modified)
    }
}

fn directory_mtime(dir: &Path) -> Option<SystemTime> {
    fs::metadata(dir).and_then(|m| m.modified()).ok()
}

impl std::fmt::Debug for PackList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.order.iter().map(|p| p.name()))
            .finish()
    }
}
