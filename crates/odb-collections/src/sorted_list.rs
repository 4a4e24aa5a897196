use std::fmt;
use std::sync::Arc;

/// Anything that can live in a [`SortedList`].
pub trait Named {
    /// The key the list is sorted and searched by.
    fn name(&self) -> &str;
}

/// An immutable list sorted by [`Named::name`].
///
/// Every structural change returns a new list and leaves the receiver
/// untouched, so a list can be shared between threads and replaced
/// wholesale. Clones share storage.
pub struct SortedList<T> {
    entries: Arc<Vec<T>>,
}

impl<T> Clone for SortedList<T> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<T: Named> SortedList<T> {
    /// An empty list.
    pub fn empty() -> Self {
        Self {
            entries: Arc::new(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry at `index`, if any.
    pub fn get(&self, index: usize) -> Option<&T> {
        self.entries.get(index)
    }

    /// Binary search for `name`.
    ///
    /// `Ok(index)` when present; `Err(index)` with the position where an
    /// entry with that name would be inserted.
    pub fn find(&self, name: &str) -> Result<usize, usize> {
        self.entries.binary_search_by(|e| e.name().cmp(name))
    }

    /// Entry with the given name, if any.
    pub fn get_by_name(&self, name: &str) -> Option<&T> {
        self.find(name).ok().map(|i| &self.entries[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.find(name).is_ok()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.entries.iter()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.entries
    }
}

impl<T: Named + Clone> SortedList<T> {
    /// Copy of this list with the entry at `index` replaced.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    pub fn set(&self, index: usize, value: T) -> Self {
        let mut entries = self.entries.as_ref().clone();
        entries[index] = value;
        Self::from_vec(entries)
    }

    /// Copy of this list with `value` inserted at `index`.
    ///
    /// The caller picks `index`, typically from the `Err` of [`find`].
    ///
    /// [`find`]: SortedList::find
    pub fn add(&self, index: usize, value: T) -> Self {
        let mut entries = Vec::with_capacity(self.entries.len() + 1);
        entries.extend_from_slice(&self.entries[..index]);
        entries.push(value);
        entries.extend_from_slice(&self.entries[index..]);
        Self::from_vec(entries)
    }

    /// Copy of this list with `value` inserted, replacing any entry of the
    /// same name.
    pub fn put(&self, value: T) -> Self {
        match self.find(value.name()) {
            Ok(i) => self.set(i, value),
            Err(i) => self.add(i, value),
        }
    }

    /// Copy of this list without the entry at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    pub fn remove(&self, index: usize) -> Self {
        let mut entries = self.entries.as_ref().clone();
        entries.remove(index);
        Self::from_vec(entries)
    }

    /// Copy of this list without the entry named `name`; a clone of
    /// this list when there is none.
    pub fn remove_name(&self, name: &str) -> Self {
        match self.find(name) {
            Ok(i) => self.remove(i),
            Err(_) => self.clone(),
        }
    }

    fn from_vec(entries: Vec<T>) -> Self {
        Self {
            entries: Arc::new(entries),
        }
    }
}

impl<T: Named> Default for SortedList<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T: Named + fmt::Debug> fmt::Debug for SortedList<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.entries.iter()).finish()
    }
}

impl<'a, T: Named> IntoIterator for &'a SortedList<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Accumulates entries for a [`SortedList`].
pub struct SortedListBuilder<T> {
    entries: Vec<T>,
}

impl<T: Named> SortedListBuilder<T> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append an entry; order is fixed up by [`sort`](Self::sort) or
    /// [`build`](Self::build).
    pub fn add(&mut self, value: T) {
        self.entries.push(value);
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.entries.get(index)
    }

    /// Replace the entry at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    pub fn set(&mut self, index: usize, value: T) {
        self.entries[index] = value;
    }

    /// Remove and return the entry at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    pub fn remove(&mut self, index: usize) -> T {
        self.entries.remove(index)
    }

    /// Stable sort by name.
    pub fn sort(&mut self) {
        self.entries.sort_by(|a, b| a.name().cmp(b.name()));
    }

    /// Collapse runs of adjacent entries sharing a name into the single
    /// entry `winner(earlier, later)` returns. Call after [`sort`](Self::sort).
    pub fn dedupe<F>(&mut self, mut winner: F)
    where
        F: FnMut(T, T) -> T,
    {
        let mut out: Vec<T> = Vec::with_capacity(self.entries.len());
        for entry in self.entries.drain(..) {
            match out.pop() {
                Some(last) if last.name() == entry.name() => out.push(winner(last, entry)),
                Some(last) => {
                    out.push(last);
                    out.push(entry);
                }
                None => out.push(entry),
            }
        }
        self.entries = out;
    }

    /// Finish, sorting the entries if they are not already in order.
    pub fn build(mut self) -> SortedList<T> {
        if !self.is_sorted() {
            self.sort();
        }
        SortedList {
            entries: Arc::new(self.entries),
        }
    }

    fn is_sorted(&self) -> bool {
        self.entries.windows(2).all(|w| w[0].name() <= w[1].name())
    }
}

impl<T: Named + Clone> SortedListBuilder<T> {
    /// Append clones of every entry in `values`.
    pub fn add_all(&mut self, values: &[T]) {
        self.entries.extend_from_slice(values);
    }

    /// Snapshot the current contents without consuming the builder.
    pub fn to_list(&self) -> SortedList<T> {
        let builder = Self {
            entries: self.entries.clone(),
        };
        builder.build()
    }
}

impl<T: Named> Default for SortedListBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    struct Entry {
        name: &'static str,
        value: u32,
    }

    impl Named for Entry {
        fn name(&self) -> &str {
            self.name
        }
    }

    fn e(name: &'static str, value: u32) -> Entry {
        Entry { name, value }
    }

    fn list(entries: &[Entry]) -> SortedList<Entry> {
        let mut b = SortedListBuilder::new();
        b.add_all(entries);
        b.build()
    }

    #[test]
    fn empty_list() {
        let l: SortedList<Entry> = SortedList::empty();
        assert!(l.is_empty());
        assert_eq!(l.find("a"), Err(0));
        assert!(!l.contains("a"));
        assert!(l.get_by_name("a").is_none());
        assert!(l.get(0).is_none());
    }

    #[test]
    fn builder_sorts_on_build() {
        let mut b = SortedListBuilder::with_capacity(1);
        b.add(e("b", 1));
        b.add(e("a", 2));
        let l = b.build();
        assert_eq!(l.get(0).unwrap().name, "a");
        assert_eq!(l.get(1).unwrap().name, "b");
    }

    #[test]
    fn builder_dedupe_keeps_chosen_winner() {
        let mut b = SortedListBuilder::new();
        b.add(e("b", 1));
        b.add(e("a", 1));
        b.add(e("a", 2));
        b.add(e("b", 2));
        b.add(e("c", 1));
        b.sort();
        b.dedupe(|_, later| later);
        let l = b.build();
        assert_eq!(l.len(), 3);
        assert_eq!(l.get_by_name("a").unwrap().value, 2);
        assert_eq!(l.get_by_name("b").unwrap().value, 2);
        assert_eq!(l.get_by_name("c").unwrap().value, 1);
    }

    #[test]
    fn builder_dedupe_border_cases() {
        let mut b: SortedListBuilder<Entry> = SortedListBuilder::new();
        b.dedupe(|a, _| a);
        assert!(b.build().is_empty());

        let mut b = SortedListBuilder::new();
        b.add(e("a", 1));
        b.dedupe(|a, _| a);
        assert_eq!(b.build().len(), 1);
    }

    #[test]
    fn builder_set_remove_and_snapshot() {
        let mut b = SortedListBuilder::new();
        b.add(e("a", 1));
        b.add(e("a", 1));
        assert_eq!(b.len(), 2);
        b.set(1, e("b", 2));
        let snap = b.to_list();
        assert_eq!(snap.get(1).unwrap(), &e("b", 2));
        assert_eq!(b.remove(0), e("a", 1));
        assert_eq!(b.len(), 1);
        // the earlier snapshot is unaffected
        assert_eq!(snap.len(), 2);
    }

    #[test]
    fn set_returns_new_list() {
        let one = list(&[e("a", 1), e("b", 1)]);
        let two = one.set(1, e("b", 9));
        assert_eq!(one.get(1).unwrap().value, 1);
        assert_eq!(two.get(1).unwrap().value, 9);
    }

    #[test]
    fn add_at_insertion_point() {
        let one = list(&[e("a", 1), e("c", 1)]);
        let pos = one.find("b").unwrap_err();
        assert_eq!(pos, 1);
        let two = one.add(pos, e("b", 1));
        assert_eq!(one.len(), 2);
        let names: Vec<_> = two.iter().map(|x| x.name).collect();
        assert_eq!(names, ["a", "b", "c"]);
    }

    #[test]
    fn add_to_front_and_end() {
        let one = list(&[e("b", 1)]);
        assert_eq!(one.add(0, e("a", 1)).get(0).unwrap().name, "a");
        assert_eq!(one.add(1, e("c", 1)).get(1).unwrap().name, "c");
        assert_eq!(one.len(), 1);
    }

    #[test]
    fn put_inserts_or_replaces() {
        let one = list(&[e("a", 1), e("c", 1)]);
        let two = one.put(e("b", 1));
        assert_eq!(two.len(), 3);
        let three = two.put(e("c", 5));
        assert_eq!(three.len(), 3);
        assert_eq!(three.get_by_name("c").unwrap().value, 5);
        assert_eq!(two.get_by_name("c").unwrap().value, 1);
    }

    #[test]
    fn remove_front_middle_end() {
        let one = list(&[e("a", 1), e("b", 1), e("c", 1)]);
        let names = |l: &SortedList<Entry>| l.iter().map(|x| x.name).collect::<Vec<_>>();
        assert_eq!(names(&one.remove(0)), ["b", "c"]);
        assert_eq!(names(&one.remove(1)), ["a", "c"]);
        assert_eq!(names(&one.remove(2)), ["a", "b"]);
        assert_eq!(names(&one), ["a", "b", "c"]);
        assert!(list(&[e("a", 1)]).remove(0).is_empty());
    }

    #[test]
    fn remove_name_missing_is_identity() {
        let one = list(&[e("a", 1)]);
        assert_eq!(one.remove_name("z").len(), 1);
        assert!(one.remove_name("a").is_empty());
    }
}
