use indexmap::IndexMap;

/// The byte range one spectrum subtree occupies in its source file.
///
/// The range `[byte_offset_start, byte_offset_end]` is inclusive and
/// covers exactly one `<spectrum>` or `<scan>` element. For mzXML the
/// range ends at the closing `</peaks>` rather than `</scan>`, because
/// scan elements may nest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexedSpectrumEntry {
    pub scan_number: i32,
    /// mzData `<spectrum id="...">`; zero for mzXML entries
    pub spectrum_id: i32,
    pub byte_offset_start: u64,
    pub byte_offset_end: u64,
}

/**
An ordered table of spectrum byte ranges plus two auxiliary mappings,
`scan number -> entry position` and `spectrum id -> entry position`.

Entries appear in file order with strictly increasing offsets. When a
key occurs more than once, the mappings keep the first occurrence.
*/
#[derive(Debug, Default, Clone)]
pub struct SpectrumIndex {
    entries: Vec<IndexedSpectrumEntry>,
    by_scan_number: IndexMap<i32, usize>,
    by_spectrum_id: IndexMap<i32, usize>,
    /// Whether the index has been initialized explicitly or not, as
    /// it may be initially empty or read as empty.
    pub init: bool,
}

impl SpectrumIndex {
    pub fn new() -> SpectrumIndex {
        SpectrumIndex::default()
    }

    /// Append an entry, registering its keys if they are new
    pub fn push(&mut self, entry: IndexedSpectrumEntry) {
        let position = self.entries.len();
        self.by_scan_number.entry(entry.scan_number).or_insert(position);
        self.by_spectrum_id.entry(entry.spectrum_id).or_insert(position);
        self.entries.push(entry);
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<&IndexedSpectrumEntry> {
        self.entries.get(index)
    }

    /// Position of the first entry bearing this scan number
    #[inline]
    pub fn index_of_scan_number(&self, scan_number: i32) -> Option<usize> {
        self.by_scan_number.get(&scan_number).copied()
    }

    /// Position of the first entry bearing this spectrum id
    #[inline]
    pub fn index_of_spectrum_id(&self, spectrum_id: i32) -> Option<usize> {
        self.by_spectrum_id.get(&spectrum_id).copied()
    }

    /// The distinct scan numbers in file order
    pub fn scan_numbers(&self) -> Vec<i32> {
        self.by_scan_number.keys().copied().collect()
    }

    /// The distinct spectrum ids in file order
    pub fn spectrum_ids(&self) -> Vec<i32> {
        self.by_spectrum_id.keys().copied().collect()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, IndexedSpectrumEntry> {
        self.entries.iter()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.by_scan_number.clear();
        self.by_spectrum_id.clear();
        self.init = false;
    }
}
