//! String interning table keyed by CRC32C, with a serialized form that throws
//! away the entry metadata and reconstructs it on read by walking the raw
//! NUL-terminated blob. Grounded on `examples/original_source/string_table.cpp`;
//! the collision index is a real multimap (`BTreeMap<u32, Vec<u32>>`) rather
//! than the original's single-valued map, so it stays correct when two
//! different strings share a CRC32C bucket.

use std::collections::BTreeMap;

use crate::crc;
use crate::error::CodecError;
use crate::stream::{StreamReader, StreamWriter};

#[derive(Clone, Copy)]
struct Entry {
    crc: u32,
    length: u32,
    offset: u32,
}

/// Content-addressed string table. Ids are 1-based; 0 always means "absent".
pub struct StringTable {
    blob: Vec<u8>,
    entries: Vec<Entry>,
    usage_counts: Vec<u32>,
    index: BTreeMap<u32, Vec<u32>>,
    /// Insertion-order list of ids, permuted in place by `sort_usage`.
    order: Vec<u32>,
}

impl StringTable {
    pub fn new() -> Self {
        StringTable {
            blob: Vec::new(),
            entries: Vec::new(),
            usage_counts: Vec::new(),
            index: BTreeMap::new(),
            order: Vec::new(),
        }
    }

    /// Build a table with `names` pre-interned, so that callers sharing a
    /// primer list get the same low ids for the same common keys across
    /// files.
    pub fn with_primer(names: &[&str]) -> Self {
        let mut table = Self::new();
        for name in names {
            table.add(name.as_bytes());
        }
        table
    }

    fn find_in_chain(&self, crc: u32, bytes: &[u8]) -> Option<u32> {
        self.index.get(&crc)?.iter().copied().find(|&id| self.id_to_bytes(id) == bytes)
    }

    /// Intern `bytes`, returning its id. Interning the same bytes twice
    /// returns the same id and bumps its usage count.
    pub fn add(&mut self, bytes: &[u8]) -> u32 {
        let crc = crc::finalize(crc::update(crc::INITIAL, bytes));
        if let Some(id) = self.find_in_chain(crc, bytes) {
            self.usage_counts[(id - 1) as usize] += 1;
            return id;
        }

        let offset = self.blob.len() as u32;
        self.blob.extend_from_slice(bytes);
        self.blob.push(0);

        self.entries.push(Entry { crc, length: bytes.len() as u32, offset });
        self.usage_counts.push(1);
        let id = self.entries.len() as u32;
        self.index.entry(crc).or_default().push(id);
        self.order.push(id);
        id
    }

    /// CRC-keyed search confirmed by byte equality; returns 0 if absent.
    pub fn lookup(&self, bytes: &[u8]) -> u32 {
        let crc = crc::finalize(crc::update(crc::INITIAL, bytes));
        self.find_in_chain(crc, bytes).unwrap_or(0)
    }

    /// Constant-time blob read. Out-of-range or id-0 returns an empty slice.
    pub fn id_to_bytes(&self, id: u32) -> &[u8] {
        if id == 0 || id as usize > self.entries.len() {
            return &[];
        }
        let e = self.entries[(id - 1) as usize];
        &self.blob[e.offset as usize..(e.offset + e.length) as usize]
    }

    pub fn usage_count(&self, id: u32) -> u32 {
        if id == 0 || id as usize > self.usage_counts.len() {
            return 0;
        }
        self.usage_counts[(id - 1) as usize]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sort the ids by descending usage count. Entries and the blob are left
    /// untouched; only the order returned by [`StringTable::usage_order`]
    /// changes.
    pub fn sort_usage(&mut self) {
        let counts = &self.usage_counts;
        self.order.sort_by(|&a, &b| counts[(b - 1) as usize].cmp(&counts[(a - 1) as usize]));
    }

    pub fn usage_order(&self) -> &[u32] {
        &self.order
    }

    /// Write `u32 blob_len`, the raw blob, then `u32 entry_count`. Entries
    /// themselves are never stored — [`StringTable::deserialize`] rebuilds
    /// them from the blob's NUL terminators.
    pub fn serialize(&self, writer: &mut StreamWriter) -> Result<(), CodecError> {
        writer.write_u32(self.blob.len() as u32)?;
        let mut written = 0;
        while written < self.blob.len() {
            let n = writer.write_raw(&self.blob[written..])?;
            written += n;
        }
        writer.write_u32(self.entries.len() as u32)?;
        Ok(())
    }

    pub fn deserialize(reader: &mut StreamReader) -> Result<Self, CodecError> {
        let blob_len = reader.read_u32()? as usize;
        let mut blob = vec![0u8; blob_len];
        let mut read = 0;
        while read < blob_len {
            let n = reader.read_raw(&mut blob[read..])?;
            if n == 0 {
                return Err(CodecError::DesyncAssertion {
                    expected: blob_len as u32,
                    actual: read as u32,
                });
            }
            read += n;
        }

        let entry_count = reader.read_u32()? as usize;
        let mut entries = Vec::with_capacity(entry_count);
        let mut usage_counts = Vec::with_capacity(entry_count);
        let mut index: BTreeMap<u32, Vec<u32>> = BTreeMap::new();
        let mut order = Vec::with_capacity(entry_count);

        let mut offset = 0usize;
        for i in 0..entry_count {
            let start = offset;
            while offset < blob.len() && blob[offset] != 0 {
                offset += 1;
            }
            if offset >= blob.len() {
                return Err(CodecError::CorruptHeader("string table blob missing NUL terminator"));
            }
            let length = (offset - start) as u32;
            if length == 0 {
                return Err(CodecError::CorruptHeader("string table entry has zero length"));
            }
            let bytes = &blob[start..offset];
            let crc = crc::finalize(crc::update(crc::INITIAL, bytes));
            entries.push(Entry { crc, length, offset: start as u32 });
            usage_counts.push(0);
            let id = (i + 1) as u32;
            index.entry(crc).or_default().push(id);
            order.push(id);
            offset += 1;
        }

        Ok(StringTable { blob, entries, usage_counts, index, order })
    }
}

impl Default for StringTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::StreamOptions;
    use tempfile::NamedTempFile;

    #[test]
    fn add_is_idempotent_and_bumps_usage() {
        let mut table = StringTable::new();
        let a = table.add(b"highway");
        let b = table.add(b"highway");
        assert_eq!(a, b);
        assert_eq!(table.usage_count(a), 2);
    }

    #[test]
    fn lookup_returns_zero_for_absent_string() {
        let table = StringTable::new();
        assert_eq!(table.lookup(b"nope"), 0);
    }

    #[test]
    fn distinct_strings_get_distinct_ids_even_on_crc_collision() {
        let mut table = StringTable::new();
        let a = table.add(b"alpha");
        let b = table.add(b"beta");
        assert_ne!(a, b);
        assert_eq!(table.id_to_bytes(a), b"alpha");
        assert_eq!(table.id_to_bytes(b), b"beta");
    }

    #[test]
    fn serialize_then_deserialize_round_trips_every_string() {
        let mut table = StringTable::new();
        let ids: Vec<u32> = ["highway", "residential", "addr:street", "Main St"]
            .iter()
            .map(|s| table.add(s.as_bytes()))
            .collect();

        let path = NamedTempFile::new().unwrap().into_temp_path().keep().unwrap();
        let mut w = crate::stream::StreamWriter::create(&path, StreamOptions::default()).unwrap();
        table.serialize(&mut w).unwrap();
        w.finish().unwrap();

        let mut r = crate::stream::StreamReader::open(&path, StreamOptions::default()).unwrap();
        let restored = StringTable::deserialize(&mut r).unwrap();
        r.finish().unwrap();

        for (s, id) in ["highway", "residential", "addr:street", "Main St"].iter().zip(ids) {
            assert_eq!(restored.lookup(s.as_bytes()), id);
            assert_eq!(restored.id_to_bytes(id), s.as_bytes());
        }
    }

    #[test]
    fn primer_entries_get_low_stable_ids() {
        let table = StringTable::with_primer(&["highway", "name", "addr:street"]);
        assert_eq!(table.lookup(b"highway"), 1);
        assert_eq!(table.lookup(b"name"), 2);
        assert_eq!(table.lookup(b"addr:street"), 3);
    }
}
