//! Read path: the exact inverse of [`crate::encoder::WaysEncoder`]. Asserts
//! the virtual cursor against each section's recorded offset as it goes, so a
//! desynchronized file is caught immediately rather than producing silently
//! wrong data. Drives the reader's body-CRC check itself once the last
//! section is decoded, so callers get `CrcMismatch` without having to
//! remember to call `StreamReader::finish` themselves.

use crate::arena::Arena;
use crate::error::CodecError;
use crate::model::{Node, Tag, Way};
use crate::span::Span;
use crate::stream::StreamReader;
use crate::string_table::StringTable;

/// Everything recovered from a serialized file: both interning tables, the
/// street-name index, and the arena-backed node/way arrays.
pub struct WaysDecoder {
    pub tag_names: StringTable,
    pub tag_values: StringTable,
    pub street_name_indices: Vec<u32>,
    pub nodes: Vec<Node>,
    pub ways: Vec<Way>,
}

impl WaysDecoder {
    pub fn deserialize(reader: &mut StreamReader, arena: &mut Arena) -> Result<Self, CodecError> {
        let off_tag_names = reader.read_u32()?;
        let off_tag_values = reader.read_u32()?;
        let off_street_names = reader.read_u32()?;
        let off_nodes = reader.read_u32()?;
        let off_ways = reader.read_u32()?;

        reader.assert_position(off_tag_names as u64)?;
        let tag_names = StringTable::deserialize(reader)?;

        reader.assert_position(off_tag_values as u64)?;
        let tag_values = StringTable::deserialize(reader)?;

        reader.assert_position(off_street_names as u64)?;
        let street_count = reader.read_u32()?;
        let mut street_name_indices = Vec::with_capacity(street_count as usize);
        for _ in 0..street_count {
            street_name_indices.push(reader.read_short_uint()?);
        }

        reader.assert_position(off_nodes as u64)?;
        let nodes = Self::read_nodes_section(reader, arena)?;

        reader.assert_position(off_ways as u64)?;
        let ways = Self::read_ways_section(reader, arena)?;

        // Validation isn't opt-in: drive the body CRC check here rather than
        // leaving it to the caller to remember to call `reader.finish()`.
        reader.finish()?;

        Ok(WaysDecoder { tag_names, tag_values, street_name_indices, nodes, ways })
    }

    fn read_tags(reader: &mut StreamReader, arena: &mut Arena) -> Result<Span<Tag>, CodecError> {
        let count = reader.read_short_uint()? as usize;
        if count == 0 {
            return Ok(Span::empty());
        }
        let mut span: Span<Tag> = Span::alloc_from_pool(count, arena)?;
        {
            let slice = span.as_mut_slice();
            for t in slice.iter_mut() {
                let name_id = reader.read_short_uint()?;
                let value_id = reader.read_short_uint()?;
                *t = Tag { name_id, value_id };
            }
        }
        Ok(span)
    }

    fn read_nodes_section(reader: &mut StreamReader, arena: &mut Arena) -> Result<Vec<Node>, CodecError> {
        let total = reader.read_u32()?;
        let base_count = reader.read_u32()?;
        let mut nodes = Vec::with_capacity(total as usize);

        for _ in 0..base_count {
            let base_osmid = reader.read_u64()?;
            let lat = reader.read_f64()?;
            let lon = reader.read_f64()?;
            let tags = Self::read_tags(reader, arena)?;
            nodes.push(Node { osmid: base_osmid, lat, lon, tags });

            let child_count = reader.read_u8()?;
            for _ in 0..child_count {
                let delta = reader.read_u8()?;
                let lat = reader.read_f64()?;
                let lon = reader.read_f64()?;
                let tags = Self::read_tags(reader, arena)?;
                nodes.push(Node { osmid: base_osmid + delta as u64, lat, lon, tags });
            }
        }

        if nodes.len() as u32 != total {
            return Err(CodecError::DesyncAssertion { expected: total, actual: nodes.len() as u32 });
        }
        Ok(nodes)
    }

    fn read_ways_section(reader: &mut StreamReader, arena: &mut Arena) -> Result<Vec<Way>, CodecError> {
        let way_count = reader.read_u32()? as usize;

        let mut osmids = Vec::with_capacity(way_count);
        let mut running = 0i64;
        for _ in 0..way_count {
            running += reader.read_short_int()? as i64;
            osmids.push(running as u64);
        }

        let mut ways = Vec::with_capacity(way_count);
        for &osmid in &osmids {
            let tags = Self::read_tags(reader, arena)?;
            let n_refs = reader.read_short_uint()? as usize;

            let refs = if n_refs == 0 {
                Span::empty()
            } else {
                let base_ref = reader.read_u64()?;
                let mut span: Span<u64> = Span::alloc_from_pool(n_refs, arena)?;
                {
                    let slice = span.as_mut_slice();
                    slice[0] = base_ref;
                    for out in slice[1..].iter_mut() {
                        let byte0 = reader.read_u8()?;
                        *out = if byte0 == 0 {
                            reader.read_u64()?
                        } else {
                            let delta = reader.read_short_int_continuing(byte0)?;
                            (base_ref as i64 + delta as i64) as u64
                        };
                    }
                }
                span
            };

            ways.push(Way { osmid, refs, tags });
        }
        Ok(ways)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::WaysEncoder;
    use crate::stream::{StreamOptions, StreamWriter};
    use tempfile::NamedTempFile;

    fn roundtrip(build: impl FnOnce(&mut WaysEncoder)) -> (WaysDecoder, Arena) {
        let mut enc = WaysEncoder::new();
        build(&mut enc);

        let path = NamedTempFile::new().unwrap().into_temp_path().keep().unwrap();
        let mut w = StreamWriter::create(&path, StreamOptions::default()).unwrap();
        enc.serialize(&mut w).unwrap();
        w.finish().unwrap();

        let mut r = StreamReader::open(&path, StreamOptions::default()).unwrap();
        let mut arena = Arena::init().unwrap();
        let decoded = WaysDecoder::deserialize(&mut r, &mut arena).unwrap();
        r.finish().unwrap();
        (decoded, arena)
    }

    #[test]
    fn empty_input_round_trips() {
        let (decoded, _arena) = roundtrip(|_| {});
        assert!(decoded.nodes.is_empty());
        assert!(decoded.ways.is_empty());
        assert!(decoded.street_name_indices.is_empty());
        assert_eq!(decoded.tag_names.len(), 0);
    }

    #[test]
    fn single_tagged_node_round_trips() {
        let (decoded, _arena) = roundtrip(|enc| {
            enc.on_node(42, 1.5, 2.5, &[("highway", "residential")]);
        });
        assert!(decoded.tag_names.lookup(b"highway") > 0);
        assert!(decoded.tag_values.lookup(b"residential") > 0);
        assert_eq!(decoded.nodes[0].osmid, 42);
        assert_eq!(decoded.nodes[0].tags.len(), 1);
    }

    #[test]
    fn way_with_duplicate_refs_uses_escape_and_round_trips() {
        let (decoded, _arena) = roundtrip(|enc| {
            enc.on_way(7, &[100, 100, 105, 100], &[]);
        });
        assert_eq!(decoded.ways[0].refs.as_slice(), &[100, 100, 105, 100]);
    }

    #[test]
    fn two_nodes_close_together_form_one_base_group() {
        let (decoded, _arena) = roundtrip(|enc| {
            enc.on_node(1000, 0.0, 0.0, &[]);
            enc.on_node(1010, 0.0, 0.0, &[]);
        });
        assert_eq!(decoded.nodes.len(), 2);
        assert_eq!(decoded.nodes[0].osmid, 1000);
        assert_eq!(decoded.nodes[1].osmid, 1010);
    }

    #[test]
    fn way_osmid_deltas_round_trip_across_multiple_ways() {
        let (decoded, _arena) = roundtrip(|enc| {
            enc.on_way(5, &[], &[]);
            enc.on_way(3, &[], &[]);
            enc.on_way(1000, &[], &[]);
        });
        let osmids: Vec<u64> = decoded.ways.iter().map(|w| w.osmid).collect();
        assert_eq!(osmids, vec![5, 3, 1000]);
    }
}
