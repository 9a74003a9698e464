//! Write path: accumulates nodes and ways through callbacks, then serializes
//! the whole top-level layout (offset header, two string tables, street
//! names, nodes, ways) to a [`StreamWriter`]. Grounded in
//! `examples/original_source/serializer.cpp`'s two-pass way section and
//! base-node grouping.

use crate::model::{PendingNode, PendingWay, Tag};
use crate::error::CodecError;
use crate::stream::StreamWriter;
use crate::string_table::StringTable;

/// Maximum children per base-node group: the child count is written as a
/// single byte, and a child's delta from its base must fit in `1..=255`.
const MAX_GROUP_CHILDREN: usize = 255;

struct NodeGroup {
    base_idx: usize,
    children: Vec<(usize, u8)>,
}

/// Accumulates a node/way model and serializes it to the on-disk format.
pub struct WaysEncoder {
    tag_names: StringTable,
    tag_values: StringTable,
    street_name_ids: Vec<u32>,
    nodes: Vec<PendingNode>,
    ways: Vec<PendingWay>,
}

impl WaysEncoder {
    pub fn new() -> Self {
        WaysEncoder {
            tag_names: StringTable::new(),
            tag_values: StringTable::new(),
            street_name_ids: Vec::new(),
            nodes: Vec::new(),
            ways: Vec::new(),
        }
    }

    /// Like [`WaysEncoder::new`] but with the tag-key primer pre-interned
    /// into `tag_names`.
    pub fn with_primer(names: &[&str]) -> Self {
        WaysEncoder {
            tag_names: StringTable::with_primer(names),
            tag_values: StringTable::new(),
            street_name_ids: Vec::new(),
            nodes: Vec::new(),
            ways: Vec::new(),
        }
    }

    fn intern_tags(&mut self, tags: &[(&str, &str)]) -> Vec<Tag> {
        tags.iter()
            .map(|(k, v)| Tag {
                name_id: self.tag_names.add(k.as_bytes()),
                value_id: self.tag_values.add(v.as_bytes()),
            })
            .collect()
    }

    pub fn on_node(&mut self, osmid: u64, lat: f64, lon: f64, tags: &[(&str, &str)]) {
        let resolved = self.intern_tags(tags);
        for (k, v) in tags {
            if *k == "addr:street" {
                self.street_name_ids.push(self.tag_values.lookup(v.as_bytes()));
            }
        }
        self.nodes.push(PendingNode { osmid, lat, lon, tags: resolved });
    }

    pub fn on_way(&mut self, osmid: u64, refs: &[u64], tags: &[(&str, &str)]) {
        let resolved = self.intern_tags(tags);
        let is_highway = tags.iter().any(|(k, _)| *k == "highway");
        if is_highway {
            if let Some((_, v)) = tags.iter().find(|(k, _)| *k == "name") {
                self.street_name_ids.push(self.tag_values.lookup(v.as_bytes()));
            }
        }
        self.ways.push(PendingWay { osmid, refs: refs.to_vec(), tags: resolved });
    }

    /// Relations are out of scope for this format; the callback exists only
    /// so callers driving an OSM-PBF reader have a symmetrical set of hooks.
    pub fn on_relation(&mut self, _osmid: u64, _tags: &[(&str, &str)]) {}

    fn group_nodes(&self) -> Vec<NodeGroup> {
        let mut groups = Vec::new();
        if self.nodes.is_empty() {
            return groups;
        }

        let mut base_idx = 0;
        let mut base_osmid = self.nodes[0].osmid;
        let mut children = Vec::new();

        for i in 1..self.nodes.len() {
            let diff = self.nodes[i].osmid as i128 - base_osmid as i128;
            if diff > 0 && diff <= MAX_GROUP_CHILDREN as i128 && children.len() < MAX_GROUP_CHILDREN {
                children.push((i, diff as u8));
            } else {
                groups.push(NodeGroup { base_idx, children });
                base_idx = i;
                base_osmid = self.nodes[i].osmid;
                children = Vec::new();
            }
        }
        groups.push(NodeGroup { base_idx, children });
        groups
    }

    fn write_tags(writer: &mut StreamWriter, tags: &[Tag]) -> Result<(), CodecError> {
        writer.write_short_uint(tags.len() as u32)?;
        for t in tags {
            writer.write_short_uint(t.name_id)?;
            writer.write_short_uint(t.value_id)?;
        }
        Ok(())
    }

    fn write_nodes_section(&self, writer: &mut StreamWriter) -> Result<(), CodecError> {
        writer.write_u32(self.nodes.len() as u32)?;
        let groups = self.group_nodes();
        writer.write_u32(groups.len() as u32)?;

        for group in &groups {
            let base = &self.nodes[group.base_idx];
            writer.write_u64(base.osmid)?;
            writer.write_f64(base.lat)?;
            writer.write_f64(base.lon)?;
            Self::write_tags(writer, &base.tags)?;

            writer.write_u8(group.children.len() as u8)?;
            for &(child_idx, delta) in &group.children {
                let child = &self.nodes[child_idx];
                writer.write_u8(delta)?;
                writer.write_f64(child.lat)?;
                writer.write_f64(child.lon)?;
                Self::write_tags(writer, &child.tags)?;
            }
        }
        Ok(())
    }

    fn write_ways_section(&self, writer: &mut StreamWriter) -> Result<(), CodecError> {
        writer.write_u32(self.ways.len() as u32)?;

        let mut previous_osmid = 0u64;
        for way in &self.ways {
            let delta = way.osmid as i128 - previous_osmid as i128;
            let delta = i32::try_from(delta).map_err(|_| CodecError::EncodingOverflow)?;
            writer.write_short_int(delta)?;
            previous_osmid = way.osmid;
        }

        for way in &self.ways {
            Self::write_tags(writer, &way.tags)?;
            writer.write_short_uint(way.refs.len() as u32)?;
            if way.refs.is_empty() {
                continue;
            }
            let base_ref = way.refs[0];
            writer.write_u64(base_ref)?;
            for &r in &way.refs[1..] {
                let delta = r as i128 - base_ref as i128;
                let escapes = delta == 0 || delta.unsigned_abs() >= (1 << 29);
                if escapes {
                    writer.write_u8(0)?;
                    writer.write_u64(r)?;
                } else {
                    writer.write_short_int(delta as i32)?;
                }
            }
        }
        Ok(())
    }

    /// Serialize the offset header, both string tables, the street-name
    /// index, and the node/way sections, back-patching the offset header in
    /// place once every section's starting position is known.
    pub fn serialize(&mut self, writer: &mut StreamWriter) -> Result<(), CodecError> {
        let offsets_pos = writer.current_position();
        for _ in 0..5 {
            writer.write_u32(0)?;
        }

        let off_tag_names = writer.current_position() as u32;
        self.tag_names.serialize(writer)?;

        let off_tag_values = writer.current_position() as u32;
        self.tag_values.serialize(writer)?;

        let off_street_names = writer.current_position() as u32;
        writer.write_u32(self.street_name_ids.len() as u32)?;
        for &id in &self.street_name_ids {
            writer.write_short_uint(id)?;
        }

        let off_nodes = writer.current_position() as u32;
        self.write_nodes_section(writer)?;

        let off_ways = writer.current_position() as u32;
        self.write_ways_section(writer)?;

        let end_pos = writer.current_position();
        writer.set_position(offsets_pos)?;
        writer.write_u32(off_tag_names)?;
        writer.write_u32(off_tag_values)?;
        writer.write_u32(off_street_names)?;
        writer.write_u32(off_nodes)?;
        writer.write_u32(off_ways)?;
        writer.set_position(end_pos)?;

        Ok(())
    }
}

impl Default for WaysEncoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grouping_joins_nodes_within_255_of_base() {
        let mut enc = WaysEncoder::new();
        enc.on_node(1000, 1.0, 1.0, &[]);
        enc.on_node(1010, 1.0, 1.0, &[]);
        let groups = enc.group_nodes();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].children, vec![(1, 10)]);
    }

    #[test]
    fn grouping_splits_nodes_beyond_255_of_base() {
        let mut enc = WaysEncoder::new();
        enc.on_node(1000, 1.0, 1.0, &[]);
        enc.on_node(2000, 1.0, 1.0, &[]);
        let groups = enc.group_nodes();
        assert_eq!(groups.len(), 2);
        assert!(groups[0].children.is_empty());
        assert!(groups[1].children.is_empty());
    }

    #[test]
    fn highway_name_and_node_addr_street_feed_street_names() {
        let mut enc = WaysEncoder::new();
        enc.on_way(1, &[1, 2], &[("highway", "residential"), ("name", "Main St")]);
        enc.on_node(5, 0.0, 0.0, &[("addr:street", "Main St")]);
        assert_eq!(enc.street_name_ids.len(), 2);
        assert_eq!(enc.street_name_ids[0], enc.street_name_ids[1]);
    }
}
