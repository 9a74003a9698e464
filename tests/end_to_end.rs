//! File-level scenarios that need a real file on disk: exact byte layout of
//! the offset header, an empty file round trip, and CRC tamper detection.
//! Unit-level scenarios (node grouping, way ref escape, way osmid deltas)
//! live next to the encoder/decoder in `src/`.

use byteorder::{ByteOrder, LittleEndian};
use std::fs;
use std::io::{Seek, SeekFrom, Write};

use osmb_codec::{Arena, StreamOptions, StreamReader, StreamWriter, WaysDecoder, WaysEncoder};

fn temp_path() -> std::path::PathBuf {
    tempfile::NamedTempFile::new().unwrap().into_temp_path().keep().unwrap()
}

#[test]
fn empty_input_produces_the_minimal_file_and_validates() {
    let path = temp_path();
    let mut enc = WaysEncoder::new();
    let mut w = StreamWriter::create(&path, StreamOptions::default()).unwrap();
    enc.serialize(&mut w).unwrap();
    w.finish().unwrap();

    let mut r = StreamReader::open(&path, StreamOptions::default()).unwrap();
    let mut arena = Arena::init().unwrap();
    let decoded = WaysDecoder::deserialize(&mut r, &mut arena).unwrap();
    r.finish().unwrap();

    assert!(decoded.nodes.is_empty());
    assert!(decoded.ways.is_empty());
    assert!(decoded.street_name_indices.is_empty());
    assert_eq!(decoded.tag_names.len(), 0);
    assert_eq!(decoded.tag_values.len(), 0);
}

#[test]
fn bytes_zero_to_twenty_after_the_header_are_the_real_section_offsets() {
    let path = temp_path();
    let mut enc = WaysEncoder::new();
    enc.on_node(1, 0.0, 0.0, &[("highway", "residential")]);
    enc.on_way(9, &[1, 2, 3], &[("highway", "residential"), ("name", "Main St")]);

    let mut w = StreamWriter::create(&path, StreamOptions::default()).unwrap();
    enc.serialize(&mut w).unwrap();
    w.finish().unwrap();

    let bytes = fs::read(&path).unwrap();
    assert_eq!(&bytes[0..4], b"OSMb");

    let crc = LittleEndian::read_u32(&bytes[8..12]);
    let inv_crc = LittleEndian::read_u32(&bytes[12..16]);
    assert_eq!(crc ^ inv_crc, 0xFFFF_FFFF);

    let off_tag_names = LittleEndian::read_u32(&bytes[16..20]);
    let off_tag_values = LittleEndian::read_u32(&bytes[20..24]);
    let off_street_names = LittleEndian::read_u32(&bytes[24..28]);
    let off_nodes = LittleEndian::read_u32(&bytes[28..32]);
    let off_ways = LittleEndian::read_u32(&bytes[32..36]);

    // The offset header itself occupies bytes 16..36, so the first section
    // starts immediately after it.
    assert_eq!(off_tag_names, 36);
    assert!(off_tag_values > off_tag_names);
    assert!(off_street_names > off_tag_values);
    assert!(off_nodes > off_street_names);
    assert!(off_ways > off_nodes);
    assert!((off_ways as usize) < bytes.len());
}

#[test]
fn flipping_any_body_byte_fails_header_crc_validation() {
    let path = temp_path();
    let mut enc = WaysEncoder::new();
    enc.on_node(1, 1.0, 2.0, &[("highway", "residential")]);
    enc.on_way(2, &[1, 2], &[]);

    let mut w = StreamWriter::create(&path, StreamOptions::default()).unwrap();
    enc.serialize(&mut w).unwrap();
    w.finish().unwrap();

    let len = fs::metadata(&path).unwrap().len();
    {
        let mut f = fs::OpenOptions::new().write(true).open(&path).unwrap();
        f.seek(SeekFrom::Start(len - 1)).unwrap();
        f.write_all(&[0xAB]).unwrap();
    }

    let mut r = StreamReader::open(&path, StreamOptions::default()).unwrap();
    let mut arena = Arena::init().unwrap();
    let _ = WaysDecoder::deserialize(&mut r, &mut arena);
    assert!(r.finish().is_err());
}

#[test]
fn a_tampered_section_offset_is_caught_as_a_desync_before_crc_would_even_run() {
    let path = temp_path();
    let mut enc = WaysEncoder::new();
    enc.on_node(1, 0.0, 0.0, &[("highway", "residential")]);
    enc.on_way(2, &[1, 2], &[]);

    let mut w = StreamWriter::create(&path, StreamOptions::default()).unwrap();
    enc.serialize(&mut w).unwrap();
    w.finish().unwrap();

    // off_tag_values lives at bytes 20..24 of the offset header; bump it by
    // one so the reader's assert_position catches the desync right after
    // tag_names is decoded, well before it ever reaches the CRC check.
    {
        let mut bytes = fs::read(&path).unwrap();
        let off_tag_values = LittleEndian::read_u32(&bytes[20..24]);
        LittleEndian::write_u32(&mut bytes[20..24], off_tag_values + 1);
        fs::write(&path, &bytes).unwrap();
    }

    let mut r = StreamReader::open(&path, StreamOptions::default()).unwrap();
    let mut arena = Arena::init().unwrap();
    let err = WaysDecoder::deserialize(&mut r, &mut arena).unwrap_err();
    assert!(matches!(err, osmb_codec::CodecError::DesyncAssertion { .. }));
}

#[test]
fn street_names_collect_highway_name_and_node_addr_street() {
    let path = temp_path();
    let mut enc = WaysEncoder::new();
    enc.on_way(1, &[1, 2], &[("highway", "residential"), ("name", "Elm Street")]);
    enc.on_node(2, 0.0, 0.0, &[("addr:street", "Elm Street")]);
    enc.on_way(3, &[], &[("building", "yes")]); // not a highway: contributes nothing

    let mut w = StreamWriter::create(&path, StreamOptions::default()).unwrap();
    enc.serialize(&mut w).unwrap();
    w.finish().unwrap();

    let mut r = StreamReader::open(&path, StreamOptions::default()).unwrap();
    let mut arena = Arena::init().unwrap();
    let decoded = WaysDecoder::deserialize(&mut r, &mut arena).unwrap();
    r.finish().unwrap();

    assert_eq!(decoded.street_name_indices.len(), 2);
    let elm_id = decoded.tag_values.lookup(b"Elm Street");
    assert!(elm_id > 0);
    assert!(decoded.street_name_indices.iter().all(|&id| id == elm_id));
}
