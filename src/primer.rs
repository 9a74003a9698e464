//! Fixed list of tag keys pre-interned before user data, so that common keys
//! get low, stable ids across files produced by this crate. The original
//! built its primer from a `prime_names.h` header the retrieval pack does not
//! carry; `list_streets.cpp` and `deserialize.cpp` confirm `highway` and
//! `addr:street` are load-bearing for street-name collection, so this list
//! leads with those and rounds out the common OSM way/node keys.

/// Tag key names interned into [`crate::string_table::StringTable`] before
/// any caller-supplied data, via [`crate::string_table::StringTable::with_primer`].
pub const DEFAULT_TAG_NAMES: &[&str] = &[
    "highway",
    "name",
    "addr:street",
    "addr:housenumber",
    "addr:city",
    "addr:postcode",
    "surface",
    "maxspeed",
    "oneway",
    "lanes",
    "bridge",
    "tunnel",
    "layer",
    "access",
    "building",
    "landuse",
    "natural",
    "waterway",
    "railway",
    "ref",
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::string_table::StringTable;

    #[test]
    fn primer_names_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for name in DEFAULT_TAG_NAMES {
            assert!(seen.insert(*name), "duplicate primer name: {name}");
        }
    }

    #[test]
    fn primer_ids_are_stable_across_two_tables() {
        let a = StringTable::with_primer(DEFAULT_TAG_NAMES);
        let b = StringTable::with_primer(DEFAULT_TAG_NAMES);
        for name in DEFAULT_TAG_NAMES {
            assert_eq!(a.lookup(name.as_bytes()), b.lookup(name.as_bytes()));
        }
    }
}
