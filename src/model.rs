//! Plain data types shared by the encoder and decoder. `Tag` is the unit the
//! interning tables produce; `Node` and `Way` are the decoder's output,
//! arena-backed the way every decoded variable-length container in this
//! crate is (see [`crate::span`]).

use crate::span::Span;

/// One `(name_id, value_id)` pair, both 1-based ids into a [`crate::string_table::StringTable`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Tag {
    pub name_id: u32,
    pub value_id: u32,
}

/// A decoded node: position plus its tag list.
pub struct Node {
    pub osmid: u64,
    pub lat: f64,
    pub lon: f64,
    pub tags: Span<Tag>,
}

/// A decoded way: its node references plus its tag list. `refs` is empty for
/// a way with no references (the section omits the ref subsection entirely
/// in that case, per the way encoding rules).
pub struct Way {
    pub osmid: u64,
    pub refs: Span<u64>,
    pub tags: Span<Tag>,
}

/// A node not yet written: tags are plain owned `Tag`s while the encoder is
/// still accumulating input, promoted to arena-backed spans only on decode.
pub(crate) struct PendingNode {
    pub osmid: u64,
    pub lat: f64,
    pub lon: f64,
    pub tags: Vec<Tag>,
}

pub(crate) struct PendingWay {
    pub osmid: u64,
    pub refs: Vec<u64>,
    pub tags: Vec<Tag>,
}
