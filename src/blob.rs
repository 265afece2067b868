//! Zero-copy windows over shared trace buffers.

use bytes::Bytes;

/// A reference-counted window into an immutable trace buffer.
///
/// Views are the universal currency of the ingestion pipeline: the tokenizer
/// emits one per packet, the wire decoder hands out sub-views for
/// length-delimited fields, and the sorter holds one per pending entry. The
/// backing buffer stays alive until the last view referencing it drops.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TraceBlobView {
    data: Bytes,
}

impl TraceBlobView {
    pub fn new(data: Bytes) -> Self {
        Self { data }
    }

    pub fn from_vec(data: Vec<u8>) -> Self {
        Self { data: Bytes::from(data) }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Returns a sub-view of `len` bytes starting at `offset`, sharing the
    /// same backing blob.
    ///
    /// Panics if `offset + len` is out of range, like slice indexing.
    pub fn slice(&self, offset: usize, len: usize) -> Self {
        Self { data: self.data.slice(offset..offset + len) }
    }

    /// Returns the byte offset of `sub` within this view, or `None` if `sub`
    /// does not point into it.
    ///
    /// `sub` must be a slice borrowed from `data()` (directly or through a
    /// partial decoder); the offset is recovered from its address.
    pub fn offset_of(&self, sub: &[u8]) -> Option<usize> {
        let base = self.data.as_ptr() as usize;
        let ptr = sub.as_ptr() as usize;
        if ptr < base || ptr + sub.len() > base + self.data.len() {
            return None;
        }
        Some(ptr - base)
    }

    /// `offset_of` + `slice` in one step: a view over `sub` keeping the
    /// backing blob alive.
    pub fn slice_ref(&self, sub: &[u8]) -> Option<Self> {
        let offset = self.offset_of(sub)?;
        Some(self.slice(offset, sub.len()))
    }

    pub fn into_bytes(self) -> Bytes {
        self.data
    }
}

impl From<Bytes> for TraceBlobView {
    fn from(data: Bytes) -> Self {
        Self::new(data)
    }
}

impl From<Vec<u8>> for TraceBlobView {
    fn from(data: Vec<u8>) -> Self {
        Self::from_vec(data)
    }
}
