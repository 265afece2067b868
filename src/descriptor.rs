//! Dynamic proto extension registration.
//!
//! Extension descriptor packets carry serialized file descriptor sets that
//! teach downstream parsers about fields the build did not know. The core
//! only collects them; interpreting descriptor contents is the parsers'
//! concern.

use crate::blob::TraceBlobView;
use crate::proto::packet::extension_descriptor;
use crate::proto::ProtoDecoder;

#[derive(Default)]
pub struct DescriptorPool {
    extension_sets: Vec<TraceBlobView>,
}

impl DescriptorPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers every `extension_set` payload of an extension descriptor
    /// packet. Returns how many sets were added.
    pub fn add_from_extension_descriptor(&mut self, view: &TraceBlobView) -> usize {
        let mut added = 0;
        let mut decoder = ProtoDecoder::new(view.data());
        while let Ok(Some(field)) = decoder.read_field() {
            if field.id() == extension_descriptor::EXTENSION_SET {
                self.extension_sets.push(view.slice(field.offset(), field.len()));
                added += 1;
            }
        }
        added
    }

    pub fn extension_sets(&self) -> &[TraceBlobView] {
        &self.extension_sets
    }

    pub fn len(&self) -> usize {
        self.extension_sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extension_sets.is_empty()
    }
}
