//! Store configuration.

use fob_core::ObjectId;
use fob_proto::MAX_OBJECT_COUNT;

use crate::StoreError;

/// The ordered list of device object ids backing the store.
///
/// Slot index `i` of the store lives in `ids[i]`. Ids are opaque; nothing in
/// the store assumes they are contiguous or sorted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotLayout {
    ids: Vec<ObjectId>,
}

impl SlotLayout {
    /// First object id of the reference deployment.
    pub const REFERENCE_ID_ZERO: u32 = 0x5F0000;

    /// Builds a layout from an explicit id list.
    pub fn new(ids: Vec<ObjectId>) -> Result<Self, StoreError> {
        if ids.is_empty() {
            return Err(StoreError::Layout("no object ids"));
        }
        if ids.len() > MAX_OBJECT_COUNT as usize {
            return Err(StoreError::Layout("more ids than the store supports"));
        }
        for (i, id) in ids.iter().enumerate() {
            if ids[..i].contains(id) {
                return Err(StoreError::Layout("duplicate object id"));
            }
        }
        Ok(Self { ids })
    }

    /// The reference deployment: sixteen ids at `0x5F0000..=0x5F000F`.
    pub fn reference() -> Self {
        let ids = (0..MAX_OBJECT_COUNT as u32)
            .map(|i| ObjectId::new(Self::REFERENCE_ID_ZERO + i))
            .collect::<Option<Vec<_>>>()
            .unwrap_or_default();
        Self { ids }
    }

    /// Number of slots the layout provides.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Returns true if the layout provides no slots.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// The device id backing slot `index`.
    pub fn id(&self, index: usize) -> Option<ObjectId> {
        self.ids.get(index).copied()
    }

    /// All ids, in slot order.
    pub fn ids(&self) -> &[ObjectId] {
        &self.ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_layout() {
        let layout = SlotLayout::reference();
        assert_eq!(layout.len(), 16);
        assert_eq!(layout.id(0).unwrap().value(), 0x5F0000);
        assert_eq!(layout.id(15).unwrap().value(), 0x5F000F);
        assert_eq!(layout.id(16), None);
    }

    #[test]
    fn test_rejects_bad_layouts() {
        assert!(SlotLayout::new(vec![]).is_err());

        let id = ObjectId::new(0x5F0000).unwrap();
        assert!(SlotLayout::new(vec![id, id]).is_err());

        let too_many: Vec<_> = (0..17).map(|i| ObjectId::new(i).unwrap()).collect();
        assert!(SlotLayout::new(too_many).is_err());
    }

    #[test]
    fn test_ids_need_no_numeric_relationship() {
        let ids = vec![
            ObjectId::new(0x5FAA00).unwrap(),
            ObjectId::new(0x5F0001).unwrap(),
            ObjectId::new(0x123456).unwrap(),
        ];
        let layout = SlotLayout::new(ids.clone()).unwrap();
        assert_eq!(layout.ids(), ids.as_slice());
    }
}
