use crate::record::RecordId;

/// One bit per record: set once the record's flash contents have been
/// converted to their protected form.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationMask(u64);

impl MigrationMask {
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u64 {
        self.0
    }

    pub const fn contains(self, id: RecordId) -> bool {
        self.0 & (1 << id.ordinal()) != 0
    }

    /// Set the bit for `id`; returns whether it changed.
    pub fn insert(&mut self, id: RecordId) -> bool {
        let before = self.0;
        self.0 |= 1 << id.ordinal();
        before != self.0
    }

    pub fn iter(self) -> impl Iterator<Item = RecordId> {
        RecordId::ALL.iter().copied().filter(move |id| self.contains(*id))
    }
}
