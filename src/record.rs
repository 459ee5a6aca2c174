//! Linked records churned by the workload.
//!
//! Records never hold references to each other. A record's `ptr_comp` is an
//! index into a two-slot [`RecordArena`] owned by the run, so copying a record
//! shares its link exactly and dropping the arena releases everything at once.

/// The five-valued enumeration used for discriminants and enum components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ident {
    Ident1,
    Ident2,
    Ident3,
    Ident4,
    Ident5,
}

/// Index of a slot in a [`RecordArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordId(usize);

impl RecordId {
    pub const FIRST: RecordId = RecordId(0);
    pub const SECOND: RecordId = RecordId(1);

    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Record {
    pub ptr_comp: Option<RecordId>,
    pub discr: Ident,
    pub enum_comp: Ident,
    pub int_comp: i64,
    pub string_comp: &'static str,
}

impl Record {
    pub fn create(
        ptr_comp: Option<RecordId>,
        discr: Ident,
        enum_comp: Ident,
        int_comp: i64,
        string_comp: &'static str,
    ) -> Self {
        Self {
            ptr_comp,
            discr,
            enum_comp,
            int_comp,
            string_comp,
        }
    }

    /// Shallow duplicate. The copy links to the same slot as `self`.
    pub fn copy(&self) -> Self {
        *self
    }
}

impl Default for Record {
    fn default() -> Self {
        Self::create(None, Ident::Ident1, Ident::Ident1, 0, "")
    }
}

/// Fixed storage for the records of a single run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RecordArena {
    slots: [Record; 2],
}

impl RecordArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: RecordId) -> &Record {
        &self.slots[id.0]
    }

    pub fn get_mut(&mut self, id: RecordId) -> &mut Record {
        &mut self.slots[id.0]
    }

    pub fn set(&mut self, id: RecordId, record: Record) {
        self.slots[id.0] = record;
    }

    /// The slot that is not `id`.
    pub fn other(id: RecordId) -> RecordId {
        if id == RecordId::FIRST {
            RecordId::SECOND
        } else {
            RecordId::FIRST
        }
    }
}
