use crate::chain::NodeRef;
use crate::FsError;

/// Longest allowed file name, in bytes.
pub const MAX_NAME_LEN: usize = 11;

/// Rejects empty names and names longer than [`MAX_NAME_LEN`] bytes.
pub fn validate_name(name: &str) -> Result<(), FsError> {
    if name.is_empty() {
        return Err(FsError::InvalidName("file name is empty".to_string()));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(FsError::InvalidName(format!(
            "\"{}\" is longer than {} bytes",
            name, MAX_NAME_LEN
        )));
    }
    Ok(())
}

/// Metadata of one file.
#[derive(Debug, Clone, PartialEq)]
pub struct FileRecord {
    pub name: String,
    /// Length of the contents in bytes.
    pub size: usize,
    /// First node of the data chain, `None` for an empty file.
    pub head: Option<NodeRef>,
}

impl FileRecord {
    pub fn empty(name: &str) -> Self {
        Self {
            name: name.to_string(),
            size: 0,
            head: None,
        }
    }
}

/// Fixed number of record slots. Names are unique across occupied slots.
#[derive(Debug, Clone, PartialEq)]
pub struct FileTable {
    slots: Vec<Option<FileRecord>>,
}

impl FileTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity],
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.records().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn find(&self, name: &str) -> Option<&FileRecord> {
        self.records().find(|record| record.name == name)
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut FileRecord> {
        self.slots
            .iter_mut()
            .filter_map(Option::as_mut)
            .find(|record| record.name == name)
    }

    /// Stores the record in the lowest free slot and returns that slot.
    ///
    /// # Errors
    ///
    /// `DuplicateFile` if the name is taken, `TableFull` if no slot is free.
    pub fn insert(&mut self, record: FileRecord) -> Result<usize, FsError> {
        if self.find(&record.name).is_some() {
            return Err(FsError::DuplicateFile(record.name));
        }
        let slot = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(FsError::TableFull(self.slots.len()))?;
        self.slots[slot] = Some(record);
        Ok(slot)
    }

    /// Clears the slot holding `name`. The caller must have released the
    /// record's chain already.
    pub fn remove(&mut self, name: &str) -> Option<FileRecord> {
        self.slots
            .iter_mut()
            .find(|slot| matches!(slot, Some(record) if record.name == name))
            .and_then(Option::take)
    }

    /// Active names in slot order.
    pub fn list_names(&self) -> Vec<String> {
        self.records().map(|record| record.name.clone()).collect()
    }

    pub fn records(&self) -> impl Iterator<Item = &FileRecord> {
        self.slots.iter().filter_map(Option::as_ref)
    }
}
