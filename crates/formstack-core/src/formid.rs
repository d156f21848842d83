//! Cross-file record identity.
//!
//! A record's identity on disk is a 32-bit "short" FormID whose top byte is
//! an index into the owning file's master list and whose low 24 bits are the
//! object number. Index `masters.len()` (or anything above it) means the
//! file itself. In memory every identity is held in "long" form -- the
//! defining file's name plus the object number -- which stays stable no
//! matter how the load order is rearranged.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Low 24 bits of a short FormID: the object number.
pub const OBJECT_ID_MASK: u32 = 0x00FF_FFFF;

/// Largest file-slot index a short FormID can carry.
pub const MAX_FILE_SLOT: usize = 0xFF;

// ---------------------------------------------------------------------------
// FileName
// ---------------------------------------------------------------------------

/// Plugin file name. Compares, orders and hashes ignoring ASCII case, and
/// keeps the original spelling for display.
#[derive(Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileName(String);

impl FileName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl PartialEq for FileName {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Eq for FileName {}

impl Hash for FileName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for b in self.0.bytes() {
            state.write_u8(b.to_ascii_lowercase());
        }
        state.write_u8(0xFF);
    }
}

impl PartialOrd for FileName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FileName {
    fn cmp(&self, other: &Self) -> Ordering {
        let a = self.0.bytes().map(|b| b.to_ascii_lowercase());
        let b = other.0.bytes().map(|b| b.to_ascii_lowercase());
        a.cmp(b)
    }
}

impl fmt::Debug for FileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl fmt::Display for FileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FileName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

// ---------------------------------------------------------------------------
// MasterList
// ---------------------------------------------------------------------------

/// A file's own name plus the ordered list of files it depends on. This is
/// the frame of reference for short FormIDs produced by that file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterList {
    pub owner: FileName,
    pub masters: Vec<FileName>,
}

impl MasterList {
    pub fn new(owner: impl Into<FileName>, masters: Vec<FileName>) -> Self {
        Self {
            owner: owner.into(),
            masters,
        }
    }

    /// Slot index of `file` in this list, `masters.len()` for the owner.
    pub fn slot_of(&self, file: &FileName) -> Option<usize> {
        if let Some(pos) = self.masters.iter().position(|m| m == file) {
            return Some(pos);
        }
        (*file == self.owner).then_some(self.masters.len())
    }

    /// File at a slot index. Any index at or past the end of the master
    /// list refers to the owner.
    pub fn file_at(&self, slot: usize) -> &FileName {
        self.masters.get(slot).unwrap_or(&self.owner)
    }

    /// Whether `file` is the owner or one of its masters.
    pub fn contains(&self, file: &FileName) -> bool {
        self.slot_of(file).is_some()
    }

    /// Slot index for `file`, appending it as a new master when absent.
    /// Returns `None` once the slot byte is exhausted.
    pub fn ensure_master(&mut self, file: &FileName) -> Option<usize> {
        if let Some(slot) = self.slot_of(file) {
            return Some(slot);
        }
        // The owner must keep a representable slot after the append.
        if self.masters.len() + 1 > MAX_FILE_SLOT {
            return None;
        }
        self.masters.push(file.clone());
        Some(self.masters.len() - 1)
    }
}

// ---------------------------------------------------------------------------
// FormId
// ---------------------------------------------------------------------------

/// Long-form record identity: defining file plus object number.
///
/// `file == None` is the null identity used by "no reference" fields. Null
/// is always valid and always converts to the raw value 0.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FormId {
    file: Option<FileName>,
    object_id: u32,
}

impl FormId {
    /// The null identity.
    pub const NULL: FormId = FormId {
        file: None,
        object_id: 0,
    };

    pub fn new(file: impl Into<FileName>, object_id: u32) -> Self {
        Self {
            file: Some(file.into()),
            object_id: object_id & OBJECT_ID_MASK,
        }
    }

    pub fn is_null(&self) -> bool {
        self.file.is_none()
    }

    pub fn file(&self) -> Option<&FileName> {
        self.file.as_ref()
    }

    pub fn object_id(&self) -> u32 {
        self.object_id
    }

    /// Decode a short FormID produced by the owner of `frame`.
    pub fn from_short(raw: u32, frame: &MasterList) -> Self {
        if raw == 0 {
            return Self::NULL;
        }
        let slot = (raw >> 24) as usize;
        Self::new(frame.file_at(slot).clone(), raw & OBJECT_ID_MASK)
    }

    /// Encode for the owner of `frame`. `None` if the defining file is
    /// neither the owner nor one of its masters.
    pub fn to_short(&self, frame: &MasterList) -> Option<u32> {
        let Some(file) = &self.file else {
            return Some(0);
        };
        let slot = frame.slot_of(file)?;
        Some(((slot as u32) << 24) | self.object_id)
    }

    /// Encode for the owner of `frame`, adding the defining file to its
    /// masters when missing. `None` only when the master list is full.
    pub fn to_short_for_write(&self, frame: &mut MasterList) -> Option<u32> {
        let Some(file) = &self.file else {
            return Some(0);
        };
        let slot = frame.ensure_master(file)?;
        Some(((slot as u32) << 24) | self.object_id)
    }

    /// Whether this identity resolves inside `frame`'s master chain.
    pub fn is_valid(&self, frame: &MasterList) -> bool {
        match &self.file {
            None => true,
            Some(file) => frame.contains(file),
        }
    }

    /// Replace this identity if `mapping` names it. Returns whether it changed.
    pub fn remap(&mut self, mapping: &HashMap<FormId, FormId>) -> bool {
        match mapping.get(self) {
            Some(new) if new != self => {
                *self = new.clone();
                true
            }
            _ => false,
        }
    }
}

impl Default for FormId {
    fn default() -> Self {
        Self::NULL
    }
}

impl fmt::Debug for FormId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FormId({self})")
    }
}

impl fmt::Display for FormId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.file {
            None => f.write_str("NULL"),
            Some(file) => write!(f, "{file}:{:06X}", self.object_id),
        }
    }
}
