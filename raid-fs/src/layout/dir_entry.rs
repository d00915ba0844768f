use std::str;

use zerocopy::{AsBytes, FromBytes, FromZeroes};

/// Longest entry name; one byte of the name field is reserved for NUL.
pub const NAME_MAX: usize = 27;

/// One slot of a directory's entry array.
///
/// A fully zeroed slot is free (or a tombstone left by removal). An entry
/// whose target is inode 0 is still live as long as its name is set; that
/// case only arises for `..` entries under the root.
#[repr(C)]
#[derive(Debug, Clone, FromZeroes, FromBytes, AsBytes)]
pub struct DirEntry {
    name: [u8; NAME_MAX + 1],
    num: u32,
}

impl DirEntry {
    /// On-disk size of one slot.
    pub const SIZE: usize = 32;

    /// `name` must be a validated component: non-empty and at most
    /// [`NAME_MAX`] bytes.
    pub fn new(name: &str, num: u32) -> Self {
        let mut bytes = [0; NAME_MAX + 1];
        let len = name.len().min(NAME_MAX);
        bytes[..len].copy_from_slice(&name.as_bytes()[..len]);
        Self { name: bytes, num }
    }

    pub fn name(&self) -> &str {
        let len = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(NAME_MAX + 1);
        str::from_utf8(&self.name[..len]).unwrap_or("")
    }

    #[inline]
    pub fn inode(&self) -> u32 {
        self.num
    }

    #[inline]
    pub fn is_free(&self) -> bool {
        self.num == 0 && self.name[0] == 0
    }
}
