// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! A thin, `memmap`-free stand-in for a shared-memory object: a fixed-size
//! byte buffer any number of `SharedVmo` handles (duplicates of the same
//! underlying allocation) can read and write concurrently.

use std::io;
use std::sync::{Arc, Mutex};

/// A duplicable reference to a shared, fixed-size byte buffer.
#[derive(Clone)]
pub struct SharedVmo {
    storage: Arc<Mutex<Vec<u8>>>,
}

impl SharedVmo {
    /// Creates and maps a zero-filled buffer of `size` bytes.
    #[must_use]
    pub fn create_and_map(size: usize) -> Self {
        Self { storage: Arc::new(Mutex::new(vec![0_u8; size])) }
    }

    /// Duplicates this handle: the result shares the same underlying
    /// storage, like duplicating a kernel VMO handle.
    #[must_use]
    pub fn duplicate_handle(&self) -> Self {
        self.clone()
    }

    /// The buffer's size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.storage.lock().expect("shared vmo poisoned").len()
    }

    /// Whether the buffer has zero length.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies `data` into the buffer starting at `offset`.
    pub fn write_at(&self, offset: usize, data: &[u8]) -> io::Result<()> {
        let mut storage = self.storage.lock().expect("shared vmo poisoned");
        let end = offset.checked_add(data.len()).ok_or_else(out_of_range)?;
        storage
            .get_mut(offset..end)
            .ok_or_else(out_of_range)?
            .copy_from_slice(data);
        Ok(())
    }

    /// Copies `len` bytes out of the buffer starting at `offset`.
    pub fn read_at(&self, offset: usize, len: usize) -> io::Result<Vec<u8>> {
        let storage = self.storage.lock().expect("shared vmo poisoned");
        let end = offset.checked_add(len).ok_or_else(out_of_range)?;
        storage.get(offset..end).map(<[u8]>::to_vec).ok_or_else(out_of_range)
    }
}

fn out_of_range() -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, "shared vmo access out of range")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_shares_storage() {
        let vmo = SharedVmo::create_and_map(16);
        let dup = vmo.duplicate_handle();
        vmo.write_at(0, b"hello").unwrap();
        assert_eq!(dup.read_at(0, 5).unwrap(), b"hello");
    }

    #[test]
    fn out_of_range_access_is_an_error() {
        let vmo = SharedVmo::create_and_map(4);
        assert!(vmo.write_at(2, b"too long").is_err());
        assert!(vmo.read_at(10, 1).is_err());
    }
}
