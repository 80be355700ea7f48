/********************************************************************************
 * Copyright (c) 2024 Contributors to the Eclipse Foundation
 *
 * See the NOTICE file(s) distributed with this work for additional
 * information regarding copyright ownership.
 *
 * This program and the accompanying materials are made available under the
 * terms of the Apache License Version 2.0 which is available at
 * https://www.apache.org/licenses/LICENSE-2.0
 *
 * SPDX-License-Identifier: Apache-2.0
 ********************************************************************************/

//! Ownership primitives.
//!
//! [`HandleTable`] is a generational arena: entries are addressed by a [`HandleId`] that
//! stays stable for the life of the entry and never aliases a later entry stored in the
//! same slot. Cross-references between resources (a publisher pointing at its session) go
//! through these ids, never through the storage address of the owner.
//!
//! [`Owned`] is the single-owner slot used when a handle has to live in a place the borrow
//! checker cannot follow (struct fields, collections, foreign callers). It tracks whether
//! the value was moved out or released so misuse is reported instead of silently ignored.

use crate::error::SessionError;
use async_trait::async_trait;
use std::fmt::{Debug, Display, Formatter};
use std::mem;

/// Stable identifier of an entry in a [`HandleTable`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId {
    index: u32,
    generation: u32,
}

impl HandleId {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl Display for HandleId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

enum Entry<T> {
    Occupied { generation: u32, value: T },
    Vacant { generation: u32 },
}

/// Generational arena of owned values.
pub struct HandleTable<T> {
    entries: Vec<Entry<T>>,
    free: Vec<u32>,
    len: usize,
}

impl<T> Default for HandleTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> HandleTable<T> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn insert(&mut self, value: T) -> HandleId {
        self.len += 1;

        if let Some(index) = self.free.pop() {
            let slot = &mut self.entries[index as usize];
            let generation = match slot {
                Entry::Vacant { generation } => generation.wrapping_add(1),
                // free list only ever holds vacant slots
                Entry::Occupied { generation, .. } => generation.wrapping_add(1),
            };
            *slot = Entry::Occupied { generation, value };
            return HandleId { index, generation };
        }

        let index = self.entries.len() as u32;
        self.entries.push(Entry::Occupied {
            generation: 0,
            value,
        });
        HandleId {
            index,
            generation: 0,
        }
    }

    pub fn contains(&self, id: HandleId) -> bool {
        self.get(id).is_ok()
    }

    pub fn get(&self, id: HandleId) -> Result<&T, SessionError> {
        match self.entries.get(id.index as usize) {
            Some(Entry::Occupied { generation, value }) if *generation == id.generation => {
                Ok(value)
            }
            _ => Err(SessionError::InvalidHandle),
        }
    }

    pub fn get_mut(&mut self, id: HandleId) -> Result<&mut T, SessionError> {
        match self.entries.get_mut(id.index as usize) {
            Some(Entry::Occupied { generation, value }) if *generation == id.generation => {
                Ok(value)
            }
            _ => Err(SessionError::InvalidHandle),
        }
    }

    pub fn remove(&mut self, id: HandleId) -> Result<T, SessionError> {
        let Some(slot) = self.entries.get_mut(id.index as usize) else {
            return Err(SessionError::InvalidHandle);
        };
        match slot {
            Entry::Occupied { generation, .. } if *generation == id.generation => {}
            _ => return Err(SessionError::InvalidHandle),
        }

        let vacant = Entry::Vacant {
            generation: id.generation,
        };
        let Entry::Occupied { value, .. } = mem::replace(slot, vacant) else {
            return Err(SessionError::InvalidHandle);
        };
        self.free.push(id.index);
        self.len -= 1;
        Ok(value)
    }

    /// Removes every live entry, returning them with their ids.
    pub fn drain(&mut self) -> Vec<(HandleId, T)> {
        let mut drained = Vec::with_capacity(self.len);
        for (index, slot) in self.entries.iter_mut().enumerate() {
            if let Entry::Occupied { generation, .. } = slot {
                let generation = *generation;
                if let Entry::Occupied { value, .. } =
                    mem::replace(slot, Entry::Vacant { generation })
                {
                    let index = index as u32;
                    self.free.push(index);
                    drained.push((HandleId { index, generation }, value));
                }
            }
        }
        self.len = 0;
        drained
    }

    pub fn iter(&self) -> impl Iterator<Item = (HandleId, &T)> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| match slot {
                Entry::Occupied { generation, value } => Some((
                    HandleId {
                        index: index as u32,
                        generation: *generation,
                    },
                    value,
                )),
                Entry::Vacant { .. } => None,
            })
    }
}

impl<T> Debug for HandleTable<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandleTable")
            .field("len", &self.len)
            .field("slots", &self.entries.len())
            .finish()
    }
}

/// A resource that must be explicitly released by its single owner.
#[async_trait]
pub trait Release: Send + Sized {
    /// Error reported when the resource is used after it was released.
    fn released_error() -> SessionError;

    /// Consumes the resource and releases whatever it holds.
    async fn release(self) -> Result<(), SessionError>;
}

enum Slot<T> {
    Live(T),
    Moved,
    Released,
    Null,
}

/// Single-owner slot with runtime move / loan / release tracking.
pub struct Owned<T: Release> {
    slot: Slot<T>,
}

impl<T: Release> Owned<T> {
    pub fn new(value: T) -> Self {
        Self {
            slot: Slot::Live(value),
        }
    }

    /// An empty slot that is safe to release or drop.
    pub fn null() -> Self {
        Self { slot: Slot::Null }
    }

    /// `true` while the slot holds a live value.
    pub fn check(&self) -> bool {
        matches!(self.slot, Slot::Live(_))
    }

    pub fn loan(&self) -> Result<&T, SessionError> {
        match &self.slot {
            Slot::Live(value) => Ok(value),
            Slot::Released => Err(T::released_error()),
            Slot::Moved | Slot::Null => Err(SessionError::InvalidHandle),
        }
    }

    pub fn loan_mut(&mut self) -> Result<&mut T, SessionError> {
        match &mut self.slot {
            Slot::Live(value) => Ok(value),
            Slot::Released => Err(T::released_error()),
            Slot::Moved | Slot::Null => Err(SessionError::InvalidHandle),
        }
    }

    /// Moves ownership into a new slot. The source is left invalid.
    pub fn take(&mut self) -> Result<Owned<T>, SessionError> {
        match mem::replace(&mut self.slot, Slot::Moved) {
            Slot::Live(value) => Ok(Owned::new(value)),
            previous => {
                self.slot = previous;
                Err(SessionError::InvalidHandle)
            }
        }
    }

    pub fn into_inner(mut self) -> Result<T, SessionError> {
        match mem::replace(&mut self.slot, Slot::Moved) {
            Slot::Live(value) => Ok(value),
            _ => Err(SessionError::InvalidHandle),
        }
    }

    /// Releases the held value. Any call after the first fails with `InvalidHandle`.
    pub async fn release(&mut self) -> Result<(), SessionError> {
        match mem::replace(&mut self.slot, Slot::Released) {
            Slot::Live(value) => value.release().await,
            previous => {
                self.slot = previous;
                Err(SessionError::InvalidHandle)
            }
        }
    }
}

impl<T: Release> From<T> for Owned<T> {
    fn from(value: T) -> Self {
        Owned::new(value)
    }
}

impl<T: Release> Debug for Owned<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let state = match self.slot {
            Slot::Live(_) => "live",
            Slot::Moved => "moved",
            Slot::Released => "released",
            Slot::Null => "null",
        };
        f.debug_struct("Owned").field("state", &state).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{HandleTable, Owned, Release};
    use crate::error::SessionError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn removed_handle_is_stale_after_slot_reuse() {
        let mut table = HandleTable::new();
        let first = table.insert("first");
        assert_eq!(table.remove(first), Ok("first"));

        let second = table.insert("second");
        assert_eq!(second.index(), first.index());
        assert_ne!(second.generation(), first.generation());

        assert_eq!(table.get(first), Err(SessionError::InvalidHandle));
        assert_eq!(table.remove(first), Err(SessionError::InvalidHandle));
        assert_eq!(table.get(second), Ok(&"second"));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn drain_empties_table_and_invalidates_ids() {
        let mut table = HandleTable::new();
        let a = table.insert(1);
        let b = table.insert(2);
        table.remove(a).expect("a is live");
        let c = table.insert(3);

        let mut drained: Vec<i32> = table.drain().into_iter().map(|(_, v)| v).collect();
        drained.sort();

        assert_eq!(drained, vec![2, 3]);
        assert!(table.is_empty());
        assert!(!table.contains(b));
        assert!(!table.contains(c));
    }

    #[test]
    fn get_mut_updates_in_place() {
        let mut table = HandleTable::new();
        let id = table.insert(String::from("a"));
        table.get_mut(id).expect("live").push('b');
        assert_eq!(table.get(id).map(String::as_str), Ok("ab"));
        assert_eq!(table.iter().count(), 1);
    }

    struct CountingResource {
        releases: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Release for CountingResource {
        fn released_error() -> SessionError {
            SessionError::PublisherUndeclared
        }

        async fn release(self) -> Result<(), SessionError> {
            self.releases.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn counting() -> (Owned<CountingResource>, Arc<AtomicUsize>) {
        let releases = Arc::new(AtomicUsize::new(0));
        let owned = Owned::new(CountingResource {
            releases: releases.clone(),
        });
        (owned, releases)
    }

    #[tokio::test]
    async fn release_twice_reports_invalid_handle() {
        let (mut owned, releases) = counting();

        assert_eq!(owned.release().await, Ok(()));
        assert_eq!(owned.release().await, Err(SessionError::InvalidHandle));
        assert_eq!(releases.load(Ordering::SeqCst), 1);
        assert_eq!(owned.loan().err(), Some(SessionError::PublisherUndeclared));
    }

    #[tokio::test]
    async fn take_moves_ownership_and_invalidates_source() {
        let (mut source, releases) = counting();

        let mut moved = source.take().expect("source is live");
        assert!(!source.check());
        assert!(moved.check());
        assert_eq!(source.loan().err(), Some(SessionError::InvalidHandle));
        assert_eq!(source.take().err(), Some(SessionError::InvalidHandle));
        assert_eq!(source.release().await, Err(SessionError::InvalidHandle));

        moved.release().await.expect("moved slot releases");
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn null_slot_is_safe_to_release() {
        let mut owned: Owned<CountingResource> = Owned::null();
        assert!(!owned.check());
        assert_eq!(owned.release().await, Err(SessionError::InvalidHandle));
        assert_eq!(owned.into_inner().err(), Some(SessionError::InvalidHandle));
    }
}
