//! Interning arenas. Entries are addressed by [`Handle`]s that stay valid
//! for the life of the pool; indices and data offsets are assigned once the
//! pool is sealed.

use std::borrow::Borrow;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::mem;
use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};
use std::sync::Mutex;

use once_cell::sync::OnceCell;

use crate::dex::error::DexError;
use crate::dex::raw::{NO_INDEX, NO_OFFSET};

/// A typed reference to a pool entry.
pub struct Handle<K>
{
    id: u32,
    _key: PhantomData<fn() -> K>,
}

impl<K> Handle<K>
{
    pub(crate) fn new(id: u32) -> Self
    {
        Handle { id, _key: PhantomData }
    }

    /// Position in interning order, not the final index.
    pub fn id(self) -> u32
    {
        self.id
    }
}

impl<K> Clone for Handle<K>
{
    fn clone(&self) -> Self
    {
        *self
    }
}

impl<K> Copy for Handle<K> {}

impl<K> PartialEq for Handle<K>
{
    fn eq(&self, other: &Self) -> bool
    {
        self.id == other.id
    }
}

impl<K> Eq for Handle<K> {}

impl<K> PartialOrd for Handle<K>
{
    fn partial_cmp(&self, other: &Self) -> Option<Ordering>
    {
        Some(self.cmp(other))
    }
}

impl<K> Ord for Handle<K>
{
    fn cmp(&self, other: &Self) -> Ordering
    {
        self.id.cmp(&other.id)
    }
}

impl<K> Hash for Handle<K>
{
    fn hash<H: Hasher>(&self, state: &mut H)
    {
        self.id.hash(state);
    }
}

impl<K> fmt::Debug for Handle<K>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "Handle({})", self.id)
    }
}

struct Interning<K>
{
    keys: Vec<K>,
    lookup: HashMap<K, u32>,
    sealed: bool,
}

impl<K> Default for Interning<K>
{
    fn default() -> Self
    {
        Interning { keys: Vec::new(), lookup: HashMap::new(), sealed: false }
    }
}

struct Entry<K>
{
    key: K,
    index: u32,
    offset: AtomicU32,
}

struct Sealed<K>
{
    entries: Vec<Entry<K>>,
    lookup: HashMap<K, u32>,
    /// Handle ids in index order.
    order: Vec<u32>,
}

pub struct Pool<K>
{
    name: &'static str,
    interning: Mutex<Interning<K>>,
    sealed: OnceCell<Sealed<K>>,
}

impl<K: Clone + Eq + Hash> Pool<K>
{
    pub fn new(name: &'static str) -> Self
    {
        Pool { name, interning: Mutex::new(Interning::default()), sealed: OnceCell::new() }
    }

    /// Returns the handle of `key`, adding it if it is new. Concurrent calls
    /// with equal keys get the same handle.
    pub fn intern(&self, key: K) -> Result<Handle<K>, DexError>
    {
        let mut interning = self.interning.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if interning.sealed
        {
            return Err(DexError::illegal_state(&format!("Cannot intern into the finalized {} pool", self.name)));
        }
        if let Some(id) = interning.lookup.get(&key)
        {
            return Ok(Handle::new(*id));
        }
        let id = interning.keys.len() as u32;
        interning.keys.push(key.clone());
        interning.lookup.insert(key, id);
        Ok(Handle::new(id))
    }

    pub fn len(&self) -> usize
    {
        match self.sealed.get()
        {
            Some(sealed) => sealed.entries.len(),
            None => self.interning.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).keys.len(),
        }
    }

    pub fn is_empty(&self) -> bool
    {
        self.len() == 0
    }

    pub fn is_sealed(&self) -> bool
    {
        self.sealed.get().is_some()
    }

    /// Stops interning and assigns indices in ascending `sort_key` order.
    /// If `sort_key` fails the pool is left open and unchanged.
    pub fn seal_by<S, F>(&self, mut sort_key: F) -> Result<(), DexError>
    where
        S: Ord,
        F: FnMut(&K) -> Result<S, DexError>,
    {
        let (keys, lookup, mut sort_keys) = {
            let mut interning = self.interning.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if interning.sealed
            {
                return Err(DexError::illegal_state(&format!("The {} pool is already finalized", self.name)));
            }
            let mut sort_keys = Vec::with_capacity(interning.keys.len());
            for (id, key) in interning.keys.iter().enumerate()
            {
                sort_keys.push((sort_key(key).map_err(|e| err!(e, "{} pool", self.name))?, id as u32));
            }
            interning.sealed = true;
            (mem::take(&mut interning.keys), mem::take(&mut interning.lookup), sort_keys)
        };
        sort_keys.sort();
        let order: Vec<u32> = sort_keys.into_iter().map(|(_, id)| id).collect();

        let mut indices = vec![NO_INDEX; keys.len()];
        for (index, id) in order.iter().enumerate()
        {
            indices[*id as usize] = index as u32;
        }
        let entries = keys
            .into_iter()
            .zip(indices)
            .map(|(key, index)| Entry { key, index, offset: AtomicU32::new(NO_OFFSET) })
            .collect();

        if self.sealed.set(Sealed { entries, lookup, order }).is_err()
        {
            return Err(DexError::illegal_state(&format!("The {} pool is already finalized", self.name)));
        }
        Ok(())
    }

    fn sealed(&self) -> Result<&Sealed<K>, DexError>
    {
        match self.sealed.get()
        {
            Some(sealed) => Ok(sealed),
            None => Err(DexError::illegal_state(&format!("The {} pool is not finalized", self.name))),
        }
    }

    fn entry(&self, handle: Handle<K>) -> Result<&Entry<K>, DexError>
    {
        match self.sealed()?.entries.get(handle.id as usize)
        {
            Some(entry) => Ok(entry),
            None => fail!("Unknown {} handle {}", self.name, handle.id),
        }
    }

    pub fn key(&self, handle: Handle<K>) -> Result<&K, DexError>
    {
        Ok(&self.entry(handle)?.key)
    }

    /// The assigned index, or `NO_INDEX` before the pool is sealed.
    pub fn index(&self, handle: Handle<K>) -> u32
    {
        self.entry(handle).map(|entry| entry.index).unwrap_or(NO_INDEX)
    }

    /// The data offset recorded by the writer, or `NO_OFFSET`.
    pub fn offset(&self, handle: Handle<K>) -> u32
    {
        self.entry(handle).map(|entry| entry.offset.load(AtomicOrdering::Relaxed)).unwrap_or(NO_OFFSET)
    }

    pub fn set_offset(&self, handle: Handle<K>, offset: u32) -> Result<(), DexError>
    {
        self.entry(handle)?.offset.store(offset, AtomicOrdering::Relaxed);
        Ok(())
    }

    /// Finds an already interned key. Only valid once sealed.
    pub fn lookup<Q>(&self, key: &Q) -> Result<Handle<K>, DexError>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + fmt::Debug + ?Sized,
    {
        match self.sealed()?.lookup.get(key)
        {
            Some(id) => Ok(Handle::new(*id)),
            None => fail!("{:?} is not in the {} pool", key, self.name),
        }
    }

    pub fn index_of<Q>(&self, key: &Q) -> Result<u32, DexError>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + fmt::Debug + ?Sized,
    {
        let handle = self.lookup(key)?;
        Ok(self.index(handle))
    }

    /// Entries in index order.
    pub fn sorted(&self) -> Result<Vec<(Handle<K>, &K)>, DexError>
    {
        let sealed = self.sealed()?;
        Ok(sealed.order.iter().map(|id| (Handle::new(*id), &sealed.entries[*id as usize].key)).collect())
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::dex::error::DexErrorKind;

    #[test]
    fn interning_is_idempotent()
    {
        let pool: Pool<String> = Pool::new("string");
        let a = pool.intern("b".to_string()).unwrap();
        let b = pool.intern("a".to_string()).unwrap();
        assert_eq!(pool.intern("b".to_string()).unwrap(), a);
        assert_ne!(a, b);
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.index(a), NO_INDEX);
    }

    #[test]
    fn sealing_assigns_sorted_indices()
    {
        let pool: Pool<String> = Pool::new("string");
        let b = pool.intern("b".to_string()).unwrap();
        let a = pool.intern("a".to_string()).unwrap();
        pool.seal_by(|key| Ok(key.clone())).unwrap();
        assert_eq!(pool.index(a), 0);
        assert_eq!(pool.index(b), 1);
        assert_eq!(pool.index_of("b").unwrap(), 1);
        assert_eq!(pool.offset(a), NO_OFFSET);
        pool.set_offset(a, 0x70).unwrap();
        assert_eq!(pool.offset(a), 0x70);
        let sorted: Vec<&String> = pool.sorted().unwrap().into_iter().map(|(_, key)| key).collect();
        assert_eq!(sorted, vec!["a", "b"]);
    }

    #[test]
    fn sealed_pool_rejects_interning()
    {
        let pool: Pool<String> = Pool::new("string");
        pool.seal_by(|key| Ok(key.clone())).unwrap();
        let e = pool.intern("late".to_string()).unwrap_err();
        assert_eq!(e.kind(), DexErrorKind::IllegalState);
        assert_eq!(pool.seal_by(|key| Ok(key.clone())).unwrap_err().kind(), DexErrorKind::IllegalState);
    }

    #[test]
    fn lookup_requires_seal()
    {
        let pool: Pool<String> = Pool::new("string");
        pool.intern("x".to_string()).unwrap();
        assert!(pool.lookup("x").is_err());
        pool.seal_by(|key| Ok(key.clone())).unwrap();
        assert!(pool.lookup("x").is_ok());
        assert!(pool.lookup("y").is_err());
    }

    #[test]
    fn failed_seal_leaves_the_pool_open()
    {
        let pool: Pool<String> = Pool::new("string");
        let good = pool.intern("good".to_string()).unwrap();
        pool.intern("bad".to_string()).unwrap();
        let e = pool
            .seal_by(|key| if key == "bad" { Err(DexError::new("no sort key")) } else { Ok(key.clone()) })
            .unwrap_err();
        assert_eq!(e.kind(), DexErrorKind::Decode);
        assert!(!pool.is_sealed());
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.intern("good".to_string()).unwrap(), good);

        pool.seal_by(|key| Ok(key.clone())).unwrap();
        assert_eq!(pool.index(good), 1);
    }
}
