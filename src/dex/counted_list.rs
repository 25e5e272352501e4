use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::dex::buffer::{DexReader, DexWriter};
use crate::dex::error::DexError;

/// A shared integer slot, typically a count field in a header. Clones refer
/// to the same slot.
#[derive(Clone, Default)]
pub struct IntegerCell(Arc<AtomicU32>);

impl IntegerCell
{
    pub fn new(value: u32) -> Self
    {
        IntegerCell(Arc::new(AtomicU32::new(value)))
    }

    pub fn get(&self) -> u32
    {
        self.0.load(Ordering::Acquire)
    }

    pub fn set(&self, value: u32)
    {
        self.0.store(value, Ordering::Release)
    }
}

impl fmt::Debug for IntegerCell
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "IntegerCell({})", self.get())
    }
}

/// A fixed-layout item that can be read from and written to a dex stream.
pub trait Block: Sized
{
    fn read(reader: &mut DexReader) -> Result<Self, DexError>;
    fn write(&self, writer: &mut DexWriter);
}

/// Items whose count lives in a separate cell.
///
/// The cell always holds `len()` after a mutation, so anything that writes
/// the cell out (a header, a list prefix) sees the current size.
pub struct CountedList<T>
{
    items: Vec<T>,
    item_count: IntegerCell,
}

impl<T> CountedList<T>
{
    /// Binds an empty list to `item_count`. The cell keeps its value so a
    /// following `read` knows how many items to decode.
    pub fn new(item_count: IntegerCell) -> Self
    {
        CountedList { items: Vec::new(), item_count }
    }

    pub fn from_items(item_count: IntegerCell, items: Vec<T>) -> Self
    {
        let list = CountedList { items, item_count };
        list.refresh();
        list
    }

    pub fn item_count(&self) -> &IntegerCell
    {
        &self.item_count
    }

    pub fn len(&self) -> usize
    {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&T>
    {
        self.items.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut T>
    {
        self.items.get_mut(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T>
    {
        self.items.iter()
    }

    pub fn as_slice(&self) -> &[T]
    {
        &self.items
    }

    pub fn push(&mut self, item: T)
    {
        self.items.push(item);
        self.refresh();
    }

    pub fn insert(&mut self, index: usize, item: T) -> Result<(), DexError>
    {
        if index > self.items.len()
        {
            fail!("Insert index {} is out of bounds for list of {}", index, self.items.len());
        }
        self.items.insert(index, item);
        self.refresh();
        Ok(())
    }

    pub fn remove(&mut self, index: usize) -> Option<T>
    {
        if index >= self.items.len()
        {
            return None;
        }
        let item = self.items.remove(index);
        self.refresh();
        Some(item)
    }

    pub fn truncate(&mut self, len: usize)
    {
        self.items.truncate(len);
        self.refresh();
    }

    pub fn clear(&mut self)
    {
        self.items.clear();
        self.refresh();
    }

    /// Grows with items from `creator` or shrinks to exactly `size`.
    pub fn set_size<F: FnMut(usize) -> T>(&mut self, size: usize, mut creator: F)
    {
        if size < self.items.len()
        {
            self.items.truncate(size);
        }
        else
        {
            let start = self.items.len();
            self.items.reserve(size - start);
            for index in start..size
            {
                self.items.push(creator(index));
            }
        }
        self.refresh();
    }

    /// Rewrites the count cell from the current length.
    pub fn refresh(&self)
    {
        self.item_count.set(self.items.len() as u32);
    }

    pub fn into_items(self) -> Vec<T>
    {
        self.items
    }
}

impl<T: Block> CountedList<T>
{
    /// Replaces the contents with exactly `item_count` items read from `reader`.
    pub fn read(&mut self, reader: &mut DexReader) -> Result<(), DexError>
    {
        let count = self.item_count.get() as usize;
        let result = Self::read_items(reader, count);
        match result
        {
            Ok(items) =>
            {
                self.items = items;
                self.refresh();
                Ok(())
            }
            Err(e) =>
            {
                // a failed read leaves the previous contents in place
                self.refresh();
                Err(e)
            }
        }
    }

    fn read_items(reader: &mut DexReader, count: usize) -> Result<Vec<T>, DexError>
    {
        if count > reader.remaining()
        {
            fail!("Item count {} cannot fit in the remaining {} bytes", count, reader.remaining());
        }
        let mut items = Vec::with_capacity(count);
        for index in 0..count
        {
            let item = T::read(reader).map_err(|e| err!(e, "item {}", index))?;
            items.push(item);
        }
        Ok(items)
    }

    pub fn write(&self, writer: &mut DexWriter)
    {
        self.refresh();
        for item in &self.items
        {
            item.write(writer);
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for CountedList<T>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("CountedList").field("item_count", &self.item_count).field("items", &self.items).finish()
    }
}

impl<'a, T> IntoIterator for &'a CountedList<T>
{
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter
    {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[derive(Debug, Clone, PartialEq, Default)]
    struct Word(u16);

    impl Block for Word
    {
        fn read(reader: &mut DexReader) -> Result<Self, DexError>
        {
            Ok(Word(reader.read_u2()?))
        }

        fn write(&self, writer: &mut DexWriter)
        {
            writer.write_u2(self.0);
        }
    }

    #[test]
    fn mutations_keep_cell_in_sync()
    {
        let cell = IntegerCell::new(99);
        let mut list = CountedList::new(cell.clone());
        assert_eq!(cell.get(), 99);

        list.push(Word(1));
        assert_eq!(cell.get(), 1);
        list.push(Word(2));
        assert_eq!(list.len() as u32, cell.get());
        list.insert(1, Word(3)).unwrap();
        assert_eq!(cell.get(), 3);
        assert!(list.insert(10, Word(4)).is_err());
        assert_eq!(cell.get(), 3);
        assert_eq!(list.remove(0), Some(Word(1)));
        assert_eq!(list.remove(5), None);
        assert_eq!(list.len() as u32, cell.get());
        list.set_size(6, |i| Word(i as u16));
        assert_eq!(cell.get(), 6);
        list.set_size(1, |_| Word(0));
        assert_eq!(cell.get(), 1);
        list.clear();
        assert_eq!(cell.get(), 0);
    }

    #[test]
    fn read_uses_count_from_cell()
    {
        let bytes = [0x01, 0x00, 0x02, 0x00, 0x03, 0x00];
        let cell = IntegerCell::default();
        let mut list: CountedList<Word> = CountedList::new(cell.clone());
        cell.set(2);
        list.read(&mut DexReader::new(&bytes)).unwrap();
        assert_eq!(list.as_slice(), &[Word(1), Word(2)]);

        cell.set(4);
        assert!(list.read(&mut DexReader::new(&bytes)).is_err());
        assert_eq!(cell.get(), 2);
    }

    #[test]
    fn refresh_resyncs_external_edits()
    {
        let cell = IntegerCell::default();
        let list = CountedList::from_items(cell.clone(), vec![Word(7), Word(8)]);
        cell.set(12);
        list.refresh();
        assert_eq!(cell.get(), 2);
        let mut writer = DexWriter::new();
        list.write(&mut writer);
        assert_eq!(writer.into_bytes(), vec![7, 0, 8, 0]);
    }
}
