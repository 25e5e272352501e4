use std::sync::Arc;

use crate::dex::backed::DexBackedDexFile;
use crate::dex::buffer::DexReader;
use crate::dex::encoded_values::*;
use crate::dex::error::DexError;
use crate::dex::model::{Annotation, AnnotationVisibility, Items};
use crate::dex::raw::NO_OFFSET;
use crate::dex::reference::RefResolver;

/// An annotation_item. Elements are decoded each time they are asked for.
#[derive(Debug, Clone)]
pub struct DexBackedAnnotation
{
    dex: DexBackedDexFile,
    visibility: AnnotationVisibility,
    type_index: u32,
    elements_offset: u32,
}

impl DexBackedAnnotation
{
    pub(crate) fn new(dex: DexBackedDexFile, offset: u32) -> Result<DexBackedAnnotation, DexError>
    {
        let mut reader = dex.buffer().reader_at(offset as usize)?;
        let visibility = AnnotationVisibility::from_value(reader.read_u1()?)?;
        let type_index = reader.read_uleb128()?;
        let elements_offset = reader.tell() as u32;
        Ok(DexBackedAnnotation { dex, visibility, type_index, elements_offset })
    }
}

impl Annotation for DexBackedAnnotation
{
    fn visibility(&self) -> AnnotationVisibility
    {
        self.visibility
    }

    fn annotation_type(&self) -> Result<String, DexError>
    {
        self.dex.type_name(self.type_index)
    }

    fn elements(&self) -> Result<Vec<AnnotationElement>, DexError>
    {
        let mut reader = self.dex.buffer().reader_at(self.elements_offset as usize)?;
        let size = reader.read_uleb128()?;
        (0..size).map(|_| AnnotationElement::read(&mut reader, &self.dex)).collect()
    }
}

/// The annotations of an annotation_set_item; offset 0 is the empty set.
pub(crate) fn annotation_set(dex: &DexBackedDexFile, offset: u32) -> Items<'_, Arc<dyn Annotation>>
{
    if offset == NO_OFFSET
    {
        return Box::new(std::iter::empty());
    }
    let size = match dex.buffer().read_small_uint_at(offset as usize)
    {
        Ok(size) => size,
        Err(e) => return Box::new(std::iter::once(Err(e))),
    };
    Box::new((0..size).map(move |index| -> Result<Arc<dyn Annotation>, DexError> {
        let entry = dex.buffer().read_small_uint_at(offset as usize + 4 + index as usize * 4)?;
        Ok(Arc::new(DexBackedAnnotation::new(dex.clone(), entry)?) as Arc<dyn Annotation>)
    }))
}

/// The set offsets of an annotation_set_ref_list, one per parameter.
pub(crate) fn annotation_set_refs(dex: &DexBackedDexFile, offset: u32) -> Result<Vec<u32>, DexError>
{
    if offset == NO_OFFSET
    {
        return Ok(Vec::new());
    }
    let mut reader = dex.buffer().reader_at(offset as usize)?;
    let size = reader.read_small_uint()?;
    (0..size).map(|_| reader.read_small_uint()).collect()
}

/// Header of an annotations_directory_item. The per-member tables after it
/// are sorted by member index and searched in place.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct AnnotationsDirectory
{
    offset: u32,
    fields_size: u32,
    methods_size: u32,
    parameters_size: u32,
}

impl AnnotationsDirectory
{
    const HEADER_SIZE: u32 = 16;
    const ENTRY_SIZE: u32 = 8;

    pub fn read(dex: &DexBackedDexFile, offset: u32) -> Result<AnnotationsDirectory, DexError>
    {
        if offset == NO_OFFSET
        {
            return Ok(AnnotationsDirectory::default());
        }
        let mut reader = dex.buffer().reader_at(offset as usize)?;
        reader.skip(4)?;
        let directory = AnnotationsDirectory {
            offset,
            fields_size: reader.read_small_uint()?,
            methods_size: reader.read_small_uint()?,
            parameters_size: reader.read_small_uint()?,
        };
        let entries = directory.fields_size as u64 + directory.methods_size as u64 + directory.parameters_size as u64;
        if entries * Self::ENTRY_SIZE as u64 > reader.remaining() as u64
        {
            fail!(
                "Annotations directory at 0x{:x} has {} entries, more than the file holds",
                offset,
                entries
            );
        }
        Ok(directory)
    }

    pub fn class_annotations_offset(&self, dex: &DexBackedDexFile) -> Result<u32, DexError>
    {
        if self.offset == NO_OFFSET { Ok(NO_OFFSET) } else { dex.buffer().read_small_uint_at(self.offset as usize) }
    }

    /// Start of the table that follows `preceding` entries of earlier tables.
    fn table_start(&self, preceding: u32) -> usize
    {
        self.offset as usize + Self::HEADER_SIZE as usize + preceding as usize * Self::ENTRY_SIZE as usize
    }

    pub fn field_annotations_offset(&self, dex: &DexBackedDexFile, field_index: u32) -> Result<u32, DexError>
    {
        self.seek(dex, self.table_start(0), self.fields_size, field_index)
    }

    pub fn method_annotations_offset(&self, dex: &DexBackedDexFile, method_index: u32) -> Result<u32, DexError>
    {
        self.seek(dex, self.table_start(self.fields_size), self.methods_size, method_index)
    }

    pub fn parameter_annotations_offset(&self, dex: &DexBackedDexFile, method_index: u32) -> Result<u32, DexError>
    {
        // both sizes are small uints, so the sum fits
        let preceding = self.fields_size + self.methods_size;
        self.seek(dex, self.table_start(preceding), self.parameters_size, method_index)
    }

    fn seek(&self, dex: &DexBackedDexFile, start: usize, count: u32, index: u32) -> Result<u32, DexError>
    {
        let (mut low, mut high) = (0u32, count);
        while low < high
        {
            let mid = low + (high - low) / 2;
            let entry = start + mid as usize * Self::ENTRY_SIZE as usize;
            let key = dex.buffer().read_u4_at(entry)?;
            if key == index
            {
                return dex.buffer().read_small_uint_at(entry + 4);
            }
            if key < index { low = mid + 1; } else { high = mid; }
        }
        Ok(NO_OFFSET)
    }
}

/// Steps over one encoded_value without resolving anything it refers to.
pub(crate) fn skip_encoded_value(reader: &mut DexReader) -> Result<(), DexError>
{
    let header = reader.read_u1()?;
    let value_type = header & 0x1f;
    let value_arg = (header >> 5) as usize;
    match value_type
    {
        VALUE_BYTE | VALUE_SHORT | VALUE_CHAR | VALUE_INT | VALUE_LONG | VALUE_FLOAT | VALUE_DOUBLE | VALUE_METHOD_TYPE
        | VALUE_METHOD_HANDLE | VALUE_STRING | VALUE_TYPE | VALUE_FIELD | VALUE_METHOD | VALUE_ENUM => reader.skip(value_arg + 1)?,
        VALUE_ARRAY =>
        {
            let size = reader.read_uleb128()?;
            for _ in 0..size
            {
                skip_encoded_value(reader)?;
            }
        }
        VALUE_ANNOTATION =>
        {
            reader.skip_uleb128()?;
            let size = reader.read_uleb128()?;
            for _ in 0..size
            {
                reader.skip_uleb128()?;
                skip_encoded_value(reader)?;
            }
        }
        VALUE_NULL | VALUE_BOOLEAN => {}
        _ => fail!("Invalid encoded value type: 0x{:x}", value_type),
    }
    Ok(())
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn skips_nested_values()
    {
        // array of [int 0x1234, annotation { type 1, a = null }, true], then a marker byte
        let bytes = [0x1c, 0x03, 0x24, 0x34, 0x12, 0x1d, 0x01, 0x01, 0x00, 0x1e, 0x3f, 0xaa];
        let mut reader = DexReader::new(&bytes);
        skip_encoded_value(&mut reader).unwrap();
        assert_eq!(reader.read_u1().unwrap(), 0xaa);
    }

    #[test]
    fn rejects_unknown_value_type()
    {
        let mut reader = DexReader::new(&[0x05]);
        assert!(skip_encoded_value(&mut reader).is_err());
    }
}
