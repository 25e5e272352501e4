//! Views over a dex image that decode on access.
//!
//! A [`DexBackedDexFile`] is a cheap handle around the shared image. Class,
//! member and annotation views clone that handle and remember only the
//! offsets they need, so they can outlive the borrow that produced them and
//! be sent across threads.

mod class_def;
mod code;
mod value;

use std::fs;
use std::path::Path;
use std::sync::Arc;

use log::{debug, info, warn};

pub use class_def::{DexBackedClassDef, DexBackedField, DexBackedMethod};
pub use code::DexBackedMethodImplementation;
pub use value::DexBackedAnnotation;

use crate::dex::buffer::DexBuffer;
use crate::dex::counted_list::Block;
use crate::dex::encoded_values::{read_encoded_array, utf16_cmp, EncodedValue};
use crate::dex::error::DexError;
use crate::dex::model::{ClassDef, DexFile, DexMarker, Items};
use crate::dex::opcode_format::Opcodes;
use crate::dex::raw::*;
use crate::dex::reference::{
    CallSiteRef, FieldRef, MethodHandleMember, MethodHandleRef, MethodHandleType, MethodProtoRef, MethodRef, RefResolver,
};

/// Location of a section that is only found through the map list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Section
{
    offset: u32,
    size: u32,
}

#[derive(Debug)]
struct DexImage
{
    buffer: DexBuffer,
    header: Header,
    opcodes: Opcodes,
    call_sites: Section,
    method_handles: Section,
    hidden_api_offset: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct DexBackedDexFile
{
    image: Arc<DexImage>,
}

fn is_known_map_type(type_code: u16) -> bool
{
    matches!(
        type_code,
        TYPE_HEADER_ITEM..=TYPE_METHOD_HANDLE_ITEM
            | TYPE_MAP_LIST..=TYPE_ANNOTATION_SET_ITEM
            | TYPE_CLASS_DATA_ITEM..=TYPE_ANNOTATIONS_DIRECTORY_ITEM
            | TYPE_HIDDENAPI_CLASS_DATA_ITEM
    )
}

impl DexBackedDexFile
{
    /// Parses the header and map list. Everything else is decoded on access.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<DexBackedDexFile, DexError>
    {
        let buffer = DexBuffer::new(bytes);
        let header = Header::read(&mut buffer.reader_at(0)?)?;
        let version = header.version()?;
        let opcodes = Opcodes::for_dex_version(version)?;
        DexBackedDexFile::with_opcodes(buffer, header, opcodes)
    }

    /// Like [`from_bytes`](Self::from_bytes), decoding instructions with
    /// `opcodes` rather than the ones implied by the dex version.
    pub fn from_bytes_with_opcodes(bytes: Vec<u8>, opcodes: Opcodes) -> Result<DexBackedDexFile, DexError>
    {
        let buffer = DexBuffer::new(bytes);
        let header = Header::read(&mut buffer.reader_at(0)?)?;
        DexBackedDexFile::with_opcodes(buffer, header, opcodes)
    }

    pub fn from_file(path: &Path) -> Result<DexBackedDexFile, DexError>
    {
        let bytes = fs::read(path).map_err(|e| DexError::new(&format!("io Error: {}", e)))?;
        DexBackedDexFile::from_bytes(bytes).map_err(|e| err!(e, "file {}", path.display()))
    }

    fn with_opcodes(buffer: DexBuffer, header: Header, opcodes: Opcodes) -> Result<DexBackedDexFile, DexError>
    {
        if (header.file_size as usize) < buffer.len()
        {
            warn!("Ignoring {} bytes past the declared file size", buffer.len() - header.file_size as usize);
        }
        else if header.file_size as usize > buffer.len()
        {
            fail!("Declared file size 0x{:x} exceeds the 0x{:x} bytes available", header.file_size, buffer.len());
        }

        let mut call_sites = Section::default();
        let mut method_handles = Section::default();
        let mut hidden_api_offset = None;
        if header.map_off != NO_OFFSET
        {
            let map = MapList::read(&mut buffer.reader_at(header.map_off as usize)?).map_err(|e| err!(e, "map list"))?;
            for item in map.items().iter()
            {
                match item.type_code
                {
                    TYPE_CALL_SITE_ID_ITEM => call_sites = Section { offset: item.offset, size: item.size },
                    TYPE_METHOD_HANDLE_ITEM => method_handles = Section { offset: item.offset, size: item.size },
                    TYPE_HIDDENAPI_CLASS_DATA_ITEM => hidden_api_offset = Some(item.offset),
                    code if !is_known_map_type(code) => warn!("Unknown map item type 0x{:04x} at 0x{:x}", code, item.offset),
                    _ => {}
                }
            }
        }

        info!(
            "Opened dex {:03} ({} bytes): {} classes, {} strings, {} methods",
            header.version()?,
            header.file_size,
            header.class_defs_size,
            header.string_ids_size,
            header.method_ids_size
        );
        debug!("call sites {:?}, method handles {:?}, hidden api {:?}", call_sites, method_handles, hidden_api_offset);

        Ok(DexBackedDexFile {
            image: Arc::new(DexImage { buffer, header, opcodes, call_sites, method_handles, hidden_api_offset }),
        })
    }

    pub fn buffer(&self) -> &DexBuffer
    {
        &self.image.buffer
    }

    pub fn header(&self) -> &Header
    {
        &self.image.header
    }

    pub fn class_count(&self) -> u32
    {
        self.image.header.class_defs_size
    }

    pub fn class_def(&self, index: u32) -> Result<DexBackedClassDef, DexError>
    {
        DexBackedClassDef::new(self.clone(), index)
    }

    /// The class views themselves, without going through `dyn ClassDef`.
    pub fn class_defs(&self) -> Items<'_, DexBackedClassDef>
    {
        Box::new((0..self.class_count()).map(move |index| self.class_def(index)))
    }

    pub(crate) fn hidden_api_offset(&self) -> Option<u32>
    {
        self.image.hidden_api_offset
    }

    fn item_offset(what: &str, index: u32, count: u32, section_offset: u32, item_size: u32) -> Result<usize, DexError>
    {
        if index >= count
        {
            fail!("{} index out of bounds: {}, must be less than {}", what, index, count);
        }
        Ok(section_offset as usize + index as usize * item_size as usize)
    }

    pub(crate) fn field_id_offset(&self, index: u32) -> Result<usize, DexError>
    {
        let header = &self.image.header;
        Self::item_offset("Field", index, header.field_ids_size, header.field_ids_off, FieldIdItem::SIZE)
    }

    pub(crate) fn method_id_offset(&self, index: u32) -> Result<usize, DexError>
    {
        let header = &self.image.header;
        Self::item_offset("Method", index, header.method_ids_size, header.method_ids_off, MethodIdItem::SIZE)
    }

    pub(crate) fn proto_id_offset(&self, index: u32) -> Result<usize, DexError>
    {
        let header = &self.image.header;
        Self::item_offset("Proto", index, header.proto_ids_size, header.proto_ids_off, ProtoIdItem::SIZE)
    }

    pub(crate) fn class_def_offset(&self, index: u32) -> Result<usize, DexError>
    {
        let header = &self.image.header;
        Self::item_offset("Class def", index, header.class_defs_size, header.class_defs_off, ClassDefItem::SIZE)
    }

    /// The types of a type_list; offset 0 is the empty list.
    pub(crate) fn type_list(&self, offset: u32) -> Result<Vec<String>, DexError>
    {
        if offset == NO_OFFSET
        {
            return Ok(Vec::new());
        }
        let list = TypeListItem::read(&mut self.buffer().reader_at(offset as usize)?)
            .map_err(|e| err!(e, "type list at 0x{:x}", offset))?;
        list.items().iter().map(|entry| self.type_name(entry.0 as u32)).collect()
    }

    /// Like [`RefResolver::string`], with `NO_INDEX` mapping to `None`.
    pub(crate) fn optional_string(&self, index: u32) -> Result<Option<String>, DexError>
    {
        if index == NO_INDEX { Ok(None) } else { self.string(index).map(Some) }
    }

    pub(crate) fn optional_type(&self, index: u32) -> Result<Option<String>, DexError>
    {
        if index == NO_INDEX { Ok(None) } else { self.type_name(index).map(Some) }
    }
}

impl RefResolver for DexBackedDexFile
{
    fn string(&self, index: u32) -> Result<String, DexError>
    {
        let header = &self.image.header;
        let id_offset = Self::item_offset("String", index, header.string_ids_size, header.string_ids_off, StringIdItem::SIZE)?;
        let data_offset = self.buffer().read_small_uint_at(id_offset)?;
        self.buffer().reader_at(data_offset as usize)?.read_string_data().map_err(|e| err!(e, "string {}", index))
    }

    fn type_name(&self, index: u32) -> Result<String, DexError>
    {
        let header = &self.image.header;
        let id_offset = Self::item_offset("Type", index, header.type_ids_size, header.type_ids_off, TypeIdItem::SIZE)?;
        let string_index = self.buffer().read_small_uint_at(id_offset)?;
        self.string(string_index)
    }

    fn field_ref(&self, index: u32) -> Result<FieldRef, DexError>
    {
        let item = FieldIdItem::read(&mut self.buffer().reader_at(self.field_id_offset(index)?)?)?;
        Ok(FieldRef {
            defining_class: self.type_name(item.class_idx as u32)?,
            name: self.string(item.name_idx)?,
            field_type: self.type_name(item.type_idx as u32)?,
        })
    }

    fn method_ref(&self, index: u32) -> Result<MethodRef, DexError>
    {
        let item = MethodIdItem::read(&mut self.buffer().reader_at(self.method_id_offset(index)?)?)?;
        let proto = self.proto_ref(item.proto_idx as u32)?;
        Ok(MethodRef {
            defining_class: self.type_name(item.class_idx as u32)?,
            name: self.string(item.name_idx)?,
            parameter_types: proto.parameter_types,
            return_type: proto.return_type,
        })
    }

    fn proto_ref(&self, index: u32) -> Result<MethodProtoRef, DexError>
    {
        let item = ProtoIdItem::read(&mut self.buffer().reader_at(self.proto_id_offset(index)?)?)?;
        Ok(MethodProtoRef {
            parameter_types: self.type_list(item.parameters_off)?,
            return_type: self.type_name(item.return_type_idx)?,
        })
    }

    fn method_handle(&self, index: u32) -> Result<MethodHandleRef, DexError>
    {
        let section = self.image.method_handles;
        let offset = Self::item_offset("Method handle", index, section.size, section.offset, MethodHandleItem::SIZE)?;
        let item = MethodHandleItem::read(&mut self.buffer().reader_at(offset)?)?;
        let handle_type = MethodHandleType::from_value(item.method_handle_type)?;
        let member = if handle_type.is_field_accessor()
        {
            MethodHandleMember::Field(self.field_ref(item.field_or_method_id as u32)?)
        }
        else
        {
            MethodHandleMember::Method(self.method_ref(item.field_or_method_id as u32)?)
        };
        MethodHandleRef::new(handle_type, member)
    }

    fn call_site(&self, index: u32) -> Result<CallSiteRef, DexError>
    {
        let section = self.image.call_sites;
        let offset = Self::item_offset("Call site", index, section.size, section.offset, CallSiteIdItem::SIZE)?;
        let array_offset = self.buffer().read_small_uint_at(offset)?;
        let values = read_encoded_array(&mut self.buffer().reader_at(array_offset as usize)?, self)
            .map_err(|e| err!(e, "call site {}", index))?;
        let mut values = values.into_iter();
        match (values.next(), values.next(), values.next())
        {
            (Some(EncodedValue::MethodHandle(method_handle)), Some(EncodedValue::String(method_name)), Some(EncodedValue::MethodType(method_proto))) => {
                Ok(CallSiteRef { method_handle, method_name, method_proto, extra_arguments: values.collect() })
            }
            _ => fail!("Invalid encoded array for call site {}", index),
        }
    }
}

impl DexFile for DexBackedDexFile
{
    fn opcodes(&self) -> Opcodes
    {
        self.image.opcodes.clone()
    }

    fn classes(&self) -> Items<'_, Arc<dyn ClassDef>>
    {
        Box::new(self.class_defs().map(|class| class.map(|class| Arc::new(class) as Arc<dyn ClassDef>)))
    }

    /// Markers sort after every other ASCII string, so the scan starts at
    /// the end of the pool and stops at the first string ordered below them.
    fn markers(&self) -> Result<Vec<DexMarker>, DexError>
    {
        let mut markers = Vec::new();
        for index in (0..self.image.header.string_ids_size).rev()
        {
            let value = self.string(index)?;
            if value.starts_with("~~")
            {
                if let Some(marker) = DexMarker::parse(&value)
                {
                    markers.push(marker);
                }
            }
            else if utf16_cmp(&value, "~~") == std::cmp::Ordering::Less
            {
                break;
            }
        }
        markers.reverse();
        Ok(markers)
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::dex::error::DexErrorKind;

    #[test]
    fn rejects_truncated_header()
    {
        let e = DexBackedDexFile::from_bytes(b"dex\n035\0".to_vec()).unwrap_err();
        assert_eq!(e.kind(), DexErrorKind::Decode);
    }

    #[test]
    fn rejects_unknown_version()
    {
        let mut bytes = vec![0u8; HEADER_SIZE as usize];
        bytes[..8].copy_from_slice(b"dex\n099\0");
        bytes[32..36].copy_from_slice(&HEADER_SIZE.to_le_bytes());
        bytes[36..40].copy_from_slice(&HEADER_SIZE.to_le_bytes());
        bytes[40..44].copy_from_slice(&ENDIAN_CONSTANT.to_le_bytes());
        assert!(DexBackedDexFile::from_bytes(bytes).unwrap_err().message().contains("099"));
    }

    #[test]
    fn empty_file_has_no_classes()
    {
        let mut bytes = vec![0u8; HEADER_SIZE as usize];
        bytes[..8].copy_from_slice(b"dex\n035\0");
        bytes[32..36].copy_from_slice(&HEADER_SIZE.to_le_bytes());
        bytes[36..40].copy_from_slice(&HEADER_SIZE.to_le_bytes());
        bytes[40..44].copy_from_slice(&ENDIAN_CONSTANT.to_le_bytes());
        let dex = DexBackedDexFile::from_bytes(bytes).unwrap();
        assert_eq!(dex.opcodes().api(), 23);
        assert_eq!(dex.classes().len(), 0);
        assert!(dex.string(0).is_err());
        assert!(dex.markers().unwrap().is_empty());
    }
}
