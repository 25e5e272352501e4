/* Fixed layout dex structures */

use crate::dex::buffer::{DexReader, DexWriter};
use crate::dex::counted_list::{Block, CountedList, IntegerCell};
use crate::dex::error::DexError;

/* Constants */
pub const DEX_FILE_MAGIC_PREFIX: [u8; 4] = [0x64, 0x65, 0x78, 0x0a];
pub const ENDIAN_CONSTANT: u32 = 0x12345678;
pub const REVERSE_ENDIAN_CONSTANT: u32 = 0x78563412;
pub const HEADER_SIZE: u32 = 0x70;
pub const NO_INDEX: u32 = 0xffffffff;
pub const NO_OFFSET: u32 = 0;

pub const TYPE_HEADER_ITEM: u16 = 0x0000;
pub const TYPE_STRING_ID_ITEM: u16 = 0x0001;
pub const TYPE_TYPE_ID_ITEM: u16 = 0x0002;
pub const TYPE_PROTO_ID_ITEM: u16 = 0x0003;
pub const TYPE_FIELD_ID_ITEM: u16 = 0x0004;
pub const TYPE_METHOD_ID_ITEM: u16 = 0x0005;
pub const TYPE_CLASS_DEF_ITEM: u16 = 0x0006;
pub const TYPE_CALL_SITE_ID_ITEM: u16 = 0x0007;
pub const TYPE_METHOD_HANDLE_ITEM: u16 = 0x0008;
pub const TYPE_MAP_LIST: u16 = 0x1000;
pub const TYPE_TYPE_LIST: u16 = 0x1001;
pub const TYPE_ANNOTATION_SET_REF_LIST: u16 = 0x1002;
pub const TYPE_ANNOTATION_SET_ITEM: u16 = 0x1003;
pub const TYPE_CLASS_DATA_ITEM: u16 = 0x2000;
pub const TYPE_CODE_ITEM: u16 = 0x2001;
pub const TYPE_STRING_DATA_ITEM: u16 = 0x2002;
pub const TYPE_DEBUG_INFO_ITEM: u16 = 0x2003;
pub const TYPE_ANNOTATION_ITEM: u16 = 0x2004;
pub const TYPE_ENCODED_ARRAY_ITEM: u16 = 0x2005;
pub const TYPE_ANNOTATIONS_DIRECTORY_ITEM: u16 = 0x2006;
pub const TYPE_HIDDENAPI_CLASS_DATA_ITEM: u16 = 0xf000;

/// The header_item at offset 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub magic: [u8; 8],
    pub checksum: u32,
    pub signature: [u8; 20],
    pub file_size: u32,
    pub header_size: u32,
    pub endian_tag: u32,
    pub link_size: u32,
    pub link_off: u32,
    pub map_off: u32,
    pub string_ids_size: u32,
    pub string_ids_off: u32,
    pub type_ids_size: u32,
    pub type_ids_off: u32,
    pub proto_ids_size: u32,
    pub proto_ids_off: u32,
    pub field_ids_size: u32,
    pub field_ids_off: u32,
    pub method_ids_size: u32,
    pub method_ids_off: u32,
    pub class_defs_size: u32,
    pub class_defs_off: u32,
    pub data_size: u32,
    pub data_off: u32,
}

impl Header
{
    pub fn magic_for_version(version: u32) -> [u8; 8]
    {
        let digits = format!("{:03}", version % 1000);
        let d = digits.as_bytes();
        [0x64, 0x65, 0x78, 0x0a, d[0], d[1], d[2], 0x00]
    }

    /// The three digit version from the magic, e.g. 35 for `dex\n035\0`.
    pub fn version(&self) -> Result<u32, DexError>
    {
        let digits = &self.magic[4..7];
        if !digits.iter().all(|d| d.is_ascii_digit()) || self.magic[7] != 0
        {
            fail!("Invalid dex version in magic {:?}", self.magic);
        }
        Ok(digits.iter().fold(0, |acc, d| acc * 10 + (d - b'0') as u32))
    }
}

impl Block for Header
{
    fn read(reader: &mut DexReader) -> Result<Header, DexError>
    {
        if reader.remaining() < HEADER_SIZE as usize {
            return Err(DexError::new("Not enough bytes for header"));
        }

        let mut magic = [0u8; 8];
        magic.copy_from_slice(reader.read_bytes(8)?);
        if magic[..4] != DEX_FILE_MAGIC_PREFIX { return Err(DexError::new("Invalid magic value")); }
        let checksum = reader.read_u4()?;
        let mut signature = [0u8; 20];
        signature.copy_from_slice(reader.read_bytes(20)?);

        let header = Header {
            magic,
            checksum,
            signature,
            file_size: reader.read_u4()?,
            header_size: reader.read_u4()?,
            endian_tag: reader.read_u4()?,
            link_size: reader.read_u4()?,
            link_off: reader.read_u4()?,
            map_off: reader.read_u4()?,
            string_ids_size: reader.read_u4()?,
            string_ids_off: reader.read_u4()?,
            type_ids_size: reader.read_u4()?,
            type_ids_off: reader.read_u4()?,
            proto_ids_size: reader.read_u4()?,
            proto_ids_off: reader.read_u4()?,
            field_ids_size: reader.read_u4()?,
            field_ids_off: reader.read_u4()?,
            method_ids_size: reader.read_u4()?,
            method_ids_off: reader.read_u4()?,
            class_defs_size: reader.read_u4()?,
            class_defs_off: reader.read_u4()?,
            data_size: reader.read_u4()?,
            data_off: reader.read_u4()?,
        };

        if header.endian_tag == REVERSE_ENDIAN_CONSTANT {
            fail!("Big endian dex files are not supported");
        }
        if header.endian_tag != ENDIAN_CONSTANT {
            fail!("Invalid endian tag 0x{:x}", header.endian_tag);
        }
        if header.header_size < HEADER_SIZE {
            fail!("Header size 0x{:x} is smaller than 0x{:x}", header.header_size, HEADER_SIZE);
        }
        Ok(header)
    }

    fn write(&self, writer: &mut DexWriter)
    {
        writer.write_bytes(&self.magic);
        writer.write_u4(self.checksum);
        writer.write_bytes(&self.signature);
        writer.write_u4(self.file_size);
        writer.write_u4(self.header_size);
        writer.write_u4(self.endian_tag);
        writer.write_u4(self.link_size);
        writer.write_u4(self.link_off);
        writer.write_u4(self.map_off);
        writer.write_u4(self.string_ids_size);
        writer.write_u4(self.string_ids_off);
        writer.write_u4(self.type_ids_size);
        writer.write_u4(self.type_ids_off);
        writer.write_u4(self.proto_ids_size);
        writer.write_u4(self.proto_ids_off);
        writer.write_u4(self.field_ids_size);
        writer.write_u4(self.field_ids_off);
        writer.write_u4(self.method_ids_size);
        writer.write_u4(self.method_ids_off);
        writer.write_u4(self.class_defs_size);
        writer.write_u4(self.class_defs_off);
        writer.write_u4(self.data_size);
        writer.write_u4(self.data_off);
    }
}

/// string_id_item: offset of the string data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StringIdItem(pub u32);

impl StringIdItem
{
    pub const SIZE: u32 = 4;
}

impl Block for StringIdItem
{
    fn read(reader: &mut DexReader) -> Result<Self, DexError>
    {
        Ok(StringIdItem(reader.read_small_uint()?))
    }

    fn write(&self, writer: &mut DexWriter)
    {
        writer.write_u4(self.0);
    }
}

/// type_id_item: string index of the descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TypeIdItem(pub u32);

impl TypeIdItem
{
    pub const SIZE: u32 = 4;
}

impl Block for TypeIdItem
{
    fn read(reader: &mut DexReader) -> Result<Self, DexError>
    {
        Ok(TypeIdItem(reader.read_small_uint()?))
    }

    fn write(&self, writer: &mut DexWriter)
    {
        writer.write_u4(self.0);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProtoIdItem {
    pub shorty_idx: u32,
    pub return_type_idx: u32,
    pub parameters_off: u32,
}

impl ProtoIdItem
{
    pub const SIZE: u32 = 12;
    pub const RETURN_TYPE_OFFSET: usize = 4;
    pub const PARAMETERS_OFFSET: usize = 8;
}

impl Block for ProtoIdItem
{
    fn read(reader: &mut DexReader) -> Result<Self, DexError>
    {
        Ok(ProtoIdItem {
            shorty_idx: reader.read_small_uint()?,
            return_type_idx: reader.read_small_uint()?,
            parameters_off: reader.read_small_uint()?,
        })
    }

    fn write(&self, writer: &mut DexWriter)
    {
        writer.write_u4(self.shorty_idx);
        writer.write_u4(self.return_type_idx);
        writer.write_u4(self.parameters_off);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FieldIdItem {
    pub class_idx: u16,
    pub type_idx: u16,
    pub name_idx: u32,
}

impl FieldIdItem
{
    pub const SIZE: u32 = 8;
}

impl Block for FieldIdItem
{
    fn read(reader: &mut DexReader) -> Result<Self, DexError>
    {
        Ok(FieldIdItem {
            class_idx: reader.read_u2()?,
            type_idx: reader.read_u2()?,
            name_idx: reader.read_small_uint()?,
        })
    }

    fn write(&self, writer: &mut DexWriter)
    {
        writer.write_u2(self.class_idx);
        writer.write_u2(self.type_idx);
        writer.write_u4(self.name_idx);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MethodIdItem {
    pub class_idx: u16,
    pub proto_idx: u16,
    pub name_idx: u32,
}

impl MethodIdItem
{
    pub const SIZE: u32 = 8;
    pub const CLASS_OFFSET: usize = 0;
    pub const PROTO_OFFSET: usize = 2;
    pub const NAME_OFFSET: usize = 4;
}

impl Block for MethodIdItem
{
    fn read(reader: &mut DexReader) -> Result<Self, DexError>
    {
        Ok(MethodIdItem {
            class_idx: reader.read_u2()?,
            proto_idx: reader.read_u2()?,
            name_idx: reader.read_small_uint()?,
        })
    }

    fn write(&self, writer: &mut DexWriter)
    {
        writer.write_u2(self.class_idx);
        writer.write_u2(self.proto_idx);
        writer.write_u4(self.name_idx);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClassDefItem {
    pub class_idx: u32,
    pub access_flags: u32,
    pub superclass_idx: u32,
    pub interfaces_off: u32,
    pub source_file_idx: u32,
    pub annotations_off: u32,
    pub class_data_off: u32,
    pub static_values_off: u32,
}

impl ClassDefItem
{
    pub const SIZE: u32 = 32;
}

impl Block for ClassDefItem
{
    fn read(reader: &mut DexReader) -> Result<Self, DexError>
    {
        Ok(ClassDefItem {
            class_idx: reader.read_u4()?,
            access_flags: reader.read_u4()?,
            superclass_idx: reader.read_u4()?,
            interfaces_off: reader.read_u4()?,
            source_file_idx: reader.read_u4()?,
            annotations_off: reader.read_u4()?,
            class_data_off: reader.read_u4()?,
            static_values_off: reader.read_u4()?,
        })
    }

    fn write(&self, writer: &mut DexWriter)
    {
        writer.write_u4(self.class_idx);
        writer.write_u4(self.access_flags);
        writer.write_u4(self.superclass_idx);
        writer.write_u4(self.interfaces_off);
        writer.write_u4(self.source_file_idx);
        writer.write_u4(self.annotations_off);
        writer.write_u4(self.class_data_off);
        writer.write_u4(self.static_values_off);
    }
}

/// call_site_id_item: offset of the call site's encoded array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CallSiteIdItem(pub u32);

impl CallSiteIdItem
{
    pub const SIZE: u32 = 4;
}

impl Block for CallSiteIdItem
{
    fn read(reader: &mut DexReader) -> Result<Self, DexError>
    {
        Ok(CallSiteIdItem(reader.read_small_uint()?))
    }

    fn write(&self, writer: &mut DexWriter)
    {
        writer.write_u4(self.0);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MethodHandleItem {
    pub method_handle_type: u16,
    pub field_or_method_id: u16,
}

impl MethodHandleItem
{
    pub const SIZE: u32 = 8;
}

impl Block for MethodHandleItem
{
    fn read(reader: &mut DexReader) -> Result<Self, DexError>
    {
        let method_handle_type = reader.read_u2()?;
        reader.skip(2)?;
        let field_or_method_id = reader.read_u2()?;
        reader.skip(2)?;
        Ok(MethodHandleItem { method_handle_type, field_or_method_id })
    }

    fn write(&self, writer: &mut DexWriter)
    {
        writer.write_u2(self.method_handle_type);
        writer.write_u2(0);
        writer.write_u2(self.field_or_method_id);
        writer.write_u2(0);
    }
}

/// One entry of the map_list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MapItem {
    pub type_code: u16,
    pub size: u32,
    pub offset: u32,
}

impl MapItem
{
    pub fn new(type_code: u16, size: u32, offset: u32) -> Self
    {
        MapItem { type_code, size, offset }
    }
}

impl Block for MapItem
{
    fn read(reader: &mut DexReader) -> Result<Self, DexError>
    {
        let type_code = reader.read_u2()?;
        reader.skip(2)?;
        Ok(MapItem { type_code, size: reader.read_small_uint()?, offset: reader.read_small_uint()? })
    }

    fn write(&self, writer: &mut DexWriter)
    {
        writer.write_u2(self.type_code);
        writer.write_u2(0);
        writer.write_u4(self.size);
        writer.write_u4(self.offset);
    }
}

/// A u2 type index inside a type_list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TypeListEntry(pub u16);

impl Block for TypeListEntry
{
    fn read(reader: &mut DexReader) -> Result<Self, DexError>
    {
        Ok(TypeListEntry(reader.read_u2()?))
    }

    fn write(&self, writer: &mut DexWriter)
    {
        writer.write_u2(self.0);
    }
}

/// A u4 offset inside an annotation_set_item or annotation_set_ref_list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OffsetEntry(pub u32);

impl Block for OffsetEntry
{
    fn read(reader: &mut DexReader) -> Result<Self, DexError>
    {
        Ok(OffsetEntry(reader.read_small_uint()?))
    }

    fn write(&self, writer: &mut DexWriter)
    {
        writer.write_u4(self.0);
    }
}

/// A list prefixed by its own u4 size, the shape shared by map_list,
/// type_list, annotation_set_item and annotation_set_ref_list.
#[derive(Debug)]
pub struct SizedList<T>
{
    size: IntegerCell,
    items: CountedList<T>,
}

pub type MapList = SizedList<MapItem>;
pub type TypeListItem = SizedList<TypeListEntry>;
pub type AnnotationSetItem = SizedList<OffsetEntry>;
pub type AnnotationSetRefList = SizedList<OffsetEntry>;

impl<T> SizedList<T>
{
    pub fn new(items: Vec<T>) -> Self
    {
        let size = IntegerCell::default();
        SizedList { items: CountedList::from_items(size.clone(), items), size }
    }

    pub fn items(&self) -> &CountedList<T>
    {
        &self.items
    }

    pub fn items_mut(&mut self) -> &mut CountedList<T>
    {
        &mut self.items
    }

    pub fn size(&self) -> u32
    {
        self.size.get()
    }

    /// Bytes this list occupies when written.
    pub fn byte_size(&self, item_size: u32) -> u32
    {
        4 + item_size * self.items.len() as u32
    }
}

impl<T: Block> Block for SizedList<T>
{
    fn read(reader: &mut DexReader) -> Result<Self, DexError>
    {
        let size = IntegerCell::new(reader.read_small_uint()?);
        let mut items = CountedList::new(size.clone());
        items.read(reader)?;
        Ok(SizedList { size, items })
    }

    fn write(&self, writer: &mut DexWriter)
    {
        self.items.refresh();
        writer.write_u4(self.size.get());
        self.items.write(writer);
    }
}

/// annotations_directory_item.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AnnotationsDirectoryItem {
    pub class_annotations_off: u32,
    pub field_annotations: Vec<(u32, u32)>,
    pub method_annotations: Vec<(u32, u32)>,
    pub parameter_annotations: Vec<(u32, u32)>,
}

impl AnnotationsDirectoryItem
{
    pub fn is_empty(&self) -> bool
    {
        self.class_annotations_off == 0
            && self.field_annotations.is_empty()
            && self.method_annotations.is_empty()
            && self.parameter_annotations.is_empty()
    }
}

impl Block for AnnotationsDirectoryItem
{
    fn read(reader: &mut DexReader) -> Result<Self, DexError>
    {
        let class_annotations_off = reader.read_small_uint()?;
        let fields_size = reader.read_small_uint()?;
        let methods_size = reader.read_small_uint()?;
        let parameters_size = reader.read_small_uint()?;
        let mut read_pairs = |count: u32| -> Result<Vec<(u32, u32)>, DexError> {
            let mut pairs = Vec::with_capacity(count as usize);
            for _ in 0..count {
                pairs.push((reader.read_small_uint()?, reader.read_small_uint()?));
            }
            Ok(pairs)
        };
        let field_annotations = read_pairs(fields_size)?;
        let method_annotations = read_pairs(methods_size)?;
        let parameter_annotations = read_pairs(parameters_size)?;
        Ok(AnnotationsDirectoryItem { class_annotations_off, field_annotations, method_annotations, parameter_annotations })
    }

    fn write(&self, writer: &mut DexWriter)
    {
        writer.write_u4(self.class_annotations_off);
        writer.write_u4(self.field_annotations.len() as u32);
        writer.write_u4(self.method_annotations.len() as u32);
        writer.write_u4(self.parameter_annotations.len() as u32);
        for (index, offset) in self.field_annotations.iter().chain(&self.method_annotations).chain(&self.parameter_annotations) {
            writer.write_u4(*index);
            writer.write_u4(*offset);
        }
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn header_round_trips_and_reports_version()
    {
        let header = Header {
            magic: Header::magic_for_version(39),
            checksum: 1,
            signature: [2; 20],
            file_size: 0x70,
            header_size: HEADER_SIZE,
            endian_tag: ENDIAN_CONSTANT,
            link_size: 0,
            link_off: 0,
            map_off: 0,
            string_ids_size: 0,
            string_ids_off: 0,
            type_ids_size: 0,
            type_ids_off: 0,
            proto_ids_size: 0,
            proto_ids_off: 0,
            field_ids_size: 0,
            field_ids_off: 0,
            method_ids_size: 0,
            method_ids_off: 0,
            class_defs_size: 0,
            class_defs_off: 0,
            data_size: 0,
            data_off: 0x70,
        };
        let mut writer = DexWriter::new();
        header.write(&mut writer);
        assert_eq!(writer.len(), HEADER_SIZE as usize);
        let bytes = writer.into_bytes();
        assert_eq!(&bytes[..8], b"dex\n039\0");
        let read = Header::read(&mut DexReader::new(&bytes)).unwrap();
        assert_eq!(read, header);
        assert_eq!(read.version().unwrap(), 39);
    }

    #[test]
    fn header_rejects_bad_magic_and_endianness()
    {
        let mut bytes = vec![0u8; HEADER_SIZE as usize];
        assert!(Header::read(&mut DexReader::new(&bytes)).is_err());
        bytes[..8].copy_from_slice(b"dex\n035\0");
        bytes[40..44].copy_from_slice(&REVERSE_ENDIAN_CONSTANT.to_le_bytes());
        assert!(Header::read(&mut DexReader::new(&bytes)).is_err());
    }

    #[test]
    fn sized_list_reads_its_own_prefix()
    {
        let bytes = [0x02, 0, 0, 0, 0x05, 0x00, 0x07, 0x00];
        let list = TypeListItem::read(&mut DexReader::new(&bytes)).unwrap();
        assert_eq!(list.size(), 2);
        assert_eq!(list.items().as_slice(), &[TypeListEntry(5), TypeListEntry(7)]);

        let mut list = list;
        list.items_mut().push(TypeListEntry(9));
        assert_eq!(list.size(), 3);
        let mut writer = DexWriter::new();
        list.write(&mut writer);
        assert_eq!(writer.into_bytes(), vec![3, 0, 0, 0, 5, 0, 7, 0, 9, 0]);
    }
}
