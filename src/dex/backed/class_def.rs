use std::sync::Arc;

use log::warn;

use crate::dex::backed::code::DexBackedMethodImplementation;
use crate::dex::backed::value::{annotation_set, annotation_set_refs, skip_encoded_value, AnnotationsDirectory};
use crate::dex::backed::DexBackedDexFile;
use crate::dex::buffer::OffsetCell;
use crate::dex::counted_list::Block;
use crate::dex::encoded_values::EncodedValue;
use crate::dex::error::DexError;
use crate::dex::immutable::ImmutableAnnotation;
use crate::dex::model::{
    AccessFlags, Annotation, ClassDef, Field, HiddenApiRestrictions, Items, Method, MethodImplementation, MethodParameter,
};
use crate::dex::raw::{ClassDefItem, FieldIdItem, MethodIdItem, ProtoIdItem, NO_OFFSET};
use crate::dex::reference::RefResolver;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MemberKind
{
    StaticField,
    InstanceField,
    DirectMethod,
    VirtualMethod,
}

impl MemberKind
{
    fn is_method(self) -> bool
    {
        matches!(self, MemberKind::DirectMethod | MemberKind::VirtualMethod)
    }
}

/// A class_def_item plus the counts from the head of its class_data_item.
#[derive(Debug, Clone)]
pub struct DexBackedClassDef
{
    dex: DexBackedDexFile,
    class_index: u32,
    item: ClassDefItem,
    directory: AnnotationsDirectory,
    static_fields_size: u32,
    instance_fields_size: u32,
    direct_methods_size: u32,
    virtual_methods_size: u32,
    static_fields_offset: u32,
    instance_fields_offset: OffsetCell,
    direct_methods_offset: OffsetCell,
    virtual_methods_offset: OffsetCell,
}

impl DexBackedClassDef
{
    pub(crate) fn new(dex: DexBackedDexFile, class_index: u32) -> Result<DexBackedClassDef, DexError>
    {
        let item = ClassDefItem::read(&mut dex.buffer().reader_at(dex.class_def_offset(class_index)?)?)?;
        let directory = AnnotationsDirectory::read(&dex, item.annotations_off)
            .map_err(|e| err!(e, "annotations of class def {}", class_index))?;
        let mut sizes = [0u32; 4];
        let mut static_fields_offset = 0;
        if item.class_data_off != NO_OFFSET
        {
            let mut reader = dex.buffer().reader_at(item.class_data_off as usize)?;
            for size in sizes.iter_mut()
            {
                *size = reader.read_uleb128()?;
            }
            // every field entry is at least 2 bytes and every method entry 3
            let [statics, instances, directs, virtuals] = sizes.map(u64::from);
            if 2 * (statics + instances) + 3 * (directs + virtuals) > reader.remaining() as u64
            {
                fail!(
                    "class_data member counts overflow the file at offset 0x{:x} ({}, {}, {}, {})",
                    item.class_data_off,
                    statics,
                    instances,
                    directs,
                    virtuals
                );
            }
            static_fields_offset = reader.tell() as u32;
        }
        let [static_fields_size, instance_fields_size, direct_methods_size, virtual_methods_size] = sizes;
        Ok(DexBackedClassDef {
            dex,
            class_index,
            item,
            directory,
            static_fields_size,
            instance_fields_size,
            direct_methods_size,
            virtual_methods_size,
            static_fields_offset,
            instance_fields_offset: OffsetCell::new(),
            direct_methods_offset: OffsetCell::new(),
            virtual_methods_offset: OffsetCell::new(),
        })
    }

    pub fn class_index(&self) -> u32
    {
        self.class_index
    }

    fn skip_members(&self, offset: u32, count: u32, ulebs_per_member: u32) -> Result<u32, DexError>
    {
        let total = match count.checked_mul(ulebs_per_member)
        {
            Some(total) => total,
            None => fail!("class_data member count {} overflows at offset 0x{:x}", count, offset),
        };
        let mut reader = self.dex.buffer().reader_at(offset as usize)?;
        for _ in 0..total
        {
            reader.skip_uleb128()?;
        }
        Ok(reader.tell() as u32)
    }

    fn instance_fields_offset(&self) -> Result<u32, DexError>
    {
        self.instance_fields_offset
            .get_or_try_init(|| self.skip_members(self.static_fields_offset, self.static_fields_size, 2))
    }

    fn direct_methods_offset(&self) -> Result<u32, DexError>
    {
        self.direct_methods_offset
            .get_or_try_init(|| self.skip_members(self.instance_fields_offset()?, self.instance_fields_size, 2))
    }

    fn virtual_methods_offset(&self) -> Result<u32, DexError>
    {
        self.virtual_methods_offset
            .get_or_try_init(|| self.skip_members(self.direct_methods_offset()?, self.direct_methods_size, 3))
    }

    /// Where this class's hidden api flags start, if the file has any for it.
    fn hidden_api_start(&self) -> Result<Option<u32>, DexError>
    {
        let section = match self.dex.hidden_api_offset()
        {
            Some(section) => section,
            None => return Ok(None),
        };
        let relative = self.dex.buffer().read_small_uint_at(section as usize + 4 + self.class_index as usize * 4)?;
        if relative == 0
        {
            return Ok(None);
        }
        match section.checked_add(relative)
        {
            Some(start) => Ok(Some(start)),
            None => fail!("Hidden api flags offset overflows for class def {}", self.class_index),
        }
    }

    fn members(&self, kind: MemberKind) -> Result<MemberIter<'_>, DexError>
    {
        let (offset, count, preceding) = match kind
        {
            MemberKind::StaticField => (self.static_fields_offset, self.static_fields_size, [0, 0, 0]),
            MemberKind::InstanceField => {
                (self.instance_fields_offset()?, self.instance_fields_size, [self.static_fields_size, 0, 0])
            }
            MemberKind::DirectMethod => (
                self.direct_methods_offset()?,
                self.direct_methods_size,
                [self.static_fields_size, self.instance_fields_size, 0],
            ),
            MemberKind::VirtualMethod => (
                self.virtual_methods_offset()?,
                self.virtual_methods_size,
                [self.static_fields_size, self.instance_fields_size, self.direct_methods_size],
            ),
        };
        let first_position = match preceding.iter().try_fold(0u32, |sum, size| sum.checked_add(*size))
        {
            Some(position) => position,
            None => fail!("class_data member counts overflow for class def {}", self.class_index),
        };

        let mut static_values = None;
        if kind == MemberKind::StaticField && self.item.static_values_off != NO_OFFSET
        {
            let mut reader = self.dex.buffer().reader_at(self.item.static_values_off as usize)?;
            let size = reader.read_uleb128()?;
            static_values = Some((reader.tell() as u32, size));
        }

        let hidden_api_offset = match self.hidden_api_start()?
        {
            Some(start) => Some(self.skip_members(start, first_position, 1)?),
            None => None,
        };

        Ok(MemberIter { class: self, kind, offset, previous_index: 0, remaining: count, static_values, hidden_api_offset })
    }

    fn field_items(&self, kind: MemberKind) -> Items<'_, Arc<dyn Field>>
    {
        match self.members(kind)
        {
            Ok(members) => Box::new(members.map(move |entry| -> Result<Arc<dyn Field>, DexError> {
                Ok(Arc::new(self.field(entry?)?) as Arc<dyn Field>)
            })),
            Err(e) => Box::new(std::iter::once(Err(e))),
        }
    }

    fn method_items(&self, kind: MemberKind) -> Items<'_, Arc<dyn Method>>
    {
        match self.members(kind)
        {
            Ok(members) => Box::new(members.map(move |entry| -> Result<Arc<dyn Method>, DexError> {
                Ok(Arc::new(self.method(entry?)?) as Arc<dyn Method>)
            })),
            Err(e) => Box::new(std::iter::once(Err(e))),
        }
    }

    fn field(&self, entry: MemberEntry) -> Result<DexBackedField, DexError>
    {
        Ok(DexBackedField {
            dex: self.dex.clone(),
            class_type_index: self.item.class_idx,
            field_index: entry.index,
            access_flags: entry.access_flags,
            initial_value_offset: entry.initial_value_offset,
            annotation_set_offset: self.directory.field_annotations_offset(&self.dex, entry.index)?,
            hidden_api_flags: entry.hidden_api_flags,
        })
    }

    fn method(&self, entry: MemberEntry) -> Result<DexBackedMethod, DexError>
    {
        Ok(DexBackedMethod {
            dex: self.dex.clone(),
            class_type_index: self.item.class_idx,
            method_index: entry.index,
            access_flags: entry.access_flags,
            code_offset: entry.code_offset,
            encoded_size: entry.size,
            method_annotation_set_offset: self.directory.method_annotations_offset(&self.dex, entry.index)?,
            parameter_annotations_offset: self.directory.parameter_annotations_offset(&self.dex, entry.index)?,
            hidden_api_flags: entry.hidden_api_flags,
            method_id_offset: OffsetCell::new(),
            proto_id_offset: OffsetCell::new(),
            parameters_offset: OffsetCell::new(),
        })
    }
}

impl ClassDef for DexBackedClassDef
{
    fn type_name(&self) -> Result<String, DexError>
    {
        self.dex.type_name(self.item.class_idx)
    }

    fn access_flags(&self) -> AccessFlags
    {
        AccessFlags::from_bits_retain(self.item.access_flags)
    }

    fn superclass(&self) -> Result<Option<String>, DexError>
    {
        self.dex.optional_type(self.item.superclass_idx)
    }

    fn interfaces(&self) -> Result<Vec<String>, DexError>
    {
        self.dex.type_list(self.item.interfaces_off)
    }

    fn source_file(&self) -> Result<Option<String>, DexError>
    {
        self.dex.optional_string(self.item.source_file_idx)
    }

    fn annotations(&self) -> Items<'_, Arc<dyn Annotation>>
    {
        match self.directory.class_annotations_offset(&self.dex)
        {
            Ok(offset) => annotation_set(&self.dex, offset),
            Err(e) => Box::new(std::iter::once(Err(e))),
        }
    }

    fn static_fields(&self) -> Items<'_, Arc<dyn Field>>
    {
        self.field_items(MemberKind::StaticField)
    }

    fn instance_fields(&self) -> Items<'_, Arc<dyn Field>>
    {
        self.field_items(MemberKind::InstanceField)
    }

    fn direct_methods(&self) -> Items<'_, Arc<dyn Method>>
    {
        self.method_items(MemberKind::DirectMethod)
    }

    fn virtual_methods(&self) -> Items<'_, Arc<dyn Method>>
    {
        self.method_items(MemberKind::VirtualMethod)
    }
}

/// One encoded_field or encoded_method plus what was picked up alongside it.
struct MemberEntry
{
    index: u32,
    access_flags: u32,
    code_offset: u32,
    size: u32,
    initial_value_offset: Option<u32>,
    hidden_api_flags: Option<u32>,
}

/// Walks one member list of the class data. Static values and hidden api
/// flags are parallel streams and advance in step with it.
struct MemberIter<'a>
{
    class: &'a DexBackedClassDef,
    kind: MemberKind,
    offset: u32,
    previous_index: u32,
    remaining: u32,
    static_values: Option<(u32, u32)>,
    hidden_api_offset: Option<u32>,
}

impl MemberIter<'_>
{
    fn read_entry(&mut self) -> Result<MemberEntry, DexError>
    {
        let dex = &self.class.dex;
        let mut reader = dex.buffer().reader_at(self.offset as usize)?;
        let delta = reader.read_large_uleb128()?;
        if delta > i32::MAX as u32
        {
            warn!("Member index delta 0x{:x} at 0x{:x} wraps around", delta, self.offset);
        }
        // large deltas wrap, which lets entries appear out of order
        let index = self.previous_index.wrapping_add(delta);
        let access_flags = reader.read_uleb128()?;
        let code_offset = if self.kind.is_method() { reader.read_uleb128()? } else { 0 };
        let end = reader.tell() as u32;

        let initial_value_offset = match self.static_values
        {
            Some((value_offset, left)) if left > 0 => {
                let mut values = dex.buffer().reader_at(value_offset as usize)?;
                skip_encoded_value(&mut values)?;
                self.static_values = Some((values.tell() as u32, left - 1));
                Some(value_offset)
            }
            _ => None,
        };

        let hidden_api_flags = match self.hidden_api_offset
        {
            Some(flags_offset) => {
                let mut flags = dex.buffer().reader_at(flags_offset as usize)?;
                let value = flags.read_large_uleb128()?;
                self.hidden_api_offset = Some(flags.tell() as u32);
                Some(value)
            }
            None => None,
        };

        let size = end - self.offset;
        self.offset = end;
        self.previous_index = index;
        Ok(MemberEntry { index, access_flags, code_offset, size, initial_value_offset, hidden_api_flags })
    }
}

impl Iterator for MemberIter<'_>
{
    type Item = Result<MemberEntry, DexError>;

    fn next(&mut self) -> Option<Self::Item>
    {
        if self.remaining == 0
        {
            return None;
        }
        self.remaining -= 1;
        match self.read_entry()
        {
            Ok(entry) => Some(Ok(entry)),
            Err(e) => {
                self.remaining = 0;
                Some(Err(err!(e, "class data at 0x{:x}", self.offset)))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>)
    {
        (self.remaining as usize, Some(self.remaining as usize))
    }
}

impl ExactSizeIterator for MemberIter<'_> {}

#[derive(Debug, Clone)]
pub struct DexBackedField
{
    dex: DexBackedDexFile,
    class_type_index: u32,
    field_index: u32,
    access_flags: u32,
    initial_value_offset: Option<u32>,
    annotation_set_offset: u32,
    hidden_api_flags: Option<u32>,
}

impl DexBackedField
{
    pub fn field_index(&self) -> u32
    {
        self.field_index
    }

    fn field_id_item(&self) -> Result<FieldIdItem, DexError>
    {
        FieldIdItem::read(&mut self.dex.buffer().reader_at(self.dex.field_id_offset(self.field_index)?)?)
    }
}

impl Field for DexBackedField
{
    fn defining_class(&self) -> Result<String, DexError>
    {
        self.dex.type_name(self.class_type_index)
    }

    fn name(&self) -> Result<String, DexError>
    {
        self.dex.string(self.field_id_item()?.name_idx)
    }

    fn field_type(&self) -> Result<String, DexError>
    {
        self.dex.type_name(self.field_id_item()?.type_idx as u32)
    }

    fn access_flags(&self) -> AccessFlags
    {
        AccessFlags::from_bits_retain(self.access_flags)
    }

    fn initial_value(&self) -> Result<Option<EncodedValue>, DexError>
    {
        match self.initial_value_offset
        {
            Some(offset) => Ok(Some(EncodedValue::read(&mut self.dex.buffer().reader_at(offset as usize)?, &self.dex)?)),
            None => Ok(None),
        }
    }

    fn annotations(&self) -> Items<'_, Arc<dyn Annotation>>
    {
        annotation_set(&self.dex, self.annotation_set_offset)
    }

    fn hidden_api_restrictions(&self) -> Result<Option<HiddenApiRestrictions>, DexError>
    {
        self.hidden_api_flags.map(HiddenApiRestrictions::from_value).transpose()
    }
}

#[derive(Debug, Clone)]
pub struct DexBackedMethod
{
    dex: DexBackedDexFile,
    class_type_index: u32,
    method_index: u32,
    access_flags: u32,
    code_offset: u32,
    encoded_size: u32,
    method_annotation_set_offset: u32,
    parameter_annotations_offset: u32,
    hidden_api_flags: Option<u32>,
    method_id_offset: OffsetCell,
    proto_id_offset: OffsetCell,
    parameters_offset: OffsetCell,
}

impl DexBackedMethod
{
    pub fn method_index(&self) -> u32
    {
        self.method_index
    }

    fn method_id_offset(&self) -> Result<u32, DexError>
    {
        self.method_id_offset.get_or_try_init(|| Ok(self.dex.method_id_offset(self.method_index)? as u32))
    }

    fn proto_id_offset(&self) -> Result<u32, DexError>
    {
        self.proto_id_offset.get_or_try_init(|| {
            let offset = self.method_id_offset()? as usize + MethodIdItem::PROTO_OFFSET;
            let proto_index = self.dex.buffer().read_u2_at(offset)?;
            Ok(self.dex.proto_id_offset(proto_index as u32)? as u32)
        })
    }

    fn parameters_offset(&self) -> Result<u32, DexError>
    {
        self.parameters_offset.get_or_try_init(|| {
            let offset = self.proto_id_offset()? as usize + ProtoIdItem::PARAMETERS_OFFSET;
            self.dex.buffer().read_small_uint_at(offset)
        })
    }

    pub fn dex_implementation(&self) -> Result<Option<DexBackedMethodImplementation>, DexError>
    {
        if self.code_offset == NO_OFFSET
        {
            return Ok(None);
        }
        DexBackedMethodImplementation::new(self.dex.clone(), self.code_offset).map(Some)
    }

    /// Bytes attributable to this method: its encoded_method entry, its
    /// code item and its method_id_item.
    pub fn size(&self) -> Result<u32, DexError>
    {
        let implementation_size = match self.dex_implementation()?
        {
            Some(implementation) => implementation.size()?,
            None => 0,
        };
        Ok(self.encoded_size + implementation_size + MethodIdItem::SIZE)
    }

    fn parameter_annotations(&self) -> Result<Vec<Vec<ImmutableAnnotation>>, DexError>
    {
        annotation_set_refs(&self.dex, self.parameter_annotations_offset)?
            .into_iter()
            .map(|offset| ImmutableAnnotation::all_of(annotation_set(&self.dex, offset)))
            .collect()
    }
}

impl Method for DexBackedMethod
{
    fn defining_class(&self) -> Result<String, DexError>
    {
        self.dex.type_name(self.class_type_index)
    }

    fn name(&self) -> Result<String, DexError>
    {
        let offset = self.method_id_offset()? as usize + MethodIdItem::NAME_OFFSET;
        self.dex.string(self.dex.buffer().read_small_uint_at(offset)?)
    }

    fn parameter_types(&self) -> Result<Vec<String>, DexError>
    {
        self.dex.type_list(self.parameters_offset()?)
    }

    fn parameters(&self) -> Result<Vec<MethodParameter>, DexError>
    {
        let types = self.parameter_types()?;
        if types.is_empty()
        {
            return Ok(Vec::new());
        }
        let mut names = match self.dex_implementation()?
        {
            Some(implementation) => implementation.parameter_names()?,
            None => Vec::new(),
        }
        .into_iter();
        let mut annotations = self.parameter_annotations()?.into_iter();
        Ok(types
            .iter()
            .map(|parameter_type| MethodParameter {
                parameter_type: parameter_type.clone(),
                name: names.next().flatten(),
                annotations: annotations.next().unwrap_or_default(),
            })
            .collect())
    }

    fn return_type(&self) -> Result<String, DexError>
    {
        let offset = self.proto_id_offset()? as usize + ProtoIdItem::RETURN_TYPE_OFFSET;
        self.dex.type_name(self.dex.buffer().read_small_uint_at(offset)?)
    }

    fn access_flags(&self) -> AccessFlags
    {
        AccessFlags::from_bits_retain(self.access_flags)
    }

    fn annotations(&self) -> Items<'_, Arc<dyn Annotation>>
    {
        annotation_set(&self.dex, self.method_annotation_set_offset)
    }

    fn hidden_api_restrictions(&self) -> Result<Option<HiddenApiRestrictions>, DexError>
    {
        self.hidden_api_flags.map(HiddenApiRestrictions::from_value).transpose()
    }

    fn implementation(&self) -> Result<Option<Arc<dyn MethodImplementation>>, DexError>
    {
        Ok(self.dex_implementation()?.map(|implementation| Arc::new(implementation) as Arc<dyn MethodImplementation>))
    }
}
