use std::collections::HashMap;

use adler::adler32_slice;
use log::{debug, info};
use sha1::{Digest, Sha1};

use crate::dex::buffer::DexWriter;
use crate::dex::builder::{BuilderClass, BuilderField, BuilderMethod, DexBuilder, Handle, MemberHandle, MethodKey};
use crate::dex::counted_list::{Block, CountedList, IntegerCell};
use crate::dex::encoded_values::write_encoded_array;
use crate::dex::error::DexError;
use crate::dex::instructions::{encode_instructions, Instruction};
use crate::dex::model::{DebugItem, ExceptionHandler, TryBlock};
use crate::dex::raw::*;
use crate::dex::reference::{RefIndexer, Reference};

const DBG_END_SEQUENCE: u8 = 0x00;
const DBG_ADVANCE_PC: u8 = 0x01;
const DBG_ADVANCE_LINE: u8 = 0x02;
const DBG_START_LOCAL: u8 = 0x03;
const DBG_START_LOCAL_EXTENDED: u8 = 0x04;
const DBG_END_LOCAL: u8 = 0x05;
const DBG_RESTART_LOCAL: u8 = 0x06;
const DBG_SET_PROLOGUE_END: u8 = 0x07;
const DBG_SET_EPILOGUE_BEGIN: u8 = 0x08;
const DBG_SET_FILE: u8 = 0x09;
const DBG_FIRST_SPECIAL: i32 = 0x0a;
const DBG_LINE_BASE: i32 = -4;
const DBG_LINE_RANGE: i32 = 15;
const DBG_MAX_LINE_DELTA: i32 = DBG_LINE_BASE + DBG_LINE_RANGE - 1;

fn as_u16(index: u32, what: &str) -> Result<u16, DexError>
{
    if index > 0xffff
    {
        fail!("{} index {} does not fit in 16 bits", what, index);
    }
    Ok(index as u16)
}

/// Data section offsets that the id sections and class defs point at.
#[derive(Default)]
struct DataOffsets
{
    parameter_annotations: HashMap<Handle<MethodKey>, u32>,
    debug_infos: HashMap<Handle<MethodKey>, u32>,
    code_items: HashMap<Handle<MethodKey>, u32>,
    /// Per class, in class def order.
    directories: Vec<u32>,
    class_data: Vec<u32>,
}

/// Appends map entries as sections are written, skipping empty ones.
#[derive(Default)]
struct MapBuilder
{
    items: Vec<MapItem>,
}

impl MapBuilder
{
    fn record(&mut self, type_code: u16, count: usize, offset: u32)
    {
        if count > 0
        {
            self.items.push(MapItem::new(type_code, count as u32, offset));
        }
    }
}

/// Line and address state of a debug_info_item being written.
struct DebugWriter<'a>
{
    out: &'a mut DexWriter,
    address: u32,
    line: u32,
}

impl DebugWriter<'_>
{
    fn advance_pc(&mut self, address: u32) -> Result<(), DexError>
    {
        if address < self.address
        {
            fail!("Debug item at 0x{:x} comes after 0x{:x}", address, self.address);
        }
        if address > self.address
        {
            self.out.write_u1(DBG_ADVANCE_PC);
            self.out.write_uleb128(address - self.address);
            self.address = address;
        }
        Ok(())
    }

    fn emit_line(&mut self, address: u32, line: u32) -> Result<(), DexError>
    {
        if address < self.address
        {
            fail!("Line entry at 0x{:x} comes after 0x{:x}", address, self.address);
        }
        let mut line_delta = line.wrapping_sub(self.line) as i32;
        let mut address_delta = address - self.address;

        if line_delta < DBG_LINE_BASE || line_delta > DBG_MAX_LINE_DELTA
        {
            self.out.write_u1(DBG_ADVANCE_LINE);
            self.out.write_sleb128(line_delta);
            line_delta = 0;
        }
        if (line_delta < 2 && address_delta > 16) || (line_delta > 1 && address_delta > 15)
        {
            self.out.write_u1(DBG_ADVANCE_PC);
            self.out.write_uleb128(address_delta);
            address_delta = 0;
        }
        let special = DBG_FIRST_SPECIAL + address_delta as i32 * DBG_LINE_RANGE + (line_delta - DBG_LINE_BASE);
        self.out.write_u1(special as u8);
        self.address = address;
        self.line = line;
        Ok(())
    }
}

impl DexBuilder
{
    fn optional_string_index(&self, value: &Option<String>) -> Result<i32, DexError>
    {
        match value
        {
            Some(value) => Ok(self.string_index(value)? as i32),
            None => Ok(-1),
        }
    }

    fn optional_type_index(&self, value: &Option<String>) -> Result<i32, DexError>
    {
        match value
        {
            Some(value) => Ok(self.type_index(value)? as i32),
            None => Ok(-1),
        }
    }

    fn write_debug_info(&self, out: &mut DexWriter, method: &BuilderMethod, debug_items: &[DebugItem]) -> Result<(), DexError>
    {
        let line_start = debug_items
            .iter()
            .find_map(|item| match item
            {
                DebugItem::LineNumber { line, .. } => Some(*line),
                _ => None,
            })
            .unwrap_or(0);
        out.write_uleb128(line_start);
        out.write_uleb128(method.parameter_names.len() as u32);
        for name in &method.parameter_names
        {
            out.write_uleb128p1(name.map(|name| self.strings.index(name) as i32).unwrap_or(-1));
        }

        let mut state = DebugWriter { out, address: 0, line: line_start };
        for item in debug_items
        {
            if let DebugItem::LineNumber { address, line } = item
            {
                state.emit_line(*address, *line)?;
                continue;
            }
            state.advance_pc(item.address())?;
            match item
            {
                DebugItem::StartLocal { register, name, local_type, signature, .. } => {
                    state.out.write_u1(if signature.is_some() { DBG_START_LOCAL_EXTENDED } else { DBG_START_LOCAL });
                    state.out.write_uleb128(*register);
                    state.out.write_uleb128p1(self.optional_string_index(name)?);
                    state.out.write_uleb128p1(self.optional_type_index(local_type)?);
                    if signature.is_some()
                    {
                        state.out.write_uleb128p1(self.optional_string_index(signature)?);
                    }
                }
                DebugItem::EndLocal { register, .. } => {
                    state.out.write_u1(DBG_END_LOCAL);
                    state.out.write_uleb128(*register);
                }
                DebugItem::RestartLocal { register, .. } => {
                    state.out.write_u1(DBG_RESTART_LOCAL);
                    state.out.write_uleb128(*register);
                }
                DebugItem::PrologueEnd { .. } => state.out.write_u1(DBG_SET_PROLOGUE_END),
                DebugItem::EpilogueBegin { .. } => state.out.write_u1(DBG_SET_EPILOGUE_BEGIN),
                DebugItem::SetSourceFile { source_file, .. } => {
                    state.out.write_u1(DBG_SET_FILE);
                    state.out.write_uleb128p1(self.optional_string_index(source_file)?);
                }
                DebugItem::LineNumber { .. } => {}
            }
        }
        state.out.write_u1(DBG_END_SEQUENCE);
        Ok(())
    }

    fn write_handler(&self, out: &mut DexWriter, handlers: &[ExceptionHandler]) -> Result<(), DexError>
    {
        let typed: Vec<&ExceptionHandler> = handlers.iter().filter(|h| h.exception_type.is_some()).collect();
        let catch_all: Vec<&ExceptionHandler> = handlers.iter().filter(|h| h.exception_type.is_none()).collect();
        if catch_all.len() > 1
        {
            fail!("A try block can have only one catch-all handler");
        }
        let size = typed.len() as i32;
        out.write_sleb128(if catch_all.is_empty() { size } else { -size });
        for handler in typed
        {
            if let Some(exception_type) = &handler.exception_type
            {
                out.write_uleb128(self.type_index(exception_type)?);
            }
            out.write_uleb128(handler.handler_code_address);
        }
        if let Some(handler) = catch_all.first()
        {
            out.write_uleb128(handler.handler_code_address);
        }
        Ok(())
    }

    /// The encoded_catch_handler_list and each try block's offset into it.
    /// Blocks with identical handlers share an entry.
    fn encode_handlers(&self, try_blocks: &[TryBlock]) -> Result<(Vec<u8>, Vec<u16>), DexError>
    {
        let mut unique: Vec<&Vec<ExceptionHandler>> = Vec::new();
        for try_block in try_blocks
        {
            if !unique.contains(&&try_block.handlers)
            {
                unique.push(&try_block.handlers);
            }
        }
        let mut out = DexWriter::new();
        out.write_uleb128(unique.len() as u32);
        let mut offsets = Vec::with_capacity(unique.len());
        for handlers in &unique
        {
            offsets.push(as_u16(out.len() as u32, "handler offset")?);
            self.write_handler(&mut out, handlers)?;
        }
        let mut block_offsets = Vec::with_capacity(try_blocks.len());
        for try_block in try_blocks
        {
            let position = unique.iter().position(|h| **h == try_block.handlers).unwrap_or(0);
            block_offsets.push(offsets[position]);
        }
        Ok((out.into_bytes(), block_offsets))
    }

    fn outs_size(instructions: &[Instruction]) -> u16
    {
        let invokes = |reference: &Reference| matches!(reference, Reference::Method(_) | Reference::CallSite(_));
        instructions
            .iter()
            .map(|instruction| match instruction
            {
                Instruction::Format35c { registers, reference, .. } | Instruction::Format45cc { registers, reference, .. }
                    if invokes(reference) =>
                {
                    registers.len() as u16
                }
                Instruction::Format3rc { register_count, reference, .. } | Instruction::Format4rcc { register_count, reference, .. }
                    if invokes(reference) =>
                {
                    *register_count
                }
                _ => 0,
            })
            .max()
            .unwrap_or(0)
    }

    fn write_code_item(&self, out: &mut DexWriter, method: &BuilderMethod, debug_info_offset: u32) -> Result<(), DexError>
    {
        let implementation = match &method.implementation
        {
            Some(implementation) => implementation,
            None => return Ok(()),
        };
        let mut ins_size = method.proto.parameter_register_count();
        if !method.access_flags.is_static()
        {
            ins_size += 1;
        }

        let mut code = DexWriter::new();
        let mut indexed = Vec::with_capacity(implementation.instructions.len());
        for instruction in &implementation.instructions
        {
            indexed.push(instruction.clone().map_references(|_, reference| self.index_of(&reference))?);
        }
        let code_units = encode_instructions(indexed.iter(), &mut code, &self.opcodes)?;

        let tries = &implementation.try_blocks;
        out.write_u2(implementation.register_count);
        out.write_u2(ins_size);
        out.write_u2(Self::outs_size(&implementation.instructions));
        out.write_u2(as_u16(tries.len() as u32, "try count")?);
        out.write_u4(debug_info_offset);
        out.write_u4(code_units);
        out.write_bytes(code.as_slice());
        if !tries.is_empty()
        {
            if code_units % 2 != 0
            {
                out.write_u2(0);
            }
            let (handlers, handler_offsets) = self.encode_handlers(tries)?;
            for (try_block, handler_offset) in tries.iter().zip(handler_offsets)
            {
                out.write_u4(try_block.start_address);
                out.write_u2(try_block.code_unit_count);
                out.write_u2(handler_offset);
            }
            out.write_bytes(&handlers);
        }
        Ok(())
    }

    fn field_deltas<'a>(&self, class: &BuilderClass, fields: &'a [BuilderField]) -> Result<Vec<(u32, &'a BuilderField)>, DexError>
    {
        let mut previous = None;
        let mut deltas = Vec::with_capacity(fields.len());
        for field in fields
        {
            let index = self.fields.index(field.handle);
            let delta = match previous
            {
                Some(previous) if index <= previous => fail!("Fields of {} are not in index order", class.class.type_name),
                Some(previous) => index - previous,
                None => index,
            };
            previous = Some(index);
            deltas.push((delta, field));
        }
        Ok(deltas)
    }

    fn method_deltas<'a>(&self, class: &BuilderClass, methods: &'a [BuilderMethod]) -> Result<Vec<(u32, &'a BuilderMethod)>, DexError>
    {
        let mut previous = None;
        let mut deltas = Vec::with_capacity(methods.len());
        for method in methods
        {
            let index = self.methods.index(method.handle);
            let delta = match previous
            {
                Some(previous) if index <= previous => fail!("Methods of {} are not in index order", class.class.type_name),
                Some(previous) => index - previous,
                None => index,
            };
            previous = Some(index);
            deltas.push((delta, method));
        }
        Ok(deltas)
    }

    fn write_class_data(&self, out: &mut DexWriter, class: &BuilderClass, offsets: &DataOffsets) -> Result<(), DexError>
    {
        out.write_uleb128(class.static_fields.len() as u32);
        out.write_uleb128(class.instance_fields.len() as u32);
        out.write_uleb128(class.direct_methods.len() as u32);
        out.write_uleb128(class.virtual_methods.len() as u32);
        for fields in [&class.static_fields, &class.instance_fields]
        {
            for (delta, field) in self.field_deltas(class, fields)?
            {
                out.write_uleb128(delta);
                out.write_uleb128(field.access_flags.bits());
            }
        }
        for methods in [&class.direct_methods, &class.virtual_methods]
        {
            for (delta, method) in self.method_deltas(class, methods)?
            {
                out.write_uleb128(delta);
                out.write_uleb128(method.access_flags.bits());
                out.write_uleb128(offsets.code_items.get(&method.handle).copied().unwrap_or(NO_OFFSET));
            }
        }
        Ok(())
    }

    fn directory_item(&self, class: &BuilderClass, offsets: &DataOffsets) -> AnnotationsDirectoryItem
    {
        let set_offset = |set| self.annotation_sets.offset(set);
        let mut field_annotations: Vec<(u32, u32)> = class
            .fields()
            .filter_map(|f| f.annotations.map(|set| (self.fields.index(f.handle), set_offset(set))))
            .collect();
        let mut method_annotations: Vec<(u32, u32)> = class
            .methods()
            .filter_map(|m| m.annotations.map(|set| (self.methods.index(m.handle), set_offset(set))))
            .collect();
        let mut parameter_annotations: Vec<(u32, u32)> = class
            .methods()
            .filter_map(|m| offsets.parameter_annotations.get(&m.handle).map(|offset| (self.methods.index(m.handle), *offset)))
            .collect();
        field_annotations.sort_unstable();
        method_annotations.sort_unstable();
        parameter_annotations.sort_unstable();
        AnnotationsDirectoryItem {
            class_annotations_off: class.annotations.map(set_offset).unwrap_or(NO_OFFSET),
            field_annotations,
            method_annotations,
            parameter_annotations,
        }
    }

    fn write_hidden_api(&self, out: &mut DexWriter, classes: &[&BuilderClass]) -> Result<(), DexError>
    {
        let start = out.position();
        out.write_u4(0);
        for _ in classes
        {
            out.write_u4(0);
        }
        for (position, class) in classes.iter().enumerate()
        {
            let restricted =
                class.fields().any(|f| f.hidden_api.is_some()) || class.methods().any(|m| m.hidden_api.is_some());
            if !restricted
            {
                continue;
            }
            out.patch_u4(start + 4 + position as u32 * 4, out.position() - start)?;
            let flags = class.fields().map(|f| f.hidden_api).chain(class.methods().map(|m| m.hidden_api));
            for restrictions in flags
            {
                out.write_uleb128(restrictions.map(|r| r.value()).unwrap_or(0));
            }
        }
        out.patch_u4(start, out.position() - start)
    }

    /// Writes the data section starting at `data_off` and records where
    /// everything went.
    fn write_data(&self, data_off: u32, classes: &[&BuilderClass]) -> Result<(DexWriter, DataOffsets, MapBuilder), DexError>
    {
        let mut out = DexWriter::with_base(data_off);
        let mut offsets = DataOffsets::default();
        let mut map = MapBuilder::default();

        let strings = self.strings.sorted()?;
        map.record(TYPE_STRING_DATA_ITEM, strings.len(), out.position());
        for (handle, value) in strings
        {
            self.strings.set_offset(handle, out.position())?;
            out.write_string_data(value);
        }

        out.align(4);
        let type_lists = self.type_lists.sorted()?;
        map.record(TYPE_TYPE_LIST, type_lists.len(), out.position());
        for (handle, list) in type_lists
        {
            out.align(4);
            self.type_lists.set_offset(handle, out.position())?;
            let entries = list
                .0
                .iter()
                .map(|t| as_u16(self.types.index(*t), "type").map(TypeListEntry))
                .collect::<Result<Vec<_>, _>>()?;
            TypeListItem::new(entries).write(&mut out);
        }

        let arrays = self.encoded_arrays.sorted()?;
        map.record(TYPE_ENCODED_ARRAY_ITEM, arrays.len(), out.position());
        for (handle, array) in arrays
        {
            self.encoded_arrays.set_offset(handle, out.position())?;
            write_encoded_array(&array.0, &mut out, self)?;
        }

        let annotations = self.annotations.sorted()?;
        map.record(TYPE_ANNOTATION_ITEM, annotations.len(), out.position());
        for (handle, annotation) in annotations
        {
            self.annotations.set_offset(handle, out.position())?;
            out.write_u1(annotation.visibility.value());
            annotation.annotation.write(&mut out, self)?;
        }

        out.align(4);
        let sets = self.annotation_sets.sorted()?;
        map.record(TYPE_ANNOTATION_SET_ITEM, sets.len(), out.position());
        for (handle, set) in sets
        {
            self.annotation_sets.set_offset(handle, out.position())?;
            let mut entries = Vec::with_capacity(set.0.len());
            for annotation in &set.0
            {
                let key = self.annotations.key(*annotation)?;
                entries.push((self.type_index(&key.annotation.annotation_type)?, self.annotations.offset(*annotation)));
            }
            entries.sort_unstable();
            AnnotationSetItem::new(entries.into_iter().map(|(_, offset)| OffsetEntry(offset)).collect()).write(&mut out);
        }

        let ref_lists_start = out.position();
        let mut ref_list_count = 0;
        for class in classes
        {
            for method in class.methods().filter(|m| !m.parameter_annotations.is_empty())
            {
                offsets.parameter_annotations.insert(method.handle, out.position());
                let entries = method
                    .parameter_annotations
                    .iter()
                    .map(|set| OffsetEntry(set.map(|set| self.annotation_sets.offset(set)).unwrap_or(NO_OFFSET)))
                    .collect();
                AnnotationSetRefList::new(entries).write(&mut out);
                ref_list_count += 1;
            }
        }
        map.record(TYPE_ANNOTATION_SET_REF_LIST, ref_list_count, ref_lists_start);

        let directories_start = out.position();
        let mut directory_count = 0;
        for class in classes
        {
            let directory = self.directory_item(class, &offsets);
            if directory.is_empty()
            {
                offsets.directories.push(NO_OFFSET);
                continue;
            }
            offsets.directories.push(out.position());
            directory.write(&mut out);
            directory_count += 1;
        }
        map.record(TYPE_ANNOTATIONS_DIRECTORY_ITEM, directory_count, directories_start);

        let debug_start = out.position();
        let mut debug_count = 0;
        for class in classes
        {
            for method in class.methods()
            {
                let implementation = match &method.implementation
                {
                    Some(implementation) => implementation,
                    None => continue,
                };
                if implementation.debug_items.is_empty() && method.parameter_names.iter().all(Option::is_none)
                {
                    continue;
                }
                offsets.debug_infos.insert(method.handle, out.position());
                self.write_debug_info(&mut out, method, &implementation.debug_items)
                    .map_err(|e| err!(e, "debug info of {}", class.class.type_name))?;
                debug_count += 1;
            }
        }
        map.record(TYPE_DEBUG_INFO_ITEM, debug_count, debug_start);

        out.align(4);
        let code_start = out.position();
        let mut code_count = 0;
        for class in classes
        {
            for method in class.methods().filter(|m| m.implementation.is_some())
            {
                out.align(4);
                offsets.code_items.insert(method.handle, out.position());
                let debug_info_offset = offsets.debug_infos.get(&method.handle).copied().unwrap_or(NO_OFFSET);
                self.write_code_item(&mut out, method, debug_info_offset)
                    .map_err(|e| err!(e, "code of {}", class.class.type_name))?;
                code_count += 1;
            }
        }
        map.record(TYPE_CODE_ITEM, code_count, code_start);

        let class_data_start = out.position();
        let mut class_data_count = 0;
        for class in classes
        {
            if !class.has_members()
            {
                offsets.class_data.push(NO_OFFSET);
                continue;
            }
            offsets.class_data.push(out.position());
            self.write_class_data(&mut out, class, &offsets)?;
            class_data_count += 1;
        }
        map.record(TYPE_CLASS_DATA_ITEM, class_data_count, class_data_start);

        let restricted = classes
            .iter()
            .any(|class| class.fields().any(|f| f.hidden_api.is_some()) || class.methods().any(|m| m.hidden_api.is_some()));
        if restricted
        {
            out.align(4);
            map.record(TYPE_HIDDENAPI_CLASS_DATA_ITEM, 1, out.position());
            self.write_hidden_api(&mut out, classes)?;
        }

        Ok((out, offsets, map))
    }

    fn id_sections(&self, class_count: usize) -> [(u16, u32, u32); 8]
    {
        [
            (TYPE_STRING_ID_ITEM, self.strings.len() as u32, StringIdItem::SIZE),
            (TYPE_TYPE_ID_ITEM, self.types.len() as u32, TypeIdItem::SIZE),
            (TYPE_PROTO_ID_ITEM, self.protos.len() as u32, ProtoIdItem::SIZE),
            (TYPE_FIELD_ID_ITEM, self.fields.len() as u32, FieldIdItem::SIZE),
            (TYPE_METHOD_ID_ITEM, self.methods.len() as u32, MethodIdItem::SIZE),
            (TYPE_CLASS_DEF_ITEM, class_count as u32, ClassDefItem::SIZE),
            (TYPE_CALL_SITE_ID_ITEM, self.call_sites.len() as u32, CallSiteIdItem::SIZE),
            (TYPE_METHOD_HANDLE_ITEM, self.method_handles.len() as u32, MethodHandleItem::SIZE),
        ]
    }

    fn class_def_item(&self, class: &BuilderClass, directory: u32, class_data: u32) -> ClassDefItem
    {
        ClassDefItem {
            class_idx: self.types.index(class.type_handle),
            access_flags: class.class.access_flags.bits(),
            superclass_idx: class.superclass.map(|t| self.types.index(t)).unwrap_or(NO_INDEX),
            interfaces_off: class.interfaces.map(|l| self.type_lists.offset(l)).unwrap_or(NO_OFFSET),
            source_file_idx: class.source_file.map(|s| self.strings.index(s)).unwrap_or(NO_INDEX),
            annotations_off: directory,
            class_data_off: class_data,
            static_values_off: class.static_values.map(|a| self.encoded_arrays.offset(a)).unwrap_or(NO_OFFSET),
        }
    }

    /// Serializes the finalized builder to a complete dex image with its
    /// checksum and signature filled in.
    pub fn write(&self) -> Result<Vec<u8>, DexError>
    {
        let layout = self.layout()?;
        let all_classes = self.classes.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let classes: Vec<&BuilderClass> = layout.class_order.iter().map(|i| &all_classes[*i]).collect();

        let sections = self.id_sections(classes.len());
        let mut map = MapBuilder::default();
        map.record(TYPE_HEADER_ITEM, 1, 0);
        let mut data_off = HEADER_SIZE;
        let mut section_offsets = [0u32; 8];
        for (position, (type_code, count, item_size)) in sections.iter().enumerate()
        {
            section_offsets[position] = if *count > 0 { data_off } else { 0 };
            map.record(*type_code, *count as usize, data_off);
            data_off += count * item_size;
        }

        let (mut data, offsets, data_map) = self.write_data(data_off, &classes)?;
        map.items.extend(data_map.items);
        data.align(4);
        let map_off = data.position();
        map.record(TYPE_MAP_LIST, 1, map_off);
        MapList::new(map.items).write(&mut data);

        let mut out = DexWriter::new();
        out.write_bytes(&[0u8; HEADER_SIZE as usize]);

        let string_count = IntegerCell::default();
        let strings = self.strings.sorted()?;
        CountedList::from_items(string_count.clone(), strings.iter().map(|(h, _)| StringIdItem(self.strings.offset(*h))).collect())
            .write(&mut out);

        let type_count = IntegerCell::default();
        let types = self.types.sorted()?;
        CountedList::from_items(type_count.clone(), types.iter().map(|(_, t)| TypeIdItem(self.strings.index(t.0))).collect())
            .write(&mut out);

        let proto_count = IntegerCell::default();
        let protos = self
            .protos
            .sorted()?
            .into_iter()
            .map(|(_, p)| ProtoIdItem {
                shorty_idx: self.strings.index(p.shorty),
                return_type_idx: self.types.index(p.return_type),
                parameters_off: p.parameters.map(|l| self.type_lists.offset(l)).unwrap_or(NO_OFFSET),
            })
            .collect();
        CountedList::from_items(proto_count.clone(), protos).write(&mut out);

        let field_count = IntegerCell::default();
        let mut fields = Vec::with_capacity(self.fields.len());
        for (_, f) in self.fields.sorted()?
        {
            fields.push(FieldIdItem {
                class_idx: as_u16(self.types.index(f.class), "type")?,
                type_idx: as_u16(self.types.index(f.field_type), "type")?,
                name_idx: self.strings.index(f.name),
            });
        }
        CountedList::from_items(field_count.clone(), fields).write(&mut out);

        let method_count = IntegerCell::default();
        let mut methods = Vec::with_capacity(self.methods.len());
        for (_, m) in self.methods.sorted()?
        {
            methods.push(MethodIdItem {
                class_idx: as_u16(self.types.index(m.class), "type")?,
                proto_idx: as_u16(self.protos.index(m.proto), "proto")?,
                name_idx: self.strings.index(m.name),
            });
        }
        CountedList::from_items(method_count.clone(), methods).write(&mut out);

        let class_count = IntegerCell::default();
        let class_defs = classes
            .iter()
            .enumerate()
            .map(|(position, class)| self.class_def_item(class, offsets.directories[position], offsets.class_data[position]))
            .collect();
        CountedList::from_items(class_count.clone(), class_defs).write(&mut out);

        let call_sites = self.call_sites.sorted()?.into_iter().map(|(_, c)| CallSiteIdItem(self.encoded_arrays.offset(c.0))).collect();
        CountedList::from_items(IntegerCell::default(), call_sites).write(&mut out);

        let mut method_handles = Vec::with_capacity(self.method_handles.len());
        for (_, h) in self.method_handles.sorted()?
        {
            let member = match h.member
            {
                MemberHandle::Field(field) => self.fields.index(field),
                MemberHandle::Method(method) => self.methods.index(method),
            };
            method_handles.push(MethodHandleItem { method_handle_type: h.handle_type.value(), field_or_method_id: as_u16(member, "member")? });
        }
        CountedList::from_items(IntegerCell::default(), method_handles).write(&mut out);

        if out.position() != data_off
        {
            fail!("Id sections end at 0x{:x} instead of 0x{:x}", out.position(), data_off);
        }
        let data_size = data.len() as u32;
        out.write_bytes(data.as_slice());

        let section_offset = |position: usize| section_offsets[position];
        let mut header = Header {
            magic: Header::magic_for_version(self.opcodes.dex_version()),
            checksum: 0,
            signature: [0; 20],
            file_size: out.position(),
            header_size: HEADER_SIZE,
            endian_tag: ENDIAN_CONSTANT,
            link_size: 0,
            link_off: 0,
            map_off,
            string_ids_size: string_count.get(),
            string_ids_off: section_offset(0),
            type_ids_size: type_count.get(),
            type_ids_off: section_offset(1),
            proto_ids_size: proto_count.get(),
            proto_ids_off: section_offset(2),
            field_ids_size: field_count.get(),
            field_ids_off: section_offset(3),
            method_ids_size: method_count.get(),
            method_ids_off: section_offset(4),
            class_defs_size: class_count.get(),
            class_defs_off: section_offset(5),
            data_size,
            data_off,
        };

        let mut file = out.into_bytes();
        overwrite_header(&mut file, &header);
        header.signature = compute_sha1(&file[32..]);
        overwrite_header(&mut file, &header);
        header.checksum = adler32_slice(&file[12..]);
        overwrite_header(&mut file, &header);

        debug!("Data section at 0x{:x}, map at 0x{:x}", data_off, map_off);
        info!("Wrote dex version {:03} with {} classes, {} bytes", self.opcodes.dex_version(), classes.len(), file.len());
        Ok(file)
    }
}

fn overwrite_header(file: &mut [u8], header: &Header)
{
    let mut writer = DexWriter::new();
    header.write(&mut writer);
    file[..HEADER_SIZE as usize].copy_from_slice(writer.as_slice());
}

fn compute_sha1(data: &[u8]) -> [u8; 20]
{
    let mut hasher = Sha1::new();
    hasher.update(data);
    let digest = hasher.finalize();
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest);
    out
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::dex::buffer::DexReader;
    use crate::dex::model::AccessFlags;

    fn debug_bytes(items: &[DebugItem]) -> Vec<u8>
    {
        let builder = DexBuilder::new(Default::default());
        builder.finalize().unwrap();
        let method = BuilderMethod {
            handle: Handle::new(0),
            access_flags: AccessFlags::empty(),
            annotations: None,
            parameter_annotations: Vec::new(),
            parameter_names: Vec::new(),
            proto: crate::dex::reference::MethodProtoRef::new(&[], "V"),
            implementation: None,
            hidden_api: None,
        };
        let mut out = DexWriter::new();
        builder.write_debug_info(&mut out, &method, items).unwrap();
        out.into_bytes()
    }

    #[test]
    fn small_line_steps_use_special_opcodes()
    {
        let bytes = debug_bytes(&[DebugItem::LineNumber { address: 0, line: 10 }, DebugItem::LineNumber { address: 2, line: 11 }]);
        // line_start 10, no parameters, (0, +0), (+2, +1), end
        assert_eq!(bytes, vec![10, 0, 0x0e, 0x0a + 2 * 15 + 5, 0x00]);
    }

    #[test]
    fn large_deltas_advance_explicitly()
    {
        let bytes = debug_bytes(&[DebugItem::LineNumber { address: 0, line: 1 }, DebugItem::LineNumber { address: 40, line: 100 }]);
        let mut reader = DexReader::new(&bytes);
        assert_eq!(reader.read_uleb128().unwrap(), 1);
        assert_eq!(reader.read_uleb128().unwrap(), 0);
        assert_eq!(reader.read_u1().unwrap(), 0x0e);
        assert_eq!(reader.read_u1().unwrap(), DBG_ADVANCE_LINE);
        assert_eq!(reader.read_sleb128().unwrap(), 99);
        assert_eq!(reader.read_u1().unwrap(), DBG_ADVANCE_PC);
        assert_eq!(reader.read_uleb128().unwrap(), 40);
        assert_eq!(reader.read_u1().unwrap(), 0x0e);
        assert_eq!(reader.read_u1().unwrap(), DBG_END_SEQUENCE);
    }

    #[test]
    fn out_of_order_items_are_rejected()
    {
        let mut out = DexWriter::new();
        let mut state = DebugWriter { out: &mut out, address: 4, line: 1 };
        assert!(state.advance_pc(2).is_err());
        assert!(state.emit_line(3, 2).is_err());
    }

    #[test]
    fn shared_handlers_are_written_once()
    {
        let builder = DexBuilder::new(Default::default());
        builder.intern_type("Ljava/lang/Exception;").unwrap();
        builder.finalize().unwrap();
        let handlers = vec![
            ExceptionHandler { exception_type: Some("Ljava/lang/Exception;".to_string()), handler_code_address: 8 },
            ExceptionHandler { exception_type: None, handler_code_address: 10 },
        ];
        let tries = vec![
            TryBlock { start_address: 0, code_unit_count: 2, handlers: handlers.clone() },
            TryBlock { start_address: 4, code_unit_count: 2, handlers },
        ];
        let (bytes, offsets) = builder.encode_handlers(&tries).unwrap();
        assert_eq!(offsets, vec![1, 1]);
        // one list; size -1 (catch-all), type 0 at 8, catch-all at 10
        assert_eq!(bytes, vec![1, 0x7f, 0, 8, 10]);
    }
}
