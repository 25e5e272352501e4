use log::warn;

use crate::dex::backed::DexBackedDexFile;
use crate::dex::buffer::DexReader;
use crate::dex::error::DexError;
use crate::dex::instructions::Instruction;
use crate::dex::model::{DebugItem, ExceptionHandler, MethodImplementation, Stream, TryBlock};
use crate::dex::opcode_format::Opcodes;
use crate::dex::raw::NO_OFFSET;
use crate::dex::reference::RefResolver;

const CODE_ITEM_HEADER_SIZE: u32 = 16;
const TRY_ITEM_SIZE: u32 = 8;

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
const DBG_FIRST_SPECIAL: u8 = 0x0a;
const DBG_LINE_BASE: i32 = -4;
const DBG_LINE_RANGE: u8 = 15;

/// A code_item. The header is read up front; instructions, tries and debug
/// info are decoded when asked for.
#[derive(Debug, Clone)]
pub struct DexBackedMethodImplementation
{
    dex: DexBackedDexFile,
    code_offset: u32,
    register_count: u16,
    tries_size: u16,
    debug_info_offset: u32,
    instructions_size: u32,
}

impl DexBackedMethodImplementation
{
    pub(crate) fn new(dex: DexBackedDexFile, code_offset: u32) -> Result<DexBackedMethodImplementation, DexError>
    {
        let mut reader = dex.buffer().reader_at(code_offset as usize)?;
        let register_count = reader.read_u2()?;
        reader.skip(4)?;
        let tries_size = reader.read_u2()?;
        let debug_info_offset = reader.read_small_uint()?;
        let instructions_size = reader.read_small_uint()?;
        let end = code_offset as usize + CODE_ITEM_HEADER_SIZE as usize + instructions_size as usize * 2;
        if end > dex.buffer().len()
        {
            fail!("Code item at 0x{:x} runs past the end of the file", code_offset);
        }
        Ok(DexBackedMethodImplementation { dex, code_offset, register_count, tries_size, debug_info_offset, instructions_size })
    }

    pub fn code_offset(&self) -> u32
    {
        self.code_offset
    }

    /// Size of the instructions in code units.
    pub fn instructions_size(&self) -> u32
    {
        self.instructions_size
    }

    fn instructions_start(&self) -> u32
    {
        self.code_offset + CODE_ITEM_HEADER_SIZE
    }

    fn tries_start(&self) -> u32
    {
        // tries are 4-byte aligned; code items themselves always are
        let end = self.instructions_start() + self.instructions_size * 2;
        end + (self.instructions_size & 1) * 2
    }

    fn handlers_start(&self) -> u32
    {
        self.tries_start() + self.tries_size as u32 * TRY_ITEM_SIZE
    }

    /// Bytes taken by the code item, tries and handlers included.
    pub fn size(&self) -> Result<u32, DexError>
    {
        if self.tries_size == 0
        {
            return Ok(CODE_ITEM_HEADER_SIZE + self.instructions_size * 2);
        }
        let mut reader = self.dex.buffer().reader_at(self.handlers_start() as usize)?;
        let handler_count = reader.read_uleb128()?;
        for _ in 0..handler_count
        {
            let size = reader.read_sleb128()?;
            for _ in 0..size.unsigned_abs()
            {
                reader.skip_uleb128()?;
                reader.skip_uleb128()?;
            }
            if size <= 0
            {
                reader.skip_uleb128()?;
            }
        }
        Ok(reader.tell() as u32 - self.code_offset)
    }

    /// The parameter names recorded in the debug info, in declaration order.
    /// Empty when the method has no debug info.
    pub fn parameter_names(&self) -> Result<Vec<Option<String>>, DexError>
    {
        if self.debug_info_offset == NO_OFFSET
        {
            return Ok(Vec::new());
        }
        let mut reader = self.dex.buffer().reader_at(self.debug_info_offset as usize)?;
        reader.skip_uleb128()?;
        let count = reader.read_uleb128()?;
        let mut names = Vec::with_capacity(count.min(256) as usize);
        for _ in 0..count
        {
            names.push(self.dex.optional_string(reader.read_uleb128p1()? as u32)?);
        }
        Ok(names)
    }

    fn read_handler(&self, offset: u32) -> Result<Vec<ExceptionHandler>, DexError>
    {
        let mut reader = self.dex.buffer().reader_at(offset as usize)?;
        let size = reader.read_sleb128()?;
        let mut handlers = Vec::with_capacity(size.unsigned_abs().min(64) as usize + 1);
        for _ in 0..size.unsigned_abs()
        {
            let exception_type = self.dex.type_name(reader.read_uleb128()?)?;
            let handler_code_address = reader.read_uleb128()?;
            handlers.push(ExceptionHandler { exception_type: Some(exception_type), handler_code_address });
        }
        if size <= 0
        {
            handlers.push(ExceptionHandler { exception_type: None, handler_code_address: reader.read_uleb128()? });
        }
        Ok(handlers)
    }
}

impl MethodImplementation for DexBackedMethodImplementation
{
    fn register_count(&self) -> Result<u16, DexError>
    {
        Ok(self.register_count)
    }

    fn instructions(&self) -> Stream<'_, Instruction>
    {
        let start = self.instructions_start() as usize;
        let end = start + self.instructions_size as usize * 2;
        let code = &self.dex.buffer().as_slice()[start..end];
        Box::new(InstructionIter { dex: &self.dex, opcodes: self.dex.image.opcodes.clone(), reader: DexReader::new(code), failed: false })
    }

    fn try_blocks(&self) -> Result<Vec<TryBlock>, DexError>
    {
        if self.tries_size == 0
        {
            return Ok(Vec::new());
        }
        let mut reader = self.dex.buffer().reader_at(self.tries_start() as usize)?;
        let padding_offset = self.tries_start() as usize - 2;
        if self.instructions_size & 1 != 0 && self.dex.buffer().read_u2_at(padding_offset)? != 0
        {
            warn!("Non-zero padding before tries at 0x{:x}", padding_offset);
        }
        let handlers_start = self.handlers_start();
        let mut try_blocks = Vec::with_capacity(self.tries_size as usize);
        for index in 0..self.tries_size
        {
            let start_address = reader.read_small_uint()?;
            let code_unit_count = reader.read_u2()?;
            let handler_offset = reader.read_u2()? as u32;
            let handlers = self
                .read_handler(handlers_start + handler_offset)
                .map_err(|e| err!(e, "try block {}", index))?;
            try_blocks.push(TryBlock { start_address, code_unit_count, handlers });
        }
        Ok(try_blocks)
    }

    fn debug_items(&self) -> Stream<'_, DebugItem>
    {
        if self.debug_info_offset == NO_OFFSET
        {
            return Box::new(std::iter::empty());
        }
        let mut reader = match self.dex.buffer().reader_at(self.debug_info_offset as usize)
        {
            Ok(reader) => reader,
            Err(e) => return Box::new(std::iter::once(Err(e))),
        };
        let mut header = || -> Result<u32, DexError> {
            let line_start = reader.read_uleb128()?;
            let parameter_count = reader.read_uleb128()?;
            for _ in 0..parameter_count
            {
                reader.skip_uleb128()?;
            }
            Ok(line_start)
        };
        match header()
        {
            Ok(line) => Box::new(DebugItemIter { dex: &self.dex, reader, address: 0, line, done: false }),
            Err(e) => Box::new(std::iter::once(Err(e))),
        }
    }
}

struct InstructionIter<'a>
{
    dex: &'a DexBackedDexFile,
    opcodes: Opcodes,
    reader: DexReader<'a>,
    failed: bool,
}

impl Iterator for InstructionIter<'_>
{
    type Item = Result<Instruction, DexError>;

    fn next(&mut self) -> Option<Self::Item>
    {
        if self.failed || self.reader.remaining() == 0
        {
            return None;
        }
        let address = self.reader.tell() / 2;
        let dex = self.dex;
        let decoded = Instruction::decode(&mut self.reader, &self.opcodes)
            .and_then(|instruction| instruction.map_references(|reference_type, index| dex.resolve(reference_type, index)));
        if decoded.is_err()
        {
            self.failed = true;
        }
        Some(decoded.map_err(|e| err!(e, "instruction at address 0x{:x}", address)))
    }
}

/// Runs the debug_info state machine, yielding one item per emitting opcode.
struct DebugItemIter<'a>
{
    dex: &'a DexBackedDexFile,
    reader: DexReader<'a>,
    address: u32,
    line: u32,
    done: bool,
}

impl DebugItemIter<'_>
{
    fn step(&mut self) -> Result<Option<DebugItem>, DexError>
    {
        let dex = self.dex;
        loop
        {
            let opcode = self.reader.read_u1()?;
            let address = self.address;
            match opcode
            {
                DBG_END_SEQUENCE => return Ok(None),
                DBG_ADVANCE_PC => self.address = self.address.wrapping_add(self.reader.read_uleb128()?),
                DBG_ADVANCE_LINE => self.line = self.line.wrapping_add(self.reader.read_sleb128()? as u32),
                DBG_START_LOCAL | DBG_START_LOCAL_EXTENDED =>
                {
                    let register = self.reader.read_uleb128()?;
                    let name = dex.optional_string(self.reader.read_uleb128p1()? as u32)?;
                    let local_type = dex.optional_type(self.reader.read_uleb128p1()? as u32)?;
                    let signature = if opcode == DBG_START_LOCAL_EXTENDED
                    {
                        dex.optional_string(self.reader.read_uleb128p1()? as u32)?
                    }
                    else
                    {
                        None
                    };
                    return Ok(Some(DebugItem::StartLocal { address, register, name, local_type, signature }));
                }
                DBG_END_LOCAL => return Ok(Some(DebugItem::EndLocal { address, register: self.reader.read_uleb128()? })),
                DBG_RESTART_LOCAL => return Ok(Some(DebugItem::RestartLocal { address, register: self.reader.read_uleb128()? })),
                DBG_SET_PROLOGUE_END => return Ok(Some(DebugItem::PrologueEnd { address })),
                DBG_SET_EPILOGUE_BEGIN => return Ok(Some(DebugItem::EpilogueBegin { address })),
                DBG_SET_FILE =>
                {
                    let source_file = dex.optional_string(self.reader.read_uleb128p1()? as u32)?;
                    return Ok(Some(DebugItem::SetSourceFile { address, source_file }));
                }
                special =>
                {
                    let adjusted = special - DBG_FIRST_SPECIAL;
                    self.line = self.line.wrapping_add((DBG_LINE_BASE + (adjusted % DBG_LINE_RANGE) as i32) as u32);
                    self.address = self.address.wrapping_add((adjusted / DBG_LINE_RANGE) as u32);
                    return Ok(Some(DebugItem::LineNumber { address: self.address, line: self.line }));
                }
            }
        }
    }
}

impl Iterator for DebugItemIter<'_>
{
    type Item = Result<DebugItem, DexError>;

    fn next(&mut self) -> Option<Self::Item>
    {
        if self.done
        {
            return None;
        }
        match self.step()
        {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(err!(e, "debug info at 0x{:x}", self.reader.tell())))
            }
        }
    }
}
