//! Dalvik instructions, one variant per encoding format.
//!
//! `Instruction` is generic over how references are represented: `u32`
//! pool indices on the wire, resolved [`Reference`]s in the model. Register
//! and literal widths are checked by [`Instruction::validate`], which
//! `encode` always runs first.

use std::fmt;

use num_traits::NumCast;

use crate::dex::buffer::{DexReader, DexWriter};
use crate::dex::error::DexError;
use crate::dex::opcode_format::{Format, Opcode, Opcodes, ReferenceType};
use crate::dex::reference::Reference;

/// One key/target pair of a sparse-switch payload. `target` is relative to
/// the switch instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SwitchElement {
    pub key: i32,
    pub target: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Instruction<R = Reference> {
    Format10t { opcode: &'static Opcode, code_offset: i32 },
    Format10x { opcode: &'static Opcode },
    Format11n { opcode: &'static Opcode, register_a: u16, literal: i32 },
    Format11x { opcode: &'static Opcode, register_a: u16 },
    Format12x { opcode: &'static Opcode, register_a: u16, register_b: u16 },
    Format20bc { opcode: &'static Opcode, verification_error: u8, reference_type: ReferenceType, reference: R },
    Format20t { opcode: &'static Opcode, code_offset: i32 },
    Format21c { opcode: &'static Opcode, register_a: u16, reference: R },
    /// `literal` is the full 32-bit value; only its high 16 bits are stored.
    Format21ih { opcode: &'static Opcode, register_a: u16, literal: i32 },
    /// `literal` is the full 64-bit value; only its high 16 bits are stored.
    Format21lh { opcode: &'static Opcode, register_a: u16, literal: i64 },
    Format21s { opcode: &'static Opcode, register_a: u16, literal: i32 },
    Format21t { opcode: &'static Opcode, register_a: u16, code_offset: i32 },
    Format22b { opcode: &'static Opcode, register_a: u16, register_b: u16, literal: i32 },
    Format22c { opcode: &'static Opcode, register_a: u16, register_b: u16, reference: R },
    Format22cs { opcode: &'static Opcode, register_a: u16, register_b: u16, field_offset: u16 },
    Format22s { opcode: &'static Opcode, register_a: u16, register_b: u16, literal: i32 },
    Format22t { opcode: &'static Opcode, register_a: u16, register_b: u16, code_offset: i32 },
    Format22x { opcode: &'static Opcode, register_a: u16, register_b: u16 },
    Format23x { opcode: &'static Opcode, register_a: u16, register_b: u16, register_c: u16 },
    Format30t { opcode: &'static Opcode, code_offset: i32 },
    Format31c { opcode: &'static Opcode, register_a: u16, reference: R },
    Format31i { opcode: &'static Opcode, register_a: u16, literal: i32 },
    Format31t { opcode: &'static Opcode, register_a: u16, code_offset: i32 },
    Format32x { opcode: &'static Opcode, register_a: u16, register_b: u16 },
    Format35c { opcode: &'static Opcode, registers: Vec<u16>, reference: R },
    Format35mi { opcode: &'static Opcode, registers: Vec<u16>, inline_index: u16 },
    Format35ms { opcode: &'static Opcode, registers: Vec<u16>, vtable_index: u16 },
    Format3rc { opcode: &'static Opcode, start_register: u16, register_count: u16, reference: R },
    Format3rmi { opcode: &'static Opcode, start_register: u16, register_count: u16, inline_index: u16 },
    Format3rms { opcode: &'static Opcode, start_register: u16, register_count: u16, vtable_index: u16 },
    Format45cc { opcode: &'static Opcode, registers: Vec<u16>, reference: R, proto: R },
    Format4rcc { opcode: &'static Opcode, start_register: u16, register_count: u16, reference: R, proto: R },
    Format51l { opcode: &'static Opcode, register_a: u16, literal: i64 },
    PackedSwitchPayload { opcode: &'static Opcode, first_key: i32, targets: Vec<i32> },
    SparseSwitchPayload { opcode: &'static Opcode, elements: Vec<SwitchElement> },
    ArrayPayload { opcode: &'static Opcode, element_width: u16, elements: Vec<i64> },
}

fn fits<T: NumCast>(value: i64) -> bool {
    num_traits::cast::<i64, T>(value).is_some()
}

fn check_nibble_register(value: u16) -> Result<(), DexError> {
    if value > 0x0f {
        fail!("Invalid register: v{}. Must be between v0 and v15, inclusive.", value);
    }
    Ok(())
}

fn check_byte_register(value: u16) -> Result<(), DexError> {
    if value > 0xff {
        fail!("Invalid register: v{}. Must be between v0 and v255, inclusive.", value);
    }
    Ok(())
}

fn check_register_list(registers: &[u16]) -> Result<(), DexError> {
    if registers.len() > 5 {
        fail!("Invalid register count: {}. Must be between 0 and 5, inclusive.", registers.len());
    }
    for register in registers {
        check_nibble_register(*register)?;
    }
    Ok(())
}

fn check_register_range(start_register: u16, register_count: u16) -> Result<(), DexError> {
    if register_count > 0xff {
        fail!("Invalid register count: {}. Must be between 0 and 255, inclusive.", register_count);
    }
    if register_count > 0 && start_register as u32 + register_count as u32 - 1 > 0xffff {
        fail!("Invalid register range starting at v{} with {} registers", start_register, register_count);
    }
    Ok(())
}

fn check_literal<T: NumCast>(literal: i64, what: &str) -> Result<(), DexError> {
    if !fits::<T>(literal) {
        fail!("Invalid literal value: {}. Does not fit a {} literal.", literal, what);
    }
    Ok(())
}

fn check_code_offset<T: NumCast>(code_offset: i64, what: &str) -> Result<(), DexError> {
    if !fits::<T>(code_offset) {
        fail!("Invalid code offset: {}. Does not fit a {} offset.", code_offset, what);
    }
    Ok(())
}

fn check_index(index: u32, limit: u32) -> Result<(), DexError> {
    if index > limit {
        fail!("Invalid reference index {}. Must be at most 0x{:x}.", index, limit);
    }
    Ok(())
}

impl<R> Instruction<R> {
    pub fn opcode(&self) -> &'static Opcode {
        match self {
            Instruction::Format10t { opcode, .. }
            | Instruction::Format10x { opcode }
            | Instruction::Format11n { opcode, .. }
            | Instruction::Format11x { opcode, .. }
            | Instruction::Format12x { opcode, .. }
            | Instruction::Format20bc { opcode, .. }
            | Instruction::Format20t { opcode, .. }
            | Instruction::Format21c { opcode, .. }
            | Instruction::Format21ih { opcode, .. }
            | Instruction::Format21lh { opcode, .. }
            | Instruction::Format21s { opcode, .. }
            | Instruction::Format21t { opcode, .. }
            | Instruction::Format22b { opcode, .. }
            | Instruction::Format22c { opcode, .. }
            | Instruction::Format22cs { opcode, .. }
            | Instruction::Format22s { opcode, .. }
            | Instruction::Format22t { opcode, .. }
            | Instruction::Format22x { opcode, .. }
            | Instruction::Format23x { opcode, .. }
            | Instruction::Format30t { opcode, .. }
            | Instruction::Format31c { opcode, .. }
            | Instruction::Format31i { opcode, .. }
            | Instruction::Format31t { opcode, .. }
            | Instruction::Format32x { opcode, .. }
            | Instruction::Format35c { opcode, .. }
            | Instruction::Format35mi { opcode, .. }
            | Instruction::Format35ms { opcode, .. }
            | Instruction::Format3rc { opcode, .. }
            | Instruction::Format3rmi { opcode, .. }
            | Instruction::Format3rms { opcode, .. }
            | Instruction::Format45cc { opcode, .. }
            | Instruction::Format4rcc { opcode, .. }
            | Instruction::Format51l { opcode, .. }
            | Instruction::PackedSwitchPayload { opcode, .. }
            | Instruction::SparseSwitchPayload { opcode, .. }
            | Instruction::ArrayPayload { opcode, .. } => *opcode,
        }
    }

    /// The format this variant encodes, independent of the opcode it holds.
    pub fn format(&self) -> Format {
        match self {
            Instruction::Format10t { .. } => Format::Format10t,
            Instruction::Format10x { .. } => Format::Format10x,
            Instruction::Format11n { .. } => Format::Format11n,
            Instruction::Format11x { .. } => Format::Format11x,
            Instruction::Format12x { .. } => Format::Format12x,
            Instruction::Format20bc { .. } => Format::Format20bc,
            Instruction::Format20t { .. } => Format::Format20t,
            Instruction::Format21c { .. } => Format::Format21c,
            Instruction::Format21ih { .. } => Format::Format21ih,
            Instruction::Format21lh { .. } => Format::Format21lh,
            Instruction::Format21s { .. } => Format::Format21s,
            Instruction::Format21t { .. } => Format::Format21t,
            Instruction::Format22b { .. } => Format::Format22b,
            Instruction::Format22c { .. } => Format::Format22c,
            Instruction::Format22cs { .. } => Format::Format22cs,
            Instruction::Format22s { .. } => Format::Format22s,
            Instruction::Format22t { .. } => Format::Format22t,
            Instruction::Format22x { .. } => Format::Format22x,
            Instruction::Format23x { .. } => Format::Format23x,
            Instruction::Format30t { .. } => Format::Format30t,
            Instruction::Format31c { .. } => Format::Format31c,
            Instruction::Format31i { .. } => Format::Format31i,
            Instruction::Format31t { .. } => Format::Format31t,
            Instruction::Format32x { .. } => Format::Format32x,
            Instruction::Format35c { .. } => Format::Format35c,
            Instruction::Format35mi { .. } => Format::Format35mi,
            Instruction::Format35ms { .. } => Format::Format35ms,
            Instruction::Format3rc { .. } => Format::Format3rc,
            Instruction::Format3rmi { .. } => Format::Format3rmi,
            Instruction::Format3rms { .. } => Format::Format3rms,
            Instruction::Format45cc { .. } => Format::Format45cc,
            Instruction::Format4rcc { .. } => Format::Format4rcc,
            Instruction::Format51l { .. } => Format::Format51l,
            Instruction::PackedSwitchPayload { .. } => Format::PackedSwitchPayload,
            Instruction::SparseSwitchPayload { .. } => Format::SparseSwitchPayload,
            Instruction::ArrayPayload { .. } => Format::ArrayPayload,
        }
    }

    /// Size in 16-bit code units.
    pub fn code_units(&self) -> usize {
        match self {
            Instruction::PackedSwitchPayload { targets, .. } => 4 + targets.len() * 2,
            Instruction::SparseSwitchPayload { elements, .. } => 2 + elements.len() * 4,
            Instruction::ArrayPayload { element_width, elements, .. } => {
                4 + (*element_width as usize * elements.len() + 1) / 2
            }
            other => other.format().code_units().unwrap_or(0),
        }
    }

    /// Branch offset in code units relative to this instruction, for the
    /// formats that carry one.
    pub fn code_offset(&self) -> Option<i32> {
        match self {
            Instruction::Format10t { code_offset, .. }
            | Instruction::Format20t { code_offset, .. }
            | Instruction::Format21t { code_offset, .. }
            | Instruction::Format22t { code_offset, .. }
            | Instruction::Format30t { code_offset, .. }
            | Instruction::Format31t { code_offset, .. } => Some(*code_offset),
            _ => None,
        }
    }

    /// Replaces the branch offset, checking it fits the format.
    pub fn set_code_offset(&mut self, offset: i64) -> Result<(), DexError> {
        let name = self.opcode().name;
        let slot = match self {
            Instruction::Format10t { code_offset, .. } => {
                check_code_offset::<i8>(offset, "10t")?;
                code_offset
            }
            Instruction::Format20t { code_offset, .. }
            | Instruction::Format21t { code_offset, .. }
            | Instruction::Format22t { code_offset, .. } => {
                check_code_offset::<i16>(offset, "16-bit")?;
                code_offset
            }
            Instruction::Format30t { code_offset, .. } | Instruction::Format31t { code_offset, .. } => {
                check_code_offset::<i32>(offset, "32-bit")?;
                code_offset
            }
            _ => fail!("{} does not have a code offset", name),
        };
        *slot = offset as i32;
        Ok(())
    }

    /// Checks every register, literal, offset and count against the widths
    /// of the format.
    pub fn validate(&self) -> Result<(), DexError> {
        let opcode = self.opcode();
        if opcode.format != self.format() {
            fail!("Opcode {} has format {:?} but the instruction is {:?}", opcode.name, opcode.format, self.format());
        }
        let check = || -> Result<(), DexError> { match self {
            Instruction::Format10t { code_offset, .. } => check_code_offset::<i8>(*code_offset as i64, "10t"),
            Instruction::Format10x { .. } => Ok(()),
            Instruction::Format11n { register_a, literal, .. } => {
                check_nibble_register(*register_a)?;
                if !(-8..=7).contains(literal) {
                    fail!("Invalid literal value: {}. Must be between -8 and 7, inclusive.", literal);
                }
                Ok(())
            }
            Instruction::Format11x { register_a, .. } => check_byte_register(*register_a),
            Instruction::Format12x { register_a, register_b, .. } => {
                check_nibble_register(*register_a)?;
                check_nibble_register(*register_b)
            }
            Instruction::Format20bc { verification_error, reference_type, .. } => {
                if *verification_error > 0x3f {
                    fail!("Invalid verification error value: {}. Must be between 0 and 63, inclusive.", verification_error);
                }
                reference_type.verification_bits().map(|_| ())
            }
            Instruction::Format20t { code_offset, .. } => check_code_offset::<i16>(*code_offset as i64, "20t"),
            Instruction::Format21c { register_a, .. } => check_byte_register(*register_a),
            Instruction::Format21ih { register_a, literal, .. } => {
                check_byte_register(*register_a)?;
                if literal & 0xffff != 0 {
                    fail!("Invalid literal value: {}. Low 16 bits must be zeroed out.", literal);
                }
                Ok(())
            }
            Instruction::Format21lh { register_a, literal, .. } => {
                check_byte_register(*register_a)?;
                if literal & 0xffff_ffff_ffff != 0 {
                    fail!("Invalid literal value: {}. Low 48 bits must be zeroed out.", literal);
                }
                Ok(())
            }
            Instruction::Format21s { register_a, literal, .. } => {
                check_byte_register(*register_a)?;
                check_literal::<i16>(*literal as i64, "16-bit")
            }
            Instruction::Format21t { register_a, code_offset, .. } => {
                check_byte_register(*register_a)?;
                check_code_offset::<i16>(*code_offset as i64, "21t")
            }
            Instruction::Format22b { register_a, register_b, literal, .. } => {
                check_byte_register(*register_a)?;
                check_byte_register(*register_b)?;
                check_literal::<i8>(*literal as i64, "8-bit")
            }
            Instruction::Format22c { register_a, register_b, .. }
            | Instruction::Format22cs { register_a, register_b, .. } => {
                check_nibble_register(*register_a)?;
                check_nibble_register(*register_b)
            }
            Instruction::Format22s { register_a, register_b, literal, .. } => {
                check_nibble_register(*register_a)?;
                check_nibble_register(*register_b)?;
                check_literal::<i16>(*literal as i64, "16-bit")
            }
            Instruction::Format22t { register_a, register_b, code_offset, .. } => {
                check_nibble_register(*register_a)?;
                check_nibble_register(*register_b)?;
                check_code_offset::<i16>(*code_offset as i64, "22t")
            }
            Instruction::Format22x { register_a, .. } => check_byte_register(*register_a),
            Instruction::Format23x { register_a, register_b, register_c, .. } => {
                check_byte_register(*register_a)?;
                check_byte_register(*register_b)?;
                check_byte_register(*register_c)
            }
            Instruction::Format30t { .. } => Ok(()),
            Instruction::Format31c { register_a, .. }
            | Instruction::Format31i { register_a, .. }
            | Instruction::Format31t { register_a, .. }
            | Instruction::Format51l { register_a, .. } => check_byte_register(*register_a),
            Instruction::Format32x { .. } => Ok(()),
            Instruction::Format35c { registers, .. }
            | Instruction::Format35mi { registers, .. }
            | Instruction::Format35ms { registers, .. }
            | Instruction::Format45cc { registers, .. } => check_register_list(registers),
            Instruction::Format3rc { start_register, register_count, .. }
            | Instruction::Format3rmi { start_register, register_count, .. }
            | Instruction::Format3rms { start_register, register_count, .. }
            | Instruction::Format4rcc { start_register, register_count, .. } => {
                check_register_range(*start_register, *register_count)
            }
            Instruction::PackedSwitchPayload { targets, .. } => {
                if targets.len() > 0xffff {
                    fail!("Packed switch payload has {} targets, more than 65535", targets.len());
                }
                Ok(())
            }
            Instruction::SparseSwitchPayload { elements, .. } => {
                if elements.len() > 0xffff {
                    fail!("Sparse switch payload has {} keys, more than 65535", elements.len());
                }
                if elements.windows(2).any(|pair| pair[0].key >= pair[1].key) {
                    fail!("Sparse switch keys must be sorted in ascending order");
                }
                Ok(())
            }
            Instruction::ArrayPayload { element_width, elements, .. } => check_array_payload(*element_width, elements),
        } };
        check().map_err(|e| err!(e, "{}", opcode.name))
    }

    /// Validates and hands the instruction back.
    pub fn checked(self) -> Result<Self, DexError> {
        self.validate()?;
        Ok(self)
    }

    /// Rebuilds the instruction with every reference passed through `f`,
    /// which also gets the kind of reference expected at that slot.
    pub fn map_references<S, E, F>(self, mut f: F) -> Result<Instruction<S>, E>
    where
        F: FnMut(ReferenceType, R) -> Result<S, E>,
    {
        Ok(match self {
            Instruction::Format10t { opcode, code_offset } => Instruction::Format10t { opcode, code_offset },
            Instruction::Format10x { opcode } => Instruction::Format10x { opcode },
            Instruction::Format11n { opcode, register_a, literal } => Instruction::Format11n { opcode, register_a, literal },
            Instruction::Format11x { opcode, register_a } => Instruction::Format11x { opcode, register_a },
            Instruction::Format12x { opcode, register_a, register_b } => {
                Instruction::Format12x { opcode, register_a, register_b }
            }
            Instruction::Format20bc { opcode, verification_error, reference_type, reference } => Instruction::Format20bc {
                opcode,
                verification_error,
                reference_type,
                reference: f(reference_type, reference)?,
            },
            Instruction::Format20t { opcode, code_offset } => Instruction::Format20t { opcode, code_offset },
            Instruction::Format21c { opcode, register_a, reference } => {
                Instruction::Format21c { opcode, register_a, reference: f(opcode.reference_type, reference)? }
            }
            Instruction::Format21ih { opcode, register_a, literal } => Instruction::Format21ih { opcode, register_a, literal },
            Instruction::Format21lh { opcode, register_a, literal } => Instruction::Format21lh { opcode, register_a, literal },
            Instruction::Format21s { opcode, register_a, literal } => Instruction::Format21s { opcode, register_a, literal },
            Instruction::Format21t { opcode, register_a, code_offset } => {
                Instruction::Format21t { opcode, register_a, code_offset }
            }
            Instruction::Format22b { opcode, register_a, register_b, literal } => {
                Instruction::Format22b { opcode, register_a, register_b, literal }
            }
            Instruction::Format22c { opcode, register_a, register_b, reference } => Instruction::Format22c {
                opcode,
                register_a,
                register_b,
                reference: f(opcode.reference_type, reference)?,
            },
            Instruction::Format22cs { opcode, register_a, register_b, field_offset } => {
                Instruction::Format22cs { opcode, register_a, register_b, field_offset }
            }
            Instruction::Format22s { opcode, register_a, register_b, literal } => {
                Instruction::Format22s { opcode, register_a, register_b, literal }
            }
            Instruction::Format22t { opcode, register_a, register_b, code_offset } => {
                Instruction::Format22t { opcode, register_a, register_b, code_offset }
            }
            Instruction::Format22x { opcode, register_a, register_b } => {
                Instruction::Format22x { opcode, register_a, register_b }
            }
            Instruction::Format23x { opcode, register_a, register_b, register_c } => {
                Instruction::Format23x { opcode, register_a, register_b, register_c }
            }
            Instruction::Format30t { opcode, code_offset } => Instruction::Format30t { opcode, code_offset },
            Instruction::Format31c { opcode, register_a, reference } => {
                Instruction::Format31c { opcode, register_a, reference: f(opcode.reference_type, reference)? }
            }
            Instruction::Format31i { opcode, register_a, literal } => Instruction::Format31i { opcode, register_a, literal },
            Instruction::Format31t { opcode, register_a, code_offset } => {
                Instruction::Format31t { opcode, register_a, code_offset }
            }
            Instruction::Format32x { opcode, register_a, register_b } => {
                Instruction::Format32x { opcode, register_a, register_b }
            }
            Instruction::Format35c { opcode, registers, reference } => {
                Instruction::Format35c { opcode, registers, reference: f(opcode.reference_type, reference)? }
            }
            Instruction::Format35mi { opcode, registers, inline_index } => {
                Instruction::Format35mi { opcode, registers, inline_index }
            }
            Instruction::Format35ms { opcode, registers, vtable_index } => {
                Instruction::Format35ms { opcode, registers, vtable_index }
            }
            Instruction::Format3rc { opcode, start_register, register_count, reference } => Instruction::Format3rc {
                opcode,
                start_register,
                register_count,
                reference: f(opcode.reference_type, reference)?,
            },
            Instruction::Format3rmi { opcode, start_register, register_count, inline_index } => {
                Instruction::Format3rmi { opcode, start_register, register_count, inline_index }
            }
            Instruction::Format3rms { opcode, start_register, register_count, vtable_index } => {
                Instruction::Format3rms { opcode, start_register, register_count, vtable_index }
            }
            Instruction::Format45cc { opcode, registers, reference, proto } => {
                let reference = f(opcode.reference_type, reference)?;
                let proto = f(opcode.reference_type2.unwrap_or(ReferenceType::MethodProto), proto)?;
                Instruction::Format45cc { opcode, registers, reference, proto }
            }
            Instruction::Format4rcc { opcode, start_register, register_count, reference, proto } => {
                let reference = f(opcode.reference_type, reference)?;
                let proto = f(opcode.reference_type2.unwrap_or(ReferenceType::MethodProto), proto)?;
                Instruction::Format4rcc { opcode, start_register, register_count, reference, proto }
            }
            Instruction::Format51l { opcode, register_a, literal } => Instruction::Format51l { opcode, register_a, literal },
            Instruction::PackedSwitchPayload { opcode, first_key, targets } => {
                Instruction::PackedSwitchPayload { opcode, first_key, targets }
            }
            Instruction::SparseSwitchPayload { opcode, elements } => Instruction::SparseSwitchPayload { opcode, elements },
            Instruction::ArrayPayload { opcode, element_width, elements } => {
                Instruction::ArrayPayload { opcode, element_width, elements }
            }
        })
    }

    /// Every reference the instruction holds, in encoding order.
    pub fn references(&self) -> Vec<&R> {
        match self {
            Instruction::Format20bc { reference, .. }
            | Instruction::Format21c { reference, .. }
            | Instruction::Format22c { reference, .. }
            | Instruction::Format31c { reference, .. }
            | Instruction::Format35c { reference, .. }
            | Instruction::Format3rc { reference, .. } => vec![reference],
            Instruction::Format45cc { reference, proto, .. } | Instruction::Format4rcc { reference, proto, .. } => {
                vec![reference, proto]
            }
            _ => Vec::new(),
        }
    }
}

fn check_array_payload(element_width: u16, elements: &[i64]) -> Result<(), DexError> {
    let fits_width = |value: i64| -> bool {
        match element_width {
            1 => fits::<i8>(value) || fits::<u8>(value),
            2 => fits::<i16>(value) || fits::<u16>(value),
            4 => fits::<i32>(value) || fits::<u32>(value),
            _ => true,
        }
    };
    match element_width {
        1 | 2 | 4 | 8 => {}
        _ => fail!("Invalid element width: {}. Must be 1, 2, 4 or 8.", element_width),
    }
    if let Some(bad) = elements.iter().find(|value| !fits_width(**value)) {
        fail!("Array payload element {} does not fit in {} bytes", bad, element_width);
    }
    Ok(())
}

fn read_registers(count: usize, unit0: u16, unit2: u16) -> Vec<u16> {
    let all = [unit2 & 0xf, (unit2 >> 4) & 0xf, (unit2 >> 8) & 0xf, unit2 >> 12, (unit0 >> 8) & 0xf];
    all[..count].to_vec()
}

fn write_registers(writer: &mut DexWriter, opcode_value: u16, registers: &[u16]) {
    let reg = |i: usize| registers.get(i).copied().unwrap_or(0);
    writer.write_u2(opcode_value | (reg(4) << 8) | ((registers.len() as u16) << 12));
}

fn write_register_units(writer: &mut DexWriter, registers: &[u16]) {
    let reg = |i: usize| registers.get(i).copied().unwrap_or(0);
    writer.write_u2(reg(0) | (reg(1) << 4) | (reg(2) << 8) | (reg(3) << 12));
}

impl Instruction<u32> {
    /// Decodes one instruction at the reader's position.
    pub fn decode(reader: &mut DexReader, opcodes: &Opcodes) -> Result<Instruction<u32>, DexError> {
        let start = reader.tell();
        let unit0 = reader.read_u2()?;
        let low = unit0 & 0xff;
        let high = unit0 >> 8;
        let value = if low == 0 && (1..=3).contains(&high) { high << 8 } else { low };
        let opcode = match opcodes.opcode(value) {
            Some(opcode) => opcode,
            None => fail!("Unknown opcode 0x{:02x} at offset 0x{:x} for API {}", value, start, opcodes.api()),
        };
        let nibble_a = high & 0xf;
        let nibble_b = high >> 4;

        let instruction = match opcode.format {
            Format::Format10t => Instruction::Format10t { opcode, code_offset: (high as u8 as i8) as i32 },
            Format::Format10x => Instruction::Format10x { opcode },
            Format::Format11n => Instruction::Format11n {
                opcode,
                register_a: nibble_a,
                literal: ((high as u8 as i8) >> 4) as i32,
            },
            Format::Format11x => Instruction::Format11x { opcode, register_a: high },
            Format::Format12x => Instruction::Format12x { opcode, register_a: nibble_a, register_b: nibble_b },
            Format::Format20bc => {
                let reference_type = ReferenceType::from_verification_bits((high >> 6) as u8)?;
                Instruction::Format20bc {
                    opcode,
                    verification_error: (high & 0x3f) as u8,
                    reference_type,
                    reference: reader.read_u2()? as u32,
                }
            }
            Format::Format20t => Instruction::Format20t { opcode, code_offset: reader.read_s2()? as i32 },
            Format::Format21c => Instruction::Format21c { opcode, register_a: high, reference: reader.read_u2()? as u32 },
            Format::Format21ih => Instruction::Format21ih {
                opcode,
                register_a: high,
                literal: (reader.read_s2()? as i32) << 16,
            },
            Format::Format21lh => Instruction::Format21lh {
                opcode,
                register_a: high,
                literal: (reader.read_s2()? as i64) << 48,
            },
            Format::Format21s => Instruction::Format21s { opcode, register_a: high, literal: reader.read_s2()? as i32 },
            Format::Format21t => Instruction::Format21t { opcode, register_a: high, code_offset: reader.read_s2()? as i32 },
            Format::Format22b => {
                let unit1 = reader.read_u2()?;
                Instruction::Format22b {
                    opcode,
                    register_a: high,
                    register_b: unit1 & 0xff,
                    literal: ((unit1 >> 8) as u8 as i8) as i32,
                }
            }
            Format::Format22c => Instruction::Format22c {
                opcode,
                register_a: nibble_a,
                register_b: nibble_b,
                reference: reader.read_u2()? as u32,
            },
            Format::Format22cs => Instruction::Format22cs {
                opcode,
                register_a: nibble_a,
                register_b: nibble_b,
                field_offset: reader.read_u2()?,
            },
            Format::Format22s => Instruction::Format22s {
                opcode,
                register_a: nibble_a,
                register_b: nibble_b,
                literal: reader.read_s2()? as i32,
            },
            Format::Format22t => Instruction::Format22t {
                opcode,
                register_a: nibble_a,
                register_b: nibble_b,
                code_offset: reader.read_s2()? as i32,
            },
            Format::Format22x => Instruction::Format22x { opcode, register_a: high, register_b: reader.read_u2()? },
            Format::Format23x => {
                let unit1 = reader.read_u2()?;
                Instruction::Format23x { opcode, register_a: high, register_b: unit1 & 0xff, register_c: unit1 >> 8 }
            }
            Format::Format30t => Instruction::Format30t { opcode, code_offset: reader.read_s4()? },
            Format::Format31c => Instruction::Format31c { opcode, register_a: high, reference: reader.read_u4()? },
            Format::Format31i => Instruction::Format31i { opcode, register_a: high, literal: reader.read_s4()? },
            Format::Format31t => Instruction::Format31t { opcode, register_a: high, code_offset: reader.read_s4()? },
            Format::Format32x => {
                let register_a = reader.read_u2()?;
                Instruction::Format32x { opcode, register_a, register_b: reader.read_u2()? }
            }
            Format::Format35c | Format::Format35mi | Format::Format35ms | Format::Format45cc => {
                let count = nibble_b as usize;
                if count > 5 {
                    fail!("Invalid register count {} for {} at offset 0x{:x}", count, opcode.name, start);
                }
                let index = reader.read_u2()?;
                let registers = read_registers(count, unit0, reader.read_u2()?);
                match opcode.format {
                    Format::Format35c => Instruction::Format35c { opcode, registers, reference: index as u32 },
                    Format::Format35mi => Instruction::Format35mi { opcode, registers, inline_index: index },
                    Format::Format35ms => Instruction::Format35ms { opcode, registers, vtable_index: index },
                    _ => Instruction::Format45cc {
                        opcode,
                        registers,
                        reference: index as u32,
                        proto: reader.read_u2()? as u32,
                    },
                }
            }
            Format::Format3rc | Format::Format3rmi | Format::Format3rms | Format::Format4rcc => {
                let index = reader.read_u2()?;
                let start_register = reader.read_u2()?;
                match opcode.format {
                    Format::Format3rc => {
                        Instruction::Format3rc { opcode, start_register, register_count: high, reference: index as u32 }
                    }
                    Format::Format3rmi => {
                        Instruction::Format3rmi { opcode, start_register, register_count: high, inline_index: index }
                    }
                    Format::Format3rms => {
                        Instruction::Format3rms { opcode, start_register, register_count: high, vtable_index: index }
                    }
                    _ => Instruction::Format4rcc {
                        opcode,
                        start_register,
                        register_count: high,
                        reference: index as u32,
                        proto: reader.read_u2()? as u32,
                    },
                }
            }
            Format::Format51l => Instruction::Format51l { opcode, register_a: high, literal: reader.read_s8()? },
            Format::PackedSwitchPayload => {
                let size = reader.read_u2()? as usize;
                let first_key = reader.read_s4()?;
                let mut targets = Vec::with_capacity(size);
                for _ in 0..size {
                    targets.push(reader.read_s4()?);
                }
                Instruction::PackedSwitchPayload { opcode, first_key, targets }
            }
            Format::SparseSwitchPayload => {
                let size = reader.read_u2()? as usize;
                let mut keys = Vec::with_capacity(size);
                for _ in 0..size {
                    keys.push(reader.read_s4()?);
                }
                let mut elements = Vec::with_capacity(size);
                for key in keys {
                    elements.push(SwitchElement { key, target: reader.read_s4()? });
                }
                Instruction::SparseSwitchPayload { opcode, elements }
            }
            Format::ArrayPayload => {
                let element_width = reader.read_u2()?;
                let size = reader.read_u4()? as usize;
                match element_width {
                    1 | 2 | 4 | 8 => {}
                    _ => fail!("Invalid array payload element width {} at offset 0x{:x}", element_width, start),
                }
                let total = size.checked_mul(element_width as usize).filter(|total| *total <= reader.remaining());
                let total = match total {
                    Some(total) => total,
                    None => fail!("Array payload at offset 0x{:x} runs past the end of the code", start),
                };
                let mut elements = Vec::with_capacity(size);
                for _ in 0..size {
                    elements.push(reader.read_sized_signed(element_width as usize)?);
                }
                if total % 2 != 0 {
                    reader.skip(1)?;
                }
                Instruction::ArrayPayload { opcode, element_width, elements }
            }
        };
        Ok(instruction)
    }

    /// Validates, then writes the instruction.
    pub fn encode(&self, writer: &mut DexWriter, opcodes: &Opcodes) -> Result<(), DexError> {
        self.validate()?;
        let opcode = self.opcode();
        let value = match opcodes.value(opcode) {
            Some(value) => value,
            None => fail!("Opcode {} does not exist at API {}", opcode.name, opcodes.api()),
        };
        let index16 = |reference: u32| -> Result<u16, DexError> {
            check_index(reference, 0xffff)?;
            Ok(reference as u16)
        };
        let nibbles = |a: u16, b: u16| value | (a << 8) | (b << 12);
        let byte = |a: u16| value | (a << 8);

        match self {
            Instruction::Format10t { code_offset, .. } => writer.write_u2(byte(*code_offset as i8 as u8 as u16)),
            Instruction::Format10x { .. } => writer.write_u2(value),
            Instruction::Format11n { register_a, literal, .. } => {
                writer.write_u2(nibbles(*register_a, (*literal as u16) & 0xf))
            }
            Instruction::Format11x { register_a, .. } => writer.write_u2(byte(*register_a)),
            Instruction::Format12x { register_a, register_b, .. } => writer.write_u2(nibbles(*register_a, *register_b)),
            Instruction::Format20bc { verification_error, reference_type, reference, .. } => {
                let bits = reference_type.verification_bits()? as u16;
                writer.write_u2(byte(*verification_error as u16 | (bits << 6)));
                writer.write_u2(index16(*reference)?);
            }
            Instruction::Format20t { code_offset, .. } => {
                writer.write_u2(value);
                writer.write_s2(*code_offset as i16);
            }
            Instruction::Format21c { register_a, reference, .. } => {
                writer.write_u2(byte(*register_a));
                writer.write_u2(index16(*reference)?);
            }
            Instruction::Format21ih { register_a, literal, .. } => {
                writer.write_u2(byte(*register_a));
                writer.write_s2((*literal >> 16) as i16);
            }
            Instruction::Format21lh { register_a, literal, .. } => {
                writer.write_u2(byte(*register_a));
                writer.write_s2((*literal >> 48) as i16);
            }
            Instruction::Format21s { register_a, literal, .. } => {
                writer.write_u2(byte(*register_a));
                writer.write_s2(*literal as i16);
            }
            Instruction::Format21t { register_a, code_offset, .. } => {
                writer.write_u2(byte(*register_a));
                writer.write_s2(*code_offset as i16);
            }
            Instruction::Format22b { register_a, register_b, literal, .. } => {
                writer.write_u2(byte(*register_a));
                writer.write_u2(*register_b | ((*literal as i8 as u8 as u16) << 8));
            }
            Instruction::Format22c { register_a, register_b, reference, .. } => {
                writer.write_u2(nibbles(*register_a, *register_b));
                writer.write_u2(index16(*reference)?);
            }
            Instruction::Format22cs { register_a, register_b, field_offset, .. } => {
                writer.write_u2(nibbles(*register_a, *register_b));
                writer.write_u2(*field_offset);
            }
            Instruction::Format22s { register_a, register_b, literal, .. } => {
                writer.write_u2(nibbles(*register_a, *register_b));
                writer.write_s2(*literal as i16);
            }
            Instruction::Format22t { register_a, register_b, code_offset, .. } => {
                writer.write_u2(nibbles(*register_a, *register_b));
                writer.write_s2(*code_offset as i16);
            }
            Instruction::Format22x { register_a, register_b, .. } => {
                writer.write_u2(byte(*register_a));
                writer.write_u2(*register_b);
            }
            Instruction::Format23x { register_a, register_b, register_c, .. } => {
                writer.write_u2(byte(*register_a));
                writer.write_u2(*register_b | (*register_c << 8));
            }
            Instruction::Format30t { code_offset, .. } => {
                writer.write_u2(value);
                writer.write_s4(*code_offset);
            }
            Instruction::Format31c { register_a, reference, .. } => {
                writer.write_u2(byte(*register_a));
                writer.write_u4(*reference);
            }
            Instruction::Format31i { register_a, literal: data, .. }
            | Instruction::Format31t { register_a, code_offset: data, .. } => {
                writer.write_u2(byte(*register_a));
                writer.write_s4(*data);
            }
            Instruction::Format32x { register_a, register_b, .. } => {
                writer.write_u2(value);
                writer.write_u2(*register_a);
                writer.write_u2(*register_b);
            }
            Instruction::Format35c { registers, reference, .. } => {
                write_registers(writer, value, registers);
                writer.write_u2(index16(*reference)?);
                write_register_units(writer, registers);
            }
            Instruction::Format35mi { registers, inline_index: index, .. }
            | Instruction::Format35ms { registers, vtable_index: index, .. } => {
                write_registers(writer, value, registers);
                writer.write_u2(*index);
                write_register_units(writer, registers);
            }
            Instruction::Format3rc { start_register, register_count, reference, .. } => {
                writer.write_u2(byte(*register_count));
                writer.write_u2(index16(*reference)?);
                writer.write_u2(*start_register);
            }
            Instruction::Format3rmi { start_register, register_count, inline_index: index, .. }
            | Instruction::Format3rms { start_register, register_count, vtable_index: index, .. } => {
                writer.write_u2(byte(*register_count));
                writer.write_u2(*index);
                writer.write_u2(*start_register);
            }
            Instruction::Format45cc { registers, reference, proto, .. } => {
                write_registers(writer, value, registers);
                writer.write_u2(index16(*reference)?);
                write_register_units(writer, registers);
                writer.write_u2(index16(*proto)?);
            }
            Instruction::Format4rcc { start_register, register_count, reference, proto, .. } => {
                writer.write_u2(byte(*register_count));
                writer.write_u2(index16(*reference)?);
                writer.write_u2(*start_register);
                writer.write_u2(index16(*proto)?);
            }
            Instruction::Format51l { register_a, literal, .. } => {
                writer.write_u2(byte(*register_a));
                writer.write_u8(*literal as u64);
            }
            Instruction::PackedSwitchPayload { first_key, targets, .. } => {
                writer.write_u2(value);
                writer.write_u2(targets.len() as u16);
                writer.write_s4(*first_key);
                for target in targets {
                    writer.write_s4(*target);
                }
            }
            Instruction::SparseSwitchPayload { elements, .. } => {
                writer.write_u2(value);
                writer.write_u2(elements.len() as u16);
                for element in elements {
                    writer.write_s4(element.key);
                }
                for element in elements {
                    writer.write_s4(element.target);
                }
            }
            Instruction::ArrayPayload { element_width, elements, .. } => {
                writer.write_u2(value);
                writer.write_u2(*element_width);
                writer.write_u4(elements.len() as u32);
                for element in elements {
                    writer.write_sized(*element as u64, *element_width as usize);
                }
                if (*element_width as usize * elements.len()) % 2 != 0 {
                    writer.write_u1(0);
                }
            }
        }
        Ok(())
    }
}

/// Decodes a whole instruction stream, pairing each instruction with its
/// address in code units.
pub fn decode_instructions(code: &[u8], opcodes: &Opcodes) -> Result<Vec<AddressedInstruction<u32>>, DexError> {
    let mut reader = DexReader::new(code);
    let mut instructions = Vec::new();
    while reader.remaining() > 0 {
        let address = (reader.tell() / 2) as u32;
        let instruction =
            Instruction::decode(&mut reader, opcodes).map_err(|e| err!(e, "instruction at address 0x{:x}", address))?;
        instructions.push(AddressedInstruction { address, instruction });
    }
    Ok(instructions)
}

/// Encodes `instructions` back to back; payloads must land on even
/// addresses. Returns the number of code units written.
pub fn encode_instructions<'a, I>(instructions: I, writer: &mut DexWriter, opcodes: &Opcodes) -> Result<u32, DexError>
where
    I: IntoIterator<Item = &'a Instruction<u32>>,
{
    let mut address: u32 = 0;
    for instruction in instructions {
        if instruction.format().is_payload_format() && address % 2 != 0 {
            fail!("{} at address 0x{:x} is not 4-byte aligned", instruction.opcode().name, address);
        }
        instruction.encode(writer, opcodes).map_err(|e| err!(e, "instruction at address 0x{:x}", address))?;
        address += instruction.code_units() as u32;
    }
    Ok(address)
}

/// An instruction together with its position in the method's code.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AddressedInstruction<R = Reference> {
    pub address: u32,
    pub instruction: Instruction<R>,
}

impl<R> AddressedInstruction<R> {
    pub fn new(address: u32, instruction: Instruction<R>) -> Self {
        AddressedInstruction { address, instruction }
    }

    /// Absolute code address the instruction branches to.
    pub fn target_address(&self) -> Option<i64> {
        self.instruction.code_offset().map(|offset| self.address as i64 + offset as i64)
    }

    /// Points the branch at `target`, storing it relative to this instruction.
    pub fn set_target_address(&mut self, target: u32) -> Result<(), DexError> {
        let offset = target as i64 - self.address as i64;
        self.instruction.set_code_offset(offset)
    }

    /// The smali-style label of the branch target, e.g. `:cond_1a`.
    pub fn label_name(&self) -> Option<String> {
        let prefix = match self.instruction.format() {
            Format::Format10t | Format::Format20t | Format::Format30t => ":goto_",
            Format::Format21t | Format::Format22t => ":cond_",
            Format::Format31t => match self.instruction.opcode().name {
                "packed-switch" => ":pswitch_data_",
                "sparse-switch" => ":sswitch_data_",
                _ => ":array_",
            },
            _ => return None,
        };
        self.target_address().map(|target| format!("{}{:x}", prefix, target))
    }
}

impl<R: fmt::Display> fmt::Display for Instruction<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.opcode().name)?;
        for reference in self.references() {
            write!(f, " {}", reference)?;
        }
        if let Some(offset) = self.code_offset() {
            write!(f, " {:+}", offset)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(name: &str) -> &'static Opcode {
        Opcode::by_name(name).unwrap()
    }

    fn encode(instruction: &Instruction<u32>) -> Vec<u8> {
        let mut writer = DexWriter::new();
        instruction.encode(&mut writer, &Opcodes::default()).unwrap();
        writer.into_bytes()
    }

    fn decode(bytes: &[u8]) -> Instruction<u32> {
        let mut reader = DexReader::new(bytes);
        let instruction = Instruction::decode(&mut reader, &Opcodes::default()).unwrap();
        assert_eq!(reader.remaining(), 0, "trailing bytes after {:?}", instruction);
        instruction
    }

    #[test]
    fn format22t_rejects_wide_register() {
        let instruction: Instruction<u32> =
            Instruction::Format22t { opcode: op("if-eq"), register_a: 16, register_b: 0, code_offset: 4 };
        let e = instruction.validate().unwrap_err();
        assert!(e.message().contains("v16"));
        assert!(e.to_string().contains("if-eq"));
    }

    #[test]
    fn format22t_targets_are_relative() {
        let mut addressed: AddressedInstruction<u32> = AddressedInstruction::new(
            100,
            Instruction::Format22t { opcode: op("if-eq"), register_a: 1, register_b: 2, code_offset: 4 },
        );
        assert_eq!(addressed.target_address(), Some(104));
        assert_eq!(addressed.label_name().as_deref(), Some(":cond_68"));

        addressed.set_target_address(200).unwrap();
        assert_eq!(addressed.instruction.code_offset(), Some(100));
        assert_eq!(addressed.target_address(), Some(200));

        // 16-bit offsets stop at 32767
        assert!(addressed.set_target_address(100 + 40000).is_err());
        assert_eq!(addressed.instruction.code_offset(), Some(100));
    }

    #[test]
    fn goto_offsets_check_width() {
        let mut goto: Instruction<u32> = Instruction::Format10t { opcode: op("goto"), code_offset: 0 };
        assert!(goto.set_code_offset(-128).is_ok());
        assert!(goto.set_code_offset(128).is_err());
        let mut nop: Instruction<u32> = Instruction::Format10x { opcode: op("nop") };
        assert!(nop.set_code_offset(1).is_err());
    }

    #[test]
    fn literal_ranges() {
        let const4 = |literal| -> Instruction<u32> { Instruction::Format11n { opcode: op("const/4"), register_a: 0, literal } };
        assert!(const4(-8).validate().is_ok());
        assert!(const4(7).validate().is_ok());
        assert!(const4(8).validate().is_err());

        let high16 = |literal| -> Instruction<u32> { Instruction::Format21ih { opcode: op("const/high16"), register_a: 0, literal } };
        assert!(high16(0x12340000).validate().is_ok());
        assert!(high16(0x12340001).validate().is_err());

        let wide_high16 = |literal| -> Instruction<u32> {
            Instruction::Format21lh { opcode: op("const-wide/high16"), register_a: 0, literal }
        };
        assert!(wide_high16(0x4000_0000_0000_0000).validate().is_ok());
        assert!(wide_high16(0x4000_0000_0000_0001).validate().is_err());

        let lit8: Instruction<u32> =
            Instruction::Format22b { opcode: op("add-int/lit8"), register_a: 0, register_b: 1, literal: 200 };
        assert!(lit8.validate().is_err());
    }

    #[test]
    fn opcode_must_match_format() {
        let wrong: Instruction<u32> = Instruction::Format11x { opcode: op("move"), register_a: 0 };
        assert!(wrong.validate().is_err());
    }

    #[test]
    fn register_lists() {
        let invoke = |registers: Vec<u16>| -> Instruction<u32> {
            Instruction::Format35c { opcode: op("invoke-static"), registers, reference: 1 }
        };
        assert!(invoke(vec![0, 1, 2, 3, 4]).validate().is_ok());
        assert!(invoke(vec![0, 1, 2, 3, 4, 5]).validate().is_err());
        assert!(invoke(vec![16]).validate().is_err());

        let range: Instruction<u32> =
            Instruction::Format3rc { opcode: op("invoke-static/range"), start_register: 0, register_count: 256, reference: 0 };
        assert!(range.validate().is_err());
    }

    #[test]
    fn encodes_known_layouts() {
        // const/4 v1, -1
        assert_eq!(
            encode(&Instruction::Format11n { opcode: op("const/4"), register_a: 1, literal: -1 }),
            vec![0x12, 0xf1]
        );
        // invoke-virtual {v1, v2, v3, v4, v5}, method@0x1234
        assert_eq!(
            encode(&Instruction::Format35c { opcode: op("invoke-virtual"), registers: vec![1, 2, 3, 4, 5], reference: 0x1234 }),
            vec![0x6e, 0x55, 0x34, 0x12, 0x21, 0x43]
        );
        // invoke-direct/range {v10 .. v12}, method@2
        assert_eq!(
            encode(&Instruction::Format3rc { opcode: op("invoke-direct/range"), start_register: 10, register_count: 3, reference: 2 }),
            vec![0x76, 0x03, 0x02, 0x00, 0x0a, 0x00]
        );
        // const-wide/high16 v0, 0x4000000000000000
        assert_eq!(
            encode(&Instruction::Format21lh { opcode: op("const-wide/high16"), register_a: 0, literal: 0x4000_0000_0000_0000 }),
            vec![0x19, 0x00, 0x00, 0x40]
        );
    }

    #[test]
    fn index_width_is_checked_on_encode() {
        let instruction: Instruction<u32> = Instruction::Format21c { opcode: op("const-string"), register_a: 0, reference: 0x10000 };
        let mut writer = DexWriter::new();
        assert!(instruction.encode(&mut writer, &Opcodes::default()).is_err());
        let jumbo: Instruction<u32> = Instruction::Format31c { opcode: op("const-string/jumbo"), register_a: 0, reference: 0x10000 };
        assert_eq!(encode(&jumbo).len(), 6);
    }

    #[test]
    fn decodes_what_it_encodes() {
        let samples: Vec<Instruction<u32>> = vec![
            Instruction::Format10t { opcode: op("goto"), code_offset: -3 },
            Instruction::Format12x { opcode: op("move"), register_a: 3, register_b: 15 },
            Instruction::Format21ih { opcode: op("const/high16"), register_a: 200, literal: -0x10000 },
            Instruction::Format22b { opcode: op("add-int/lit8"), register_a: 1, register_b: 255, literal: -128 },
            Instruction::Format23x { opcode: op("add-int"), register_a: 1, register_b: 2, register_c: 255 },
            Instruction::Format32x { opcode: op("move/16"), register_a: 0xffff, register_b: 300 },
            Instruction::Format45cc { opcode: op("invoke-polymorphic"), registers: vec![1, 2], reference: 3, proto: 4 },
            Instruction::Format4rcc { opcode: op("invoke-polymorphic/range"), start_register: 5, register_count: 2, reference: 3, proto: 4 },
            Instruction::Format51l { opcode: op("const-wide"), register_a: 4, literal: -0x1234_5678_9abc },
            Instruction::PackedSwitchPayload { opcode: op("packed-switch-payload"), first_key: -1, targets: vec![4, 8, 12] },
            Instruction::SparseSwitchPayload {
                opcode: op("sparse-switch-payload"),
                elements: vec![SwitchElement { key: -5, target: 10 }, SwitchElement { key: 300, target: 20 }],
            },
            Instruction::ArrayPayload { opcode: op("array-payload"), element_width: 1, elements: vec![1, -2, 3] },
        ];
        for sample in samples {
            let bytes = encode(&sample);
            assert_eq!(bytes.len(), sample.code_units() * 2, "{:?}", sample);
            assert_eq!(decode(&bytes), sample);
        }
    }

    #[test]
    fn verification_errors_pack_reference_kind() {
        let instruction: Instruction<u32> = Instruction::Format20bc {
            opcode: op("throw-verification-error"),
            verification_error: 5,
            reference_type: ReferenceType::Method,
            reference: 7,
        };
        let opcodes = Opcodes::for_api(19);
        let mut writer = DexWriter::new();
        instruction.encode(&mut writer, &opcodes).unwrap();
        assert_eq!(writer.as_slice(), &[0xed, 0x85, 0x07, 0x00]);
        let bytes = writer.into_bytes();
        assert_eq!(Instruction::decode(&mut DexReader::new(&bytes), &opcodes).unwrap(), instruction);
        assert!(decode_instructions(&bytes, &Opcodes::default()).is_err());
    }

    #[test]
    fn payload_sizes() {
        let packed: Instruction<u32> =
            Instruction::PackedSwitchPayload { opcode: op("packed-switch-payload"), first_key: 0, targets: vec![1, 2] };
        assert_eq!(packed.code_units(), 8);
        let sparse: Instruction<u32> = Instruction::SparseSwitchPayload {
            opcode: op("sparse-switch-payload"),
            elements: vec![SwitchElement { key: 0, target: 1 }],
        };
        assert_eq!(sparse.code_units(), 6);
        let array: Instruction<u32> = Instruction::ArrayPayload { opcode: op("array-payload"), element_width: 4, elements: vec![1, 2, 3] };
        assert_eq!(array.code_units(), 10);
        let odd: Instruction<u32> = Instruction::ArrayPayload { opcode: op("array-payload"), element_width: 1, elements: vec![1, 2, 3] };
        assert_eq!(odd.code_units(), 6);
    }

    #[test]
    fn payloads_must_be_aligned() {
        let code: Vec<Instruction<u32>> = vec![
            Instruction::Format10x { opcode: op("nop") },
            Instruction::PackedSwitchPayload { opcode: op("packed-switch-payload"), first_key: 0, targets: vec![] },
        ];
        let mut writer = DexWriter::new();
        assert!(encode_instructions(&code, &mut writer, &Opcodes::default()).is_err());
        let mut writer = DexWriter::new();
        assert_eq!(encode_instructions(&code[1..], &mut writer, &Opcodes::default()).unwrap(), 4);
    }

    #[test]
    fn stream_decoding_tracks_addresses() {
        // const/4 v0, 0; goto -1; return-void
        let bytes = [0x12, 0x00, 0x28, 0xff, 0x0e, 0x00];
        let decoded = decode_instructions(&bytes, &Opcodes::default()).unwrap();
        let addresses: Vec<u32> = decoded.iter().map(|i| i.address).collect();
        assert_eq!(addresses, vec![0, 1, 2]);
        assert_eq!(decoded[1].target_address(), Some(0));
        assert_eq!(decoded[1].label_name().as_deref(), Some(":goto_0"));
        assert!(decode_instructions(&[0x13, 0x00], &Opcodes::default()).is_err());
    }

    #[test]
    fn opcode_availability_depends_on_api() {
        let custom: Instruction<u32> = Instruction::Format35c { opcode: op("invoke-custom"), registers: vec![], reference: 0 };
        let mut writer = DexWriter::new();
        assert!(custom.encode(&mut writer, &Opcodes::for_api(25)).is_err());
        assert!(custom.encode(&mut writer, &Opcodes::for_api(26)).is_ok());
    }

    #[test]
    fn map_references_resolves_each_slot() {
        let instruction: Instruction<u32> =
            Instruction::Format45cc { opcode: op("invoke-polymorphic"), registers: vec![0], reference: 1, proto: 2 };
        let mut seen = Vec::new();
        let mapped: Instruction<String> = instruction
            .map_references(|kind, index| -> Result<String, DexError> {
                seen.push(kind);
                Ok(format!("ref{}", index))
            })
            .unwrap();
        assert_eq!(seen, vec![ReferenceType::Method, ReferenceType::MethodProto]);
        assert_eq!(mapped.references(), vec![&"ref1".to_string(), &"ref2".to_string()]);
    }
}
