use once_cell::sync::Lazy;

use crate::dex::opcode_format::{Format, Opcode, OpcodeFlags, ReferenceType};

const NONE: OpcodeFlags = OpcodeFlags::empty();
const T: OpcodeFlags = OpcodeFlags::CAN_THROW;
const O: OpcodeFlags = OpcodeFlags::ODEX_ONLY;
const C: OpcodeFlags = OpcodeFlags::CAN_CONTINUE;
const RES: OpcodeFlags = OpcodeFlags::SETS_RESULT;
const R: OpcodeFlags = OpcodeFlags::SETS_REGISTER;
const W: OpcodeFlags = OpcodeFlags::SETS_WIDE_REGISTER;
const Q: OpcodeFlags = OpcodeFlags::QUICK_FIELD_ACCESSOR;
const V: OpcodeFlags = OpcodeFlags::VOLATILE_FIELD_ACCESSOR;
const S: OpcodeFlags = OpcodeFlags::STATIC_FIELD_ACCESSOR;
const J: OpcodeFlags = OpcodeFlags::JUMBO_OPCODE;
const I: OpcodeFlags = OpcodeFlags::CAN_INITIALIZE_REFERENCE;

/// Every opcode known to the decoder. Values that changed meaning between
/// API levels appear once per meaning with disjoint API ranges.
pub(crate) static OPCODES: Lazy<Vec<Opcode>> = Lazy::new(|| {
    vec![
        // basic
        Opcode::new(Opcode::all_versions(0x00), "nop", ReferenceType::None, None, Format::Format10x, C),
        Opcode::new(Opcode::all_versions(0x01), "move", ReferenceType::None, None, Format::Format12x, C | R),
        Opcode::new(Opcode::all_versions(0x02), "move/from16", ReferenceType::None, None, Format::Format22x, C | R),
        Opcode::new(Opcode::all_versions(0x03), "move/16", ReferenceType::None, None, Format::Format32x, C | R),
        Opcode::new(Opcode::all_versions(0x04), "move-wide", ReferenceType::None, None, Format::Format12x, C | R | W),
        Opcode::new(Opcode::all_versions(0x05), "move-wide/from16", ReferenceType::None, None, Format::Format22x, C | R | W),
        Opcode::new(Opcode::all_versions(0x06), "move-wide/16", ReferenceType::None, None, Format::Format32x, C | R | W),
        Opcode::new(Opcode::all_versions(0x07), "move-object", ReferenceType::None, None, Format::Format12x, C | R),
        Opcode::new(Opcode::all_versions(0x08), "move-object/from16", ReferenceType::None, None, Format::Format22x, C | R),
        Opcode::new(Opcode::all_versions(0x09), "move-object/16", ReferenceType::None, None, Format::Format32x, C | R),
        Opcode::new(Opcode::all_versions(0x0a), "move-result", ReferenceType::None, None, Format::Format11x, C | R),
        Opcode::new(Opcode::all_versions(0x0b), "move-result-wide", ReferenceType::None, None, Format::Format11x, C | R | W),
        Opcode::new(Opcode::all_versions(0x0c), "move-result-object", ReferenceType::None, None, Format::Format11x, C | R),
        Opcode::new(Opcode::all_versions(0x0d), "move-exception", ReferenceType::None, None, Format::Format11x, C | R),
        Opcode::new(Opcode::all_versions(0x0e), "return-void", ReferenceType::None, None, Format::Format10x, NONE),
        Opcode::new(Opcode::all_versions(0x0f), "return", ReferenceType::None, None, Format::Format11x, NONE),
        Opcode::new(Opcode::all_versions(0x10), "return-wide", ReferenceType::None, None, Format::Format11x, NONE),
        Opcode::new(Opcode::all_versions(0x11), "return-object", ReferenceType::None, None, Format::Format11x, NONE),
        Opcode::new(Opcode::all_versions(0x12), "const/4", ReferenceType::None, None, Format::Format11n, C | R),
        Opcode::new(Opcode::all_versions(0x13), "const/16", ReferenceType::None, None, Format::Format21s, C | R),
        Opcode::new(Opcode::all_versions(0x14), "const", ReferenceType::None, None, Format::Format31i, C | R),
        Opcode::new(Opcode::all_versions(0x15), "const/high16", ReferenceType::None, None, Format::Format21ih, C | R),
        Opcode::new(Opcode::all_versions(0x16), "const-wide/16", ReferenceType::None, None, Format::Format21s, C | R | W),
        Opcode::new(Opcode::all_versions(0x17), "const-wide/32", ReferenceType::None, None, Format::Format31i, C | R | W),
        Opcode::new(Opcode::all_versions(0x18), "const-wide", ReferenceType::None, None, Format::Format51l, C | R | W),
        Opcode::new(Opcode::all_versions(0x19), "const-wide/high16", ReferenceType::None, None, Format::Format21lh, C | R | W),
        // constants and object creation
        Opcode::new(Opcode::all_versions(0x1a), "const-string", ReferenceType::String, None, Format::Format21c, T | C | R),
        Opcode::new(Opcode::all_versions(0x1b), "const-string/jumbo", ReferenceType::String, None, Format::Format31c, T | C | R | J),
        Opcode::new(Opcode::all_versions(0x1c), "const-class", ReferenceType::Type, None, Format::Format21c, T | C | R),
        Opcode::new(Opcode::all_versions(0x1d), "monitor-enter", ReferenceType::None, None, Format::Format11x, T | C),
        Opcode::new(Opcode::all_versions(0x1e), "monitor-exit", ReferenceType::None, None, Format::Format11x, T | C),
        Opcode::new(Opcode::all_versions(0x1f), "check-cast", ReferenceType::Type, None, Format::Format21c, T | C | R),
        Opcode::new(Opcode::all_versions(0x20), "instance-of", ReferenceType::Type, None, Format::Format22c, T | C | R),
        Opcode::new(Opcode::all_versions(0x21), "array-length", ReferenceType::None, None, Format::Format12x, T | C | R),
        Opcode::new(Opcode::all_versions(0x22), "new-instance", ReferenceType::Type, None, Format::Format21c, T | C | R),
        Opcode::new(Opcode::all_versions(0x23), "new-array", ReferenceType::Type, None, Format::Format22c, T | C | R),
        Opcode::new(Opcode::all_versions(0x24), "filled-new-array", ReferenceType::Type, None, Format::Format35c, T | C | RES),
        Opcode::new(Opcode::all_versions(0x25), "filled-new-array/range", ReferenceType::Type, None, Format::Format3rc, T | C | RES),
        Opcode::new(Opcode::all_versions(0x26), "fill-array-data", ReferenceType::None, None, Format::Format31t, C),
        Opcode::new(Opcode::all_versions(0x27), "throw", ReferenceType::None, None, Format::Format11x, T),
        // branches
        Opcode::new(Opcode::all_versions(0x28), "goto", ReferenceType::None, None, Format::Format10t, NONE),
        Opcode::new(Opcode::all_versions(0x29), "goto/16", ReferenceType::None, None, Format::Format20t, NONE),
        Opcode::new(Opcode::all_versions(0x2a), "goto/32", ReferenceType::None, None, Format::Format30t, NONE),
        Opcode::new(Opcode::all_versions(0x2b), "packed-switch", ReferenceType::None, None, Format::Format31t, C),
        Opcode::new(Opcode::all_versions(0x2c), "sparse-switch", ReferenceType::None, None, Format::Format31t, C),
        Opcode::new(Opcode::all_versions(0x2d), "cmpl-float", ReferenceType::None, None, Format::Format23x, C | R),
        Opcode::new(Opcode::all_versions(0x2e), "cmpg-float", ReferenceType::None, None, Format::Format23x, C | R),
        Opcode::new(Opcode::all_versions(0x2f), "cmpl-double", ReferenceType::None, None, Format::Format23x, C | R),
        Opcode::new(Opcode::all_versions(0x30), "cmpg-double", ReferenceType::None, None, Format::Format23x, C | R),
        Opcode::new(Opcode::all_versions(0x31), "cmp-long", ReferenceType::None, None, Format::Format23x, C | R),
        Opcode::new(Opcode::all_versions(0x32), "if-eq", ReferenceType::None, None, Format::Format22t, C),
        Opcode::new(Opcode::all_versions(0x33), "if-ne", ReferenceType::None, None, Format::Format22t, C),
        Opcode::new(Opcode::all_versions(0x34), "if-lt", ReferenceType::None, None, Format::Format22t, C),
        Opcode::new(Opcode::all_versions(0x35), "if-ge", ReferenceType::None, None, Format::Format22t, C),
        Opcode::new(Opcode::all_versions(0x36), "if-gt", ReferenceType::None, None, Format::Format22t, C),
        Opcode::new(Opcode::all_versions(0x37), "if-le", ReferenceType::None, None, Format::Format22t, C),
        Opcode::new(Opcode::all_versions(0x38), "if-eqz", ReferenceType::None, None, Format::Format21t, C),
        Opcode::new(Opcode::all_versions(0x39), "if-nez", ReferenceType::None, None, Format::Format21t, C),
        Opcode::new(Opcode::all_versions(0x3a), "if-ltz", ReferenceType::None, None, Format::Format21t, C),
        Opcode::new(Opcode::all_versions(0x3b), "if-gez", ReferenceType::None, None, Format::Format21t, C),
        Opcode::new(Opcode::all_versions(0x3c), "if-gtz", ReferenceType::None, None, Format::Format21t, C),
        Opcode::new(Opcode::all_versions(0x3d), "if-lez", ReferenceType::None, None, Format::Format21t, C),
        // array, instance and static field access
        Opcode::new(Opcode::all_versions(0x44), "aget", ReferenceType::None, None, Format::Format23x, T | C | R),
        Opcode::new(Opcode::all_versions(0x45), "aget-wide", ReferenceType::None, None, Format::Format23x, T | C | R | W),
        Opcode::new(Opcode::all_versions(0x46), "aget-object", ReferenceType::None, None, Format::Format23x, T | C | R),
        Opcode::new(Opcode::all_versions(0x47), "aget-boolean", ReferenceType::None, None, Format::Format23x, T | C | R),
        Opcode::new(Opcode::all_versions(0x48), "aget-byte", ReferenceType::None, None, Format::Format23x, T | C | R),
        Opcode::new(Opcode::all_versions(0x49), "aget-char", ReferenceType::None, None, Format::Format23x, T | C | R),
        Opcode::new(Opcode::all_versions(0x4a), "aget-short", ReferenceType::None, None, Format::Format23x, T | C | R),
        Opcode::new(Opcode::all_versions(0x4b), "aput", ReferenceType::None, None, Format::Format23x, T | C),
        Opcode::new(Opcode::all_versions(0x4c), "aput-wide", ReferenceType::None, None, Format::Format23x, T | C),
        Opcode::new(Opcode::all_versions(0x4d), "aput-object", ReferenceType::None, None, Format::Format23x, T | C),
        Opcode::new(Opcode::all_versions(0x4e), "aput-boolean", ReferenceType::None, None, Format::Format23x, T | C),
        Opcode::new(Opcode::all_versions(0x4f), "aput-byte", ReferenceType::None, None, Format::Format23x, T | C),
        Opcode::new(Opcode::all_versions(0x50), "aput-char", ReferenceType::None, None, Format::Format23x, T | C),
        Opcode::new(Opcode::all_versions(0x51), "aput-short", ReferenceType::None, None, Format::Format23x, T | C),
        Opcode::new(Opcode::all_versions(0x52), "iget", ReferenceType::Field, None, Format::Format22c, T | C | R),
        Opcode::new(Opcode::all_versions(0x53), "iget-wide", ReferenceType::Field, None, Format::Format22c, T | C | R | W),
        Opcode::new(Opcode::all_versions(0x54), "iget-object", ReferenceType::Field, None, Format::Format22c, T | C | R),
        Opcode::new(Opcode::all_versions(0x55), "iget-boolean", ReferenceType::Field, None, Format::Format22c, T | C | R),
        Opcode::new(Opcode::all_versions(0x56), "iget-byte", ReferenceType::Field, None, Format::Format22c, T | C | R),
        Opcode::new(Opcode::all_versions(0x57), "iget-char", ReferenceType::Field, None, Format::Format22c, T | C | R),
        Opcode::new(Opcode::all_versions(0x58), "iget-short", ReferenceType::Field, None, Format::Format22c, T | C | R),
        Opcode::new(Opcode::all_versions(0x59), "iput", ReferenceType::Field, None, Format::Format22c, T | C),
        Opcode::new(Opcode::all_versions(0x5a), "iput-wide", ReferenceType::Field, None, Format::Format22c, T | C),
        Opcode::new(Opcode::all_versions(0x5b), "iput-object", ReferenceType::Field, None, Format::Format22c, T | C),
        Opcode::new(Opcode::all_versions(0x5c), "iput-boolean", ReferenceType::Field, None, Format::Format22c, T | C),
        Opcode::new(Opcode::all_versions(0x5d), "iput-byte", ReferenceType::Field, None, Format::Format22c, T | C),
        Opcode::new(Opcode::all_versions(0x5e), "iput-char", ReferenceType::Field, None, Format::Format22c, T | C),
        Opcode::new(Opcode::all_versions(0x5f), "iput-short", ReferenceType::Field, None, Format::Format22c, T | C),
        Opcode::new(Opcode::all_versions(0x60), "sget", ReferenceType::Field, None, Format::Format21c, T | C | R | S),
        Opcode::new(Opcode::all_versions(0x61), "sget-wide", ReferenceType::Field, None, Format::Format21c, T | C | R | W | S),
        Opcode::new(Opcode::all_versions(0x62), "sget-object", ReferenceType::Field, None, Format::Format21c, T | C | R | S),
        Opcode::new(Opcode::all_versions(0x63), "sget-boolean", ReferenceType::Field, None, Format::Format21c, T | C | R | S),
        Opcode::new(Opcode::all_versions(0x64), "sget-byte", ReferenceType::Field, None, Format::Format21c, T | C | R | S),
        Opcode::new(Opcode::all_versions(0x65), "sget-char", ReferenceType::Field, None, Format::Format21c, T | C | R | S),
        Opcode::new(Opcode::all_versions(0x66), "sget-short", ReferenceType::Field, None, Format::Format21c, T | C | R | S),
        Opcode::new(Opcode::all_versions(0x67), "sput", ReferenceType::Field, None, Format::Format21c, T | C | S),
        Opcode::new(Opcode::all_versions(0x68), "sput-wide", ReferenceType::Field, None, Format::Format21c, T | C | S),
        Opcode::new(Opcode::all_versions(0x69), "sput-object", ReferenceType::Field, None, Format::Format21c, T | C | S),
        Opcode::new(Opcode::all_versions(0x6a), "sput-boolean", ReferenceType::Field, None, Format::Format21c, T | C | S),
        Opcode::new(Opcode::all_versions(0x6b), "sput-byte", ReferenceType::Field, None, Format::Format21c, T | C | S),
        Opcode::new(Opcode::all_versions(0x6c), "sput-char", ReferenceType::Field, None, Format::Format21c, T | C | S),
        Opcode::new(Opcode::all_versions(0x6d), "sput-short", ReferenceType::Field, None, Format::Format21c, T | C | S),
        // invokes
        Opcode::new(Opcode::all_versions(0x6e), "invoke-virtual", ReferenceType::Method, None, Format::Format35c, T | C | RES),
        Opcode::new(Opcode::all_versions(0x6f), "invoke-super", ReferenceType::Method, None, Format::Format35c, T | C | RES),
        Opcode::new(Opcode::all_versions(0x70), "invoke-direct", ReferenceType::Method, None, Format::Format35c, T | C | RES | I),
        Opcode::new(Opcode::all_versions(0x71), "invoke-static", ReferenceType::Method, None, Format::Format35c, T | C | RES),
        Opcode::new(Opcode::all_versions(0x72), "invoke-interface", ReferenceType::Method, None, Format::Format35c, T | C | RES),
        Opcode::new(Opcode::all_versions(0x74), "invoke-virtual/range", ReferenceType::Method, None, Format::Format3rc, T | C | RES),
        Opcode::new(Opcode::all_versions(0x75), "invoke-super/range", ReferenceType::Method, None, Format::Format3rc, T | C | RES),
        Opcode::new(Opcode::all_versions(0x76), "invoke-direct/range", ReferenceType::Method, None, Format::Format3rc, T | C | RES | I),
        Opcode::new(Opcode::all_versions(0x77), "invoke-static/range", ReferenceType::Method, None, Format::Format3rc, T | C | RES),
        Opcode::new(Opcode::all_versions(0x78), "invoke-interface/range", ReferenceType::Method, None, Format::Format3rc, T | C | RES),
        // arithmetic
        Opcode::new(Opcode::all_versions(0x7b), "neg-int", ReferenceType::None, None, Format::Format12x, C | R),
        Opcode::new(Opcode::all_versions(0x7c), "not-int", ReferenceType::None, None, Format::Format12x, C | R),
        Opcode::new(Opcode::all_versions(0x7d), "neg-long", ReferenceType::None, None, Format::Format12x, C | R | W),
        Opcode::new(Opcode::all_versions(0x7e), "not-long", ReferenceType::None, None, Format::Format12x, C | R | W),
        Opcode::new(Opcode::all_versions(0x7f), "neg-float", ReferenceType::None, None, Format::Format12x, C | R),
        Opcode::new(Opcode::all_versions(0x80), "neg-double", ReferenceType::None, None, Format::Format12x, C | R | W),
        Opcode::new(Opcode::all_versions(0x81), "int-to-long", ReferenceType::None, None, Format::Format12x, C | R | W),
        Opcode::new(Opcode::all_versions(0x82), "int-to-float", ReferenceType::None, None, Format::Format12x, C | R),
        Opcode::new(Opcode::all_versions(0x83), "int-to-double", ReferenceType::None, None, Format::Format12x, C | R | W),
        Opcode::new(Opcode::all_versions(0x84), "long-to-int", ReferenceType::None, None, Format::Format12x, C | R),
        Opcode::new(Opcode::all_versions(0x85), "long-to-float", ReferenceType::None, None, Format::Format12x, C | R),
        Opcode::new(Opcode::all_versions(0x86), "long-to-double", ReferenceType::None, None, Format::Format12x, C | R | W),
        Opcode::new(Opcode::all_versions(0x87), "float-to-int", ReferenceType::None, None, Format::Format12x, C | R),
        Opcode::new(Opcode::all_versions(0x88), "float-to-long", ReferenceType::None, None, Format::Format12x, C | R | W),
        Opcode::new(Opcode::all_versions(0x89), "float-to-double", ReferenceType::None, None, Format::Format12x, C | R | W),
        Opcode::new(Opcode::all_versions(0x8a), "double-to-int", ReferenceType::None, None, Format::Format12x, C | R),
        Opcode::new(Opcode::all_versions(0x8b), "double-to-long", ReferenceType::None, None, Format::Format12x, C | R | W),
        Opcode::new(Opcode::all_versions(0x8c), "double-to-float", ReferenceType::None, None, Format::Format12x, C | R),
        Opcode::new(Opcode::all_versions(0x8d), "int-to-byte", ReferenceType::None, None, Format::Format12x, C | R),
        Opcode::new(Opcode::all_versions(0x8e), "int-to-char", ReferenceType::None, None, Format::Format12x, C | R),
        Opcode::new(Opcode::all_versions(0x8f), "int-to-short", ReferenceType::None, None, Format::Format12x, C | R),
        Opcode::new(Opcode::all_versions(0x90), "add-int", ReferenceType::None, None, Format::Format23x, C | R),
        Opcode::new(Opcode::all_versions(0x91), "sub-int", ReferenceType::None, None, Format::Format23x, C | R),
        Opcode::new(Opcode::all_versions(0x92), "mul-int", ReferenceType::None, None, Format::Format23x, C | R),
        Opcode::new(Opcode::all_versions(0x93), "div-int", ReferenceType::None, None, Format::Format23x, T | C | R),
        Opcode::new(Opcode::all_versions(0x94), "rem-int", ReferenceType::None, None, Format::Format23x, T | C | R),
        Opcode::new(Opcode::all_versions(0x95), "and-int", ReferenceType::None, None, Format::Format23x, C | R),
        Opcode::new(Opcode::all_versions(0x96), "or-int", ReferenceType::None, None, Format::Format23x, C | R),
        Opcode::new(Opcode::all_versions(0x97), "xor-int", ReferenceType::None, None, Format::Format23x, C | R),
        Opcode::new(Opcode::all_versions(0x98), "shl-int", ReferenceType::None, None, Format::Format23x, C | R),
        Opcode::new(Opcode::all_versions(0x99), "shr-int", ReferenceType::None, None, Format::Format23x, C | R),
        Opcode::new(Opcode::all_versions(0x9a), "ushr-int", ReferenceType::None, None, Format::Format23x, C | R),
        Opcode::new(Opcode::all_versions(0x9b), "add-long", ReferenceType::None, None, Format::Format23x, C | R | W),
        Opcode::new(Opcode::all_versions(0x9c), "sub-long", ReferenceType::None, None, Format::Format23x, C | R | W),
        Opcode::new(Opcode::all_versions(0x9d), "mul-long", ReferenceType::None, None, Format::Format23x, C | R | W),
        Opcode::new(Opcode::all_versions(0x9e), "div-long", ReferenceType::None, None, Format::Format23x, T | C | R | W),
        Opcode::new(Opcode::all_versions(0x9f), "rem-long", ReferenceType::None, None, Format::Format23x, T | C | R | W),
        Opcode::new(Opcode::all_versions(0xa0), "and-long", ReferenceType::None, None, Format::Format23x, C | R | W),
        Opcode::new(Opcode::all_versions(0xa1), "or-long", ReferenceType::None, None, Format::Format23x, C | R | W),
        Opcode::new(Opcode::all_versions(0xa2), "xor-long", ReferenceType::None, None, Format::Format23x, C | R | W),
        Opcode::new(Opcode::all_versions(0xa3), "shl-long", ReferenceType::None, None, Format::Format23x, C | R | W),
        Opcode::new(Opcode::all_versions(0xa4), "shr-long", ReferenceType::None, None, Format::Format23x, C | R | W),
        Opcode::new(Opcode::all_versions(0xa5), "ushr-long", ReferenceType::None, None, Format::Format23x, C | R | W),
        Opcode::new(Opcode::all_versions(0xa6), "add-float", ReferenceType::None, None, Format::Format23x, C | R),
        Opcode::new(Opcode::all_versions(0xa7), "sub-float", ReferenceType::None, None, Format::Format23x, C | R),
        Opcode::new(Opcode::all_versions(0xa8), "mul-float", ReferenceType::None, None, Format::Format23x, C | R),
        Opcode::new(Opcode::all_versions(0xa9), "div-float", ReferenceType::None, None, Format::Format23x, C | R),
        Opcode::new(Opcode::all_versions(0xaa), "rem-float", ReferenceType::None, None, Format::Format23x, C | R),
        Opcode::new(Opcode::all_versions(0xab), "add-double", ReferenceType::None, None, Format::Format23x, C | R | W),
        Opcode::new(Opcode::all_versions(0xac), "sub-double", ReferenceType::None, None, Format::Format23x, C | R | W),
        Opcode::new(Opcode::all_versions(0xad), "mul-double", ReferenceType::None, None, Format::Format23x, C | R | W),
        Opcode::new(Opcode::all_versions(0xae), "div-double", ReferenceType::None, None, Format::Format23x, C | R | W),
        Opcode::new(Opcode::all_versions(0xaf), "rem-double", ReferenceType::None, None, Format::Format23x, C | R | W),
        Opcode::new(Opcode::all_versions(0xb0), "add-int/2addr", ReferenceType::None, None, Format::Format12x, C | R),
        Opcode::new(Opcode::all_versions(0xb1), "sub-int/2addr", ReferenceType::None, None, Format::Format12x, C | R),
        Opcode::new(Opcode::all_versions(0xb2), "mul-int/2addr", ReferenceType::None, None, Format::Format12x, C | R),
        Opcode::new(Opcode::all_versions(0xb3), "div-int/2addr", ReferenceType::None, None, Format::Format12x, T | C | R),
        Opcode::new(Opcode::all_versions(0xb4), "rem-int/2addr", ReferenceType::None, None, Format::Format12x, T | C | R),
        Opcode::new(Opcode::all_versions(0xb5), "and-int/2addr", ReferenceType::None, None, Format::Format12x, C | R),
        Opcode::new(Opcode::all_versions(0xb6), "or-int/2addr", ReferenceType::None, None, Format::Format12x, C | R),
        Opcode::new(Opcode::all_versions(0xb7), "xor-int/2addr", ReferenceType::None, None, Format::Format12x, C | R),
        Opcode::new(Opcode::all_versions(0xb8), "shl-int/2addr", ReferenceType::None, None, Format::Format12x, C | R),
        Opcode::new(Opcode::all_versions(0xb9), "shr-int/2addr", ReferenceType::None, None, Format::Format12x, C | R),
        Opcode::new(Opcode::all_versions(0xba), "ushr-int/2addr", ReferenceType::None, None, Format::Format12x, C | R),
        Opcode::new(Opcode::all_versions(0xbb), "add-long/2addr", ReferenceType::None, None, Format::Format12x, C | R | W),
        Opcode::new(Opcode::all_versions(0xbc), "sub-long/2addr", ReferenceType::None, None, Format::Format12x, C | R | W),
        Opcode::new(Opcode::all_versions(0xbd), "mul-long/2addr", ReferenceType::None, None, Format::Format12x, C | R | W),
        Opcode::new(Opcode::all_versions(0xbe), "div-long/2addr", ReferenceType::None, None, Format::Format12x, T | C | R | W),
        Opcode::new(Opcode::all_versions(0xbf), "rem-long/2addr", ReferenceType::None, None, Format::Format12x, T | C | R | W),
        Opcode::new(Opcode::all_versions(0xc0), "and-long/2addr", ReferenceType::None, None, Format::Format12x, C | R | W),
        Opcode::new(Opcode::all_versions(0xc1), "or-long/2addr", ReferenceType::None, None, Format::Format12x, C | R | W),
        Opcode::new(Opcode::all_versions(0xc2), "xor-long/2addr", ReferenceType::None, None, Format::Format12x, C | R | W),
        Opcode::new(Opcode::all_versions(0xc3), "shl-long/2addr", ReferenceType::None, None, Format::Format12x, C | R | W),
        Opcode::new(Opcode::all_versions(0xc4), "shr-long/2addr", ReferenceType::None, None, Format::Format12x, C | R | W),
        Opcode::new(Opcode::all_versions(0xc5), "ushr-long/2addr", ReferenceType::None, None, Format::Format12x, C | R | W),
        Opcode::new(Opcode::all_versions(0xc6), "add-float/2addr", ReferenceType::None, None, Format::Format12x, C | R),
        Opcode::new(Opcode::all_versions(0xc7), "sub-float/2addr", ReferenceType::None, None, Format::Format12x, C | R),
        Opcode::new(Opcode::all_versions(0xc8), "mul-float/2addr", ReferenceType::None, None, Format::Format12x, C | R),
        Opcode::new(Opcode::all_versions(0xc9), "div-float/2addr", ReferenceType::None, None, Format::Format12x, C | R),
        Opcode::new(Opcode::all_versions(0xca), "rem-float/2addr", ReferenceType::None, None, Format::Format12x, C | R),
        Opcode::new(Opcode::all_versions(0xcb), "add-double/2addr", ReferenceType::None, None, Format::Format12x, C | R | W),
        Opcode::new(Opcode::all_versions(0xcc), "sub-double/2addr", ReferenceType::None, None, Format::Format12x, C | R | W),
        Opcode::new(Opcode::all_versions(0xcd), "mul-double/2addr", ReferenceType::None, None, Format::Format12x, C | R | W),
        Opcode::new(Opcode::all_versions(0xce), "div-double/2addr", ReferenceType::None, None, Format::Format12x, C | R | W),
        Opcode::new(Opcode::all_versions(0xcf), "rem-double/2addr", ReferenceType::None, None, Format::Format12x, C | R | W),
        Opcode::new(Opcode::all_versions(0xd0), "add-int/lit16", ReferenceType::None, None, Format::Format22s, C | R),
        Opcode::new(Opcode::all_versions(0xd1), "rsub-int", ReferenceType::None, None, Format::Format22s, C | R),
        Opcode::new(Opcode::all_versions(0xd2), "mul-int/lit16", ReferenceType::None, None, Format::Format22s, C | R),
        Opcode::new(Opcode::all_versions(0xd3), "div-int/lit16", ReferenceType::None, None, Format::Format22s, T | C | R),
        Opcode::new(Opcode::all_versions(0xd4), "rem-int/lit16", ReferenceType::None, None, Format::Format22s, T | C | R),
        Opcode::new(Opcode::all_versions(0xd5), "and-int/lit16", ReferenceType::None, None, Format::Format22s, C | R),
        Opcode::new(Opcode::all_versions(0xd6), "or-int/lit16", ReferenceType::None, None, Format::Format22s, C | R),
        Opcode::new(Opcode::all_versions(0xd7), "xor-int/lit16", ReferenceType::None, None, Format::Format22s, C | R),
        Opcode::new(Opcode::all_versions(0xd8), "add-int/lit8", ReferenceType::None, None, Format::Format22b, C | R),
        Opcode::new(Opcode::all_versions(0xd9), "rsub-int/lit8", ReferenceType::None, None, Format::Format22b, C | R),
        Opcode::new(Opcode::all_versions(0xda), "mul-int/lit8", ReferenceType::None, None, Format::Format22b, C | R),
        Opcode::new(Opcode::all_versions(0xdb), "div-int/lit8", ReferenceType::None, None, Format::Format22b, T | C | R),
        Opcode::new(Opcode::all_versions(0xdc), "rem-int/lit8", ReferenceType::None, None, Format::Format22b, T | C | R),
        Opcode::new(Opcode::all_versions(0xdd), "and-int/lit8", ReferenceType::None, None, Format::Format22b, C | R),
        Opcode::new(Opcode::all_versions(0xde), "or-int/lit8", ReferenceType::None, None, Format::Format22b, C | R),
        Opcode::new(Opcode::all_versions(0xdf), "xor-int/lit8", ReferenceType::None, None, Format::Format22b, C | R),
        Opcode::new(Opcode::all_versions(0xe0), "shl-int/lit8", ReferenceType::None, None, Format::Format22b, C | R),
        Opcode::new(Opcode::all_versions(0xe1), "shr-int/lit8", ReferenceType::None, None, Format::Format22b, C | R),
        Opcode::new(Opcode::all_versions(0xe2), "ushr-int/lit8", ReferenceType::None, None, Format::Format22b, C | R),
        // odex only
        Opcode::new(Opcode::last_api(0xe3, 20), "iget-volatile", ReferenceType::Field, None, Format::Format22c, T | C | R | O | V),
        Opcode::new(Opcode::last_api(0xe4, 20), "iput-volatile", ReferenceType::Field, None, Format::Format22c, T | C | O | V),
        Opcode::new(Opcode::last_api(0xe5, 20), "sget-volatile", ReferenceType::Field, None, Format::Format21c, T | C | R | O | V | S),
        Opcode::new(Opcode::last_api(0xe6, 20), "sput-volatile", ReferenceType::Field, None, Format::Format21c, T | C | O | V | S),
        Opcode::new(Opcode::last_api(0xe7, 20), "iget-object-volatile", ReferenceType::Field, None, Format::Format22c, T | C | R | O | V),
        Opcode::new(Opcode::last_api(0xe8, 20), "iget-wide-volatile", ReferenceType::Field, None, Format::Format22c, T | C | R | W | O | V),
        Opcode::new(Opcode::last_api(0xe9, 20), "iput-wide-volatile", ReferenceType::Field, None, Format::Format22c, T | C | O | V),
        Opcode::new(Opcode::last_api(0xea, 20), "sget-wide-volatile", ReferenceType::Field, None, Format::Format21c, T | C | R | W | O | V | S),
        Opcode::new(Opcode::last_api(0xeb, 20), "sput-wide-volatile", ReferenceType::Field, None, Format::Format21c, T | C | O | V | S),
        Opcode::new(Opcode::last_api(0xed, 20), "throw-verification-error", ReferenceType::None, None, Format::Format20bc, T | O),
        Opcode::new(Opcode::last_api(0xee, 20), "execute-inline", ReferenceType::None, None, Format::Format35mi, T | C | RES | O),
        Opcode::new(Opcode::last_api(0xef, 20), "execute-inline/range", ReferenceType::None, None, Format::Format3rmi, T | C | RES | O),
        Opcode::new(Opcode::last_api(0xf0, 20), "invoke-object-init/range", ReferenceType::Method, None, Format::Format3rc, T | C | RES | O | I),
        Opcode::new(Opcode::all_versions(0xf2), "iget-quick", ReferenceType::None, None, Format::Format22cs, T | C | R | O | Q),
        Opcode::new(Opcode::all_versions(0xf3), "iget-wide-quick", ReferenceType::None, None, Format::Format22cs, T | C | R | W | O | Q),
        Opcode::new(Opcode::all_versions(0xf4), "iget-object-quick", ReferenceType::None, None, Format::Format22cs, T | C | R | O | Q),
        Opcode::new(Opcode::all_versions(0xf5), "iput-quick", ReferenceType::None, None, Format::Format22cs, T | C | O | Q),
        Opcode::new(Opcode::all_versions(0xf6), "iput-wide-quick", ReferenceType::None, None, Format::Format22cs, T | C | O | Q),
        Opcode::new(Opcode::all_versions(0xf7), "iput-object-quick", ReferenceType::None, None, Format::Format22cs, T | C | O | Q),
        Opcode::new(Opcode::all_versions(0xf8), "invoke-virtual-quick", ReferenceType::None, None, Format::Format35ms, T | C | RES | O),
        Opcode::new(Opcode::all_versions(0xf9), "invoke-virtual-quick/range", ReferenceType::None, None, Format::Format3rms, T | C | RES | O),
        Opcode::new(Opcode::last_api(0xfa, 25), "invoke-super-quick", ReferenceType::None, None, Format::Format35ms, T | C | RES | O),
        Opcode::new(Opcode::last_api(0xfb, 25), "invoke-super-quick/range", ReferenceType::None, None, Format::Format3rms, T | C | RES | O),
        Opcode::new(Opcode::first_api(0xfa, 26), "invoke-polymorphic", ReferenceType::Method, Some(ReferenceType::MethodProto), Format::Format45cc, T | C | RES),
        Opcode::new(Opcode::first_api(0xfb, 26), "invoke-polymorphic/range", ReferenceType::Method, Some(ReferenceType::MethodProto), Format::Format4rcc, T | C | RES),
        Opcode::new(Opcode::first_api(0xfc, 26), "invoke-custom", ReferenceType::CallSite, None, Format::Format35c, T | C | RES),
        Opcode::new(Opcode::first_api(0xfd, 26), "invoke-custom/range", ReferenceType::CallSite, None, Format::Format3rc, T | C | RES),
        Opcode::new(Opcode::first_api(0xfe, 28), "const-method-handle", ReferenceType::MethodHandle, None, Format::Format21c, T | C | R),
        Opcode::new(Opcode::first_api(0xff, 28), "const-method-type", ReferenceType::MethodProto, None, Format::Format21c, T | C | R),
        // payload pseudo-instructions
        Opcode::new(Opcode::all_versions(0x100), "packed-switch-payload", ReferenceType::None, None, Format::PackedSwitchPayload, C),
        Opcode::new(Opcode::all_versions(0x200), "sparse-switch-payload", ReferenceType::None, None, Format::SparseSwitchPayload, C),
        Opcode::new(Opcode::all_versions(0x300), "array-payload", ReferenceType::None, None, Format::ArrayPayload, C),
    ]
});

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn names_are_unique() {
        let mut names = HashSet::new();
        for op in OPCODES.iter() {
            assert!(names.insert(op.name), "duplicate opcode {}", op.name);
        }
    }

    #[test]
    fn reference_formats_declare_reference_types() {
        for op in OPCODES.iter() {
            match op.format {
                Format::Format21c | Format::Format22c | Format::Format31c | Format::Format35c | Format::Format3rc
                | Format::Format45cc | Format::Format4rcc => {
                    assert_ne!(op.reference_type, ReferenceType::None, "{} needs a reference type", op.name)
                }
                _ => {}
            }
        }
    }
}
