use std::collections::HashMap;
use std::fmt;
use std::ops::RangeInclusive;
use std::sync::{Arc, Mutex};

use bitflags::bitflags;
use once_cell::sync::Lazy;
use rangemap::RangeInclusiveMap;
use serde::{Deserialize, Serialize};

use crate::dex::error::DexError;
use crate::dex::opcodes::OPCODES;

/// Represents different types of references used by opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReferenceType {
    None,
    String,
    Type,
    Field,
    Method,
    CallSite,
    MethodProto,
    MethodHandle,
}

impl ReferenceType {
    /// The reference kind packed into the top two bits of a 20bc verification byte.
    pub fn from_verification_bits(bits: u8) -> Result<ReferenceType, DexError> {
        match bits {
            0 => Ok(ReferenceType::Type),
            1 => Ok(ReferenceType::Field),
            2 => Ok(ReferenceType::Method),
            3 => Ok(ReferenceType::MethodProto),
            _ => fail!("Invalid verification reference bits {}", bits),
        }
    }

    pub fn verification_bits(self) -> Result<u8, DexError> {
        match self {
            ReferenceType::Type => Ok(0),
            ReferenceType::Field => Ok(1),
            ReferenceType::Method => Ok(2),
            ReferenceType::MethodProto => Ok(3),
            other => fail!("{:?} references cannot appear in a verification error", other),
        }
    }
}

// Defines various flags that can be associated with an opcode.
bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct OpcodeFlags: u32 {
        const CAN_THROW = 0x1;
        const ODEX_ONLY = 0x2;
        const CAN_CONTINUE = 0x4;
        const SETS_RESULT = 0x8;
        const SETS_REGISTER = 0x10;
        const SETS_WIDE_REGISTER = 0x20;
        const QUICK_FIELD_ACCESSOR = 0x40;
        const VOLATILE_FIELD_ACCESSOR = 0x80;
        const STATIC_FIELD_ACCESSOR = 0x100;
        const JUMBO_OPCODE = 0x200;
        const CAN_INITIALIZE_REFERENCE = 0x400;
    }
}

/// Represents an opcode with its associated properties and mappings.
pub struct Opcode {
    pub name: &'static str,
    pub reference_type: ReferenceType,
    pub reference_type2: Option<ReferenceType>,
    pub format: Format,
    pub flags: OpcodeFlags,
    pub api_to_value_map: RangeInclusiveMap<i32, u16>,
}

/// An API range together with the opcode value used in it.
pub struct VersionConstraint {
    pub api_range: RangeInclusive<i32>,
    pub opcode_value: u16,
}

impl Opcode {

    /// Creates a new Opcode instance.
    pub(crate) fn new(
        version_constraints: Vec<VersionConstraint>,
        name: &'static str,
        reference_type: ReferenceType,
        reference_type2: Option<ReferenceType>,
        format: Format,
        flags: OpcodeFlags,
    ) -> Self {
        let mut api_to_value_map = RangeInclusiveMap::new();

        for vc in version_constraints.iter() {
            if !vc.api_range.is_empty() {
                api_to_value_map.insert(vc.api_range.clone(), vc.opcode_value);
            }
        }

        Opcode {
            name,
            reference_type,
            reference_type2,
            format,
            flags,
            api_to_value_map,
        }
    }

    pub(crate) fn all_versions(opcode_value: u16) -> Vec<VersionConstraint> {
        vec![VersionConstraint { api_range: i32::MIN..=i32::MAX, opcode_value }]
    }

    pub(crate) fn first_api(opcode_value: u16, api: i32) -> Vec<VersionConstraint> {
        vec![VersionConstraint { api_range: api..=i32::MAX, opcode_value }]
    }

    pub(crate) fn last_api(opcode_value: u16, api: i32) -> Vec<VersionConstraint> {
        vec![VersionConstraint { api_range: i32::MIN..=api, opcode_value }]
    }

    pub(crate) fn between_api(opcode_value: u16, min_api: i32, max_api: i32) -> Vec<VersionConstraint> {
        vec![VersionConstraint { api_range: min_api..=max_api, opcode_value }]
    }

    /// Value of this opcode at `api`, if it exists there.
    pub fn value_for_api(&self, api: i32) -> Option<u16> {
        self.api_to_value_map.get(&api).copied()
    }

    /// Looks an opcode up by its smali name, e.g. `"if-eq"`.
    pub fn by_name(name: &str) -> Option<&'static Opcode> {
        OPCODES.iter().find(|op| op.name == name)
    }

    pub fn can_throw(&self) -> bool {
        self.flags.contains(OpcodeFlags::CAN_THROW)
    }

    pub fn can_continue(&self) -> bool {
        self.flags.contains(OpcodeFlags::CAN_CONTINUE)
    }

    pub fn is_odex_only(&self) -> bool {
        self.flags.contains(OpcodeFlags::ODEX_ONLY)
    }

    pub fn sets_result(&self) -> bool {
        self.flags.contains(OpcodeFlags::SETS_RESULT)
    }
}

impl PartialEq for Opcode {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Opcode {}

impl std::hash::Hash for Opcode {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl fmt::Debug for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Opcode({})", self.name)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Instruction formats, named after the Dalvik format ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Format {
    Format10t,
    Format10x,
    Format11n,
    Format11x,
    Format12x,
    Format20bc,
    Format20t,
    Format21c,
    Format21ih,
    Format21lh,
    Format21s,
    Format21t,
    Format22b,
    Format22c,
    Format22cs,
    Format22s,
    Format22t,
    Format22x,
    Format23x,
    Format30t,
    Format31c,
    Format31i,
    Format31t,
    Format32x,
    Format35c,
    Format35mi,
    Format35ms,
    Format3rc,
    Format3rmi,
    Format3rms,
    Format45cc,
    Format4rcc,
    Format51l,
    ArrayPayload,
    PackedSwitchPayload,
    SparseSwitchPayload,
}

impl Format {
    /// Size in 16-bit code units; `None` for payloads, whose size depends on their data.
    pub fn code_units(&self) -> Option<usize> {
        match self {
            Format::Format10t | Format::Format10x | Format::Format11n | Format::Format11x | Format::Format12x => Some(1),
            Format::Format20bc | Format::Format20t | Format::Format21c | Format::Format21ih | Format::Format21lh
            | Format::Format21s | Format::Format21t | Format::Format22b | Format::Format22c | Format::Format22cs
            | Format::Format22s | Format::Format22t | Format::Format22x | Format::Format23x => Some(2),
            Format::Format30t | Format::Format31c | Format::Format31i | Format::Format31t | Format::Format32x
            | Format::Format35c | Format::Format35mi | Format::Format35ms | Format::Format3rc | Format::Format3rmi
            | Format::Format3rms => Some(3),
            Format::Format45cc | Format::Format4rcc => Some(4),
            Format::Format51l => Some(5),
            Format::ArrayPayload | Format::PackedSwitchPayload | Format::SparseSwitchPayload => None,
        }
    }

    pub fn is_payload_format(&self) -> bool {
        self.code_units().is_none()
    }
}

/// The opcode set of one API level: maps encoded values to opcodes and back.
#[derive(Clone)]
pub struct Opcodes {
    api: i32,
    by_value: Arc<HashMap<u16, &'static Opcode>>,
}

pub const DEFAULT_API_LEVEL: i32 = 33;

static OPCODE_MAP_CACHE: Lazy<Mutex<HashMap<i32, Arc<HashMap<u16, &'static Opcode>>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

fn opcode_map_for_api(api: i32) -> Arc<HashMap<u16, &'static Opcode>> {
    let mut cache = OPCODE_MAP_CACHE.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    cache
        .entry(api)
        .or_insert_with(|| {
            let mut map = HashMap::new();
            for op in OPCODES.iter() {
                if let Some(value) = op.value_for_api(api) {
                    map.insert(value, op);
                }
            }
            Arc::new(map)
        })
        .clone()
}

impl Opcodes {
    pub fn for_api(api: i32) -> Self {
        Opcodes { api, by_value: opcode_map_for_api(api) }
    }

    /// Opcodes for the newest API level that writes `dex_version`.
    pub fn for_dex_version(dex_version: u32) -> Result<Self, DexError> {
        let api = match dex_version {
            35 => 23,
            37 => 25,
            38 => 27,
            39 => DEFAULT_API_LEVEL,
            40 => 34,
            41 => 35,
            _ => fail!("Unsupported dex version {:03}", dex_version),
        };
        Ok(Opcodes::for_api(api))
    }

    pub fn api(&self) -> i32 {
        self.api
    }

    /// The dex format version files for this API level are written with.
    pub fn dex_version(&self) -> u32 {
        match self.api {
            i32::MIN..=23 => 35,
            24..=25 => 37,
            26..=27 => 38,
            28..=33 => 39,
            34 => 40,
            _ => 41,
        }
    }

    pub fn opcode(&self, value: u16) -> Option<&'static Opcode> {
        self.by_value.get(&value).copied()
    }

    pub fn value(&self, opcode: &Opcode) -> Option<u16> {
        opcode.value_for_api(self.api)
    }
}

impl Default for Opcodes {
    fn default() -> Self {
        Opcodes::for_api(DEFAULT_API_LEVEL)
    }
}

impl PartialEq for Opcodes {
    fn eq(&self, other: &Self) -> bool {
        self.api == other.api
    }
}

impl Eq for Opcodes {}

impl fmt::Debug for Opcodes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Opcodes(api {})", self.api)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_values_follow_api_level() {
        let old = Opcodes::for_api(25);
        let new = Opcodes::for_api(26);
        assert_eq!(old.opcode(0xfa).map(|op| op.name), Some("invoke-super-quick"));
        assert_eq!(new.opcode(0xfa).map(|op| op.name), Some("invoke-polymorphic"));
        let polymorphic = Opcode::by_name("invoke-polymorphic").unwrap();
        assert_eq!(old.value(polymorphic), None);
        assert_eq!(new.value(polymorphic), Some(0xfa));
    }

    #[test]
    fn payload_pseudo_opcodes_use_full_code_unit() {
        let opcodes = Opcodes::default();
        assert_eq!(opcodes.opcode(0x0100).map(|op| op.format), Some(Format::PackedSwitchPayload));
        assert_eq!(opcodes.opcode(0x0200).map(|op| op.format), Some(Format::SparseSwitchPayload));
        assert_eq!(opcodes.opcode(0x0300).map(|op| op.format), Some(Format::ArrayPayload));
    }

    #[test]
    fn dex_versions_map_to_api_levels() {
        assert_eq!(Opcodes::for_dex_version(35).unwrap().api(), 23);
        assert_eq!(Opcodes::for_dex_version(39).unwrap().dex_version(), 39);
        assert!(Opcodes::for_dex_version(36).is_err());
        assert_eq!(Opcodes::for_api(21).dex_version(), 35);
    }

    #[test]
    fn formats_report_sizes() {
        assert_eq!(Format::Format22t.code_units(), Some(2));
        assert_eq!(Format::Format51l.code_units(), Some(5));
        assert!(Format::SparseSwitchPayload.is_payload_format());
    }
}
