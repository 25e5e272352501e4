//! The entity traits shared by dex-backed views, rewritten views and the
//! immutable model, plus the plain value types they hand out.

use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::dex::encoded_values::{AnnotationElement, EncodedValue};
use crate::dex::error::DexError;
use crate::dex::immutable::ImmutableAnnotation;
use crate::dex::instructions::Instruction;
use crate::dex::opcode_format::Opcodes;
use crate::dex::reference::{FieldRef, MethodRef};

/// A lazily produced collection of known length. Items decode on demand,
/// so each one can fail on its own.
pub type Items<'a, T> = Box<dyn ExactSizeIterator<Item = Result<T, DexError>> + 'a>;

/// Like [`Items`], for streams whose length is only known by walking them.
pub type Stream<'a, T> = Box<dyn Iterator<Item = Result<T, DexError>> + 'a>;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
    pub struct AccessFlags: u32 {
        const PUBLIC = 0x1;
        const PRIVATE = 0x2;
        const PROTECTED = 0x4;
        const STATIC = 0x8;
        const FINAL = 0x10;
        const SYNCHRONIZED = 0x20;
        const VOLATILE = 0x40;
        const BRIDGE = 0x40;
        const TRANSIENT = 0x80;
        const VARARGS = 0x80;
        const NATIVE = 0x100;
        const INTERFACE = 0x200;
        const ABSTRACT = 0x400;
        const STRICT = 0x800;
        const SYNTHETIC = 0x1000;
        const ANNOTATION = 0x2000;
        const ENUM = 0x4000;
        const CONSTRUCTOR = 0x10000;
        const DECLARED_SYNCHRONIZED = 0x20000;
    }
}

impl AccessFlags {
    /// Direct methods are constructors plus private and static methods.
    pub fn is_direct_method(self) -> bool {
        self.intersects(AccessFlags::STATIC | AccessFlags::PRIVATE | AccessFlags::CONSTRUCTOR)
    }

    pub fn is_static(self) -> bool {
        self.contains(AccessFlags::STATIC)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AnnotationVisibility {
    Build,
    Runtime,
    System,
}

impl AnnotationVisibility {
    pub fn from_value(value: u8) -> Result<Self, DexError> {
        match value {
            0 => Ok(AnnotationVisibility::Build),
            1 => Ok(AnnotationVisibility::Runtime),
            2 => Ok(AnnotationVisibility::System),
            _ => fail!("Invalid annotation visibility {}", value),
        }
    }

    pub fn value(self) -> u8 {
        self as u8
    }
}

/// Which hidden API list a member is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HiddenApiRestriction {
    Whitelist,
    Greylist,
    Blacklist,
    GreylistMaxO,
    GreylistMaxP,
    GreylistMaxQ,
    GreylistMaxR,
    GreylistMaxS,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct HiddenApiDomain: u32 {
        const CORE_PLATFORM_API = 0x8;
        const TEST_API = 0x10;
    }
}

/// The hidden API flags of a field or method: one restriction list plus
/// any domain flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HiddenApiRestrictions {
    pub restriction: HiddenApiRestriction,
    pub domains: HiddenApiDomain,
}

impl HiddenApiRestrictions {
    const RESTRICTION_MASK: u32 = 0x7;

    pub fn new(restriction: HiddenApiRestriction, domains: HiddenApiDomain) -> Self {
        HiddenApiRestrictions { restriction, domains }
    }

    pub fn from_value(value: u32) -> Result<Self, DexError> {
        let restriction = match value & Self::RESTRICTION_MASK {
            0 => HiddenApiRestriction::Whitelist,
            1 => HiddenApiRestriction::Greylist,
            2 => HiddenApiRestriction::Blacklist,
            3 => HiddenApiRestriction::GreylistMaxO,
            4 => HiddenApiRestriction::GreylistMaxP,
            5 => HiddenApiRestriction::GreylistMaxQ,
            6 => HiddenApiRestriction::GreylistMaxR,
            _ => HiddenApiRestriction::GreylistMaxS,
        };
        let domain_bits = value & !Self::RESTRICTION_MASK;
        let domains = match HiddenApiDomain::from_bits(domain_bits) {
            Some(domains) => domains,
            None => fail!("Invalid hidden api flags 0x{:x}", value),
        };
        Ok(HiddenApiRestrictions { restriction, domains })
    }

    pub fn value(self) -> u32 {
        self.restriction as u32 | self.domains.bits()
    }
}

/// The tool that left a marker string in the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarkerTool {
    D8,
    R8,
    L8,
}

/// A `~~D8{...}` style string recording which compiler produced the file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DexMarker {
    pub tool: MarkerTool,
    /// The JSON object following the prefix, braces included.
    pub content: String,
}

impl DexMarker {
    pub fn parse(value: &str) -> Option<DexMarker> {
        let (tool, rest) = if let Some(rest) = value.strip_prefix("~~D8") {
            (MarkerTool::D8, rest)
        } else if let Some(rest) = value.strip_prefix("~~R8") {
            (MarkerTool::R8, rest)
        } else if let Some(rest) = value.strip_prefix("~~L8") {
            (MarkerTool::L8, rest)
        } else {
            return None;
        };
        if rest.starts_with('{') && rest.ends_with('}') {
            Some(DexMarker { tool, content: rest.to_string() })
        } else {
            None
        }
    }
}

impl fmt::Display for DexMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = match self.tool {
            MarkerTool::D8 => "~~D8",
            MarkerTool::R8 => "~~R8",
            MarkerTool::L8 => "~~L8",
        };
        write!(f, "{}{}", prefix, self.content)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExceptionHandler {
    /// `None` for a catch-all handler.
    pub exception_type: Option<String>,
    pub handler_code_address: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TryBlock {
    pub start_address: u32,
    pub code_unit_count: u16,
    pub handlers: Vec<ExceptionHandler>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DebugItem {
    StartLocal { address: u32, register: u32, name: Option<String>, local_type: Option<String>, signature: Option<String> },
    EndLocal { address: u32, register: u32 },
    RestartLocal { address: u32, register: u32 },
    PrologueEnd { address: u32 },
    EpilogueBegin { address: u32 },
    SetSourceFile { address: u32, source_file: Option<String> },
    LineNumber { address: u32, line: u32 },
}

impl DebugItem {
    pub fn address(&self) -> u32 {
        match self {
            DebugItem::StartLocal { address, .. }
            | DebugItem::EndLocal { address, .. }
            | DebugItem::RestartLocal { address, .. }
            | DebugItem::PrologueEnd { address }
            | DebugItem::EpilogueBegin { address }
            | DebugItem::SetSourceFile { address, .. }
            | DebugItem::LineNumber { address, .. } => *address,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodParameter {
    pub parameter_type: String,
    pub name: Option<String>,
    pub annotations: Vec<ImmutableAnnotation>,
}

impl MethodParameter {
    pub fn new(parameter_type: &str) -> Self {
        MethodParameter { parameter_type: parameter_type.to_string(), name: None, annotations: Vec::new() }
    }
}

pub trait DexFile: Send + Sync {
    fn opcodes(&self) -> Opcodes;
    fn classes(&self) -> Items<'_, Arc<dyn ClassDef>>;

    fn markers(&self) -> Result<Vec<DexMarker>, DexError> {
        Ok(Vec::new())
    }
}

pub trait ClassDef: Send + Sync {
    fn type_name(&self) -> Result<String, DexError>;
    fn access_flags(&self) -> AccessFlags;
    /// `None` only for `Ljava/lang/Object;`.
    fn superclass(&self) -> Result<Option<String>, DexError>;
    fn interfaces(&self) -> Result<Vec<String>, DexError>;
    fn source_file(&self) -> Result<Option<String>, DexError>;
    fn annotations(&self) -> Items<'_, Arc<dyn Annotation>>;
    fn static_fields(&self) -> Items<'_, Arc<dyn Field>>;
    fn instance_fields(&self) -> Items<'_, Arc<dyn Field>>;
    fn direct_methods(&self) -> Items<'_, Arc<dyn Method>>;
    fn virtual_methods(&self) -> Items<'_, Arc<dyn Method>>;

    fn fields(&self) -> Box<dyn Iterator<Item = Result<Arc<dyn Field>, DexError>> + '_> {
        Box::new(self.static_fields().chain(self.instance_fields()))
    }

    fn methods(&self) -> Box<dyn Iterator<Item = Result<Arc<dyn Method>, DexError>> + '_> {
        Box::new(self.direct_methods().chain(self.virtual_methods()))
    }
}

pub trait Field: Send + Sync {
    fn defining_class(&self) -> Result<String, DexError>;
    fn name(&self) -> Result<String, DexError>;
    fn field_type(&self) -> Result<String, DexError>;
    fn access_flags(&self) -> AccessFlags;
    /// The static initializer, if the class data records one for this field.
    fn initial_value(&self) -> Result<Option<EncodedValue>, DexError>;
    fn annotations(&self) -> Items<'_, Arc<dyn Annotation>>;
    fn hidden_api_restrictions(&self) -> Result<Option<HiddenApiRestrictions>, DexError>;

    fn to_field_ref(&self) -> Result<FieldRef, DexError> {
        Ok(FieldRef { defining_class: self.defining_class()?, name: self.name()?, field_type: self.field_type()? })
    }
}

pub trait Method: Send + Sync {
    fn defining_class(&self) -> Result<String, DexError>;
    fn name(&self) -> Result<String, DexError>;
    fn parameter_types(&self) -> Result<Vec<String>, DexError>;
    /// Parameter types with their debug names and annotations.
    fn parameters(&self) -> Result<Vec<MethodParameter>, DexError>;
    fn return_type(&self) -> Result<String, DexError>;
    fn access_flags(&self) -> AccessFlags;
    fn annotations(&self) -> Items<'_, Arc<dyn Annotation>>;
    fn hidden_api_restrictions(&self) -> Result<Option<HiddenApiRestrictions>, DexError>;
    /// Present unless the method is abstract or native.
    fn implementation(&self) -> Result<Option<Arc<dyn MethodImplementation>>, DexError>;

    fn to_method_ref(&self) -> Result<MethodRef, DexError> {
        Ok(MethodRef {
            defining_class: self.defining_class()?,
            name: self.name()?,
            parameter_types: self.parameter_types()?,
            return_type: self.return_type()?,
        })
    }
}

pub trait MethodImplementation: Send + Sync {
    fn register_count(&self) -> Result<u16, DexError>;
    fn instructions(&self) -> Stream<'_, Instruction>;
    fn try_blocks(&self) -> Result<Vec<TryBlock>, DexError>;
    fn debug_items(&self) -> Stream<'_, DebugItem>;
}

pub trait Annotation: Send + Sync {
    fn visibility(&self) -> AnnotationVisibility;
    fn annotation_type(&self) -> Result<String, DexError>;
    fn elements(&self) -> Result<Vec<AnnotationElement>, DexError>;
}

/// Wraps an already materialized list as [`Items`].
pub(crate) fn items_of<'a, T: Clone + 'a>(values: &'a [T]) -> Items<'a, T> {
    Box::new(values.iter().cloned().map(Ok))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_methods_are_constructors_private_or_static() {
        assert!((AccessFlags::PUBLIC | AccessFlags::CONSTRUCTOR).is_direct_method());
        assert!(AccessFlags::PRIVATE.is_direct_method());
        assert!((AccessFlags::PUBLIC | AccessFlags::STATIC).is_direct_method());
        assert!(!(AccessFlags::PUBLIC | AccessFlags::FINAL).is_direct_method());
    }

    #[test]
    fn hidden_api_flags_split_restriction_and_domain() {
        let restrictions = HiddenApiRestrictions::from_value(0x0b).unwrap();
        assert_eq!(restrictions.restriction, HiddenApiRestriction::GreylistMaxO);
        assert_eq!(restrictions.domains, HiddenApiDomain::CORE_PLATFORM_API);
        assert_eq!(restrictions.value(), 0x0b);
        assert!(HiddenApiRestrictions::from_value(0x40).is_err());
    }

    #[test]
    fn markers_parse_known_prefixes() {
        let marker = DexMarker::parse("~~D8{\"compilation-mode\":\"release\"}").unwrap();
        assert_eq!(marker.tool, MarkerTool::D8);
        assert_eq!(marker.to_string(), "~~D8{\"compilation-mode\":\"release\"}");
        assert!(DexMarker::parse("~~X8{}").is_none());
        assert!(DexMarker::parse("~~R8 not json").is_none());
    }
}
