//! Index-free references to strings, types, fields, methods and friends.
//!
//! These are what instructions and encoded values point at once the file's
//! index tables have been resolved. Ordering follows the field order, which
//! lines up with the sort the dex format requires for the id sections.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dex::encoded_values::EncodedValue;
use crate::dex::error::DexError;
use crate::dex::opcode_format::ReferenceType;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldRef
{
    pub defining_class: String,
    pub name: String,
    pub field_type: String,
}

impl FieldRef
{
    pub fn new(defining_class: &str, name: &str, field_type: &str) -> Self
    {
        FieldRef { defining_class: defining_class.to_string(), name: name.to_string(), field_type: field_type.to_string() }
    }
}

impl fmt::Display for FieldRef
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}->{}:{}", self.defining_class, self.name, self.field_type)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodProtoRef
{
    pub parameter_types: Vec<String>,
    pub return_type: String,
}

impl MethodProtoRef
{
    pub fn new(parameter_types: &[&str], return_type: &str) -> Self
    {
        MethodProtoRef {
            parameter_types: parameter_types.iter().map(|p| p.to_string()).collect(),
            return_type: return_type.to_string(),
        }
    }

    /// Parses a descriptor such as `(ILjava/lang/String;)V`.
    pub fn from_descriptor(descriptor: &str) -> Result<Self, DexError>
    {
        let inner = match descriptor.strip_prefix('(').and_then(|rest| rest.split_once(')'))
        {
            Some(parts) => parts,
            None => fail!("Invalid method descriptor {}", descriptor),
        };
        let (params, return_type) = inner;
        let mut parameter_types = Vec::new();
        let bytes = params.as_bytes();
        let mut start = 0;
        while start < bytes.len()
        {
            let end = type_descriptor_end(bytes, start).ok_or_else(|| err!("Invalid method descriptor {}", descriptor))?;
            parameter_types.push(params[start..end].to_string());
            start = end;
        }
        if return_type.is_empty()
        {
            fail!("Missing return type in method descriptor {}", descriptor);
        }
        Ok(MethodProtoRef { parameter_types, return_type: return_type.to_string() })
    }

    pub fn descriptor(&self) -> String
    {
        format!("({}){}", self.parameter_types.concat(), self.return_type)
    }

    /// The shorty form: one character per type, references collapse to `L`.
    pub fn shorty(&self) -> String
    {
        std::iter::once(&self.return_type)
            .chain(self.parameter_types.iter())
            .map(|t| shorty_char(t))
            .collect()
    }

    /// Registers taken by the parameters, wide types counting twice.
    pub fn parameter_register_count(&self) -> u16
    {
        self.parameter_types.iter().map(|t| if is_wide_type(t) { 2 } else { 1 }).sum()
    }
}

impl fmt::Display for MethodProtoRef
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.write_str(&self.descriptor())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodRef
{
    pub defining_class: String,
    pub name: String,
    pub parameter_types: Vec<String>,
    pub return_type: String,
}

impl MethodRef
{
    pub fn new(defining_class: &str, name: &str, parameter_types: &[&str], return_type: &str) -> Self
    {
        MethodRef {
            defining_class: defining_class.to_string(),
            name: name.to_string(),
            parameter_types: parameter_types.iter().map(|p| p.to_string()).collect(),
            return_type: return_type.to_string(),
        }
    }

    pub fn proto(&self) -> MethodProtoRef
    {
        MethodProtoRef { parameter_types: self.parameter_types.clone(), return_type: self.return_type.clone() }
    }
}

impl fmt::Display for MethodRef
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}->{}({}){}", self.defining_class, self.name, self.parameter_types.concat(), self.return_type)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MethodHandleType
{
    StaticPut,
    StaticGet,
    InstancePut,
    InstanceGet,
    InvokeStatic,
    InvokeInstance,
    InvokeConstructor,
    InvokeDirect,
    InvokeInterface,
}

impl MethodHandleType
{
    pub fn from_value(value: u16) -> Result<Self, DexError>
    {
        Ok(match value
        {
            0 => MethodHandleType::StaticPut,
            1 => MethodHandleType::StaticGet,
            2 => MethodHandleType::InstancePut,
            3 => MethodHandleType::InstanceGet,
            4 => MethodHandleType::InvokeStatic,
            5 => MethodHandleType::InvokeInstance,
            6 => MethodHandleType::InvokeConstructor,
            7 => MethodHandleType::InvokeDirect,
            8 => MethodHandleType::InvokeInterface,
            _ => fail!("Invalid method handle type {}", value),
        })
    }

    pub fn value(self) -> u16
    {
        self as u16
    }

    pub fn is_field_accessor(self) -> bool
    {
        self.value() <= MethodHandleType::InstanceGet.value()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MethodHandleMember
{
    Field(FieldRef),
    Method(MethodRef),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodHandleRef
{
    pub handle_type: MethodHandleType,
    pub member: MethodHandleMember,
}

impl MethodHandleRef
{
    pub fn new(handle_type: MethodHandleType, member: MethodHandleMember) -> Result<Self, DexError>
    {
        let matches = match &member
        {
            MethodHandleMember::Field(_) => handle_type.is_field_accessor(),
            MethodHandleMember::Method(_) => !handle_type.is_field_accessor(),
        };
        if !matches
        {
            fail!("Method handle type {:?} does not match its member", handle_type);
        }
        Ok(MethodHandleRef { handle_type, member })
    }
}

/// The bootstrap data of an invoke-custom call site.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallSiteRef
{
    pub method_handle: MethodHandleRef,
    pub method_name: String,
    pub method_proto: MethodProtoRef,
    pub extra_arguments: Vec<EncodedValue>,
}

/// Anything an instruction can refer to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Reference
{
    String(String),
    Type(String),
    Field(FieldRef),
    Method(MethodRef),
    MethodProto(MethodProtoRef),
    MethodHandle(MethodHandleRef),
    CallSite(CallSiteRef),
}

impl fmt::Display for Reference
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self
        {
            Reference::String(s) => write!(f, "{:?}", s),
            Reference::Type(t) => f.write_str(t),
            Reference::Field(r) => r.fmt(f),
            Reference::Method(r) => r.fmt(f),
            Reference::MethodProto(r) => r.fmt(f),
            Reference::MethodHandle(r) => write!(f, "{:?}@{:?}", r.handle_type, r.member),
            Reference::CallSite(r) => write!(f, "call_site({}, {})", r.method_name, r.method_proto),
        }
    }
}

/// Turns pool indices from a dex image into references.
pub trait RefResolver
{
    fn string(&self, index: u32) -> Result<String, DexError>;
    fn type_name(&self, index: u32) -> Result<String, DexError>;
    fn field_ref(&self, index: u32) -> Result<FieldRef, DexError>;
    fn method_ref(&self, index: u32) -> Result<MethodRef, DexError>;
    fn proto_ref(&self, index: u32) -> Result<MethodProtoRef, DexError>;
    fn method_handle(&self, index: u32) -> Result<MethodHandleRef, DexError>;
    fn call_site(&self, index: u32) -> Result<CallSiteRef, DexError>;

    fn resolve(&self, reference_type: ReferenceType, index: u32) -> Result<Reference, DexError>
    {
        Ok(match reference_type
        {
            ReferenceType::String => Reference::String(self.string(index)?),
            ReferenceType::Type => Reference::Type(self.type_name(index)?),
            ReferenceType::Field => Reference::Field(self.field_ref(index)?),
            ReferenceType::Method => Reference::Method(self.method_ref(index)?),
            ReferenceType::MethodProto => Reference::MethodProto(self.proto_ref(index)?),
            ReferenceType::MethodHandle => Reference::MethodHandle(self.method_handle(index)?),
            ReferenceType::CallSite => Reference::CallSite(self.call_site(index)?),
            ReferenceType::None => fail!("Cannot resolve index {} without a reference type", index),
        })
    }
}

/// The inverse of [`RefResolver`]: finds the pool index of a reference
/// when writing.
pub trait RefIndexer
{
    fn string_index(&self, value: &str) -> Result<u32, DexError>;
    fn type_index(&self, descriptor: &str) -> Result<u32, DexError>;
    fn field_index(&self, field: &FieldRef) -> Result<u32, DexError>;
    fn method_index(&self, method: &MethodRef) -> Result<u32, DexError>;
    fn proto_index(&self, proto: &MethodProtoRef) -> Result<u32, DexError>;
    fn method_handle_index(&self, handle: &MethodHandleRef) -> Result<u32, DexError>;
    fn call_site_index(&self, call_site: &CallSiteRef) -> Result<u32, DexError>;

    fn index_of(&self, reference: &Reference) -> Result<u32, DexError>
    {
        match reference
        {
            Reference::String(s) => self.string_index(s),
            Reference::Type(t) => self.type_index(t),
            Reference::Field(f) => self.field_index(f),
            Reference::Method(m) => self.method_index(m),
            Reference::MethodProto(p) => self.proto_index(p),
            Reference::MethodHandle(h) => self.method_handle_index(h),
            Reference::CallSite(c) => self.call_site_index(c),
        }
    }
}

impl Reference
{
    pub fn reference_type(&self) -> ReferenceType
    {
        match self
        {
            Reference::String(_) => ReferenceType::String,
            Reference::Type(_) => ReferenceType::Type,
            Reference::Field(_) => ReferenceType::Field,
            Reference::Method(_) => ReferenceType::Method,
            Reference::MethodProto(_) => ReferenceType::MethodProto,
            Reference::MethodHandle(_) => ReferenceType::MethodHandle,
            Reference::CallSite(_) => ReferenceType::CallSite,
        }
    }
}

fn type_descriptor_end(bytes: &[u8], start: usize) -> Option<usize>
{
    let mut i = start;
    while i < bytes.len() && bytes[i] == b'['
    {
        i += 1;
    }
    match bytes.get(i)?
    {
        b'L' => bytes[i..].iter().position(|b| *b == b';').map(|p| i + p + 1),
        b'Z' | b'B' | b'S' | b'C' | b'I' | b'J' | b'F' | b'D' => Some(i + 1),
        _ => None,
    }
}

fn shorty_char(descriptor: &str) -> char
{
    match descriptor.chars().next()
    {
        Some('[') | Some('L') => 'L',
        Some(c) => c,
        None => 'V',
    }
}

pub fn is_wide_type(descriptor: &str) -> bool
{
    descriptor == "J" || descriptor == "D"
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn parses_descriptors_and_builds_shorty()
    {
        let proto = MethodProtoRef::from_descriptor("(I[JLjava/lang/String;D)V").unwrap();
        assert_eq!(proto.parameter_types, vec!["I", "[J", "Ljava/lang/String;", "D"]);
        assert_eq!(proto.return_type, "V");
        assert_eq!(proto.shorty(), "VILLD");
        assert_eq!(proto.parameter_register_count(), 5);
        assert_eq!(proto.descriptor(), "(I[JLjava/lang/String;D)V");
        assert!(MethodProtoRef::from_descriptor("(Q)V").is_err());
        assert!(MethodProtoRef::from_descriptor("I)V").is_err());
    }

    #[test]
    fn method_refs_order_by_class_then_name()
    {
        let mut refs = vec![
            MethodRef::new("LC;", "bar", &[], "V"),
            MethodRef::new("LA;", "foo", &[], "V"),
            MethodRef::new("LB;", "baz", &[], "V"),
        ];
        refs.sort();
        let names: Vec<_> = refs.iter().map(|r| r.to_string()).collect();
        assert_eq!(names, vec!["LA;->foo()V", "LB;->baz()V", "LC;->bar()V"]);
    }

    #[test]
    fn method_handle_member_must_match_kind()
    {
        let field = MethodHandleMember::Field(FieldRef::new("LA;", "x", "I"));
        assert!(MethodHandleRef::new(MethodHandleType::StaticGet, field.clone()).is_ok());
        assert!(MethodHandleRef::new(MethodHandleType::InvokeStatic, field).is_err());
    }
}
