use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use crate::dex::buffer::{DexReader, DexWriter};
use crate::dex::error::DexError;
use crate::dex::reference::{FieldRef, MethodHandleRef, MethodProtoRef, MethodRef, RefIndexer, RefResolver};

pub const VALUE_BYTE: u8 = 0x00;
pub const VALUE_SHORT: u8 = 0x02;
pub const VALUE_CHAR: u8 = 0x03;
pub const VALUE_INT: u8 = 0x04;
pub const VALUE_LONG: u8 = 0x06;
pub const VALUE_FLOAT: u8 = 0x10;
pub const VALUE_DOUBLE: u8 = 0x11;
pub const VALUE_METHOD_TYPE: u8 = 0x15;
pub const VALUE_METHOD_HANDLE: u8 = 0x16;
pub const VALUE_STRING: u8 = 0x17;
pub const VALUE_TYPE: u8 = 0x18;
pub const VALUE_FIELD: u8 = 0x19;
pub const VALUE_METHOD: u8 = 0x1a;
pub const VALUE_ENUM: u8 = 0x1b;
pub const VALUE_ARRAY: u8 = 0x1c;
pub const VALUE_ANNOTATION: u8 = 0x1d;
pub const VALUE_NULL: u8 = 0x1e;
pub const VALUE_BOOLEAN: u8 = 0x1f;

/// An annotation body: the annotation type and its named elements.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EncodedAnnotation {
    pub annotation_type: String,
    pub elements: Vec<AnnotationElement>,
}

impl EncodedAnnotation {
    pub fn new(annotation_type: &str, elements: Vec<AnnotationElement>) -> Self {
        let mut elements = elements;
        elements.sort_by(|a, b| utf16_cmp(&a.name, &b.name));
        EncodedAnnotation { annotation_type: annotation_type.to_string(), elements }
    }

    pub fn read(reader: &mut DexReader, resolver: &dyn RefResolver) -> Result<EncodedAnnotation, DexError> {
        let annotation_type = resolver.type_name(reader.read_uleb128()?)?;
        let size = reader.read_uleb128()? as usize;
        let mut elements = Vec::with_capacity(size.min(reader.remaining()));

        for _ in 0..size {
            elements.push(AnnotationElement::read(reader, resolver)?);
        }

        Ok(EncodedAnnotation { annotation_type, elements })
    }

    /// Elements are written in name order, which is string index order once
    /// the string pool is sorted.
    pub fn write(&self, writer: &mut DexWriter, indexer: &dyn RefIndexer) -> Result<(), DexError> {
        writer.write_uleb128(indexer.type_index(&self.annotation_type)?);
        writer.write_uleb128(self.elements.len() as u32);

        let mut indexed = Vec::with_capacity(self.elements.len());
        for element in &self.elements {
            indexed.push((indexer.string_index(&element.name)?, element));
        }
        indexed.sort_by_key(|(index, _)| *index);

        for (name_index, element) in indexed {
            writer.write_uleb128(name_index);
            element.value.write(writer, indexer)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AnnotationElement {
    pub name: String,
    pub value: EncodedValue,
}

impl AnnotationElement {
    pub fn new(name: &str, value: EncodedValue) -> Self {
        AnnotationElement { name: name.to_string(), value }
    }

    pub fn read(reader: &mut DexReader, resolver: &dyn RefResolver) -> Result<AnnotationElement, DexError> {
        let name = resolver.string(reader.read_uleb128()?)?;
        let value = EncodedValue::read(reader, resolver)?;

        Ok(AnnotationElement { name, value })
    }
}

/// A constant as it appears in static initializers, annotations and call
/// site arguments, with every index resolved.
#[derive(Debug, Clone)]
pub enum EncodedValue {
    Byte(i8),
    Short(i16),
    Char(u16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    MethodType(MethodProtoRef),
    MethodHandle(MethodHandleRef),
    String(String),
    Type(String),
    Field(FieldRef),
    Method(MethodRef),
    Enum(FieldRef),
    Array(Vec<EncodedValue>),
    Annotation(EncodedAnnotation),
    Null,
    Boolean(bool),
}

impl EncodedValue
{
    pub fn value_type(&self) -> u8 {
        match self {
            EncodedValue::Byte(_) => VALUE_BYTE,
            EncodedValue::Short(_) => VALUE_SHORT,
            EncodedValue::Char(_) => VALUE_CHAR,
            EncodedValue::Int(_) => VALUE_INT,
            EncodedValue::Long(_) => VALUE_LONG,
            EncodedValue::Float(_) => VALUE_FLOAT,
            EncodedValue::Double(_) => VALUE_DOUBLE,
            EncodedValue::MethodType(_) => VALUE_METHOD_TYPE,
            EncodedValue::MethodHandle(_) => VALUE_METHOD_HANDLE,
            EncodedValue::String(_) => VALUE_STRING,
            EncodedValue::Type(_) => VALUE_TYPE,
            EncodedValue::Field(_) => VALUE_FIELD,
            EncodedValue::Method(_) => VALUE_METHOD,
            EncodedValue::Enum(_) => VALUE_ENUM,
            EncodedValue::Array(_) => VALUE_ARRAY,
            EncodedValue::Annotation(_) => VALUE_ANNOTATION,
            EncodedValue::Null => VALUE_NULL,
            EncodedValue::Boolean(_) => VALUE_BOOLEAN,
        }
    }

    /// The value a field of type `descriptor` holds when it has no initializer.
    pub fn default_for_type(descriptor: &str) -> EncodedValue {
        match descriptor {
            "Z" => EncodedValue::Boolean(false),
            "B" => EncodedValue::Byte(0),
            "S" => EncodedValue::Short(0),
            "C" => EncodedValue::Char(0),
            "I" => EncodedValue::Int(0),
            "J" => EncodedValue::Long(0),
            "F" => EncodedValue::Float(0.0),
            "D" => EncodedValue::Double(0.0),
            _ => EncodedValue::Null,
        }
    }

    /// Zero, false or null. Negative zero floats are not defaults.
    pub fn is_default(&self) -> bool {
        match self {
            EncodedValue::Byte(v) => *v == 0,
            EncodedValue::Short(v) => *v == 0,
            EncodedValue::Char(v) => *v == 0,
            EncodedValue::Int(v) => *v == 0,
            EncodedValue::Long(v) => *v == 0,
            EncodedValue::Float(v) => v.to_bits() == 0,
            EncodedValue::Double(v) => v.to_bits() == 0,
            EncodedValue::Boolean(v) => !*v,
            EncodedValue::Null => true,
            _ => false,
        }
    }

    #[inline]
    pub fn as_annotation(&self) -> Option<&EncodedAnnotation> {
        match self {
            EncodedValue::Annotation(ann) => Some(ann),
            _ => None,
        }
    }

    pub fn read(reader: &mut DexReader, resolver: &dyn RefResolver) -> Result<EncodedValue, DexError> {
        let start = reader.tell();
        let header_byte = reader.read_u1()?;
        let value_arg = header_byte >> 5;
        let value_type = header_byte & 0x1f;
        let size = value_arg as usize + 1;

        let check_size = |max: usize| -> Result<(), DexError> {
            if size > max {
                fail!("Invalid size {} for encoded value type 0x{:02x} at offset 0x{:x}", size, value_type, start);
            }
            Ok(())
        };
        let check_no_arg = || -> Result<(), DexError> {
            if value_arg != 0 {
                fail!("Invalid value_arg {} for encoded value type 0x{:02x} at offset 0x{:x}", value_arg, value_type, start);
            }
            Ok(())
        };

        let value = match value_type {
            VALUE_BYTE => {
                check_size(1)?;
                EncodedValue::Byte(reader.read_s1()?)
            }
            VALUE_SHORT => {
                check_size(2)?;
                EncodedValue::Short(reader.read_sized_signed(size)? as i16)
            }
            VALUE_CHAR => {
                check_size(2)?;
                EncodedValue::Char(reader.read_sized_unsigned(size)? as u16)
            }
            VALUE_INT => {
                check_size(4)?;
                EncodedValue::Int(reader.read_sized_signed(size)? as i32)
            }
            VALUE_LONG => {
                check_size(8)?;
                EncodedValue::Long(reader.read_sized_signed(size)?)
            }
            VALUE_FLOAT => {
                check_size(4)?;
                EncodedValue::Float(f32::from_bits(reader.read_sized_right_extended(size, 4)? as u32))
            }
            VALUE_DOUBLE => {
                check_size(8)?;
                EncodedValue::Double(f64::from_bits(reader.read_sized_right_extended(size, 8)?))
            }
            VALUE_METHOD_TYPE => {
                check_size(4)?;
                EncodedValue::MethodType(resolver.proto_ref(reader.read_sized_unsigned(size)? as u32)?)
            }
            VALUE_METHOD_HANDLE => {
                check_size(4)?;
                EncodedValue::MethodHandle(resolver.method_handle(reader.read_sized_unsigned(size)? as u32)?)
            }
            VALUE_STRING => {
                check_size(4)?;
                EncodedValue::String(resolver.string(reader.read_sized_unsigned(size)? as u32)?)
            }
            VALUE_TYPE => {
                check_size(4)?;
                EncodedValue::Type(resolver.type_name(reader.read_sized_unsigned(size)? as u32)?)
            }
            VALUE_FIELD => {
                check_size(4)?;
                EncodedValue::Field(resolver.field_ref(reader.read_sized_unsigned(size)? as u32)?)
            }
            VALUE_METHOD => {
                check_size(4)?;
                EncodedValue::Method(resolver.method_ref(reader.read_sized_unsigned(size)? as u32)?)
            }
            VALUE_ENUM => {
                check_size(4)?;
                EncodedValue::Enum(resolver.field_ref(reader.read_sized_unsigned(size)? as u32)?)
            }
            VALUE_ARRAY => {
                check_no_arg()?;
                EncodedValue::Array(read_encoded_array(reader, resolver)?)
            }
            VALUE_ANNOTATION => {
                check_no_arg()?;
                EncodedValue::Annotation(EncodedAnnotation::read(reader, resolver)?)
            }
            VALUE_NULL => {
                check_no_arg()?;
                EncodedValue::Null
            }
            VALUE_BOOLEAN => {
                if value_arg > 1 {
                    fail!("Invalid boolean value_arg {} at offset 0x{:x}", value_arg, start);
                }
                EncodedValue::Boolean(value_arg != 0)
            }
            _ => fail!("Unknown encoded value type 0x{:02x} at offset 0x{:x}", value_type, start),
        };
        Ok(value)
    }

    /// Writes the value using the smallest size its type allows.
    pub fn write(&self, writer: &mut DexWriter, indexer: &dyn RefIndexer) -> Result<(), DexError> {
        let value_type = self.value_type();
        match self {
            EncodedValue::Byte(val) => {
                writer.write_u1(value_type);
                writer.write_u1(*val as u8);
            }
            EncodedValue::Short(val) => write_signed(writer, value_type, *val as i64),
            EncodedValue::Char(val) => write_unsigned(writer, value_type, *val as u64),
            EncodedValue::Int(val) => write_signed(writer, value_type, *val as i64),
            EncodedValue::Long(val) => write_signed(writer, value_type, *val),
            EncodedValue::Float(val) => write_right_extended(writer, value_type, val.to_bits() as u64, 4),
            EncodedValue::Double(val) => write_right_extended(writer, value_type, val.to_bits(), 8),
            EncodedValue::MethodType(proto) => write_unsigned(writer, value_type, indexer.proto_index(proto)? as u64),
            EncodedValue::MethodHandle(handle) => {
                write_unsigned(writer, value_type, indexer.method_handle_index(handle)? as u64)
            }
            EncodedValue::String(s) => write_unsigned(writer, value_type, indexer.string_index(s)? as u64),
            EncodedValue::Type(t) => write_unsigned(writer, value_type, indexer.type_index(t)? as u64),
            EncodedValue::Field(f) | EncodedValue::Enum(f) => {
                write_unsigned(writer, value_type, indexer.field_index(f)? as u64)
            }
            EncodedValue::Method(m) => write_unsigned(writer, value_type, indexer.method_index(m)? as u64),
            EncodedValue::Array(values) => {
                writer.write_u1(value_type);
                write_encoded_array(values, writer, indexer)?;
            }
            EncodedValue::Annotation(annotation) => {
                writer.write_u1(value_type);
                annotation.write(writer, indexer)?;
            }
            EncodedValue::Null => writer.write_u1(value_type),
            EncodedValue::Boolean(val) => writer.write_u1(value_type | ((*val as u8) << 5)),
        }
        Ok(())
    }

    fn compare_same_type(&self, other: &EncodedValue) -> Ordering {
        match (self, other) {
            (EncodedValue::Byte(a), EncodedValue::Byte(b)) => a.cmp(b),
            (EncodedValue::Short(a), EncodedValue::Short(b)) => a.cmp(b),
            (EncodedValue::Char(a), EncodedValue::Char(b)) => a.cmp(b),
            (EncodedValue::Int(a), EncodedValue::Int(b)) => a.cmp(b),
            (EncodedValue::Long(a), EncodedValue::Long(b)) => a.cmp(b),
            (EncodedValue::Float(a), EncodedValue::Float(b)) => a.total_cmp(b),
            (EncodedValue::Double(a), EncodedValue::Double(b)) => a.total_cmp(b),
            (EncodedValue::MethodType(a), EncodedValue::MethodType(b)) => a.cmp(b),
            (EncodedValue::MethodHandle(a), EncodedValue::MethodHandle(b)) => a.cmp(b),
            (EncodedValue::String(a), EncodedValue::String(b)) => a.cmp(b),
            (EncodedValue::Type(a), EncodedValue::Type(b)) => a.cmp(b),
            (EncodedValue::Field(a), EncodedValue::Field(b)) => a.cmp(b),
            (EncodedValue::Method(a), EncodedValue::Method(b)) => a.cmp(b),
            (EncodedValue::Enum(a), EncodedValue::Enum(b)) => a.cmp(b),
            (EncodedValue::Array(a), EncodedValue::Array(b)) => a.cmp(b),
            (EncodedValue::Annotation(a), EncodedValue::Annotation(b)) => a.cmp(b),
            (EncodedValue::Boolean(a), EncodedValue::Boolean(b)) => a.cmp(b),
            _ => Ordering::Equal,
        }
    }
}

// Floats compare by their bit patterns so values can be interned and sorted.
impl PartialEq for EncodedValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for EncodedValue {}

impl PartialOrd for EncodedValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EncodedValue {
    fn cmp(&self, other: &Self) -> Ordering {
        self.value_type().cmp(&other.value_type()).then_with(|| self.compare_same_type(other))
    }
}

impl Hash for EncodedValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value_type().hash(state);
        match self {
            EncodedValue::Byte(v) => v.hash(state),
            EncodedValue::Short(v) => v.hash(state),
            EncodedValue::Char(v) => v.hash(state),
            EncodedValue::Int(v) => v.hash(state),
            EncodedValue::Long(v) => v.hash(state),
            EncodedValue::Float(v) => v.to_bits().hash(state),
            EncodedValue::Double(v) => v.to_bits().hash(state),
            EncodedValue::MethodType(v) => v.hash(state),
            EncodedValue::MethodHandle(v) => v.hash(state),
            EncodedValue::String(v) | EncodedValue::Type(v) => v.hash(state),
            EncodedValue::Field(v) | EncodedValue::Enum(v) => v.hash(state),
            EncodedValue::Method(v) => v.hash(state),
            EncodedValue::Array(v) => v.hash(state),
            EncodedValue::Annotation(v) => v.hash(state),
            EncodedValue::Null => {}
            EncodedValue::Boolean(v) => v.hash(state),
        }
    }
}

/// Bytes needed for `value` as a sign-extended little-endian integer.
pub(crate) fn signed_size(value: i64) -> usize {
    let significant_bits = 65 - (value ^ (value >> 63)).leading_zeros() as usize;
    ((significant_bits + 7) / 8).max(1)
}

pub(crate) fn unsigned_size(value: u64) -> usize {
    let significant_bits = 64 - value.leading_zeros() as usize;
    ((significant_bits + 7) / 8).max(1)
}

/// Bytes needed to store the high-order part of a `width` byte value once
/// trailing zero bytes are dropped.
pub(crate) fn right_extended_size(value: u64, width: usize) -> usize {
    let trailing_zero_bytes = (value.trailing_zeros() / 8) as usize;
    width.saturating_sub(trailing_zero_bytes).max(1)
}

fn write_signed(writer: &mut DexWriter, value_type: u8, value: i64) {
    let size = signed_size(value);
    writer.write_u1((((size - 1) as u8) << 5) | value_type);
    writer.write_sized(value as u64, size);
}

fn write_unsigned(writer: &mut DexWriter, value_type: u8, value: u64) {
    let size = unsigned_size(value);
    writer.write_u1((((size - 1) as u8) << 5) | value_type);
    writer.write_sized(value, size);
}

fn write_right_extended(writer: &mut DexWriter, value_type: u8, value: u64, width: usize) {
    let size = right_extended_size(value, width);
    writer.write_u1((((size - 1) as u8) << 5) | value_type);
    writer.write_sized(value >> (8 * (width - size)), size);
}

pub fn write_encoded_array(values: &[EncodedValue], writer: &mut DexWriter, indexer: &dyn RefIndexer) -> Result<(), DexError>
{
    writer.write_uleb128(values.len() as u32);

    for value in values {
        value.write(writer, indexer)?;
    }
    Ok(())
}

pub fn read_encoded_array(reader: &mut DexReader, resolver: &dyn RefResolver) -> Result<Vec<EncodedValue>, DexError>
{
    let size = reader.read_uleb128()? as usize;

    let mut values = Vec::with_capacity(size.min(reader.remaining()));
    for index in 0..size
    {
        values.push(EncodedValue::read(reader, resolver).map_err(|e| err!(e, "array element {}", index))?);
    }

    Ok(values)
}

/// Orders strings by UTF-16 code units, the order of the dex string pool.
pub fn utf16_cmp(a: &str, b: &str) -> Ordering {
    a.encode_utf16().cmp(b.encode_utf16())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::dex::reference::{CallSiteRef, MethodHandleMember, MethodHandleType};

    /// Resolves indices into a fixed string table; every other kind maps to
    /// a synthetic reference built from that table.
    pub(crate) struct TableResolver(pub Vec<&'static str>);

    impl TableResolver {
        fn get(&self, index: u32) -> Result<String, DexError> {
            match self.0.get(index as usize) {
                Some(s) => Ok(s.to_string()),
                None => fail!("Index {} out of range", index),
            }
        }

        fn find(&self, value: &str) -> Result<u32, DexError> {
            match self.0.iter().position(|s| *s == value) {
                Some(p) => Ok(p as u32),
                None => fail!("{} not in table", value),
            }
        }
    }

    impl RefResolver for TableResolver {
        fn string(&self, index: u32) -> Result<String, DexError> { self.get(index) }
        fn type_name(&self, index: u32) -> Result<String, DexError> { self.get(index) }
        fn field_ref(&self, index: u32) -> Result<FieldRef, DexError> {
            Ok(FieldRef::new("LOwner;", &self.get(index)?, "I"))
        }
        fn method_ref(&self, index: u32) -> Result<MethodRef, DexError> {
            Ok(MethodRef::new("LOwner;", &self.get(index)?, &[], "V"))
        }
        fn proto_ref(&self, index: u32) -> Result<MethodProtoRef, DexError> {
            Ok(MethodProtoRef::new(&[], &self.get(index)?))
        }
        fn method_handle(&self, index: u32) -> Result<MethodHandleRef, DexError> {
            let member = MethodHandleMember::Method(self.method_ref(index)?);
            MethodHandleRef::new(MethodHandleType::InvokeStatic, member)
        }
        fn call_site(&self, index: u32) -> Result<CallSiteRef, DexError> {
            fail!("No call site {}", index)
        }
    }

    impl RefIndexer for TableResolver {
        fn string_index(&self, value: &str) -> Result<u32, DexError> { self.find(value) }
        fn type_index(&self, descriptor: &str) -> Result<u32, DexError> { self.find(descriptor) }
        fn field_index(&self, field: &FieldRef) -> Result<u32, DexError> { self.find(&field.name) }
        fn method_index(&self, method: &MethodRef) -> Result<u32, DexError> { self.find(&method.name) }
        fn proto_index(&self, proto: &MethodProtoRef) -> Result<u32, DexError> { self.find(&proto.return_type) }
        fn method_handle_index(&self, handle: &MethodHandleRef) -> Result<u32, DexError> {
            match &handle.member {
                MethodHandleMember::Method(m) => self.find(&m.name),
                MethodHandleMember::Field(f) => self.find(&f.name),
            }
        }
        fn call_site_index(&self, _call_site: &CallSiteRef) -> Result<u32, DexError> {
            fail!("No call sites")
        }
    }

    fn encode(value: &EncodedValue) -> Vec<u8> {
        let table = TableResolver(vec!["a", "b"]);
        let mut writer = DexWriter::new();
        value.write(&mut writer, &table).unwrap();
        writer.into_bytes()
    }

    fn decode(bytes: &[u8], table: &TableResolver) -> EncodedValue {
        let mut reader = DexReader::new(bytes);
        let value = EncodedValue::read(&mut reader, table).unwrap();
        assert_eq!(reader.remaining(), 0);
        value
    }

    #[test]
    fn integers_use_minimal_sizes() {
        assert_eq!(encode(&EncodedValue::Int(0)), vec![0x04, 0x00]);
        assert_eq!(encode(&EncodedValue::Int(-1)), vec![0x04, 0xff]);
        assert_eq!(encode(&EncodedValue::Int(0x80)), vec![0x24, 0x80, 0x00]);
        assert_eq!(encode(&EncodedValue::Int(0x12345678)), vec![0x64, 0x78, 0x56, 0x34, 0x12]);
        assert_eq!(encode(&EncodedValue::Short(-129)), vec![0x22, 0x7f, 0xff]);
        assert_eq!(encode(&EncodedValue::Char(0xffff)), vec![0x23, 0xff, 0xff]);
        assert_eq!(encode(&EncodedValue::Long(i64::MIN)).len(), 9);
        assert_eq!(encode(&EncodedValue::Byte(0x7f)), vec![0x00, 0x7f]);
    }

    #[test]
    fn floats_are_right_zero_extended() {
        // 1.0f = 0x3f800000, only the top two bytes are significant
        assert_eq!(encode(&EncodedValue::Float(1.0)), vec![0x30, 0x80, 0x3f]);
        // 2.0 = 0x4000000000000000
        assert_eq!(encode(&EncodedValue::Double(2.0)), vec![0x11, 0x40]);
        assert_eq!(encode(&EncodedValue::Float(0.0)), vec![0x10, 0x00]);

        let table = TableResolver(vec![]);
        match decode(&[0x30, 0x80, 0x3f], &table) {
            EncodedValue::Float(f) => assert_eq!(f, 1.0),
            other => panic!("Unexpected value {:?}", other),
        }
        let bytes = encode(&EncodedValue::Double(-1234.5678));
        assert_eq!(decode(&bytes, &table), EncodedValue::Double(-1234.5678));
    }

    #[test]
    fn sign_extension_on_read() {
        let table = TableResolver(vec![]);
        assert_eq!(decode(&[0x22, 0x7f, 0xff], &table), EncodedValue::Short(-129));
        assert_eq!(decode(&[0x06, 0xfe], &table), EncodedValue::Long(-2));
        assert_eq!(decode(&[0x03, 0xfe], &table), EncodedValue::Char(0xfe));
    }

    #[test]
    fn references_resolve_through_table() {
        let table = TableResolver(vec!["Lfoo;", "hello"]);
        assert_eq!(decode(&[0x17, 0x01], &table), EncodedValue::String("hello".to_string()));
        assert_eq!(decode(&[0x18, 0x00], &table), EncodedValue::Type("Lfoo;".to_string()));
        assert!(EncodedValue::read(&mut DexReader::new(&[0x17, 0x05]), &table).is_err());
    }

    #[test]
    fn invalid_headers_are_rejected() {
        let table = TableResolver(vec![]);
        // byte with size 2
        assert!(EncodedValue::read(&mut DexReader::new(&[0x20, 0x00, 0x00]), &table).is_err());
        // null with a value_arg
        assert!(EncodedValue::read(&mut DexReader::new(&[0x3e]), &table).is_err());
        // unknown type
        assert!(EncodedValue::read(&mut DexReader::new(&[0x05]), &table).is_err());
        // boolean arg 2
        assert!(EncodedValue::read(&mut DexReader::new(&[0x5f]), &table).is_err());
    }

    #[test]
    fn annotation_elements_written_in_name_order() {
        let table = TableResolver(vec!["LAnno;", "alpha", "beta"]);
        let annotation = EncodedAnnotation {
            annotation_type: "LAnno;".to_string(),
            elements: vec![
                AnnotationElement::new("beta", EncodedValue::Boolean(true)),
                AnnotationElement::new("alpha", EncodedValue::Int(42)),
            ],
        };
        let mut writer = DexWriter::new();
        annotation.write(&mut writer, &table).unwrap();
        assert_eq!(writer.as_slice(), &[0x00, 0x02, 0x01, 0x04, 0x2a, 0x02, 0x3f]);

        let bytes = writer.into_bytes();
        let read = EncodedAnnotation::read(&mut DexReader::new(&bytes), &table).unwrap();
        assert_eq!(read, EncodedAnnotation::new("LAnno;", annotation.elements.clone()));
        assert_eq!(read.elements[0].name, "alpha");
    }

    #[test]
    fn nan_values_intern_by_bits() {
        use std::collections::HashSet;
        let mut set = HashSet::new();
        set.insert(EncodedValue::Float(f32::NAN));
        assert!(set.contains(&EncodedValue::Float(f32::NAN)));
        assert_ne!(EncodedValue::Double(0.0), EncodedValue::Double(-0.0));
        assert!(EncodedValue::Double(0.0).is_default());
        assert!(!EncodedValue::Double(-0.0).is_default());
        assert!(EncodedValue::Int(1) < EncodedValue::Long(0));
    }

    #[test]
    fn defaults_follow_field_type() {
        assert_eq!(EncodedValue::default_for_type("J"), EncodedValue::Long(0));
        assert_eq!(EncodedValue::default_for_type("[I"), EncodedValue::Null);
        assert!(EncodedValue::default_for_type("Z").is_default());
    }

    #[test]
    fn utf16_order_differs_from_utf8_for_supplementary_chars() {
        // U+FFFD is above the surrogate range in UTF-16 but below U+1F600 in UTF-8
        assert_eq!(utf16_cmp("\u{fffd}", "\u{1F600}"), Ordering::Greater);
        assert_eq!("\u{fffd}".cmp("\u{1F600}"), Ordering::Less);
    }
}
