//! Builds a dex image from model classes.
//!
//! Everything a class refers to is interned into typed pools as the class
//! is added, which may happen from several threads at once. `finalize`
//! seals the pools and fixes every index; `write` then lays the file out.

mod pool;
mod writer;

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use log::{debug, info, warn};
use once_cell::sync::OnceCell;

pub use pool::{Handle, Pool};

use crate::dex::encoded_values::{utf16_cmp, EncodedAnnotation, EncodedValue};
use crate::dex::error::DexError;
use crate::dex::immutable::{ImmutableAnnotation, ImmutableClassDef, ImmutableField, ImmutableMethod, ImmutableMethodImplementation};
use crate::dex::model::{AccessFlags, AnnotationVisibility, ClassDef, DebugItem, DexFile, DexMarker, HiddenApiRestrictions};
use crate::dex::opcode_format::Opcodes;
use crate::dex::reference::{
    CallSiteRef, FieldRef, MethodHandleMember, MethodHandleRef, MethodHandleType, MethodProtoRef, MethodRef, RefIndexer,
    Reference,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeKey(pub Handle<String>);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeListKey(pub Vec<Handle<TypeKey>>);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProtoKey
{
    pub shorty: Handle<String>,
    pub return_type: Handle<TypeKey>,
    pub parameters: Option<Handle<TypeListKey>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldKey
{
    pub class: Handle<TypeKey>,
    pub name: Handle<String>,
    pub field_type: Handle<TypeKey>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodKey
{
    pub class: Handle<TypeKey>,
    pub name: Handle<String>,
    pub proto: Handle<ProtoKey>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberHandle
{
    Field(Handle<FieldKey>),
    Method(Handle<MethodKey>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodHandleKey
{
    pub handle_type: MethodHandleType,
    pub member: MemberHandle,
}

/// Encoded arrays are shared between static initializers and call sites.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EncodedArrayKey(pub Vec<EncodedValue>);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallSiteKey(pub Handle<EncodedArrayKey>);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AnnotationKey
{
    pub visibility: AnnotationVisibility,
    pub annotation: EncodedAnnotation,
}

/// Annotation handles in ascending handle order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AnnotationSetKey(pub Vec<Handle<AnnotationKey>>);

#[derive(Debug)]
struct BuilderField
{
    handle: Handle<FieldKey>,
    access_flags: AccessFlags,
    annotations: Option<Handle<AnnotationSetKey>>,
    hidden_api: Option<HiddenApiRestrictions>,
}

#[derive(Debug)]
struct BuilderMethod
{
    handle: Handle<MethodKey>,
    access_flags: AccessFlags,
    annotations: Option<Handle<AnnotationSetKey>>,
    /// Empty unless some parameter is annotated.
    parameter_annotations: Vec<Option<Handle<AnnotationSetKey>>>,
    parameter_names: Vec<Option<Handle<String>>>,
    proto: MethodProtoRef,
    implementation: Option<Arc<ImmutableMethodImplementation>>,
    hidden_api: Option<HiddenApiRestrictions>,
}

/// A class with its members in index order and everything it names interned.
#[derive(Debug)]
struct BuilderClass
{
    class: Arc<ImmutableClassDef>,
    type_handle: Handle<TypeKey>,
    superclass: Option<Handle<TypeKey>>,
    interfaces: Option<Handle<TypeListKey>>,
    source_file: Option<Handle<String>>,
    annotations: Option<Handle<AnnotationSetKey>>,
    static_values: Option<Handle<EncodedArrayKey>>,
    static_fields: Vec<BuilderField>,
    instance_fields: Vec<BuilderField>,
    direct_methods: Vec<BuilderMethod>,
    virtual_methods: Vec<BuilderMethod>,
}

impl BuilderClass
{
    fn fields(&self) -> impl Iterator<Item = &BuilderField>
    {
        self.static_fields.iter().chain(&self.instance_fields)
    }

    fn methods(&self) -> impl Iterator<Item = &BuilderMethod>
    {
        self.direct_methods.iter().chain(&self.virtual_methods)
    }

    fn has_members(&self) -> bool
    {
        self.fields().next().is_some() || self.methods().next().is_some()
    }
}

#[derive(Debug)]
struct Layout
{
    /// Indices into the class list, supertypes first.
    class_order: Vec<usize>,
}

pub struct DexBuilder
{
    opcodes: Opcodes,
    strings: Pool<String>,
    types: Pool<TypeKey>,
    type_lists: Pool<TypeListKey>,
    protos: Pool<ProtoKey>,
    fields: Pool<FieldKey>,
    methods: Pool<MethodKey>,
    method_handles: Pool<MethodHandleKey>,
    encoded_arrays: Pool<EncodedArrayKey>,
    call_sites: Pool<CallSiteKey>,
    annotations: Pool<AnnotationKey>,
    annotation_sets: Pool<AnnotationSetKey>,
    classes: Mutex<Vec<BuilderClass>>,
    /// Type names claimed by `add_class_def`, including ones still interning.
    class_names: Mutex<HashSet<String>>,
    markers: Mutex<Vec<DexMarker>>,
    layout: OnceCell<Layout>,
}

fn field_order(a: &ImmutableField, b: &ImmutableField) -> Ordering
{
    utf16_cmp(&a.name, &b.name).then_with(|| utf16_cmp(&a.field_type, &b.field_type))
}

/// Method index order within one class: name, then return type, then
/// parameter types.
fn method_order(a: &ImmutableMethod, b: &ImmutableMethod) -> Ordering
{
    utf16_cmp(&a.name, &b.name)
        .then_with(|| utf16_cmp(&a.return_type, &b.return_type))
        .then_with(|| {
            let a_types = a.parameters.iter().map(|p| p.parameter_type.as_str());
            let b_types = b.parameters.iter().map(|p| p.parameter_type.as_str());
            a_types.cmp_with(b_types, utf16_cmp)
        })
}

trait CmpWith: Iterator + Sized
{
    fn cmp_with<I, F>(mut self, other: I, mut f: F) -> Ordering
    where
        I: IntoIterator<Item = Self::Item>,
        F: FnMut(Self::Item, Self::Item) -> Ordering,
    {
        let mut other = other.into_iter();
        loop
        {
            match (self.next(), other.next())
            {
                (None, None) => return Ordering::Equal,
                (None, Some(_)) => return Ordering::Less,
                (Some(_), None) => return Ordering::Greater,
                (Some(a), Some(b)) => match f(a, b)
                {
                    Ordering::Equal => continue,
                    unequal => return unequal,
                },
            }
        }
    }
}

impl<I: Iterator> CmpWith for I {}

impl DexBuilder
{
    pub fn new(opcodes: Opcodes) -> Self
    {
        DexBuilder {
            opcodes,
            strings: Pool::new("string"),
            types: Pool::new("type"),
            type_lists: Pool::new("type list"),
            protos: Pool::new("proto"),
            fields: Pool::new("field"),
            methods: Pool::new("method"),
            method_handles: Pool::new("method handle"),
            encoded_arrays: Pool::new("encoded array"),
            call_sites: Pool::new("call site"),
            annotations: Pool::new("annotation"),
            annotation_sets: Pool::new("annotation set"),
            classes: Mutex::new(Vec::new()),
            class_names: Mutex::new(HashSet::new()),
            markers: Mutex::new(Vec::new()),
            layout: OnceCell::new(),
        }
    }

    pub fn opcodes(&self) -> &Opcodes
    {
        &self.opcodes
    }

    pub fn is_finalized(&self) -> bool
    {
        self.layout.get().is_some()
    }

    pub fn class_count(&self) -> usize
    {
        self.classes.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }

    pub fn strings(&self) -> &Pool<String>
    {
        &self.strings
    }

    pub fn types(&self) -> &Pool<TypeKey>
    {
        &self.types
    }

    pub fn protos(&self) -> &Pool<ProtoKey>
    {
        &self.protos
    }

    pub fn fields(&self) -> &Pool<FieldKey>
    {
        &self.fields
    }

    pub fn methods(&self) -> &Pool<MethodKey>
    {
        &self.methods
    }

    pub fn intern_string(&self, value: &str) -> Result<Handle<String>, DexError>
    {
        self.strings.intern(value.to_string())
    }

    pub fn intern_type(&self, descriptor: &str) -> Result<Handle<TypeKey>, DexError>
    {
        let name = self.intern_string(descriptor)?;
        self.types.intern(TypeKey(name))
    }

    /// `None` for the empty list, which is written as offset 0.
    pub fn intern_type_list(&self, types: &[String]) -> Result<Option<Handle<TypeListKey>>, DexError>
    {
        if types.is_empty()
        {
            return Ok(None);
        }
        let handles = types.iter().map(|t| self.intern_type(t)).collect::<Result<Vec<_>, _>>()?;
        self.type_lists.intern(TypeListKey(handles)).map(Some)
    }

    pub fn intern_proto(&self, proto: &MethodProtoRef) -> Result<Handle<ProtoKey>, DexError>
    {
        let key = ProtoKey {
            shorty: self.intern_string(&proto.shorty())?,
            return_type: self.intern_type(&proto.return_type)?,
            parameters: self.intern_type_list(&proto.parameter_types)?,
        };
        self.protos.intern(key)
    }

    pub fn intern_field(&self, field: &FieldRef) -> Result<Handle<FieldKey>, DexError>
    {
        let key = FieldKey {
            class: self.intern_type(&field.defining_class)?,
            name: self.intern_string(&field.name)?,
            field_type: self.intern_type(&field.field_type)?,
        };
        self.fields.intern(key)
    }

    pub fn intern_method(&self, method: &MethodRef) -> Result<Handle<MethodKey>, DexError>
    {
        let key = MethodKey {
            class: self.intern_type(&method.defining_class)?,
            name: self.intern_string(&method.name)?,
            proto: self.intern_proto(&method.proto())?,
        };
        self.methods.intern(key)
    }

    pub fn intern_method_handle(&self, handle: &MethodHandleRef) -> Result<Handle<MethodHandleKey>, DexError>
    {
        let member = match &handle.member
        {
            MethodHandleMember::Field(field) => MemberHandle::Field(self.intern_field(field)?),
            MethodHandleMember::Method(method) => MemberHandle::Method(self.intern_method(method)?),
        };
        self.method_handles.intern(MethodHandleKey { handle_type: handle.handle_type, member })
    }

    pub fn intern_encoded_array(&self, values: Vec<EncodedValue>) -> Result<Handle<EncodedArrayKey>, DexError>
    {
        for value in &values
        {
            self.intern_encoded_value(value)?;
        }
        self.encoded_arrays.intern(EncodedArrayKey(values))
    }

    pub fn intern_call_site(&self, call_site: &CallSiteRef) -> Result<Handle<CallSiteKey>, DexError>
    {
        let array = self.intern_encoded_array(call_site_values(call_site))?;
        self.call_sites.intern(CallSiteKey(array))
    }

    /// Interns everything `value` refers to; the value itself lives in
    /// whatever array or annotation holds it.
    pub fn intern_encoded_value(&self, value: &EncodedValue) -> Result<(), DexError>
    {
        match value
        {
            EncodedValue::MethodType(proto) => {
                self.intern_proto(proto)?;
            }
            EncodedValue::MethodHandle(handle) => {
                self.intern_method_handle(handle)?;
            }
            EncodedValue::String(value) => {
                self.intern_string(value)?;
            }
            EncodedValue::Type(descriptor) => {
                self.intern_type(descriptor)?;
            }
            EncodedValue::Field(field) | EncodedValue::Enum(field) => {
                self.intern_field(field)?;
            }
            EncodedValue::Method(method) => {
                self.intern_method(method)?;
            }
            EncodedValue::Array(values) => {
                for value in values
                {
                    self.intern_encoded_value(value)?;
                }
            }
            EncodedValue::Annotation(annotation) => self.intern_encoded_annotation(annotation)?,
            _ => {}
        }
        Ok(())
    }

    fn intern_encoded_annotation(&self, annotation: &EncodedAnnotation) -> Result<(), DexError>
    {
        self.intern_type(&annotation.annotation_type)?;
        for element in &annotation.elements
        {
            self.intern_string(&element.name)?;
            self.intern_encoded_value(&element.value)?;
        }
        Ok(())
    }

    pub fn intern_annotation(&self, annotation: &ImmutableAnnotation) -> Result<Handle<AnnotationKey>, DexError>
    {
        let encoded = EncodedAnnotation::new(&annotation.annotation_type, annotation.elements.clone());
        self.intern_encoded_annotation(&encoded)?;
        self.annotations.intern(AnnotationKey { visibility: annotation.visibility, annotation: encoded })
    }

    /// `None` for the empty set.
    pub fn intern_annotation_set(&self, annotations: &[ImmutableAnnotation]) -> Result<Option<Handle<AnnotationSetKey>>, DexError>
    {
        if annotations.is_empty()
        {
            return Ok(None);
        }
        let mut handles = annotations.iter().map(|a| self.intern_annotation(a)).collect::<Result<Vec<_>, _>>()?;
        handles.sort();
        handles.dedup();
        self.annotation_sets.intern(AnnotationSetKey(handles)).map(Some)
    }

    pub fn intern_reference(&self, reference: &Reference) -> Result<(), DexError>
    {
        match reference
        {
            Reference::String(value) => self.intern_string(value).map(|_| ()),
            Reference::Type(descriptor) => self.intern_type(descriptor).map(|_| ()),
            Reference::Field(field) => self.intern_field(field).map(|_| ()),
            Reference::Method(method) => self.intern_method(method).map(|_| ()),
            Reference::MethodProto(proto) => self.intern_proto(proto).map(|_| ()),
            Reference::MethodHandle(handle) => self.intern_method_handle(handle).map(|_| ()),
            Reference::CallSite(call_site) => self.intern_call_site(call_site).map(|_| ()),
        }
    }

    fn intern_implementation(&self, implementation: &ImmutableMethodImplementation) -> Result<(), DexError>
    {
        for instruction in &implementation.instructions
        {
            for reference in instruction.references()
            {
                self.intern_reference(reference)?;
            }
        }
        for try_block in &implementation.try_blocks
        {
            for handler in &try_block.handlers
            {
                if let Some(exception_type) = &handler.exception_type
                {
                    self.intern_type(exception_type)?;
                }
            }
        }
        for item in &implementation.debug_items
        {
            match item
            {
                DebugItem::StartLocal { name, local_type, signature, .. } => {
                    for value in name.iter().chain(signature)
                    {
                        self.intern_string(value)?;
                    }
                    if let Some(local_type) = local_type
                    {
                        self.intern_type(local_type)?;
                    }
                }
                DebugItem::SetSourceFile { source_file: Some(source_file), .. } => {
                    self.intern_string(source_file)?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn intern_field_def(&self, field: &ImmutableField) -> Result<BuilderField, DexError>
    {
        let field_ref = FieldRef {
            defining_class: field.defining_class.clone(),
            name: field.name.clone(),
            field_type: field.field_type.clone(),
        };
        Ok(BuilderField {
            handle: self.intern_field(&field_ref)?,
            access_flags: field.access_flags,
            annotations: self.intern_annotation_set(&field.annotations)?,
            hidden_api: field.hidden_api_restrictions,
        })
    }

    fn intern_method_def(&self, method: &ImmutableMethod) -> Result<BuilderMethod, DexError>
    {
        let method_ref = MethodRef {
            defining_class: method.defining_class.clone(),
            name: method.name.clone(),
            parameter_types: method.parameters.iter().map(|p| p.parameter_type.clone()).collect(),
            return_type: method.return_type.clone(),
        };
        let intern = || -> Result<BuilderMethod, DexError> {
            let parameter_annotations = if method.parameters.iter().any(|p| !p.annotations.is_empty())
            {
                method.parameters.iter().map(|p| self.intern_annotation_set(&p.annotations)).collect::<Result<Vec<_>, _>>()?
            }
            else
            {
                Vec::new()
            };
            let parameter_names = method
                .parameters
                .iter()
                .map(|p| p.name.as_deref().map(|name| self.intern_string(name)).transpose())
                .collect::<Result<Vec<_>, _>>()?;
            if let Some(implementation) = &method.implementation
            {
                self.intern_implementation(implementation)?;
            }
            Ok(BuilderMethod {
                handle: self.intern_method(&method_ref)?,
                access_flags: method.access_flags,
                annotations: self.intern_annotation_set(&method.annotations)?,
                parameter_annotations,
                parameter_names,
                proto: method_ref.proto(),
                implementation: method.implementation.clone(),
                hidden_api: method.hidden_api_restrictions,
            })
        };
        intern().map_err(|e| err!(e, "method {}", method_ref))
    }

    /// Static initial values in field order, with trailing defaults dropped.
    fn intern_static_values(&self, fields: &[Arc<ImmutableField>]) -> Result<Option<Handle<EncodedArrayKey>>, DexError>
    {
        let mut values: Vec<EncodedValue> = fields
            .iter()
            .map(|f| f.initial_value.clone().unwrap_or_else(|| EncodedValue::default_for_type(&f.field_type)))
            .collect();
        while values.last().map_or(false, |value| value.is_default())
        {
            values.pop();
        }
        if values.is_empty()
        {
            return Ok(None);
        }
        self.intern_encoded_array(values).map(Some)
    }

    fn intern_class(&self, class: ImmutableClassDef) -> Result<BuilderClass, DexError>
    {
        let mut class = class;
        class.static_fields.sort_by(|a, b| field_order(a, b));
        class.instance_fields.sort_by(|a, b| field_order(a, b));
        class.direct_methods.sort_by(|a, b| method_order(a, b));
        class.virtual_methods.sort_by(|a, b| method_order(a, b));

        let type_handle = self.intern_type(&class.type_name)?;
        let superclass = class.superclass.as_deref().map(|s| self.intern_type(s)).transpose()?;
        let interfaces = self.intern_type_list(&class.interfaces)?;
        let source_file = class.source_file.as_deref().map(|s| self.intern_string(s)).transpose()?;
        let annotations = self.intern_annotation_set(&class.annotations)?;
        let static_values = self.intern_static_values(&class.static_fields)?;
        let static_fields = class.static_fields.iter().map(|f| self.intern_field_def(f)).collect::<Result<Vec<_>, _>>()?;
        let instance_fields = class.instance_fields.iter().map(|f| self.intern_field_def(f)).collect::<Result<Vec<_>, _>>()?;
        let direct_methods = class.direct_methods.iter().map(|m| self.intern_method_def(m)).collect::<Result<Vec<_>, _>>()?;
        let virtual_methods = class.virtual_methods.iter().map(|m| self.intern_method_def(m)).collect::<Result<Vec<_>, _>>()?;

        Ok(BuilderClass {
            class: Arc::new(class),
            type_handle,
            superclass,
            interfaces,
            source_file,
            annotations,
            static_values,
            static_fields,
            instance_fields,
            direct_methods,
            virtual_methods,
        })
    }

    /// Claims `type_name` for one definition, before anything is interned
    /// for it.
    fn claim_class_name(&self, type_name: &str) -> Result<(), DexError>
    {
        let mut names = self.class_names.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if !names.insert(type_name.to_string())
        {
            return Err(DexError::illegal_state(&format!("Multiple definitions for class {}", type_name)));
        }
        Ok(())
    }

    /// Copies `class` and interns everything it refers to. A second
    /// definition of the same type is rejected without interning anything.
    pub fn add_class_def(&self, class: &dyn ClassDef) -> Result<(), DexError>
    {
        if self.is_finalized()
        {
            return Err(DexError::illegal_state("Cannot add classes to a finalized builder"));
        }
        let class = ImmutableClassDef::of(class)?;
        let type_name = class.type_name.clone();
        self.claim_class_name(&type_name)?;

        let built = match self.intern_class(class)
        {
            Ok(built) => built,
            Err(e) => {
                self.class_names.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).remove(&type_name);
                return Err(err!(e, "class {}", type_name));
            }
        };
        debug!("Added class {}", type_name);
        self.classes.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).push(built);
        Ok(())
    }

    /// Adds every class of `dex_file` and carries its markers over.
    pub fn add_dex_file(&self, dex_file: &dyn DexFile) -> Result<(), DexError>
    {
        for class in dex_file.classes()
        {
            self.add_class_def(class?.as_ref())?;
        }
        for marker in dex_file.markers()?
        {
            self.add_marker(marker)?;
        }
        Ok(())
    }

    pub fn add_marker(&self, marker: DexMarker) -> Result<(), DexError>
    {
        self.intern_string(&marker.to_string())?;
        self.markers.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).push(marker);
        Ok(())
    }

    pub fn markers(&self) -> Vec<DexMarker>
    {
        self.markers.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    fn type_list_indices(&self, list: Option<Handle<TypeListKey>>) -> Result<Vec<u32>, DexError>
    {
        match list
        {
            Some(list) => Ok(self.type_lists.key(list)?.0.iter().map(|t| self.types.index(*t)).collect()),
            None => Ok(Vec::new()),
        }
    }

    /// Seals every pool and assigns final indices. Interning afterwards is
    /// an error.
    pub fn finalize(&self) -> Result<(), DexError>
    {
        if self.is_finalized()
        {
            return Err(DexError::illegal_state("The builder is already finalized"));
        }
        self.strings.seal_by(|s| Ok(s.encode_utf16().collect::<Vec<u16>>()))?;
        self.types.seal_by(|t| Ok(self.strings.index(t.0)))?;
        self.type_lists.seal_by(|l| Ok(l.0.iter().map(|t| self.types.index(*t)).collect::<Vec<u32>>()))?;
        self.protos.seal_by(|p| Ok((self.types.index(p.return_type), self.type_list_indices(p.parameters)?)))?;
        self.fields.seal_by(|f| Ok((self.types.index(f.class), self.strings.index(f.name), self.types.index(f.field_type))))?;
        self.methods.seal_by(|m| Ok((self.types.index(m.class), self.strings.index(m.name), self.protos.index(m.proto))))?;
        self.method_handles.seal_by(|h| {
            let member = match h.member
            {
                MemberHandle::Field(field) => self.fields.index(field),
                MemberHandle::Method(method) => self.methods.index(method),
            };
            Ok((h.handle_type.value(), member))
        })?;
        self.encoded_arrays.seal_by(|a| Ok(a.0.clone()))?;
        self.call_sites.seal_by(|c| Ok(self.encoded_arrays.index(c.0)))?;
        self.annotations.seal_by(|a| Ok((a.visibility, a.annotation.clone())))?;
        self.annotation_sets.seal_by(|s| {
            let mut indices: Vec<u32> = s.0.iter().map(|a| self.annotations.index(*a)).collect();
            indices.sort_unstable();
            Ok(indices)
        })?;

        let classes = self.classes.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let class_order = self.class_order(&classes);
        info!(
            "Finalized {} classes: {} strings, {} types, {} protos, {} fields, {} methods",
            classes.len(),
            self.strings.len(),
            self.types.len(),
            self.protos.len(),
            self.fields.len(),
            self.methods.len()
        );
        if self.layout.set(Layout { class_order }).is_err()
        {
            return Err(DexError::illegal_state("The builder is already finalized"));
        }
        Ok(())
    }

    /// Classes in type index order, except that a superclass or interface
    /// defined in this file always comes before the classes extending it.
    fn class_order(&self, classes: &[BuilderClass]) -> Vec<usize>
    {
        let by_type: HashMap<Handle<TypeKey>, usize> =
            classes.iter().enumerate().map(|(i, class)| (class.type_handle, i)).collect();
        let mut sorted: Vec<usize> = (0..classes.len()).collect();
        sorted.sort_by_key(|i| self.types.index(classes[*i].type_handle));

        struct Placement<'a>
        {
            classes: &'a [BuilderClass],
            by_type: &'a HashMap<Handle<TypeKey>, usize>,
            type_lists: &'a Pool<TypeListKey>,
            state: Vec<u8>,
            order: Vec<usize>,
        }

        impl Placement<'_>
        {
            fn visit(&mut self, index: usize)
            {
                match self.state[index]
                {
                    2 => return,
                    1 => {
                        warn!("Class hierarchy cycle through {}", self.classes[index].class.type_name);
                        return;
                    }
                    _ => {}
                }
                self.state[index] = 1;
                let class = &self.classes[index];
                let mut supertypes: Vec<Handle<TypeKey>> = class.superclass.into_iter().collect();
                if let Some(interfaces) = class.interfaces
                {
                    if let Ok(list) = self.type_lists.key(interfaces)
                    {
                        supertypes.extend(list.0.iter().copied());
                    }
                }
                for supertype in supertypes
                {
                    if let Some(parent) = self.by_type.get(&supertype).copied()
                    {
                        self.visit(parent);
                    }
                }
                self.state[index] = 2;
                self.order.push(index);
            }
        }

        let mut placement =
            Placement { classes, by_type: &by_type, type_lists: &self.type_lists, state: vec![0; classes.len()], order: Vec::new() };
        for index in sorted
        {
            placement.visit(index);
        }
        placement.order
    }

    fn layout(&self) -> Result<&Layout, DexError>
    {
        match self.layout.get()
        {
            Some(layout) => Ok(layout),
            None => Err(DexError::illegal_state("The builder must be finalized before writing")),
        }
    }

    pub fn write_to_file(&self, path: &Path) -> Result<(), DexError>
    {
        let bytes = self.write()?;
        fs::write(path, bytes).map_err(|e| DexError::new(&format!("io Error: {}", e)))
    }

    fn find_type(&self, descriptor: &str) -> Result<Handle<TypeKey>, DexError>
    {
        let name = self.strings.lookup(descriptor)?;
        self.types.lookup(&TypeKey(name))
    }

    fn find_type_list(&self, types: &[String]) -> Result<Option<Handle<TypeListKey>>, DexError>
    {
        if types.is_empty()
        {
            return Ok(None);
        }
        let handles = types.iter().map(|t| self.find_type(t)).collect::<Result<Vec<_>, _>>()?;
        self.type_lists.lookup(&TypeListKey(handles)).map(Some)
    }

    fn find_proto(&self, proto: &MethodProtoRef) -> Result<Handle<ProtoKey>, DexError>
    {
        let key = ProtoKey {
            shorty: self.strings.lookup(proto.shorty().as_str())?,
            return_type: self.find_type(&proto.return_type)?,
            parameters: self.find_type_list(&proto.parameter_types)?,
        };
        self.protos.lookup(&key)
    }

    fn find_field(&self, field: &FieldRef) -> Result<Handle<FieldKey>, DexError>
    {
        let key = FieldKey {
            class: self.find_type(&field.defining_class)?,
            name: self.strings.lookup(field.name.as_str())?,
            field_type: self.find_type(&field.field_type)?,
        };
        self.fields.lookup(&key)
    }

    fn find_method(&self, method: &MethodRef) -> Result<Handle<MethodKey>, DexError>
    {
        let key = MethodKey {
            class: self.find_type(&method.defining_class)?,
            name: self.strings.lookup(method.name.as_str())?,
            proto: self.find_proto(&method.proto())?,
        };
        self.methods.lookup(&key)
    }

    fn find_method_handle(&self, handle: &MethodHandleRef) -> Result<Handle<MethodHandleKey>, DexError>
    {
        let member = match &handle.member
        {
            MethodHandleMember::Field(field) => MemberHandle::Field(self.find_field(field)?),
            MethodHandleMember::Method(method) => MemberHandle::Method(self.find_method(method)?),
        };
        self.method_handles.lookup(&MethodHandleKey { handle_type: handle.handle_type, member })
    }
}

/// The bootstrap array of a call site: handle, name, method type, then the
/// extra arguments.
fn call_site_values(call_site: &CallSiteRef) -> Vec<EncodedValue>
{
    let mut values = Vec::with_capacity(3 + call_site.extra_arguments.len());
    values.push(EncodedValue::MethodHandle(call_site.method_handle.clone()));
    values.push(EncodedValue::String(call_site.method_name.clone()));
    values.push(EncodedValue::MethodType(call_site.method_proto.clone()));
    values.extend(call_site.extra_arguments.iter().cloned());
    values
}

impl RefIndexer for DexBuilder
{
    fn string_index(&self, value: &str) -> Result<u32, DexError>
    {
        self.strings.index_of(value)
    }

    fn type_index(&self, descriptor: &str) -> Result<u32, DexError>
    {
        Ok(self.types.index(self.find_type(descriptor)?))
    }

    fn field_index(&self, field: &FieldRef) -> Result<u32, DexError>
    {
        Ok(self.fields.index(self.find_field(field)?))
    }

    fn method_index(&self, method: &MethodRef) -> Result<u32, DexError>
    {
        Ok(self.methods.index(self.find_method(method)?))
    }

    fn proto_index(&self, proto: &MethodProtoRef) -> Result<u32, DexError>
    {
        Ok(self.protos.index(self.find_proto(proto)?))
    }

    fn method_handle_index(&self, handle: &MethodHandleRef) -> Result<u32, DexError>
    {
        Ok(self.method_handles.index(self.find_method_handle(handle)?))
    }

    fn call_site_index(&self, call_site: &CallSiteRef) -> Result<u32, DexError>
    {
        let array = self.encoded_arrays.lookup(&EncodedArrayKey(call_site_values(call_site)))?;
        self.call_sites.index_of(&CallSiteKey(array))
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::dex::error::DexErrorKind;

    #[test]
    fn string_indices_follow_utf16_order()
    {
        let builder = DexBuilder::new(Opcodes::default());
        builder.intern_string("b").unwrap();
        builder.intern_string("\u{10000}").unwrap();
        builder.intern_string("\u{ffff}").unwrap();
        builder.intern_string("a").unwrap();
        builder.finalize().unwrap();
        assert_eq!(builder.string_index("a").unwrap(), 0);
        assert_eq!(builder.string_index("b").unwrap(), 1);
        // a surrogate pair sorts below U+FFFF
        assert_eq!(builder.string_index("\u{10000}").unwrap(), 2);
        assert_eq!(builder.string_index("\u{ffff}").unwrap(), 3);
    }

    #[test]
    fn protos_order_by_return_then_parameters()
    {
        let builder = DexBuilder::new(Opcodes::default());
        let long = builder.intern_proto(&MethodProtoRef::new(&["J"], "V")).unwrap();
        let none = builder.intern_proto(&MethodProtoRef::new(&[], "V")).unwrap();
        let int = builder.intern_proto(&MethodProtoRef::new(&["I"], "V")).unwrap();
        let returns_int = builder.intern_proto(&MethodProtoRef::new(&[], "I")).unwrap();
        builder.finalize().unwrap();
        assert_eq!(builder.protos().index(returns_int), 0);
        assert_eq!(builder.protos().index(none), 1);
        assert_eq!(builder.protos().index(int), 2);
        assert_eq!(builder.protos().index(long), 3);
    }

    #[test]
    fn finalize_twice_is_illegal()
    {
        let builder = DexBuilder::new(Opcodes::default());
        builder.finalize().unwrap();
        assert_eq!(builder.finalize().unwrap_err().kind(), DexErrorKind::IllegalState);
        assert_eq!(builder.intern_string("x").unwrap_err().kind(), DexErrorKind::IllegalState);
    }

    #[test]
    fn supertypes_are_placed_first()
    {
        let builder = DexBuilder::new(Opcodes::default());
        let object = Some("Ljava/lang/Object;");
        let a = ImmutableClassDef::new("LA;", AccessFlags::PUBLIC, Some("LB;"), vec!["LC;".to_string()], None, Vec::new(), Vec::new(), Vec::new());
        let b = ImmutableClassDef::new("LB;", AccessFlags::PUBLIC, object, Vec::new(), None, Vec::new(), Vec::new(), Vec::new());
        let c = ImmutableClassDef::new("LC;", AccessFlags::INTERFACE, Some("LB;"), Vec::new(), None, Vec::new(), Vec::new(), Vec::new());
        builder.add_class_def(&a).unwrap();
        builder.add_class_def(&b).unwrap();
        builder.add_class_def(&c).unwrap();
        builder.finalize().unwrap();
        let classes = builder.classes.lock().unwrap();
        let names: Vec<&str> =
            builder.layout().unwrap().class_order.iter().map(|i| classes[*i].class.type_name.as_str()).collect();
        assert_eq!(names, vec!["LB;", "LC;", "LA;"]);
    }

    #[test]
    fn duplicate_classes_are_rejected()
    {
        let builder = DexBuilder::new(Opcodes::default());
        let class = ImmutableClassDef::new("LA;", AccessFlags::PUBLIC, None, Vec::new(), None, Vec::new(), Vec::new(), Vec::new());
        builder.add_class_def(&class).unwrap();
        let e = builder.add_class_def(&class).unwrap_err();
        assert_eq!(e.kind(), DexErrorKind::IllegalState);
        assert_eq!(builder.class_count(), 1);
    }
}
