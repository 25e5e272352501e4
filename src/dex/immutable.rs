//! Owned, fully materialized implementations of the model traits.
//!
//! `of` deep-copies any view (dex-backed, rewritten, or another immutable
//! value) so the result no longer depends on the source buffer. Equality
//! is structural, which makes these the natural thing to compare in tests.

use std::sync::Arc;

use crate::dex::encoded_values::{utf16_cmp, AnnotationElement, EncodedValue};
use crate::dex::error::DexError;
use crate::dex::instructions::Instruction;
use crate::dex::model::{
    AccessFlags, Annotation, AnnotationVisibility, ClassDef, DebugItem, DexFile, DexMarker, Field,
    HiddenApiRestrictions, Items, Method, MethodImplementation, MethodParameter, Stream, TryBlock,
};
use crate::dex::opcode_format::Opcodes;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImmutableDexFile {
    pub opcodes: Opcodes,
    pub classes: Vec<Arc<ImmutableClassDef>>,
    pub markers: Vec<DexMarker>,
}

impl ImmutableDexFile {
    pub fn new(opcodes: Opcodes, classes: Vec<ImmutableClassDef>) -> Self {
        ImmutableDexFile { opcodes, classes: classes.into_iter().map(Arc::new).collect(), markers: Vec::new() }
    }

    pub fn of(dex_file: &dyn DexFile) -> Result<Self, DexError> {
        let classes = dex_file
            .classes()
            .map(|class| class.and_then(|class| ImmutableClassDef::of(class.as_ref()).map(Arc::new)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ImmutableDexFile { opcodes: dex_file.opcodes(), classes, markers: dex_file.markers()? })
    }

    pub fn class(&self, type_name: &str) -> Option<&Arc<ImmutableClassDef>> {
        self.classes.iter().find(|class| class.type_name == type_name)
    }
}

impl DexFile for ImmutableDexFile {
    fn opcodes(&self) -> Opcodes {
        self.opcodes.clone()
    }

    fn classes(&self) -> Items<'_, Arc<dyn ClassDef>> {
        Box::new(self.classes.iter().map(|class| Ok(class.clone() as Arc<dyn ClassDef>)))
    }

    fn markers(&self) -> Result<Vec<DexMarker>, DexError> {
        Ok(self.markers.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImmutableClassDef {
    pub type_name: String,
    pub access_flags: AccessFlags,
    pub superclass: Option<String>,
    pub interfaces: Vec<String>,
    pub source_file: Option<String>,
    pub annotations: Vec<ImmutableAnnotation>,
    pub static_fields: Vec<Arc<ImmutableField>>,
    pub instance_fields: Vec<Arc<ImmutableField>>,
    pub direct_methods: Vec<Arc<ImmutableMethod>>,
    pub virtual_methods: Vec<Arc<ImmutableMethod>>,
}

impl ImmutableClassDef {
    /// Splits `fields` into static and instance fields and `methods` into
    /// direct and virtual methods by their access flags.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        type_name: &str,
        access_flags: AccessFlags,
        superclass: Option<&str>,
        interfaces: Vec<String>,
        source_file: Option<&str>,
        annotations: Vec<ImmutableAnnotation>,
        fields: Vec<ImmutableField>,
        methods: Vec<ImmutableMethod>,
    ) -> Self {
        let (static_fields, instance_fields): (Vec<_>, Vec<_>) =
            fields.into_iter().map(Arc::new).partition(|field| field.access_flags.is_static());
        let (direct_methods, virtual_methods): (Vec<_>, Vec<_>) =
            methods.into_iter().map(Arc::new).partition(|method| method.access_flags.is_direct_method());
        ImmutableClassDef {
            type_name: type_name.to_string(),
            access_flags,
            superclass: superclass.map(str::to_string),
            interfaces,
            source_file: source_file.map(str::to_string),
            annotations,
            static_fields,
            instance_fields,
            direct_methods,
            virtual_methods,
        }
    }

    pub fn of(class: &dyn ClassDef) -> Result<Self, DexError> {
        let type_name = class.type_name()?;
        let copy = || -> Result<Self, DexError> {
            Ok(ImmutableClassDef {
                type_name: type_name.clone(),
                access_flags: class.access_flags(),
                superclass: class.superclass()?,
                interfaces: class.interfaces()?,
                source_file: class.source_file()?,
                annotations: ImmutableAnnotation::all_of(class.annotations())?,
                static_fields: fields_of(class.static_fields())?,
                instance_fields: fields_of(class.instance_fields())?,
                direct_methods: methods_of(class.direct_methods())?,
                virtual_methods: methods_of(class.virtual_methods())?,
            })
        };
        copy().map_err(|e| err!(e, "class {}", type_name))
    }
}

fn fields_of(fields: Items<'_, Arc<dyn Field>>) -> Result<Vec<Arc<ImmutableField>>, DexError> {
    fields.map(|field| field.and_then(|field| ImmutableField::of(field.as_ref()).map(Arc::new))).collect()
}

fn methods_of(methods: Items<'_, Arc<dyn Method>>) -> Result<Vec<Arc<ImmutableMethod>>, DexError> {
    methods.map(|method| method.and_then(|method| ImmutableMethod::of(method.as_ref()).map(Arc::new))).collect()
}

fn annotation_items(annotations: &[ImmutableAnnotation]) -> Items<'_, Arc<dyn Annotation>> {
    Box::new(annotations.iter().map(|annotation| Ok(Arc::new(annotation.clone()) as Arc<dyn Annotation>)))
}

impl ClassDef for ImmutableClassDef {
    fn type_name(&self) -> Result<String, DexError> {
        Ok(self.type_name.clone())
    }

    fn access_flags(&self) -> AccessFlags {
        self.access_flags
    }

    fn superclass(&self) -> Result<Option<String>, DexError> {
        Ok(self.superclass.clone())
    }

    fn interfaces(&self) -> Result<Vec<String>, DexError> {
        Ok(self.interfaces.clone())
    }

    fn source_file(&self) -> Result<Option<String>, DexError> {
        Ok(self.source_file.clone())
    }

    fn annotations(&self) -> Items<'_, Arc<dyn Annotation>> {
        annotation_items(&self.annotations)
    }

    fn static_fields(&self) -> Items<'_, Arc<dyn Field>> {
        Box::new(self.static_fields.iter().map(|field| Ok(field.clone() as Arc<dyn Field>)))
    }

    fn instance_fields(&self) -> Items<'_, Arc<dyn Field>> {
        Box::new(self.instance_fields.iter().map(|field| Ok(field.clone() as Arc<dyn Field>)))
    }

    fn direct_methods(&self) -> Items<'_, Arc<dyn Method>> {
        Box::new(self.direct_methods.iter().map(|method| Ok(method.clone() as Arc<dyn Method>)))
    }

    fn virtual_methods(&self) -> Items<'_, Arc<dyn Method>> {
        Box::new(self.virtual_methods.iter().map(|method| Ok(method.clone() as Arc<dyn Method>)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImmutableField {
    pub defining_class: String,
    pub name: String,
    pub field_type: String,
    pub access_flags: AccessFlags,
    pub initial_value: Option<EncodedValue>,
    pub annotations: Vec<ImmutableAnnotation>,
    pub hidden_api_restrictions: Option<HiddenApiRestrictions>,
}

impl ImmutableField {
    pub fn new(defining_class: &str, name: &str, field_type: &str, access_flags: AccessFlags) -> Self {
        ImmutableField {
            defining_class: defining_class.to_string(),
            name: name.to_string(),
            field_type: field_type.to_string(),
            access_flags,
            initial_value: None,
            annotations: Vec::new(),
            hidden_api_restrictions: None,
        }
    }

    pub fn with_initial_value(mut self, value: EncodedValue) -> Self {
        self.initial_value = Some(value);
        self
    }

    pub fn of(field: &dyn Field) -> Result<Self, DexError> {
        Ok(ImmutableField {
            defining_class: field.defining_class()?,
            name: field.name()?,
            field_type: field.field_type()?,
            access_flags: field.access_flags(),
            initial_value: field.initial_value()?,
            annotations: ImmutableAnnotation::all_of(field.annotations())?,
            hidden_api_restrictions: field.hidden_api_restrictions()?,
        })
    }
}

impl Field for ImmutableField {
    fn defining_class(&self) -> Result<String, DexError> {
        Ok(self.defining_class.clone())
    }

    fn name(&self) -> Result<String, DexError> {
        Ok(self.name.clone())
    }

    fn field_type(&self) -> Result<String, DexError> {
        Ok(self.field_type.clone())
    }

    fn access_flags(&self) -> AccessFlags {
        self.access_flags
    }

    fn initial_value(&self) -> Result<Option<EncodedValue>, DexError> {
        Ok(self.initial_value.clone())
    }

    fn annotations(&self) -> Items<'_, Arc<dyn Annotation>> {
        annotation_items(&self.annotations)
    }

    fn hidden_api_restrictions(&self) -> Result<Option<HiddenApiRestrictions>, DexError> {
        Ok(self.hidden_api_restrictions)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImmutableMethod {
    pub defining_class: String,
    pub name: String,
    pub parameters: Vec<MethodParameter>,
    pub return_type: String,
    pub access_flags: AccessFlags,
    pub annotations: Vec<ImmutableAnnotation>,
    pub hidden_api_restrictions: Option<HiddenApiRestrictions>,
    pub implementation: Option<Arc<ImmutableMethodImplementation>>,
}

impl ImmutableMethod {
    pub fn new(
        defining_class: &str,
        name: &str,
        parameter_types: &[&str],
        return_type: &str,
        access_flags: AccessFlags,
        implementation: Option<ImmutableMethodImplementation>,
    ) -> Self {
        ImmutableMethod {
            defining_class: defining_class.to_string(),
            name: name.to_string(),
            parameters: parameter_types.iter().map(|t| MethodParameter::new(t)).collect(),
            return_type: return_type.to_string(),
            access_flags,
            annotations: Vec::new(),
            hidden_api_restrictions: None,
            implementation: implementation.map(Arc::new),
        }
    }

    pub fn of(method: &dyn Method) -> Result<Self, DexError> {
        let name = method.name()?;
        let copy = || -> Result<Self, DexError> {
            let implementation = match method.implementation()? {
                Some(implementation) => Some(Arc::new(ImmutableMethodImplementation::of(implementation.as_ref())?)),
                None => None,
            };
            Ok(ImmutableMethod {
                defining_class: method.defining_class()?,
                name: name.clone(),
                parameters: method.parameters()?,
                return_type: method.return_type()?,
                access_flags: method.access_flags(),
                annotations: ImmutableAnnotation::all_of(method.annotations())?,
                hidden_api_restrictions: method.hidden_api_restrictions()?,
                implementation,
            })
        };
        copy().map_err(|e| err!(e, "method {}", name))
    }
}

impl Method for ImmutableMethod {
    fn defining_class(&self) -> Result<String, DexError> {
        Ok(self.defining_class.clone())
    }

    fn name(&self) -> Result<String, DexError> {
        Ok(self.name.clone())
    }

    fn parameter_types(&self) -> Result<Vec<String>, DexError> {
        Ok(self.parameters.iter().map(|p| p.parameter_type.clone()).collect())
    }

    fn parameters(&self) -> Result<Vec<MethodParameter>, DexError> {
        Ok(self.parameters.clone())
    }

    fn return_type(&self) -> Result<String, DexError> {
        Ok(self.return_type.clone())
    }

    fn access_flags(&self) -> AccessFlags {
        self.access_flags
    }

    fn annotations(&self) -> Items<'_, Arc<dyn Annotation>> {
        annotation_items(&self.annotations)
    }

    fn hidden_api_restrictions(&self) -> Result<Option<HiddenApiRestrictions>, DexError> {
        Ok(self.hidden_api_restrictions)
    }

    fn implementation(&self) -> Result<Option<Arc<dyn MethodImplementation>>, DexError> {
        Ok(self.implementation.clone().map(|i| i as Arc<dyn MethodImplementation>))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImmutableMethodImplementation {
    pub register_count: u16,
    pub instructions: Vec<Instruction>,
    pub try_blocks: Vec<TryBlock>,
    pub debug_items: Vec<DebugItem>,
}

impl ImmutableMethodImplementation {
    pub fn new(register_count: u16, instructions: Vec<Instruction>) -> Self {
        ImmutableMethodImplementation { register_count, instructions, try_blocks: Vec::new(), debug_items: Vec::new() }
    }

    pub fn of(implementation: &dyn MethodImplementation) -> Result<Self, DexError> {
        Ok(ImmutableMethodImplementation {
            register_count: implementation.register_count()?,
            instructions: implementation.instructions().collect::<Result<Vec<_>, _>>()?,
            try_blocks: implementation.try_blocks()?,
            debug_items: implementation.debug_items().collect::<Result<Vec<_>, _>>()?,
        })
    }

    /// Total size of the instructions in code units.
    pub fn code_units(&self) -> usize {
        self.instructions.iter().map(|i| i.code_units()).sum()
    }
}

impl MethodImplementation for ImmutableMethodImplementation {
    fn register_count(&self) -> Result<u16, DexError> {
        Ok(self.register_count)
    }

    fn instructions(&self) -> Stream<'_, Instruction> {
        Box::new(self.instructions.iter().cloned().map(Ok))
    }

    fn try_blocks(&self) -> Result<Vec<TryBlock>, DexError> {
        Ok(self.try_blocks.clone())
    }

    fn debug_items(&self) -> Stream<'_, DebugItem> {
        Box::new(self.debug_items.iter().cloned().map(Ok))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImmutableAnnotation {
    pub visibility: AnnotationVisibility,
    pub annotation_type: String,
    pub elements: Vec<AnnotationElement>,
}

impl ImmutableAnnotation {
    /// Elements are kept in name order so equal annotations compare equal
    /// whatever order they were built in.
    pub fn new(visibility: AnnotationVisibility, annotation_type: &str, elements: Vec<AnnotationElement>) -> Self {
        let mut elements = elements;
        elements.sort_by(|a, b| utf16_cmp(&a.name, &b.name));
        ImmutableAnnotation { visibility, annotation_type: annotation_type.to_string(), elements }
    }

    pub fn of(annotation: &dyn Annotation) -> Result<Self, DexError> {
        Ok(ImmutableAnnotation::new(annotation.visibility(), &annotation.annotation_type()?, annotation.elements()?))
    }

    pub fn all_of(annotations: Items<'_, Arc<dyn Annotation>>) -> Result<Vec<Self>, DexError> {
        annotations.map(|annotation| annotation.and_then(|annotation| ImmutableAnnotation::of(annotation.as_ref()))).collect()
    }
}

impl Annotation for ImmutableAnnotation {
    fn visibility(&self) -> AnnotationVisibility {
        self.visibility
    }

    fn annotation_type(&self) -> Result<String, DexError> {
        Ok(self.annotation_type.clone())
    }

    fn elements(&self) -> Result<Vec<AnnotationElement>, DexError> {
        Ok(self.elements.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_splits_members_by_flags() {
        let class = ImmutableClassDef::new(
            "LFoo;",
            AccessFlags::PUBLIC,
            Some("Ljava/lang/Object;"),
            Vec::new(),
            None,
            Vec::new(),
            vec![
                ImmutableField::new("LFoo;", "a", "I", AccessFlags::STATIC),
                ImmutableField::new("LFoo;", "b", "I", AccessFlags::PRIVATE),
            ],
            vec![
                ImmutableMethod::new("LFoo;", "<init>", &[], "V", AccessFlags::CONSTRUCTOR, None),
                ImmutableMethod::new("LFoo;", "run", &[], "V", AccessFlags::PUBLIC | AccessFlags::ABSTRACT, None),
            ],
        );
        assert_eq!(class.static_fields.len(), 1);
        assert_eq!(class.instance_fields[0].name, "b");
        assert_eq!(class.direct_methods[0].name, "<init>");
        assert_eq!(class.virtual_methods[0].name, "run");
        assert_eq!(class.static_fields().len(), 1);
    }

    #[test]
    fn of_is_structurally_equal() {
        let class = ImmutableClassDef::new(
            "LBar;",
            AccessFlags::PUBLIC | AccessFlags::FINAL,
            Some("Ljava/lang/Object;"),
            vec!["Ljava/lang/Runnable;".to_string()],
            Some("Bar.java"),
            vec![ImmutableAnnotation::new(
                AnnotationVisibility::Runtime,
                "LAnno;",
                vec![AnnotationElement::new("z", EncodedValue::Int(1)), AnnotationElement::new("a", EncodedValue::Null)],
            )],
            vec![ImmutableField::new("LBar;", "x", "J", AccessFlags::STATIC).with_initial_value(EncodedValue::Long(5))],
            Vec::new(),
        );
        let copy = ImmutableClassDef::of(&class).unwrap();
        assert_eq!(copy, class);
        assert_eq!(copy.annotations[0].elements[0].name, "a");
    }
}
