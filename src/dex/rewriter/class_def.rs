use std::sync::Arc;

use crate::dex::encoded_values::EncodedValue;
use crate::dex::error::DexError;
use crate::dex::immutable::ImmutableAnnotation;
use crate::dex::model::{
    AccessFlags, Annotation, ClassDef, DexFile, DexMarker, Field, HiddenApiRestrictions, Items, Method, MethodImplementation,
    MethodParameter,
};
use crate::dex::opcode_format::Opcodes;
use crate::dex::reference::{FieldRef, MethodRef};
use crate::dex::rewriter::{DexRewriter, Rewriter};

fn rewrite_annotations<'a>(annotations: Items<'a, Arc<dyn Annotation>>, rewriters: &'a Arc<DexRewriter>) -> Items<'a, Arc<dyn Annotation>>
{
    Box::new(annotations.map(move |annotation| annotation.map(|annotation| rewriters.rewrite_annotation(annotation))))
}

pub struct RewrittenDexFile
{
    original: Arc<dyn DexFile>,
    rewriters: Arc<DexRewriter>,
}

impl RewrittenDexFile
{
    pub fn new(original: Arc<dyn DexFile>, rewriters: Arc<DexRewriter>) -> Self
    {
        RewrittenDexFile { original, rewriters }
    }
}

impl DexFile for RewrittenDexFile
{
    fn opcodes(&self) -> Opcodes
    {
        self.original.opcodes()
    }

    fn classes(&self) -> Items<'_, Arc<dyn ClassDef>>
    {
        let rewriters = &self.rewriters;
        Box::new(self.original.classes().map(move |class| class.map(|class| rewriters.rewrite_class_def(class))))
    }

    fn markers(&self) -> Result<Vec<DexMarker>, DexError>
    {
        self.original.markers()
    }
}

pub(super) struct DexFileRewriter;

impl Rewriter<Arc<dyn DexFile>> for DexFileRewriter
{
    fn rewrite(&self, rewriters: &Arc<DexRewriter>, value: Arc<dyn DexFile>) -> Arc<dyn DexFile>
    {
        Arc::new(RewrittenDexFile::new(value, rewriters.clone()))
    }
}

pub struct RewrittenClassDef
{
    original: Arc<dyn ClassDef>,
    rewriters: Arc<DexRewriter>,
}

impl RewrittenClassDef
{
    pub fn new(original: Arc<dyn ClassDef>, rewriters: Arc<DexRewriter>) -> Self
    {
        RewrittenClassDef { original, rewriters }
    }
}

impl ClassDef for RewrittenClassDef
{
    fn type_name(&self) -> Result<String, DexError>
    {
        Ok(self.rewriters.rewrite_type(self.original.type_name()?))
    }

    fn access_flags(&self) -> AccessFlags
    {
        self.original.access_flags()
    }

    fn superclass(&self) -> Result<Option<String>, DexError>
    {
        Ok(self.original.superclass()?.map(|superclass| self.rewriters.rewrite_type(superclass)))
    }

    fn interfaces(&self) -> Result<Vec<String>, DexError>
    {
        Ok(self.rewriters.rewrite_types(self.original.interfaces()?))
    }

    fn source_file(&self) -> Result<Option<String>, DexError>
    {
        self.original.source_file()
    }

    fn annotations(&self) -> Items<'_, Arc<dyn Annotation>>
    {
        rewrite_annotations(self.original.annotations(), &self.rewriters)
    }

    fn static_fields(&self) -> Items<'_, Arc<dyn Field>>
    {
        let rewriters = &self.rewriters;
        Box::new(self.original.static_fields().map(move |field| field.map(|field| rewriters.rewrite_field(field))))
    }

    fn instance_fields(&self) -> Items<'_, Arc<dyn Field>>
    {
        let rewriters = &self.rewriters;
        Box::new(self.original.instance_fields().map(move |field| field.map(|field| rewriters.rewrite_field(field))))
    }

    fn direct_methods(&self) -> Items<'_, Arc<dyn Method>>
    {
        let rewriters = &self.rewriters;
        Box::new(self.original.direct_methods().map(move |method| method.map(|method| rewriters.rewrite_method(method))))
    }

    fn virtual_methods(&self) -> Items<'_, Arc<dyn Method>>
    {
        let rewriters = &self.rewriters;
        Box::new(self.original.virtual_methods().map(move |method| method.map(|method| rewriters.rewrite_method(method))))
    }
}

pub(super) struct ClassDefRewriter;

impl Rewriter<Arc<dyn ClassDef>> for ClassDefRewriter
{
    fn rewrite(&self, rewriters: &Arc<DexRewriter>, value: Arc<dyn ClassDef>) -> Arc<dyn ClassDef>
    {
        Arc::new(RewrittenClassDef::new(value, rewriters.clone()))
    }
}

/// A field whose identity goes through the field reference rewriter, so
/// renaming a field reference renames its definition too.
pub struct RewrittenField
{
    original: Arc<dyn Field>,
    rewriters: Arc<DexRewriter>,
}

impl RewrittenField
{
    pub fn new(original: Arc<dyn Field>, rewriters: Arc<DexRewriter>) -> Self
    {
        RewrittenField { original, rewriters }
    }

    fn field_ref(&self) -> Result<FieldRef, DexError>
    {
        Ok(self.rewriters.rewrite_field_reference(self.original.to_field_ref()?))
    }
}

impl Field for RewrittenField
{
    fn defining_class(&self) -> Result<String, DexError>
    {
        Ok(self.field_ref()?.defining_class)
    }

    fn name(&self) -> Result<String, DexError>
    {
        Ok(self.field_ref()?.name)
    }

    fn field_type(&self) -> Result<String, DexError>
    {
        Ok(self.field_ref()?.field_type)
    }

    fn access_flags(&self) -> AccessFlags
    {
        self.original.access_flags()
    }

    fn initial_value(&self) -> Result<Option<EncodedValue>, DexError>
    {
        Ok(self.original.initial_value()?.map(|value| self.rewriters.rewrite_encoded_value(value)))
    }

    fn annotations(&self) -> Items<'_, Arc<dyn Annotation>>
    {
        rewrite_annotations(self.original.annotations(), &self.rewriters)
    }

    fn hidden_api_restrictions(&self) -> Result<Option<HiddenApiRestrictions>, DexError>
    {
        self.original.hidden_api_restrictions()
    }

    fn to_field_ref(&self) -> Result<FieldRef, DexError>
    {
        self.field_ref()
    }
}

pub(super) struct FieldRewriter;

impl Rewriter<Arc<dyn Field>> for FieldRewriter
{
    fn rewrite(&self, rewriters: &Arc<DexRewriter>, value: Arc<dyn Field>) -> Arc<dyn Field>
    {
        Arc::new(RewrittenField::new(value, rewriters.clone()))
    }
}

pub struct RewrittenMethod
{
    original: Arc<dyn Method>,
    rewriters: Arc<DexRewriter>,
}

impl RewrittenMethod
{
    pub fn new(original: Arc<dyn Method>, rewriters: Arc<DexRewriter>) -> Self
    {
        RewrittenMethod { original, rewriters }
    }

    fn method_ref(&self) -> Result<MethodRef, DexError>
    {
        Ok(self.rewriters.rewrite_method_reference(self.original.to_method_ref()?))
    }
}

impl Method for RewrittenMethod
{
    fn defining_class(&self) -> Result<String, DexError>
    {
        Ok(self.method_ref()?.defining_class)
    }

    fn name(&self) -> Result<String, DexError>
    {
        Ok(self.method_ref()?.name)
    }

    fn parameter_types(&self) -> Result<Vec<String>, DexError>
    {
        Ok(self.method_ref()?.parameter_types)
    }

    fn parameters(&self) -> Result<Vec<MethodParameter>, DexError>
    {
        let types = self.method_ref()?.parameter_types;
        let mut parameters = Vec::with_capacity(types.len());
        for (parameter, parameter_type) in self.original.parameters()?.into_iter().zip(types)
        {
            let annotations = parameter
                .annotations
                .into_iter()
                .map(|annotation| ImmutableAnnotation::of(self.rewriters.rewrite_annotation(Arc::new(annotation)).as_ref()))
                .collect::<Result<Vec<_>, _>>()?;
            parameters.push(MethodParameter { parameter_type, name: parameter.name, annotations });
        }
        Ok(parameters)
    }

    fn return_type(&self) -> Result<String, DexError>
    {
        Ok(self.method_ref()?.return_type)
    }

    fn access_flags(&self) -> AccessFlags
    {
        self.original.access_flags()
    }

    fn annotations(&self) -> Items<'_, Arc<dyn Annotation>>
    {
        rewrite_annotations(self.original.annotations(), &self.rewriters)
    }

    fn hidden_api_restrictions(&self) -> Result<Option<HiddenApiRestrictions>, DexError>
    {
        self.original.hidden_api_restrictions()
    }

    fn implementation(&self) -> Result<Option<Arc<dyn MethodImplementation>>, DexError>
    {
        Ok(self.original.implementation()?.map(|implementation| self.rewriters.rewrite_method_implementation(implementation)))
    }

    fn to_method_ref(&self) -> Result<MethodRef, DexError>
    {
        self.method_ref()
    }
}

pub(super) struct MethodRewriter;

impl Rewriter<Arc<dyn Method>> for MethodRewriter
{
    fn rewrite(&self, rewriters: &Arc<DexRewriter>, value: Arc<dyn Method>) -> Arc<dyn Method>
    {
        Arc::new(RewrittenMethod::new(value, rewriters.clone()))
    }
}
