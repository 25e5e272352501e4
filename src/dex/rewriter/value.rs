use std::sync::Arc;

use crate::dex::encoded_values::{AnnotationElement, EncodedAnnotation, EncodedValue};
use crate::dex::error::DexError;
use crate::dex::model::{Annotation, AnnotationVisibility};
use crate::dex::reference::{CallSiteRef, FieldRef, MethodHandleMember, MethodHandleRef, MethodProtoRef, MethodRef, Reference};
use crate::dex::rewriter::{DexRewriter, Rewriter};

pub struct RewrittenAnnotation
{
    original: Arc<dyn Annotation>,
    rewriters: Arc<DexRewriter>,
}

impl RewrittenAnnotation
{
    pub fn new(original: Arc<dyn Annotation>, rewriters: Arc<DexRewriter>) -> Self
    {
        RewrittenAnnotation { original, rewriters }
    }
}

impl Annotation for RewrittenAnnotation
{
    fn visibility(&self) -> AnnotationVisibility
    {
        self.original.visibility()
    }

    fn annotation_type(&self) -> Result<String, DexError>
    {
        Ok(self.rewriters.rewrite_type(self.original.annotation_type()?))
    }

    fn elements(&self) -> Result<Vec<AnnotationElement>, DexError>
    {
        Ok(self.original.elements()?.into_iter().map(|e| self.rewriters.rewrite_annotation_element(e)).collect())
    }
}

pub(super) struct AnnotationRewriter;

impl Rewriter<Arc<dyn Annotation>> for AnnotationRewriter
{
    fn rewrite(&self, rewriters: &Arc<DexRewriter>, value: Arc<dyn Annotation>) -> Arc<dyn Annotation>
    {
        Arc::new(RewrittenAnnotation::new(value, rewriters.clone()))
    }
}

pub(super) struct AnnotationElementRewriter;

impl Rewriter<AnnotationElement> for AnnotationElementRewriter
{
    fn rewrite(&self, rewriters: &Arc<DexRewriter>, value: AnnotationElement) -> AnnotationElement
    {
        AnnotationElement { name: value.name, value: rewriters.rewrite_encoded_value(value.value) }
    }
}

pub(super) struct FieldReferenceRewriter;

impl Rewriter<FieldRef> for FieldReferenceRewriter
{
    fn rewrite(&self, rewriters: &Arc<DexRewriter>, value: FieldRef) -> FieldRef
    {
        FieldRef {
            defining_class: rewriters.rewrite_type(value.defining_class),
            name: value.name,
            field_type: rewriters.rewrite_type(value.field_type),
        }
    }
}

pub(super) struct MethodReferenceRewriter;

impl Rewriter<MethodRef> for MethodReferenceRewriter
{
    fn rewrite(&self, rewriters: &Arc<DexRewriter>, value: MethodRef) -> MethodRef
    {
        MethodRef {
            defining_class: rewriters.rewrite_type(value.defining_class),
            name: value.name,
            parameter_types: rewriters.rewrite_types(value.parameter_types),
            return_type: rewriters.rewrite_type(value.return_type),
        }
    }
}

fn rewrite_proto(rewriters: &Arc<DexRewriter>, proto: MethodProtoRef) -> MethodProtoRef
{
    MethodProtoRef {
        parameter_types: rewriters.rewrite_types(proto.parameter_types),
        return_type: rewriters.rewrite_type(proto.return_type),
    }
}

fn rewrite_method_handle(rewriters: &Arc<DexRewriter>, handle: MethodHandleRef) -> MethodHandleRef
{
    let member = match handle.member
    {
        MethodHandleMember::Field(field) => MethodHandleMember::Field(rewriters.rewrite_field_reference(field)),
        MethodHandleMember::Method(method) => MethodHandleMember::Method(rewriters.rewrite_method_reference(method)),
    };
    MethodHandleRef { handle_type: handle.handle_type, member }
}

fn rewrite_call_site(rewriters: &Arc<DexRewriter>, call_site: CallSiteRef) -> CallSiteRef
{
    CallSiteRef {
        method_handle: rewrite_method_handle(rewriters, call_site.method_handle),
        method_name: call_site.method_name,
        method_proto: rewrite_proto(rewriters, call_site.method_proto),
        extra_arguments: call_site.extra_arguments.into_iter().map(|v| rewriters.rewrite_encoded_value(v)).collect(),
    }
}

pub(super) fn rewrite_reference(rewriters: &Arc<DexRewriter>, reference: Reference) -> Reference
{
    match reference
    {
        Reference::String(value) => Reference::String(value),
        Reference::Type(descriptor) => Reference::Type(rewriters.rewrite_type(descriptor)),
        Reference::Field(field) => Reference::Field(rewriters.rewrite_field_reference(field)),
        Reference::Method(method) => Reference::Method(rewriters.rewrite_method_reference(method)),
        Reference::MethodProto(proto) => Reference::MethodProto(rewrite_proto(rewriters, proto)),
        Reference::MethodHandle(handle) => Reference::MethodHandle(rewrite_method_handle(rewriters, handle)),
        Reference::CallSite(call_site) => Reference::CallSite(rewrite_call_site(rewriters, call_site)),
    }
}

pub(super) struct EncodedValueRewriter;

impl Rewriter<EncodedValue> for EncodedValueRewriter
{
    fn rewrite(&self, rewriters: &Arc<DexRewriter>, value: EncodedValue) -> EncodedValue
    {
        match value
        {
            EncodedValue::Type(descriptor) => EncodedValue::Type(rewriters.rewrite_type(descriptor)),
            EncodedValue::Field(field) => EncodedValue::Field(rewriters.rewrite_field_reference(field)),
            EncodedValue::Enum(field) => EncodedValue::Enum(rewriters.rewrite_field_reference(field)),
            EncodedValue::Method(method) => EncodedValue::Method(rewriters.rewrite_method_reference(method)),
            EncodedValue::MethodType(proto) => EncodedValue::MethodType(rewrite_proto(rewriters, proto)),
            EncodedValue::MethodHandle(handle) => EncodedValue::MethodHandle(rewrite_method_handle(rewriters, handle)),
            EncodedValue::Array(values) => {
                EncodedValue::Array(values.into_iter().map(|v| rewriters.rewrite_encoded_value(v)).collect())
            }
            EncodedValue::Annotation(annotation) => EncodedValue::Annotation(EncodedAnnotation {
                annotation_type: rewriters.rewrite_type(annotation.annotation_type),
                elements: annotation.elements.into_iter().map(|e| rewriters.rewrite_annotation_element(e)).collect(),
            }),
            other => other,
        }
    }
}
