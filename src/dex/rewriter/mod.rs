//! Pluggable rewriting of a dex file.
//!
//! A [`RewriterModule`] hands out one [`Rewriter`] per kind of value. The
//! defaults for files, classes, members and code wrap the original in a
//! `Rewritten*` view that passes every nested value through the matching
//! rewriter on access; the type rewriter is the only pure identity. So
//! overriding just the type rewriter renames a type everywhere it appears,
//! and overriding nothing gives back an equal file.

mod class_def;
mod code;
mod value;

use std::sync::Arc;

use crate::dex::encoded_values::{AnnotationElement, EncodedValue};
use crate::dex::instructions::Instruction;
use crate::dex::model::{Annotation, ClassDef, DebugItem, DexFile, ExceptionHandler, Field, Method, MethodImplementation, TryBlock};
use crate::dex::reference::{FieldRef, MethodRef, Reference};

pub use class_def::{RewrittenClassDef, RewrittenDexFile, RewrittenField, RewrittenMethod};
pub use code::RewrittenMethodImplementation;
pub use value::RewrittenAnnotation;

use class_def::{ClassDefRewriter, DexFileRewriter, FieldRewriter, MethodRewriter};
use code::{DebugItemRewriter, ExceptionHandlerRewriter, InstructionRewriter, MethodImplementationRewriter, TryBlockRewriter};
use value::{AnnotationElementRewriter, AnnotationRewriter, EncodedValueRewriter, FieldReferenceRewriter, MethodReferenceRewriter};

/// Rewrites one kind of value. `rewriters` gives access to every other
/// strategy, so nested values can be delegated.
pub trait Rewriter<T>: Send + Sync
{
    fn rewrite(&self, rewriters: &Arc<DexRewriter>, value: T) -> T;
}

/// Returns its input unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityRewriter;

impl<T> Rewriter<T> for IdentityRewriter
{
    fn rewrite(&self, _rewriters: &Arc<DexRewriter>, value: T) -> T
    {
        value
    }
}

/// Supplies the strategy for each kind. Override the ones you need.
pub trait RewriterModule
{
    fn dex_file_rewriter(&self) -> Box<dyn Rewriter<Arc<dyn DexFile>>>
    {
        Box::new(DexFileRewriter)
    }

    fn class_def_rewriter(&self) -> Box<dyn Rewriter<Arc<dyn ClassDef>>>
    {
        Box::new(ClassDefRewriter)
    }

    fn field_rewriter(&self) -> Box<dyn Rewriter<Arc<dyn Field>>>
    {
        Box::new(FieldRewriter)
    }

    fn method_rewriter(&self) -> Box<dyn Rewriter<Arc<dyn Method>>>
    {
        Box::new(MethodRewriter)
    }

    fn method_implementation_rewriter(&self) -> Box<dyn Rewriter<Arc<dyn MethodImplementation>>>
    {
        Box::new(MethodImplementationRewriter)
    }

    fn instruction_rewriter(&self) -> Box<dyn Rewriter<Instruction>>
    {
        Box::new(InstructionRewriter)
    }

    fn try_block_rewriter(&self) -> Box<dyn Rewriter<TryBlock>>
    {
        Box::new(TryBlockRewriter)
    }

    fn exception_handler_rewriter(&self) -> Box<dyn Rewriter<ExceptionHandler>>
    {
        Box::new(ExceptionHandlerRewriter)
    }

    fn debug_item_rewriter(&self) -> Box<dyn Rewriter<DebugItem>>
    {
        Box::new(DebugItemRewriter)
    }

    /// Type descriptors, e.g. `Ljava/lang/String;`.
    fn type_rewriter(&self) -> Box<dyn Rewriter<String>>
    {
        Box::new(IdentityRewriter)
    }

    fn field_reference_rewriter(&self) -> Box<dyn Rewriter<FieldRef>>
    {
        Box::new(FieldReferenceRewriter)
    }

    fn method_reference_rewriter(&self) -> Box<dyn Rewriter<MethodRef>>
    {
        Box::new(MethodReferenceRewriter)
    }

    fn annotation_rewriter(&self) -> Box<dyn Rewriter<Arc<dyn Annotation>>>
    {
        Box::new(AnnotationRewriter)
    }

    fn annotation_element_rewriter(&self) -> Box<dyn Rewriter<AnnotationElement>>
    {
        Box::new(AnnotationElementRewriter)
    }

    fn encoded_value_rewriter(&self) -> Box<dyn Rewriter<EncodedValue>>
    {
        Box::new(EncodedValueRewriter)
    }
}

/// A module that keeps every default.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultRewriterModule;

impl RewriterModule for DefaultRewriterModule {}

/// The full set of strategies built from a module.
pub struct DexRewriter
{
    dex_file: Box<dyn Rewriter<Arc<dyn DexFile>>>,
    class_def: Box<dyn Rewriter<Arc<dyn ClassDef>>>,
    field: Box<dyn Rewriter<Arc<dyn Field>>>,
    method: Box<dyn Rewriter<Arc<dyn Method>>>,
    method_implementation: Box<dyn Rewriter<Arc<dyn MethodImplementation>>>,
    instruction: Box<dyn Rewriter<Instruction>>,
    try_block: Box<dyn Rewriter<TryBlock>>,
    exception_handler: Box<dyn Rewriter<ExceptionHandler>>,
    debug_item: Box<dyn Rewriter<DebugItem>>,
    type_name: Box<dyn Rewriter<String>>,
    field_reference: Box<dyn Rewriter<FieldRef>>,
    method_reference: Box<dyn Rewriter<MethodRef>>,
    annotation: Box<dyn Rewriter<Arc<dyn Annotation>>>,
    annotation_element: Box<dyn Rewriter<AnnotationElement>>,
    encoded_value: Box<dyn Rewriter<EncodedValue>>,
}

impl DexRewriter
{
    pub fn new<M: RewriterModule + ?Sized>(module: &M) -> Arc<DexRewriter>
    {
        Arc::new(DexRewriter {
            dex_file: module.dex_file_rewriter(),
            class_def: module.class_def_rewriter(),
            field: module.field_rewriter(),
            method: module.method_rewriter(),
            method_implementation: module.method_implementation_rewriter(),
            instruction: module.instruction_rewriter(),
            try_block: module.try_block_rewriter(),
            exception_handler: module.exception_handler_rewriter(),
            debug_item: module.debug_item_rewriter(),
            type_name: module.type_rewriter(),
            field_reference: module.field_reference_rewriter(),
            method_reference: module.method_reference_rewriter(),
            annotation: module.annotation_rewriter(),
            annotation_element: module.annotation_element_rewriter(),
            encoded_value: module.encoded_value_rewriter(),
        })
    }

    pub fn rewrite_dex_file(self: &Arc<Self>, value: Arc<dyn DexFile>) -> Arc<dyn DexFile>
    {
        self.dex_file.rewrite(self, value)
    }

    pub fn rewrite_class_def(self: &Arc<Self>, value: Arc<dyn ClassDef>) -> Arc<dyn ClassDef>
    {
        self.class_def.rewrite(self, value)
    }

    pub fn rewrite_field(self: &Arc<Self>, value: Arc<dyn Field>) -> Arc<dyn Field>
    {
        self.field.rewrite(self, value)
    }

    pub fn rewrite_method(self: &Arc<Self>, value: Arc<dyn Method>) -> Arc<dyn Method>
    {
        self.method.rewrite(self, value)
    }

    pub fn rewrite_method_implementation(self: &Arc<Self>, value: Arc<dyn MethodImplementation>) -> Arc<dyn MethodImplementation>
    {
        self.method_implementation.rewrite(self, value)
    }

    pub fn rewrite_instruction(self: &Arc<Self>, value: Instruction) -> Instruction
    {
        self.instruction.rewrite(self, value)
    }

    pub fn rewrite_try_block(self: &Arc<Self>, value: TryBlock) -> TryBlock
    {
        self.try_block.rewrite(self, value)
    }

    pub fn rewrite_exception_handler(self: &Arc<Self>, value: ExceptionHandler) -> ExceptionHandler
    {
        self.exception_handler.rewrite(self, value)
    }

    pub fn rewrite_debug_item(self: &Arc<Self>, value: DebugItem) -> DebugItem
    {
        self.debug_item.rewrite(self, value)
    }

    pub fn rewrite_type(self: &Arc<Self>, value: String) -> String
    {
        self.type_name.rewrite(self, value)
    }

    pub fn rewrite_field_reference(self: &Arc<Self>, value: FieldRef) -> FieldRef
    {
        self.field_reference.rewrite(self, value)
    }

    pub fn rewrite_method_reference(self: &Arc<Self>, value: MethodRef) -> MethodRef
    {
        self.method_reference.rewrite(self, value)
    }

    pub fn rewrite_annotation(self: &Arc<Self>, value: Arc<dyn Annotation>) -> Arc<dyn Annotation>
    {
        self.annotation.rewrite(self, value)
    }

    pub fn rewrite_annotation_element(self: &Arc<Self>, value: AnnotationElement) -> AnnotationElement
    {
        self.annotation_element.rewrite(self, value)
    }

    pub fn rewrite_encoded_value(self: &Arc<Self>, value: EncodedValue) -> EncodedValue
    {
        self.encoded_value.rewrite(self, value)
    }

    /// Rewrites whatever an instruction operand points at.
    pub fn rewrite_reference(self: &Arc<Self>, reference: Reference) -> Reference
    {
        value::rewrite_reference(self, reference)
    }

    pub fn rewrite_types(self: &Arc<Self>, types: Vec<String>) -> Vec<String>
    {
        types.into_iter().map(|t| self.rewrite_type(t)).collect()
    }
}
