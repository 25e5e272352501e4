use std::convert::Infallible;
use std::sync::Arc;

use crate::dex::error::DexError;
use crate::dex::instructions::Instruction;
use crate::dex::model::{DebugItem, ExceptionHandler, MethodImplementation, Stream, TryBlock};
use crate::dex::rewriter::{DexRewriter, Rewriter};

pub struct RewrittenMethodImplementation
{
    original: Arc<dyn MethodImplementation>,
    rewriters: Arc<DexRewriter>,
}

impl RewrittenMethodImplementation
{
    pub fn new(original: Arc<dyn MethodImplementation>, rewriters: Arc<DexRewriter>) -> Self
    {
        RewrittenMethodImplementation { original, rewriters }
    }
}

impl MethodImplementation for RewrittenMethodImplementation
{
    fn register_count(&self) -> Result<u16, DexError>
    {
        self.original.register_count()
    }

    fn instructions(&self) -> Stream<'_, Instruction>
    {
        let rewriters = &self.rewriters;
        Box::new(self.original.instructions().map(move |i| i.map(|i| rewriters.rewrite_instruction(i))))
    }

    fn try_blocks(&self) -> Result<Vec<TryBlock>, DexError>
    {
        Ok(self.original.try_blocks()?.into_iter().map(|t| self.rewriters.rewrite_try_block(t)).collect())
    }

    fn debug_items(&self) -> Stream<'_, DebugItem>
    {
        let rewriters = &self.rewriters;
        Box::new(self.original.debug_items().map(move |d| d.map(|d| rewriters.rewrite_debug_item(d))))
    }
}

pub(super) struct MethodImplementationRewriter;

impl Rewriter<Arc<dyn MethodImplementation>> for MethodImplementationRewriter
{
    fn rewrite(&self, rewriters: &Arc<DexRewriter>, value: Arc<dyn MethodImplementation>) -> Arc<dyn MethodImplementation>
    {
        Arc::new(RewrittenMethodImplementation::new(value, rewriters.clone()))
    }
}

/// Passes every operand reference through the reference rewriters.
pub(super) struct InstructionRewriter;

impl Rewriter<Instruction> for InstructionRewriter
{
    fn rewrite(&self, rewriters: &Arc<DexRewriter>, value: Instruction) -> Instruction
    {
        match value.map_references(|_, reference| Ok::<_, Infallible>(rewriters.rewrite_reference(reference)))
        {
            Ok(instruction) => instruction,
            Err(never) => match never {},
        }
    }
}

pub(super) struct TryBlockRewriter;

impl Rewriter<TryBlock> for TryBlockRewriter
{
    fn rewrite(&self, rewriters: &Arc<DexRewriter>, value: TryBlock) -> TryBlock
    {
        TryBlock {
            start_address: value.start_address,
            code_unit_count: value.code_unit_count,
            handlers: value.handlers.into_iter().map(|h| rewriters.rewrite_exception_handler(h)).collect(),
        }
    }
}

pub(super) struct ExceptionHandlerRewriter;

impl Rewriter<ExceptionHandler> for ExceptionHandlerRewriter
{
    fn rewrite(&self, rewriters: &Arc<DexRewriter>, value: ExceptionHandler) -> ExceptionHandler
    {
        ExceptionHandler {
            exception_type: value.exception_type.map(|t| rewriters.rewrite_type(t)),
            handler_code_address: value.handler_code_address,
        }
    }
}

pub(super) struct DebugItemRewriter;

impl Rewriter<DebugItem> for DebugItemRewriter
{
    fn rewrite(&self, rewriters: &Arc<DexRewriter>, value: DebugItem) -> DebugItem
    {
        match value
        {
            DebugItem::StartLocal { address, register, name, local_type, signature } => DebugItem::StartLocal {
                address,
                register,
                name,
                local_type: local_type.map(|t| rewriters.rewrite_type(t)),
                signature,
            },
            other => other,
        }
    }
}
