use std::sync::Arc;

use crate::dex::encoded_values::EncodedValue;
use crate::dex::instructions::Instruction;
use crate::dex::model::ExceptionHandler;
use crate::dex::reference::{FieldRef, MethodRef, Reference};
use crate::dex::{DefaultRewriterModule, DexBackedDexFile, DexBuilder, DexRewriter, ImmutableDexFile, Opcodes, Rewriter, RewriterModule};

use super::{greeter_dex, write_and_read, GREETER, OBJECT};

struct RenameType {
    from: String,
    to: String,
}

impl Rewriter<String> for RenameType {
    fn rewrite(&self, _rewriters: &Arc<DexRewriter>, value: String) -> String {
        if value == self.from {
            self.to.clone()
        } else {
            value
        }
    }
}

struct RenameGreeter;

impl RewriterModule for RenameGreeter {
    fn type_rewriter(&self) -> Box<dyn Rewriter<String>> {
        Box::new(RenameType { from: GREETER.to_string(), to: "Lcom/example/Welcomer;".to_string() })
    }
}

/// Renames one field everywhere it is defined or referenced.
struct RenameCount;

impl Rewriter<FieldRef> for RenameCount {
    fn rewrite(&self, _rewriters: &Arc<DexRewriter>, value: FieldRef) -> FieldRef {
        if value.defining_class == GREETER && value.name == "COUNT" {
            FieldRef { name: "TOTAL".to_string(), ..value }
        } else {
            value
        }
    }
}

struct RenameCountModule;

impl RewriterModule for RenameCountModule {
    fn field_reference_rewriter(&self) -> Box<dyn Rewriter<FieldRef>> {
        Box::new(RenameCount)
    }
}

fn rewrite(module: &dyn RewriterModule, dex: ImmutableDexFile) -> ImmutableDexFile {
    let rewriters = DexRewriter::new(module);
    let rewritten = rewriters.rewrite_dex_file(Arc::new(dex));
    ImmutableDexFile::of(rewritten.as_ref()).unwrap()
}

#[test]
fn default_module_changes_nothing() {
    let original = greeter_dex();
    assert_eq!(rewrite(&DefaultRewriterModule, original.clone()), original);
}

#[test]
fn default_module_over_a_read_file_changes_nothing() {
    let dex = Arc::new(write_and_read(&greeter_dex()));
    let rewriters = DexRewriter::new(&DefaultRewriterModule);
    let rewritten = rewriters.rewrite_dex_file(dex.clone());
    assert_eq!(ImmutableDexFile::of(rewritten.as_ref()).unwrap(), ImmutableDexFile::of(dex.as_ref()).unwrap());
}

#[test]
fn type_rename_reaches_definitions_and_references() {
    let renamed = rewrite(&RenameGreeter, greeter_dex());
    let class = renamed.class("Lcom/example/Welcomer;").unwrap();
    assert!(renamed.class(GREETER).is_none());
    assert_eq!(class.superclass.as_deref(), Some(OBJECT));
    assert!(class.static_fields.iter().all(|f| f.defining_class == "Lcom/example/Welcomer;"));
    assert!(class.direct_methods.iter().chain(class.virtual_methods.iter()).all(|m| m.defining_class == "Lcom/example/Welcomer;"));

    // unrelated types are left alone
    let constructor = &class.direct_methods[0];
    let code = constructor.implementation.as_ref().unwrap();
    match &code.instructions[0] {
        Instruction::Format35c { reference: Reference::Method(method), .. } => {
            assert_eq!(method, &MethodRef::new(OBJECT, "<init>", &[], "V"));
        }
        other => panic!("unexpected instruction {:?}", other),
    }
}

#[test]
fn field_rename_applies_to_definitions() {
    let renamed = rewrite(&RenameCountModule, greeter_dex());
    let class = renamed.class(GREETER).unwrap();
    let names: Vec<&str> = class.static_fields.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["TOTAL", "NAME"]);
    assert_eq!(class.static_fields[0].initial_value, Some(EncodedValue::Int(5)));
}

#[test]
fn handler_types_are_rewritten() {
    struct RenameException;

    impl Rewriter<String> for RenameException {
        fn rewrite(&self, _rewriters: &Arc<DexRewriter>, value: String) -> String {
            value.replace("Ljava/lang/Exception;", "Ljava/lang/Throwable;")
        }
    }

    struct Module;

    impl RewriterModule for Module {
        fn type_rewriter(&self) -> Box<dyn Rewriter<String>> {
            Box::new(RenameException)
        }
    }

    let renamed = rewrite(&Module, greeter_dex());
    let greet = &renamed.class(GREETER).unwrap().virtual_methods[0];
    let code = greet.implementation.as_ref().unwrap();
    assert_eq!(
        code.try_blocks[0].handlers[0],
        ExceptionHandler { exception_type: Some("Ljava/lang/Throwable;".to_string()), handler_code_address: 3 }
    );
}

#[test]
fn renamed_classes_can_be_written() {
    let rewriters = DexRewriter::new(&RenameGreeter);
    let rewritten = rewriters.rewrite_dex_file(Arc::new(greeter_dex()));
    let builder = DexBuilder::new(Opcodes::default());
    builder.add_dex_file(rewritten.as_ref()).unwrap();
    builder.finalize().unwrap();

    let read = ImmutableDexFile::of(&DexBackedDexFile::from_bytes(builder.write().unwrap()).unwrap()).unwrap();
    let class = read.class("Lcom/example/Welcomer;").unwrap();
    assert_eq!(class.source_file.as_deref(), Some("Greeter.java"));
    assert_eq!(read.classes.len(), 1);
    assert_eq!(read.markers, greeter_dex().markers);
}
