mod builder_tests;
mod dex_roundtrip;
mod malformed_input;
mod rewriter_tests;

use crate::dex::encoded_values::{AnnotationElement, EncodedValue};
use crate::dex::instructions::Instruction;
use crate::dex::model::{AccessFlags, AnnotationVisibility, DebugItem, DexMarker, ExceptionHandler, MarkerTool, MethodParameter, TryBlock};
use crate::dex::opcode_format::Opcode;
use crate::dex::reference::{MethodRef, Reference};
use crate::dex::{
    DexBackedDexFile, DexBuilder, ImmutableAnnotation, ImmutableClassDef, ImmutableDexFile, ImmutableField, ImmutableMethod,
    ImmutableMethodImplementation, Opcodes,
};

pub(crate) const GREETER: &str = "Lcom/example/Greeter;";
pub(crate) const OBJECT: &str = "Ljava/lang/Object;";
pub(crate) const STRING: &str = "Ljava/lang/String;";

pub(crate) fn op(name: &str) -> &'static Opcode {
    Opcode::by_name(name).expect("known opcode")
}

fn constructor() -> ImmutableMethod {
    let code = ImmutableMethodImplementation::new(
        1,
        vec![
            Instruction::Format35c {
                opcode: op("invoke-direct"),
                registers: vec![0],
                reference: Reference::Method(MethodRef::new(OBJECT, "<init>", &[], "V")),
            },
            Instruction::Format10x { opcode: op("return-void") },
        ],
    );
    ImmutableMethod::new(GREETER, "<init>", &[], "V", AccessFlags::PUBLIC | AccessFlags::CONSTRUCTOR, Some(code))
}

/// `greet(name)` returns a constant, with a try block over the body whose
/// handler returns the caught exception.
fn greet() -> ImmutableMethod {
    let mut code = ImmutableMethodImplementation::new(
        3,
        vec![
            Instruction::Format21c { opcode: op("const-string"), register_a: 0, reference: Reference::String("Hello".to_string()) },
            Instruction::Format11x { opcode: op("return-object"), register_a: 0 },
            Instruction::Format11x { opcode: op("move-exception"), register_a: 0 },
            Instruction::Format11x { opcode: op("return-object"), register_a: 0 },
        ],
    );
    code.try_blocks = vec![TryBlock {
        start_address: 0,
        code_unit_count: 3,
        handlers: vec![
            ExceptionHandler { exception_type: Some("Ljava/lang/Exception;".to_string()), handler_code_address: 3 },
            ExceptionHandler { exception_type: None, handler_code_address: 3 },
        ],
    }];
    code.debug_items = vec![
        DebugItem::LineNumber { address: 0, line: 12 },
        DebugItem::LineNumber { address: 2, line: 13 },
        DebugItem::StartLocal {
            address: 3,
            register: 0,
            name: Some("e".to_string()),
            local_type: Some("Ljava/lang/Exception;".to_string()),
            signature: None,
        },
    ];
    let mut method = ImmutableMethod::new(GREETER, "greet", &[STRING], STRING, AccessFlags::PUBLIC, Some(code));
    method.parameters = vec![MethodParameter { parameter_type: STRING.to_string(), name: Some("name".to_string()), annotations: Vec::new() }];
    method
}

/// A class with static values, an annotated field, a constructor and one
/// virtual method with exception handling and debug info. Members are
/// already in canonical order.
pub(crate) fn greeter_class() -> ImmutableClassDef {
    let mut prefix = ImmutableField::new(GREETER, "prefix", STRING, AccessFlags::PRIVATE);
    prefix.annotations = vec![ImmutableAnnotation::new(AnnotationVisibility::Build, "Lcom/example/Nullable;", Vec::new())];
    let fields = vec![
        ImmutableField::new(GREETER, "COUNT", "I", AccessFlags::PUBLIC | AccessFlags::STATIC).with_initial_value(EncodedValue::Int(5)),
        ImmutableField::new(GREETER, "NAME", STRING, AccessFlags::PUBLIC | AccessFlags::STATIC),
        prefix,
    ];
    let tag = ImmutableAnnotation::new(
        AnnotationVisibility::Runtime,
        "Lcom/example/Tag;",
        vec![
            AnnotationElement::new("value", EncodedValue::String("greeter".to_string())),
            AnnotationElement::new("level", EncodedValue::Int(2)),
        ],
    );
    ImmutableClassDef::new(
        GREETER,
        AccessFlags::PUBLIC,
        Some(OBJECT),
        Vec::new(),
        Some("Greeter.java"),
        vec![tag],
        fields,
        vec![constructor(), greet()],
    )
}

pub(crate) fn greeter_dex() -> ImmutableDexFile {
    let mut dex = ImmutableDexFile::new(Opcodes::default(), vec![greeter_class()]);
    dex.markers = vec![DexMarker { tool: MarkerTool::D8, content: "{\"compilation-mode\":\"release\"}".to_string() }];
    dex
}

/// Writes `dex` with a fresh builder and parses the result.
pub(crate) fn write_and_read(dex: &ImmutableDexFile) -> DexBackedDexFile {
    let builder = DexBuilder::new(dex.opcodes.clone());
    builder.add_dex_file(dex).unwrap();
    builder.finalize().unwrap();
    DexBackedDexFile::from_bytes(builder.write().unwrap()).unwrap()
}
