use crate::dex::encoded_values::EncodedValue;
use crate::dex::instructions::Instruction;
use crate::dex::model::{AccessFlags, ClassDef, DexFile, HiddenApiDomain, HiddenApiRestriction, HiddenApiRestrictions};
use crate::dex::raw::HEADER_SIZE;
use crate::dex::reference::{CallSiteRef, MethodHandleMember, MethodHandleRef, MethodHandleType, MethodProtoRef, MethodRef, Reference};
use crate::dex::{
    DexBackedDexFile, DexBuilder, DexErrorKind, ImmutableClassDef, ImmutableDexFile, ImmutableField, ImmutableMethod,
    ImmutableMethodImplementation, Opcodes,
};

use super::{greeter_class, greeter_dex, op, write_and_read, GREETER, OBJECT, STRING};

#[test]
fn written_classes_read_back_equal() {
    let original = greeter_dex();
    let dex = write_and_read(&original);
    let read = ImmutableDexFile::of(&dex).unwrap();
    assert_eq!(read.classes, original.classes);
    assert_eq!(read.markers, original.markers);
    assert_eq!(read.opcodes, original.opcodes);
}

#[test]
fn rewriting_a_read_file_is_stable() {
    let first = write_and_read(&greeter_dex());
    let builder = DexBuilder::new(Opcodes::default());
    builder.add_dex_file(&first).unwrap();
    builder.finalize().unwrap();
    let bytes = builder.write().unwrap();
    assert_eq!(bytes, first.buffer().as_slice());
}

#[test]
fn header_checksums_cover_the_file() {
    let builder = DexBuilder::new(Opcodes::default());
    builder.add_class_def(&greeter_class()).unwrap();
    builder.finalize().unwrap();
    let bytes = builder.write().unwrap();

    assert_eq!(&bytes[0..8], b"dex\n039\0");
    let checksum = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
    assert_eq!(checksum, adler::adler32_slice(&bytes[12..]));
    let file_size = u32::from_le_bytes([bytes[32], bytes[33], bytes[34], bytes[35]]);
    assert_eq!(file_size as usize, bytes.len());
    let header_size = u32::from_le_bytes([bytes[36], bytes[37], bytes[38], bytes[39]]);
    assert_eq!(header_size, HEADER_SIZE);
}

#[test]
fn empty_builder_writes_a_valid_file() {
    let builder = DexBuilder::new(Opcodes::for_api(23));
    builder.finalize().unwrap();
    let dex = DexBackedDexFile::from_bytes(builder.write().unwrap()).unwrap();
    assert_eq!(dex.class_count(), 0);
    assert_eq!(dex.opcodes().dex_version(), 35);
    assert_eq!(dex.classes().len(), 0);
}

#[test]
fn trailing_default_static_values_are_dropped() {
    let fields = vec![
        ImmutableField::new(GREETER, "a", "I", AccessFlags::STATIC),
        ImmutableField::new(GREETER, "b", "J", AccessFlags::STATIC).with_initial_value(EncodedValue::Long(7)),
        ImmutableField::new(GREETER, "c", "Z", AccessFlags::STATIC).with_initial_value(EncodedValue::Boolean(false)),
    ];
    let class = ImmutableClassDef::new(GREETER, AccessFlags::PUBLIC, Some(OBJECT), Vec::new(), None, Vec::new(), fields, Vec::new());
    let dex = write_and_read(&ImmutableDexFile::new(Opcodes::default(), vec![class]));
    let read = ImmutableClassDef::of(dex.classes().next().unwrap().unwrap().as_ref()).unwrap();
    let values: Vec<Option<EncodedValue>> = read.static_fields.iter().map(|f| f.initial_value.clone()).collect();
    // the gap before `b` is filled with the default, the default after it is trimmed
    assert_eq!(values, vec![Some(EncodedValue::Int(0)), Some(EncodedValue::Long(7)), None]);
}

#[test]
fn members_are_written_in_canonical_order() {
    let methods = vec![
        ImmutableMethod::new(GREETER, "b", &[], "V", AccessFlags::PUBLIC | AccessFlags::ABSTRACT, None),
        ImmutableMethod::new(GREETER, "a", &["J"], "V", AccessFlags::PUBLIC | AccessFlags::ABSTRACT, None),
        ImmutableMethod::new(GREETER, "a", &["I"], "V", AccessFlags::PUBLIC | AccessFlags::ABSTRACT, None),
        ImmutableMethod::new(GREETER, "a", &[], "I", AccessFlags::PUBLIC | AccessFlags::ABSTRACT, None),
        ImmutableMethod::new(GREETER, "a", &[], "V", AccessFlags::PUBLIC | AccessFlags::ABSTRACT, None),
    ];
    let class = ImmutableClassDef::new(
        GREETER,
        AccessFlags::PUBLIC | AccessFlags::ABSTRACT,
        Some(OBJECT),
        Vec::new(),
        None,
        Vec::new(),
        Vec::new(),
        methods,
    );
    let dex = write_and_read(&ImmutableDexFile::new(Opcodes::default(), vec![class]));
    let read = ImmutableClassDef::of(dex.classes().next().unwrap().unwrap().as_ref()).unwrap();
    let signatures: Vec<String> = read
        .virtual_methods
        .iter()
        .map(|m| format!("{}({}){}", m.name, m.parameters.iter().map(|p| p.parameter_type.as_str()).collect::<String>(), m.return_type))
        .collect();
    assert_eq!(signatures, vec!["a()I", "a()V", "a(I)V", "a(J)V", "b()V"].into_iter().map(String::from).collect::<Vec<_>>());
}

#[test]
fn hidden_api_flags_are_kept_per_class() {
    let mut restricted = ImmutableField::new(GREETER, "secret", "I", AccessFlags::PRIVATE);
    restricted.hidden_api_restrictions =
        Some(HiddenApiRestrictions::new(HiddenApiRestriction::Blacklist, HiddenApiDomain::CORE_PLATFORM_API));
    let open = ImmutableField::new(GREETER, "value", "I", AccessFlags::PRIVATE);
    let greeter = ImmutableClassDef::new(GREETER, AccessFlags::PUBLIC, Some(OBJECT), Vec::new(), None, Vec::new(), vec![restricted, open], Vec::new());
    let plain = ImmutableClassDef::new(
        "Lcom/example/Plain;",
        AccessFlags::PUBLIC,
        Some(OBJECT),
        Vec::new(),
        None,
        Vec::new(),
        vec![ImmutableField::new("Lcom/example/Plain;", "x", "I", AccessFlags::PUBLIC)],
        Vec::new(),
    );
    let dex = write_and_read(&ImmutableDexFile::new(Opcodes::default(), vec![greeter, plain]));
    let read = ImmutableDexFile::of(&dex).unwrap();

    let greeter = read.class(GREETER).unwrap();
    assert_eq!(
        greeter.instance_fields[0].hidden_api_restrictions,
        Some(HiddenApiRestrictions::new(HiddenApiRestriction::Blacklist, HiddenApiDomain::CORE_PLATFORM_API))
    );
    // members of a restricted class without flags of their own read back as whitelisted
    assert_eq!(
        greeter.instance_fields[1].hidden_api_restrictions,
        Some(HiddenApiRestrictions::new(HiddenApiRestriction::Whitelist, HiddenApiDomain::empty()))
    );
    let plain = read.class("Lcom/example/Plain;").unwrap();
    assert_eq!(plain.instance_fields[0].hidden_api_restrictions, None);
}

#[test]
fn classes_follow_their_supertypes() {
    let child = ImmutableClassDef::new("LA;", AccessFlags::PUBLIC, Some("LZ;"), Vec::new(), None, Vec::new(), Vec::new(), Vec::new());
    let parent = ImmutableClassDef::new("LZ;", AccessFlags::PUBLIC, Some(OBJECT), Vec::new(), None, Vec::new(), Vec::new(), Vec::new());
    let dex = write_and_read(&ImmutableDexFile::new(Opcodes::default(), vec![child, parent]));
    let names: Vec<String> = dex.classes().map(|c| c.unwrap().type_name().unwrap()).collect();
    assert_eq!(names, vec!["LZ;".to_string(), "LA;".to_string()]);
}

#[test]
fn call_sites_and_method_handles_read_back() {
    let bootstrap = MethodHandleRef::new(
        MethodHandleType::InvokeStatic,
        MethodHandleMember::Method(MethodRef::new(
            "Ljava/lang/invoke/LambdaMetafactory;",
            "metafactory",
            &[
                "Ljava/lang/invoke/MethodHandles$Lookup;",
                STRING,
                "Ljava/lang/invoke/MethodType;",
                "Ljava/lang/invoke/MethodType;",
                "Ljava/lang/invoke/MethodHandle;",
                "Ljava/lang/invoke/MethodType;",
            ],
            "Ljava/lang/invoke/CallSite;",
        )),
    )
    .unwrap();
    let target = MethodHandleRef::new(
        MethodHandleType::InvokeStatic,
        MethodHandleMember::Method(MethodRef::new(GREETER, "lambda$run$0", &[], "V")),
    )
    .unwrap();
    let call_site = CallSiteRef {
        method_handle: bootstrap,
        method_name: "run".to_string(),
        method_proto: MethodProtoRef::new(&[], "Ljava/lang/Runnable;"),
        extra_arguments: vec![
            EncodedValue::MethodType(MethodProtoRef::new(&[], "V")),
            EncodedValue::MethodHandle(target.clone()),
            EncodedValue::MethodType(MethodProtoRef::new(&[], "V")),
        ],
    };
    let code = ImmutableMethodImplementation::new(
        1,
        vec![
            Instruction::Format35c { opcode: op("invoke-custom"), registers: vec![], reference: Reference::CallSite(call_site) },
            Instruction::Format21c { opcode: op("const-method-handle"), register_a: 0, reference: Reference::MethodHandle(target) },
            Instruction::Format10x { opcode: op("return-void") },
        ],
    );
    let method = ImmutableMethod::new(GREETER, "run", &[], "V", AccessFlags::PUBLIC | AccessFlags::STATIC, Some(code));
    let class = ImmutableClassDef::new(GREETER, AccessFlags::PUBLIC, Some(OBJECT), Vec::new(), None, Vec::new(), Vec::new(), vec![method]);
    let original = ImmutableDexFile::new(Opcodes::default(), vec![class]);

    let read = ImmutableDexFile::of(&write_and_read(&original)).unwrap();
    assert_eq!(read.classes, original.classes);
}

#[test]
fn truncated_files_are_rejected() {
    let builder = DexBuilder::new(Opcodes::default());
    builder.add_class_def(&greeter_class()).unwrap();
    builder.finalize().unwrap();
    let mut bytes = builder.write().unwrap();
    bytes.truncate(bytes.len() / 2);
    let e = DexBackedDexFile::from_bytes(bytes).unwrap_err();
    assert_eq!(e.kind(), DexErrorKind::Decode);
}
