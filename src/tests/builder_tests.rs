use std::collections::HashSet;
use std::thread;

use crate::dex::model::{AccessFlags, DexFile};
use crate::dex::reference::{FieldRef, MethodRef, RefIndexer};
use crate::dex::{DexBackedDexFile, DexBuilder, DexErrorKind, ImmutableClassDef, ImmutableField, Opcodes};

use super::OBJECT;

#[test]
fn interning_from_many_threads() {
    let builder = DexBuilder::new(Opcodes::default());
    thread::scope(|scope| {
        for worker in 0..4 {
            let builder = &builder;
            scope.spawn(move || {
                // overlapping ranges so most strings are interned by several threads
                for i in worker * 50..worker * 50 + 100 {
                    let first = builder.intern_string(&format!("s{}", i)).unwrap();
                    let second = builder.intern_string(&format!("s{}", i)).unwrap();
                    assert_eq!(first, second);
                }
            });
        }
    });
    builder.finalize().unwrap();
    assert_eq!(builder.strings().len(), 250);

    let mut names: Vec<String> = (0..250).map(|i| format!("s{}", i)).collect();
    names.sort();
    let indices: Vec<u32> = names.iter().map(|name| builder.string_index(name).unwrap()).collect();
    assert_eq!(indices, (0..250).collect::<Vec<u32>>());
}

#[test]
fn classes_added_from_many_threads() {
    let builder = DexBuilder::new(Opcodes::default());
    thread::scope(|scope| {
        for worker in 0..4 {
            let builder = &builder;
            scope.spawn(move || {
                for i in 0..10 {
                    let name = format!("Lcom/example/C{}_{};", worker, i);
                    let class = ImmutableClassDef::new(&name, AccessFlags::PUBLIC, Some(OBJECT), Vec::new(), None, Vec::new(), Vec::new(), Vec::new());
                    builder.add_class_def(&class).unwrap();
                }
            });
        }
    });
    assert_eq!(builder.class_count(), 40);
    builder.finalize().unwrap();

    let dex = DexBackedDexFile::from_bytes(builder.write().unwrap()).unwrap();
    let names: HashSet<String> = dex.classes().map(|c| c.unwrap().type_name().unwrap()).collect();
    assert_eq!(names.len(), 40);
    assert!(names.contains("Lcom/example/C3_9;"));
}

#[test]
fn method_indices_sort_by_class_then_name() {
    let builder = DexBuilder::new(Opcodes::default());
    let bar = MethodRef::new("LC;", "bar", &[], "V");
    let foo = MethodRef::new("LA;", "foo", &[], "V");
    let baz = MethodRef::new("LB;", "baz", &[], "V");
    for method in [&bar, &foo, &baz] {
        builder.intern_method(method).unwrap();
    }
    builder.finalize().unwrap();
    assert_eq!(builder.method_index(&foo).unwrap(), 0);
    assert_eq!(builder.method_index(&baz).unwrap(), 1);
    assert_eq!(builder.method_index(&bar).unwrap(), 2);
}

#[test]
fn field_indices_sort_by_class_name_and_type() {
    let builder = DexBuilder::new(Opcodes::default());
    let fields = [
        FieldRef::new("LB;", "a", "I"),
        FieldRef::new("LA;", "b", "I"),
        FieldRef::new("LA;", "a", "J"),
        FieldRef::new("LA;", "a", "I"),
    ];
    for field in &fields {
        builder.intern_field(field).unwrap();
    }
    builder.finalize().unwrap();
    let indices: Vec<u32> = fields.iter().map(|f| builder.field_index(f).unwrap()).collect();
    assert_eq!(indices, vec![3, 2, 1, 0]);
}

#[test]
fn referenced_types_are_interned_with_their_strings() {
    let builder = DexBuilder::new(Opcodes::default());
    builder.intern_method(&MethodRef::new("Lcom/example/Greeter;", "greet", &["Ljava/lang/String;"], "V")).unwrap();
    builder.finalize().unwrap();
    for descriptor in ["Lcom/example/Greeter;", "Ljava/lang/String;", "V"] {
        assert!(builder.type_index(descriptor).is_ok(), "{} missing", descriptor);
        assert!(builder.string_index(descriptor).is_ok());
    }
    // the shorty of (Ljava/lang/String;)V
    assert!(builder.string_index("VL").is_ok());
}

#[test]
fn writing_requires_finalize() {
    let builder = DexBuilder::new(Opcodes::default());
    builder.intern_string("pending").unwrap();
    assert_eq!(builder.write().unwrap_err().kind(), DexErrorKind::IllegalState);
    builder.finalize().unwrap();
    assert!(builder.write().is_ok());
}

#[test]
fn unknown_references_fail_to_index() {
    let builder = DexBuilder::new(Opcodes::default());
    builder.intern_string("known").unwrap();
    builder.finalize().unwrap();
    assert!(builder.string_index("known").is_ok());
    assert!(builder.string_index("unknown").is_err());
    assert!(builder.type_index("LMissing;").is_err());
}

#[test]
fn classes_cannot_be_added_after_finalize() {
    let builder = DexBuilder::new(Opcodes::default());
    builder.finalize().unwrap();
    let class = ImmutableClassDef::new("LA;", AccessFlags::PUBLIC, Some(OBJECT), Vec::new(), None, Vec::new(), Vec::new(), Vec::new());
    assert_eq!(builder.add_class_def(&class).unwrap_err().kind(), DexErrorKind::IllegalState);
}

#[test]
fn rejected_duplicates_leave_nothing_behind() {
    let builder = DexBuilder::new(Opcodes::default());
    let class = ImmutableClassDef::new("LA;", AccessFlags::PUBLIC, Some(OBJECT), Vec::new(), None, Vec::new(), Vec::new(), Vec::new());
    builder.add_class_def(&class).unwrap();

    let fields = vec![ImmutableField::new("LA;", "orphan", "Lcom/example/Orphan;", AccessFlags::PUBLIC)];
    let second = ImmutableClassDef::new("LA;", AccessFlags::PUBLIC, Some(OBJECT), Vec::new(), Some("A.java"), Vec::new(), fields, Vec::new());
    assert_eq!(builder.add_class_def(&second).unwrap_err().kind(), DexErrorKind::IllegalState);
    builder.finalize().unwrap();

    for string in ["orphan", "Lcom/example/Orphan;", "A.java"] {
        assert!(builder.string_index(string).is_err(), "{} was interned", string);
    }
    assert_eq!(builder.class_count(), 1);
}

#[test]
fn concurrent_duplicates_keep_one_definition() {
    let builder = DexBuilder::new(Opcodes::default());
    let rejected = thread::scope(|scope| {
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let builder = &builder;
                scope.spawn(move || {
                    let class = ImmutableClassDef::new("LA;", AccessFlags::PUBLIC, Some(OBJECT), Vec::new(), None, Vec::new(), Vec::new(), Vec::new());
                    builder.add_class_def(&class).is_err()
                })
            })
            .collect();
        workers.into_iter().map(|worker| worker.join().unwrap()).filter(|rejected| *rejected).count()
    });
    assert_eq!(rejected, 3);
    assert_eq!(builder.class_count(), 1);
}
