use crate::dex::model::{ClassDef, DexFile};
use crate::dex::{DexBackedDexFile, DexBuilder, DexErrorKind, Opcodes};

use super::greeter_class;

const CLASS_DEFS_OFF: usize = 0x64;
const ANNOTATIONS_OFF: usize = 20;
const CLASS_DATA_OFF: usize = 24;

fn greeter_bytes() -> Vec<u8> {
    let builder = DexBuilder::new(Opcodes::default());
    builder.add_class_def(&greeter_class()).unwrap();
    builder.finalize().unwrap();
    builder.write().unwrap()
}

fn read_u4(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

/// Points one offset field of the first class_def at `offset`.
fn patch_class_def(bytes: &mut [u8], field: usize, offset: u32) {
    let class_def = read_u4(bytes, CLASS_DEFS_OFF) as usize;
    bytes[class_def + field..class_def + field + 4].copy_from_slice(&offset.to_le_bytes());
}

/// Appends `item` at the end of the file, keeps file_size in step and
/// returns where it landed.
fn append(bytes: &mut Vec<u8>, item: &[u8]) -> u32 {
    while bytes.len() % 4 != 0 {
        bytes.push(0);
    }
    let offset = bytes.len() as u32;
    bytes.extend_from_slice(item);
    let size = bytes.len() as u32;
    bytes[32..36].copy_from_slice(&size.to_le_bytes());
    offset
}

fn class_error(bytes: Vec<u8>) -> DexErrorKind {
    let dex = DexBackedDexFile::from_bytes(bytes).unwrap();
    let result = dex.classes().next().unwrap().and_then(|class| {
        for method in class.direct_methods().chain(class.virtual_methods()) {
            method?;
        }
        Ok(())
    });
    result.unwrap_err().kind()
}

#[test]
fn oversized_class_data_counts_are_rejected() {
    let mut bytes = greeter_bytes();
    // no fields, no virtual methods, 0x7fffffff direct methods
    let class_data = append(&mut bytes, &[0x00, 0x00, 0xff, 0xff, 0xff, 0xff, 0x07, 0x00]);
    patch_class_def(&mut bytes, CLASS_DATA_OFF, class_data);
    assert_eq!(class_error(bytes), DexErrorKind::Decode);
}

#[test]
fn class_data_counts_that_sum_past_u32_are_rejected() {
    let mut bytes = greeter_bytes();
    let huge = [0xff, 0xff, 0xff, 0xff, 0x07];
    let mut class_data = Vec::new();
    for _ in 0..4 {
        class_data.extend_from_slice(&huge);
    }
    let offset = append(&mut bytes, &class_data);
    patch_class_def(&mut bytes, CLASS_DATA_OFF, offset);
    assert_eq!(class_error(bytes), DexErrorKind::Decode);
}

#[test]
fn oversized_annotation_directories_are_rejected() {
    let mut bytes = greeter_bytes();
    let mut directory = Vec::new();
    for value in [0u32, 0x2000_0000, 1, 0] {
        directory.extend_from_slice(&value.to_le_bytes());
    }
    let offset = append(&mut bytes, &directory);
    patch_class_def(&mut bytes, ANNOTATIONS_OFF, offset);
    assert_eq!(class_error(bytes), DexErrorKind::Decode);
}

#[test]
fn offsets_past_the_end_are_rejected() {
    for field in [ANNOTATIONS_OFF, CLASS_DATA_OFF] {
        let mut bytes = greeter_bytes();
        let past_end = bytes.len() as u32 + 0x100;
        patch_class_def(&mut bytes, field, past_end);
        assert_eq!(class_error(bytes), DexErrorKind::Decode, "class_def field {}", field);
    }
}

#[test]
fn well_formed_file_still_reads() {
    let dex = DexBackedDexFile::from_bytes(greeter_bytes()).unwrap();
    let class = dex.classes().next().unwrap().unwrap();
    assert_eq!(class.direct_methods().count(), 1);
    assert_eq!(class.virtual_methods().count(), 1);
}
