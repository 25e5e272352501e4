//! # dexlib
//!
//! A library for reading, rewriting and writing Android dex files.
//!
//! ```no_run
//!  use dexlib::dex::{DexBackedDexFile, DexBuilder, Opcodes};
//!  use std::path::Path;
//!
//!  let dex = DexBackedDexFile::from_file(Path::new("classes.dex")).unwrap();
//!  let builder = DexBuilder::new(Opcodes::default());
//!  builder.add_dex_file(&dex).unwrap();
//!  builder.finalize().unwrap();
//!  builder.write_to_file(Path::new("out.dex")).unwrap();
//! ```

pub mod dex;

#[cfg(test)]
mod tests;
