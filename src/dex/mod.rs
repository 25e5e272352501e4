//! Reading, rewriting and writing of Android dex files.
//!
//! [`backed`] decodes a dex image lazily, [`builder`] writes one from any
//! implementation of the [`model`] traits, and [`rewriter`] sits between the
//! two to transform classes on the way through.

#[macro_use]
pub mod error;

pub mod leb;
pub mod buffer;
pub mod counted_list;
pub mod raw;
pub mod opcode_format;
pub(crate) mod opcodes;
pub mod reference;
pub mod encoded_values;
pub mod instructions;
pub mod model;
pub mod immutable;
pub mod backed;
pub mod builder;
pub mod rewriter;
pub mod class_path;

pub use backed::DexBackedDexFile;
pub use builder::DexBuilder;
pub use class_path::{ClassPath, ClassProvider, DexClassProvider};
pub use error::{DexError, DexErrorKind};
pub use immutable::{ImmutableAnnotation, ImmutableClassDef, ImmutableDexFile, ImmutableField, ImmutableMethod, ImmutableMethodImplementation};
pub use model::{Annotation, ClassDef, DexFile, Field, Method, MethodImplementation};
pub use opcode_format::Opcodes;
pub use rewriter::{DefaultRewriterModule, DexRewriter, Rewriter, RewriterModule};
