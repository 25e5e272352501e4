//! Class lookup across several dex files.

use std::collections::HashMap;
use std::sync::Arc;

use log::debug;

use crate::dex::error::DexError;
use crate::dex::model::{ClassDef, DexFile};

/// Something that may define classes by type descriptor.
pub trait ClassProvider: Send + Sync
{
    fn class_def(&self, type_name: &str) -> Option<Arc<dyn ClassDef>>;
}

/// The classes of one dex file, indexed by type. The first definition of a
/// type wins.
pub struct DexClassProvider
{
    classes: HashMap<String, Arc<dyn ClassDef>>,
}

impl DexClassProvider
{
    pub fn new(dex_file: &dyn DexFile) -> Result<DexClassProvider, DexError>
    {
        let mut classes = HashMap::with_capacity(dex_file.classes().len());
        for class in dex_file.classes()
        {
            let class = class?;
            classes.entry(class.type_name()?).or_insert(class);
        }
        Ok(DexClassProvider { classes })
    }

    pub fn len(&self) -> usize
    {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.classes.is_empty()
    }
}

impl ClassProvider for DexClassProvider
{
    fn class_def(&self, type_name: &str) -> Option<Arc<dyn ClassDef>>
    {
        self.classes.get(type_name).cloned()
    }
}

/// Providers searched in order.
#[derive(Default)]
pub struct ClassPath
{
    providers: Vec<Box<dyn ClassProvider>>,
}

impl ClassPath
{
    pub fn new(providers: Vec<Box<dyn ClassProvider>>) -> ClassPath
    {
        ClassPath { providers }
    }

    pub fn add_provider(&mut self, provider: Box<dyn ClassProvider>)
    {
        self.providers.push(provider);
    }

    /// The first definition of `type_name`, or an unresolved-class error.
    pub fn class_def(&self, type_name: &str) -> Result<Arc<dyn ClassDef>, DexError>
    {
        match self.providers.iter().find_map(|provider| provider.class_def(type_name))
        {
            Some(class) => Ok(class),
            None => {
                debug!("{} not found in {} providers", type_name, self.providers.len());
                Err(DexError::unresolved_class(type_name))
            }
        }
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::dex::error::DexErrorKind;
    use crate::dex::immutable::{ImmutableClassDef, ImmutableDexFile};
    use crate::dex::model::AccessFlags;
    use crate::dex::opcode_format::Opcodes;

    fn dex_with(types: &[&str]) -> ImmutableDexFile
    {
        let classes = types
            .iter()
            .map(|t| ImmutableClassDef::new(t, AccessFlags::PUBLIC, Some("Ljava/lang/Object;"), Vec::new(), None, Vec::new(), Vec::new(), Vec::new()))
            .collect();
        ImmutableDexFile::new(Opcodes::default(), classes)
    }

    #[test]
    fn providers_are_searched_in_order()
    {
        let mut first = dex_with(&["LA;"]);
        first.classes[0] = Arc::new(ImmutableClassDef::new("LA;", AccessFlags::FINAL, None, Vec::new(), None, Vec::new(), Vec::new(), Vec::new()));
        let path = ClassPath::new(vec![
            Box::new(DexClassProvider::new(&first).unwrap()),
            Box::new(DexClassProvider::new(&dex_with(&["LA;", "LB;"])).unwrap()),
        ]);
        assert_eq!(path.class_def("LA;").unwrap().access_flags(), AccessFlags::FINAL);
        assert_eq!(path.class_def("LB;").unwrap().type_name().unwrap(), "LB;");
    }

    #[test]
    fn missing_class_is_unresolved()
    {
        let path = ClassPath::new(vec![Box::new(DexClassProvider::new(&dex_with(&["LA;"])).unwrap())]);
        let e = path.class_def("LMissing;").err().unwrap();
        assert_eq!(e.kind(), DexErrorKind::UnresolvedClass);
        assert!(e.to_string().contains("LMissing;"));
    }
}
