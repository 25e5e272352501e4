use std::fmt;

macro_rules! err {
    ($base:ident, $msg:literal) => {
        DexError::with_context($base, $msg.to_string())
    };
    ($base:ident, $fmtstr:literal, $($args:tt)*) => {
        DexError::with_context($base, format!($fmtstr, $($args)*))
    };
    ($msg:literal) => {
        DexError::new($msg)
    };
    ($fmtstr:literal, $($args:tt)*) => {
        DexError::new(&format!($fmtstr, $($args)*))
    };
}


#[macro_export]
macro_rules! fail {
    ($msg:literal) => {
        return Err(DexError::new($msg))
    };
    (($msg:literal), ($context:literal)) => {
        return Err(DexError::with_context(DexError::new($msg), $context.to_string()))
    };
    ($fmtstr:literal, $($args:tt)*) => {
        return Err(DexError::new(&format!($fmtstr, $($args)*)))
    };
    (($fmtstr:literal, $($args:tt)*), ($context:literal)) => {
        return Err(DexError::with_context(DexError::new(&format!($fmtstr, $($args)*)), $context.to_string()))
    };
    (($fmtstr:literal, $($args:tt)*), ($contextfmt:literal, $($contextargs:tt)*)) => {
        return Err(DexError::with_context(DexError::new(&format!($fmtstr, $($args)*)), format!($contextfmt, $($contextargs)*)))
    };
}


/// Broad classes of failure. Callers that only care about "did it work"
/// can ignore this; tooling that retries with another input or reports
/// missing classes can branch on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DexErrorKind
{
    /// The bytes do not form a valid structure, or a value does not fit
    /// the field it is being encoded into.
    Decode,
    /// An API was used out of order, e.g. interning into a finalized builder.
    IllegalState,
    /// A class lookup went through every provider without a match.
    UnresolvedClass,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DexError
{
    kind: DexErrorKind,
    msg: String,
    contexts: Vec<String>,
}

impl DexError
{
    pub(crate) fn new(msg: &str) -> Self
    {
        DexError {
            kind: DexErrorKind::Decode,
            msg: msg.to_string(),
            contexts: Vec::new(),
        }
    }

    pub(crate) fn illegal_state(msg: &str) -> Self
    {
        DexError {
            kind: DexErrorKind::IllegalState,
            msg: msg.to_string(),
            contexts: Vec::new(),
        }
    }

    pub(crate) fn unresolved_class(type_name: &str) -> Self
    {
        DexError {
            kind: DexErrorKind::UnresolvedClass,
            msg: format!("Could not resolve class {}", type_name),
            contexts: Vec::new(),
        }
    }

    pub(crate) fn with_context(base: DexError, context: String) -> Self
    {
        let mut contexts = base.contexts;
        contexts.push(context);
        DexError { kind: base.kind, msg: base.msg, contexts }
    }

    pub fn kind(&self) -> DexErrorKind
    {
        self.kind
    }

    pub fn message(&self) -> &str
    {
        &self.msg
    }

    pub fn contexts(&self) -> &[String]
    {
        &self.contexts
    }
}

impl fmt::Display for DexError
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}", self.msg)?;
        let mut connector = " for ";
        for context in &self.contexts
        {
            write!(f, "{}{}", connector, context)?;
            connector = " of ";
        }
        Ok(())
    }
}

impl std::error::Error for DexError {}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn display_chains_contexts()
    {
        let base = DexError::new("Unexpected end of stream");
        let e = err!(base, "method {}", "foo");
        let e = DexError::with_context(e, "class Lcom/example/Foo;".to_string());
        assert_eq!(e.to_string(), "Unexpected end of stream for method foo of class Lcom/example/Foo;");
        assert_eq!(e.kind(), DexErrorKind::Decode);
    }

    #[test]
    fn unresolved_class_names_type()
    {
        let e = DexError::unresolved_class("Lcom/example/Missing;");
        assert_eq!(e.kind(), DexErrorKind::UnresolvedClass);
        assert!(e.to_string().contains("Lcom/example/Missing;"));
    }

    #[test]
    fn fail_macro_returns_decode_error()
    {
        fn check(value: u32) -> Result<u32, DexError>
        {
            if value > 0xf
            {
                fail!("Invalid register: v{}. Must be between v0 and v15, inclusive.", value);
            }
            Ok(value)
        }
        assert!(check(3).is_ok());
        let e = check(16).unwrap_err();
        assert!(e.message().contains("v16"));
    }
}
