//! Handler registry for resolving readers, writers and context providers
//! by reference.
//!
//! References have the form `namespace:name`. Besides explicitly
//! registered handlers, two namespaces are resolved on the fly:
//!
//! - `exec:<command>` builds an [`ExecReader`] or [`ExecWriter`]
//! - `file:<path>` builds a [`FileWriter`]
//!
//! Embedding applications register their own handlers next to the
//! built-ins and hand the registry to [`crate::cli::run_with_registry`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::RegistryError;
use crate::handlers::builtin::{
    EmptyContext, EmptyWriter, ExecReader, ExecWriter, FileWriter, LogReader, NoopReader,
    SettingsContext,
};
use crate::handlers::{ContextProvider, Reader, Writer};

const EXEC_NAMESPACE: &str = "exec";
const FILE_NAMESPACE: &str = "file";

/// Splits a reference into namespace and name.
///
/// # Errors
///
/// Returns `InvalidReference` if either side of the `:` is missing.
pub fn parse_reference(reference: &str) -> Result<(&str, &str), RegistryError> {
    match reference.split_once(':') {
        Some((namespace, name)) if !namespace.is_empty() && !name.is_empty() => {
            Ok((namespace, name))
        }
        _ => Err(RegistryError::InvalidReference(reference.to_string())),
    }
}

/// Named readers, writers and context providers.
#[derive(Default)]
pub struct HandlerRegistry {
    readers: HashMap<String, Reader>,
    writers: HashMap<String, Arc<dyn Writer>>,
    contexts: HashMap<String, Arc<dyn ContextProvider>>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the `builtin:` handlers.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.readers.insert("builtin:log".to_string(), Reader::blocking(LogReader));
        registry.readers.insert("builtin:noop".to_string(), Reader::blocking(NoopReader));
        registry
            .writers
            .insert("builtin:empty".to_string(), Arc::new(EmptyWriter));
        registry
            .contexts
            .insert("builtin:settings".to_string(), Arc::new(SettingsContext));
        registry
            .contexts
            .insert("builtin:empty".to_string(), Arc::new(EmptyContext));
        registry
    }

    /// Registers a reader.
    ///
    /// # Errors
    ///
    /// Returns `InvalidReference` for malformed references and `Duplicate`
    /// if the reference is taken.
    pub fn register_reader(
        &mut self,
        reference: impl Into<String>,
        reader: Reader,
    ) -> Result<(), RegistryError> {
        insert_unique(&mut self.readers, "reader", reference.into(), reader)
    }

    /// Registers a writer.
    ///
    /// # Errors
    ///
    /// Returns `InvalidReference` for malformed references and `Duplicate`
    /// if the reference is taken.
    pub fn register_writer(
        &mut self,
        reference: impl Into<String>,
        writer: Arc<dyn Writer>,
    ) -> Result<(), RegistryError> {
        insert_unique(&mut self.writers, "writer", reference.into(), writer)
    }

    /// Registers a context provider.
    ///
    /// # Errors
    ///
    /// Returns `InvalidReference` for malformed references and `Duplicate`
    /// if the reference is taken.
    pub fn register_context(
        &mut self,
        reference: impl Into<String>,
        provider: Arc<dyn ContextProvider>,
    ) -> Result<(), RegistryError> {
        insert_unique(&mut self.contexts, "context provider", reference.into(), provider)
    }

    /// Resolves a reader reference.
    ///
    /// # Errors
    ///
    /// Returns `InvalidReference` for malformed references or a blank
    /// `exec:` command, and `NotFound` for unknown references.
    pub fn reader(&self, reference: &str) -> Result<Reader, RegistryError> {
        let (namespace, name) = parse_reference(reference)?;
        if namespace == EXEC_NAMESPACE {
            let reader = ExecReader::new(name)
                .map_err(|_| RegistryError::InvalidReference(reference.to_string()))?;
            return Ok(Reader::concurrent(reader));
        }

        self.readers
            .get(reference)
            .cloned()
            .ok_or_else(|| not_found("reader", reference))
    }

    /// Resolves a writer reference.
    ///
    /// # Errors
    ///
    /// Returns `InvalidReference` for malformed references or a blank
    /// `exec:` command, and `NotFound` for unknown references.
    pub fn writer(&self, reference: &str) -> Result<Arc<dyn Writer>, RegistryError> {
        let (namespace, name) = parse_reference(reference)?;
        match namespace {
            EXEC_NAMESPACE => {
                let writer = ExecWriter::new(name)
                    .map_err(|_| RegistryError::InvalidReference(reference.to_string()))?;
                Ok(Arc::new(writer))
            }
            FILE_NAMESPACE => Ok(Arc::new(FileWriter::new(name))),
            _ => self
                .writers
                .get(reference)
                .cloned()
                .ok_or_else(|| not_found("writer", reference)),
        }
    }

    /// Resolves a context provider reference.
    ///
    /// # Errors
    ///
    /// Returns `InvalidReference` for malformed references and `NotFound`
    /// for unknown references.
    pub fn context(&self, reference: &str) -> Result<Arc<dyn ContextProvider>, RegistryError> {
        parse_reference(reference)?;
        self.contexts
            .get(reference)
            .cloned()
            .ok_or_else(|| not_found("context provider", reference))
    }

    /// Registered reader references, sorted.
    pub fn reader_names(&self) -> Vec<&str> {
        sorted_keys(&self.readers)
    }

    /// Registered writer references, sorted.
    pub fn writer_names(&self) -> Vec<&str> {
        sorted_keys(&self.writers)
    }

    /// Registered context provider references, sorted.
    pub fn context_names(&self) -> Vec<&str> {
        sorted_keys(&self.contexts)
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("readers", &self.reader_names())
            .field("writers", &self.writer_names())
            .field("contexts", &self.context_names())
            .finish()
    }
}

fn insert_unique<T>(
    map: &mut HashMap<String, T>,
    kind: &str,
    reference: String,
    value: T,
) -> Result<(), RegistryError> {
    parse_reference(&reference)?;
    if map.contains_key(&reference) {
        return Err(RegistryError::Duplicate {
            kind: kind.to_string(),
            reference,
        });
    }
    map.insert(reference, value);
    Ok(())
}

fn not_found(kind: &str, reference: &str) -> RegistryError {
    RegistryError::NotFound {
        kind: kind.to_string(),
        reference: reference.to_string(),
    }
}

fn sorted_keys<T>(map: &HashMap<String, T>) -> Vec<&str> {
    let mut keys: Vec<&str> = map.keys().map(String::as_str).collect();
    keys.sort_unstable();
    keys
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::{blocking_reader_fn, context_fn, Context, ReaderCapabilities};

    #[test]
    fn test_parse_reference() {
        assert_eq!(parse_reference("builtin:log").expect("valid"), ("builtin", "log"));
        assert_eq!(
            parse_reference("exec:echo a:b").expect("valid"),
            ("exec", "echo a:b")
        );
        assert!(matches!(
            parse_reference("nonamespace"),
            Err(RegistryError::InvalidReference(_))
        ));
        assert!(parse_reference(":log").is_err());
        assert!(parse_reference("builtin:").is_err());
    }

    #[test]
    fn test_builtins_resolve() {
        let registry = HandlerRegistry::with_builtins();
        assert!(!registry.reader("builtin:log").expect("log reader").is_concurrent());
        assert!(registry.reader("builtin:noop").is_ok());
        assert!(registry.writer("builtin:empty").is_ok());
        assert!(registry.context("builtin:settings").expect("settings").wants_settings());
        assert!(registry.context("builtin:empty").is_ok());
        assert_eq!(registry.reader_names(), vec!["builtin:log", "builtin:noop"]);
    }

    #[test]
    fn test_dynamic_namespaces() {
        let registry = HandlerRegistry::new();
        assert!(registry.reader("exec:echo").expect("exec reader").is_concurrent());
        assert!(registry.writer("exec:seq 1").is_ok());
        assert!(registry.writer("file:/tmp/ids.txt").is_ok());
        assert!(matches!(
            registry.reader("exec:   "),
            Err(RegistryError::InvalidReference(_))
        ));
        // `file:` is writer-only.
        assert!(matches!(
            registry.reader("file:/tmp/ids.txt"),
            Err(RegistryError::NotFound { .. })
        ));
    }

    #[test]
    fn test_register_custom_handlers() {
        let mut registry = HandlerRegistry::with_builtins();
        let reader = blocking_reader_fn(ReaderCapabilities::ALL, |_, _| Ok(()));
        registry
            .register_reader("crawler:fetch", reader.clone())
            .expect("register");
        registry
            .register_context("crawler:pool", context_fn(false, |_| Ok(Context::new())))
            .expect("register");

        let resolved = registry.reader("crawler:fetch").expect("resolve");
        assert_eq!(resolved.capabilities(), ReaderCapabilities::ALL);
        assert!(registry.context("crawler:pool").is_ok());

        assert!(matches!(
            registry.register_reader("crawler:fetch", reader.clone()),
            Err(RegistryError::Duplicate { .. })
        ));
        assert!(matches!(
            registry.register_reader("fetch", reader),
            Err(RegistryError::InvalidReference(_))
        ));
    }

    #[test]
    fn test_unknown_reference() {
        let registry = HandlerRegistry::with_builtins();
        let err = match registry.writer("crawler:missing") {
            Err(e) => e,
            Ok(_) => panic!("expected a lookup failure"),
        };
        assert!(err.to_string().contains("crawler:missing"));
    }
}
