// Pluggable bytecode editing backend.
//
// The engine depends on these traits instead of a concrete class-file
// library, so the matching/injection policy is testable without any real
// bytecode and the backend can be swapped (javassist-style source injection,
// raw bytecode patching, or a recording fake in tests).

use thiserror::Error;

use crate::class_matcher::ClassDescriptor;
use crate::injection::MethodSignature;

/// Errors surfaced by a bytecode editing backend.
///
/// These are structural errors against a specific class; the engine recovers
/// from all of them locally (logged, never propagated to the call site).
#[derive(Debug, Error)]
pub enum EditError {
    #[error("malformed method signature: {0}")]
    MalformedSignature(String),

    #[error("unresolved symbol referenced by injected code: {0}")]
    UnresolvedSymbol(String),

    #[error("class file could not be opened for editing: {0}")]
    Unreadable(String),

    #[error("backend failure: {0}")]
    Backend(String),
}

/// Factory for per-class editing sessions.
pub trait BytecodeEditor: Send + Sync {
    /// Opens an editing session over one class's bytecode.
    fn open(
        &self,
        descriptor: &ClassDescriptor,
        bytecode: &[u8],
    ) -> Result<Box<dyn ClassEditor>, EditError>;
}

/// One in-progress editing session over a single class.
///
/// Edits accumulate in the session and only become visible when `commit`
/// succeeds; a dropped session leaves the original bytecode untouched. The
/// engine relies on this to discard a rule's partial edits when a later
/// injection of the same rule fails.
pub trait ClassEditor {
    /// Whether the class declares a method with the given signature.
    fn has_method(&self, signature: &MethodSignature) -> bool;

    /// Inserts code to run before the method body.
    fn insert_before(&mut self, signature: &MethodSignature, code: &str) -> Result<(), EditError>;

    /// Inserts code to run after the method body.
    fn insert_after(&mut self, signature: &MethodSignature, code: &str) -> Result<(), EditError>;

    /// Replaces the method body entirely.
    fn replace_body(&mut self, signature: &MethodSignature, code: &str) -> Result<(), EditError>;

    /// Encodes the edited class back to bytecode.
    fn commit(self: Box<Self>) -> Result<Vec<u8>, EditError>;
}
