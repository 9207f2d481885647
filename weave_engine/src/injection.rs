// Injection specifications: what code gets inserted where.
//
// A rule carries an ordered list of MethodInjection specs. Each names a
// target method, an insertion point relative to its body, and the fragment
// of code to inject. Fragments render to backend source text at transform
// time so they can interpolate per-class values (the class being rewritten,
// configured header names, and so on).

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::class_matcher::ClassDescriptor;

// ============================================================================
// TARGET SIGNATURES AND INSERTION POINTS
// ============================================================================

/// JVM-style method signature: simple name plus type descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodSignature {
    /// Method name, e.g. `invokeChannelRead`.
    pub name: String,

    /// Type descriptor, e.g. `(Ljava/lang/Object;)V`.
    pub descriptor: String,
}

impl MethodSignature {
    pub fn new(name: impl Into<String>, descriptor: impl Into<String>) -> Self {
        MethodSignature {
            name: name.into(),
            descriptor: descriptor.into(),
        }
    }
}

impl fmt::Display for MethodSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.name, self.descriptor)
    }
}

/// Where injected code runs relative to the target method body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsertionPoint {
    Before,
    After,
    Replace,
}

impl fmt::Display for InsertionPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InsertionPoint::Before => write!(f, "before"),
            InsertionPoint::After => write!(f, "after"),
            InsertionPoint::Replace => write!(f, "replace"),
        }
    }
}

// ============================================================================
// INJECTED FRAGMENTS
// ============================================================================

/// A fragment of code to inject, rendered at transform time.
///
/// The render closure receives the descriptor of the class being rewritten.
/// Fragments are shared between the rule registry and the engine, hence Arc.
#[derive(Clone)]
pub struct InjectedFragment {
    label: String,
    render: Arc<dyn Fn(&ClassDescriptor) -> String + Send + Sync>,
}

impl InjectedFragment {
    /// Fragment with fixed code text.
    pub fn fixed(label: impl Into<String>, code: impl Into<String>) -> Self {
        let code = code.into();
        InjectedFragment {
            label: label.into(),
            render: Arc::new(move |_| code.clone()),
        }
    }

    /// Fragment rendered per class.
    pub fn templated<F>(label: impl Into<String>, render: F) -> Self
    where
        F: Fn(&ClassDescriptor) -> String + Send + Sync + 'static,
    {
        InjectedFragment {
            label: label.into(),
            render: Arc::new(render),
        }
    }

    /// Diagnostic label, used in logs when application fails.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Renders the fragment's code for a specific class.
    pub fn render(&self, descriptor: &ClassDescriptor) -> String {
        (self.render)(descriptor)
    }
}

impl fmt::Debug for InjectedFragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InjectedFragment")
            .field("label", &self.label)
            .finish()
    }
}

/// One code injection against one target method.
#[derive(Debug, Clone)]
pub struct MethodInjection {
    pub signature: MethodSignature,
    pub insertion_point: InsertionPoint,
    pub fragment: InjectedFragment,
}

impl MethodInjection {
    pub fn new(
        signature: MethodSignature,
        insertion_point: InsertionPoint,
        fragment: InjectedFragment,
    ) -> Self {
        MethodInjection {
            signature,
            insertion_point,
            fragment,
        }
    }
}

// ============================================================================
// FRAGMENT GUARD
// ============================================================================

/// Uniform never-propagate boundary around injected fragments.
///
/// Before/After fragments run inside application call paths, so a fault in
/// one fragment must be swallowed: it must not reach the instrumented call
/// site and must not prevent sibling fragments or the original body from
/// running. The guard wraps rendered fragment code in the backend's
/// catch-all form in one place, instead of each rule hand-rolling try/catch.
#[derive(Debug, Clone)]
pub struct FragmentGuard {
    /// Statement evaluated with the caught throwable bound to `$e`.
    on_error: String,
}

impl FragmentGuard {
    pub fn new(on_error: impl Into<String>) -> Self {
        FragmentGuard {
            on_error: on_error.into(),
        }
    }

    /// Wraps fragment code so a thrown error is swallowed.
    ///
    /// Replace fragments are not guarded: they are the method body and own
    /// their error handling.
    pub fn wrap(&self, label: &str, code: &str) -> String {
        format!(
            "try {{\n{code}\n}} catch (Throwable $e) {{ /* {label} */ {on_error} }}",
            code = code,
            label = label,
            on_error = self.on_error,
        )
    }
}

impl Default for FragmentGuard {
    fn default() -> Self {
        FragmentGuard::new("")
    }
}
