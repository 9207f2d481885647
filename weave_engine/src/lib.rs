// Class transformation policy engine.
//
// This crate holds the policy layer of the instrumentation agent: which
// classes get rewritten, what gets injected into them, and how failures are
// contained. It deliberately knows nothing about class-file encodings; the
// actual bytecode editing is performed by a pluggable `BytecodeEditor`
// backend supplied by the host.

pub mod class_matcher;
pub mod editor;
pub mod engine;
pub mod injection;
pub mod rule;

pub use class_matcher::{ClassDescriptor, ClassMatcher};

pub use editor::{BytecodeEditor, ClassEditor, EditError};

pub use engine::{RuleStats, TransformOutcome, TransformationEngine};

pub use injection::{
    FragmentGuard, InjectedFragment, InsertionPoint, MethodInjection, MethodSignature,
};

pub use rule::{InjectionRule, RegistrationError, RuleId};
