// This module implements the matching component of injection rules, which
// determines whether a rule applies to a class presented for loading.
//
// Matching works purely on the class descriptor (name, superclass, declared
// interfaces) — the raw bytecode is never touched here, so a non-matching
// class costs a few string comparisons and nothing more. Predicates are pure
// and side-effect free, which makes their results cacheable by class name.

use serde::{Deserialize, Serialize};

// ============================================================================
// CLASS DESCRIPTOR
// ============================================================================

/// Identity of a class presented for loading.
///
/// Names are stored in dotted form (`io.netty.channel.Channel`); the
/// constructor normalizes the internal slash form (`io/netty/channel/Channel`)
/// that class-loading hooks typically report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassDescriptor {
    /// Fully qualified class name, dotted form.
    pub class_name: String,

    /// Fully qualified superclass name, if any.
    pub superclass: Option<String>,

    /// Fully qualified names of directly declared interfaces.
    pub interfaces: Vec<String>,
}

impl ClassDescriptor {
    /// Creates a descriptor, normalizing internal-form names.
    pub fn new(
        class_name: impl Into<String>,
        superclass: Option<String>,
        interfaces: Vec<String>,
    ) -> Self {
        ClassDescriptor {
            class_name: normalize(&class_name.into()),
            superclass: superclass.as_deref().map(normalize),
            interfaces: interfaces.iter().map(|i| normalize(i)).collect(),
        }
    }

    /// Descriptor for a class with no superclass or interfaces of interest.
    pub fn named(class_name: impl Into<String>) -> Self {
        Self::new(class_name, None, Vec::new())
    }

    /// Whether the class directly declares the given interface.
    pub fn implements(&self, interface: &str) -> bool {
        let interface = normalize(interface);
        self.interfaces.iter().any(|i| *i == interface)
    }
}

fn normalize(name: &str) -> String {
    name.replace('/', ".")
}

// ============================================================================
// CLASS MATCHER
// ============================================================================

/// Pure predicate over a [`ClassDescriptor`].
///
/// Matchers come from external rule tables (one per supported library), so
/// they are declarative and serializable rather than arbitrary closures.
/// Evaluation must not depend on other rules or on evaluation order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassMatcher {
    /// Class name equals the given name exactly.
    Named(String),
    /// Class name starts with the given prefix (package-level matching).
    Prefixed(String),
    /// Direct superclass equals the given name.
    Extends(String),
    /// Class directly declares the given interface.
    Implements(String),
    /// At least one of the nested matchers matches.
    AnyOf(Vec<ClassMatcher>),
    /// All of the nested matchers match.
    AllOf(Vec<ClassMatcher>),
    /// Matches nothing. Placeholder for rules that are registered but
    /// version-gated off.
    Nothing,
}

impl ClassMatcher {
    /// Evaluates this matcher against a class descriptor.
    pub fn matches(&self, descriptor: &ClassDescriptor) -> bool {
        match self {
            ClassMatcher::Named(name) => descriptor.class_name == normalize(name),
            ClassMatcher::Prefixed(prefix) => {
                descriptor.class_name.starts_with(&normalize(prefix))
            }
            ClassMatcher::Extends(name) => {
                descriptor.superclass.as_deref() == Some(normalize(name)).as_deref()
            }
            ClassMatcher::Implements(name) => descriptor.implements(name),
            ClassMatcher::AnyOf(inner) => inner.iter().any(|m| m.matches(descriptor)),
            ClassMatcher::AllOf(inner) => inner.iter().all(|m| m.matches(descriptor)),
            ClassMatcher::Nothing => false,
        }
    }

    /// Combines this matcher with another, requiring both.
    pub fn and(self, other: ClassMatcher) -> ClassMatcher {
        match self {
            ClassMatcher::AllOf(mut inner) => {
                inner.push(other);
                ClassMatcher::AllOf(inner)
            }
            first => ClassMatcher::AllOf(vec![first, other]),
        }
    }

    /// Combines this matcher with another, requiring either.
    pub fn or(self, other: ClassMatcher) -> ClassMatcher {
        match self {
            ClassMatcher::AnyOf(mut inner) => {
                inner.push(other);
                ClassMatcher::AnyOf(inner)
            }
            first => ClassMatcher::AnyOf(vec![first, other]),
        }
    }
}
