// Injection rules and registration-time validation.
//
// Rules are built once from externally supplied tables at agent start and
// are immutable afterwards. Validation happens at registration, not at
// transform time: an invalid rule set is a deployment error and must fail
// fast, before any class is presented.

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;
use uuid::Uuid;

use crate::class_matcher::ClassMatcher;
use crate::injection::{InsertionPoint, MethodInjection};

// ============================================================================
// RULE IDENTITY
// ============================================================================

/// Unique identifier for an injection rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RuleId(Uuid);

impl RuleId {
    pub fn new() -> Self {
        RuleId(Uuid::new_v4())
    }
}

impl Default for RuleId {
    fn default() -> Self {
        RuleId::new()
    }
}

impl From<Uuid> for RuleId {
    fn from(uuid: Uuid) -> Self {
        RuleId(uuid)
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// INJECTION RULE
// ============================================================================

/// Match predicate plus ordered code injections.
///
/// The name identifies the rule in diagnostics (e.g. `netty-http-headers`);
/// injection order within a rule is preserved at application time.
#[derive(Debug, Clone)]
pub struct InjectionRule {
    pub id: RuleId,
    pub name: String,
    pub matcher: ClassMatcher,
    pub injections: Vec<MethodInjection>,
}

impl InjectionRule {
    pub fn new(name: impl Into<String>, matcher: ClassMatcher) -> Self {
        InjectionRule {
            id: RuleId::new(),
            name: name.into(),
            matcher,
            injections: Vec::new(),
        }
    }

    /// Appends an injection, preserving order.
    pub fn with_injection(mut self, injection: MethodInjection) -> Self {
        self.injections.push(injection);
        self
    }
}

// ============================================================================
// REGISTRATION VALIDATION
// ============================================================================

/// Rule-set defects detected at registration time.
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("rule '{rule}' declares no injections")]
    EmptyRule { rule: String },

    #[error("rule '{rule}' mixes replace with other insertions on method {method}")]
    ReplaceConflict { rule: String, method: String },

    #[error(
        "rules '{first}' and '{second}' target method {method} with incompatible insertion kinds"
    )]
    CrossRuleConflict {
        first: String,
        second: String,
        method: String,
    },
}

/// Validates a rule set before the engine accepts it.
///
/// `Replace` is mutually exclusive with any other insertion on the same
/// method. Within a rule that is checked directly; across rules it is
/// checked for rules whose matchers are structurally equal (opaque matchers
/// that merely overlap cannot be decided statically, see DESIGN.md).
pub fn validate_rules(rules: &[InjectionRule]) -> Result<(), RegistrationError> {
    for rule in rules {
        if rule.injections.is_empty() {
            return Err(RegistrationError::EmptyRule {
                rule: rule.name.clone(),
            });
        }
        let mut kinds: HashMap<String, InsertionPoint> = HashMap::new();
        for injection in &rule.injections {
            let method = injection.signature.to_string();
            match kinds.get(&method) {
                Some(existing)
                    if incompatible(*existing, injection.insertion_point) =>
                {
                    return Err(RegistrationError::ReplaceConflict {
                        rule: rule.name.clone(),
                        method,
                    });
                }
                _ => {
                    kinds.insert(method, injection.insertion_point);
                }
            }
        }
    }

    // Cross-rule: same matcher, same method, incompatible kinds.
    for (i, first) in rules.iter().enumerate() {
        for second in &rules[i + 1..] {
            if first.matcher != second.matcher {
                continue;
            }
            for a in &first.injections {
                for b in &second.injections {
                    if a.signature == b.signature
                        && incompatible(a.insertion_point, b.insertion_point)
                    {
                        return Err(RegistrationError::CrossRuleConflict {
                            first: first.name.clone(),
                            second: second.name.clone(),
                            method: a.signature.to_string(),
                        });
                    }
                }
            }
        }
    }

    Ok(())
}

fn incompatible(a: InsertionPoint, b: InsertionPoint) -> bool {
    // Replace owns the whole method body; it composes with nothing,
    // including a second Replace.
    a == InsertionPoint::Replace || b == InsertionPoint::Replace
}
