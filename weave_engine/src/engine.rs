// Transformation engine: applies registered injection rules to classes as
// they are presented for loading.
//
// Design principles (mirroring the read-optimized rule table this engine
// grew out of):
// 1. The rule set is immutable after construction — readers take no locks.
// 2. Match results are cached by class name; a class that matches nothing
//    costs one cache lookup on every subsequent sighting.
// 3. One rule's fault never blocks unrelated instrumentation: each rule is
//    applied in its own editing session and committed independently, so a
//    failing rule's partial edits are discarded while earlier rules' work
//    is kept.
// 4. Nothing here panics into the host's class-loading path; every failure
//    is logged and degraded to the best bytecode produced so far.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, error, trace};
use parking_lot::RwLock;

use crate::class_matcher::ClassDescriptor;
use crate::editor::{BytecodeEditor, ClassEditor};
use crate::injection::{FragmentGuard, InsertionPoint, MethodInjection};
use crate::rule::{validate_rules, InjectionRule, RegistrationError};

// ============================================================================
// OUTCOME AND STATS
// ============================================================================

/// Result of presenting one class to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransformOutcome {
    /// No rule matched, or no matching rule produced a committed edit.
    Unchanged,
    /// At least one rule committed; carries the rewritten bytecode.
    Modified(Vec<u8>),
}

impl TransformOutcome {
    pub fn is_modified(&self) -> bool {
        matches!(self, TransformOutcome::Modified(_))
    }
}

/// Per-rule application counters.
#[derive(Debug, Default)]
pub struct RuleStats {
    /// Classes this rule matched.
    pub matched: AtomicU64,
    /// Editing sessions committed.
    pub applied: AtomicU64,
    /// Editing sessions discarded due to an application failure.
    pub failed: AtomicU64,
    /// Injections skipped because the target method was absent.
    pub target_absent: AtomicU64,
}

struct RegisteredRule {
    rule: InjectionRule,
    stats: RuleStats,
}

// ============================================================================
// TRANSFORMATION ENGINE
// ============================================================================

/// Applies registered injection rules to classes presented for loading.
///
/// Rules are registered once at construction and are immutable thereafter.
/// `consider_class` is safe for concurrent invocation from unrelated
/// threads; the only shared mutable state is the match cache.
pub struct TransformationEngine {
    rules: Vec<RegisteredRule>,
    editor: Arc<dyn BytecodeEditor>,
    guard: FragmentGuard,
    /// class name → indexes of matching rules (empty vec = known no-match)
    match_cache: RwLock<HashMap<String, Arc<Vec<usize>>>>,
}

impl TransformationEngine {
    /// Builds an engine over a validated rule set.
    ///
    /// Fails fast on conflicting rules (see [`validate_rules`]); an invalid
    /// rule set must never reach class loading.
    pub fn new(
        rules: Vec<InjectionRule>,
        editor: Arc<dyn BytecodeEditor>,
    ) -> Result<Self, RegistrationError> {
        Self::with_guard(rules, editor, FragmentGuard::default())
    }

    /// Same as [`TransformationEngine::new`] with a custom fragment guard.
    pub fn with_guard(
        rules: Vec<InjectionRule>,
        editor: Arc<dyn BytecodeEditor>,
        guard: FragmentGuard,
    ) -> Result<Self, RegistrationError> {
        validate_rules(&rules)?;
        Ok(TransformationEngine {
            rules: rules
                .into_iter()
                .map(|rule| RegisteredRule {
                    rule,
                    stats: RuleStats::default(),
                })
                .collect(),
            editor,
            guard,
            match_cache: RwLock::new(HashMap::new()),
        })
    }

    /// Number of registered rules.
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Application counters for the rule at registration position `index`.
    pub fn rule_stats(&self, index: usize) -> Option<&RuleStats> {
        self.rules.get(index).map(|r| &r.stats)
    }

    /// Considers one class for transformation.
    ///
    /// Evaluates every rule's matcher against the descriptor, applies the
    /// matching rules' injections in registration order, and returns either
    /// the rewritten bytecode or `Unchanged`. Never panics and never returns
    /// an error: a per-rule failure is logged and the best bytecode produced
    /// so far wins.
    pub fn consider_class(
        &self,
        descriptor: &ClassDescriptor,
        bytecode: &[u8],
    ) -> TransformOutcome {
        let matched = self.matching_rules(descriptor);
        if matched.is_empty() {
            return TransformOutcome::Unchanged;
        }

        // Each matching rule gets its own editing session over the best
        // bytecode so far. A rule that fails mid-application is discarded
        // wholesale; earlier committed rules are unaffected.
        let mut best: Option<Vec<u8>> = None;
        for &index in matched.iter() {
            let registered = &self.rules[index];
            registered.stats.matched.fetch_add(1, Ordering::Relaxed);
            let current = best.as_deref().unwrap_or(bytecode);
            match self.apply_rule(&registered.rule, descriptor, current) {
                Ok(Some(bytes)) => {
                    registered.stats.applied.fetch_add(1, Ordering::Relaxed);
                    best = Some(bytes);
                }
                Ok(None) => {
                    // All target methods absent in this class version.
                    registered
                        .stats
                        .target_absent
                        .fetch_add(1, Ordering::Relaxed);
                    trace!(
                        "consider_class: rule '{}' targets absent on {}, skipped",
                        registered.rule.name,
                        descriptor.class_name
                    );
                }
                Err(err) => {
                    registered.stats.failed.fetch_add(1, Ordering::Relaxed);
                    error!(
                        "consider_class: rule '{}' ({}) failed on {}: {}",
                        registered.rule.name, registered.rule.id, descriptor.class_name, err
                    );
                }
            }
        }

        match best {
            Some(bytes) => {
                debug!("consider_class: modified {}", descriptor.class_name);
                TransformOutcome::Modified(bytes)
            }
            None => TransformOutcome::Unchanged,
        }
    }

    /// Indexes of rules matching the descriptor, cached by class name.
    fn matching_rules(&self, descriptor: &ClassDescriptor) -> Arc<Vec<usize>> {
        if let Some(cached) = self.match_cache.read().get(&descriptor.class_name) {
            return Arc::clone(cached);
        }
        let matched: Arc<Vec<usize>> = Arc::new(
            self.rules
                .iter()
                .enumerate()
                .filter(|(_, r)| r.rule.matcher.matches(descriptor))
                .map(|(i, _)| i)
                .collect(),
        );
        self.match_cache
            .write()
            .insert(descriptor.class_name.clone(), Arc::clone(&matched));
        matched
    }

    /// Applies one rule in its own editing session.
    ///
    /// Returns `Ok(None)` when every injection's target method was absent
    /// (a normal skip on version-mismatched libraries), `Ok(Some(bytes))`
    /// on a committed edit.
    fn apply_rule(
        &self,
        rule: &InjectionRule,
        descriptor: &ClassDescriptor,
        bytecode: &[u8],
    ) -> Result<Option<Vec<u8>>, crate::editor::EditError> {
        let mut session = self.editor.open(descriptor, bytecode)?;
        let mut touched = false;
        for injection in &rule.injections {
            if !session.has_method(&injection.signature) {
                trace!(
                    "apply_rule: '{}': no method {} on {}",
                    rule.name,
                    injection.signature,
                    descriptor.class_name
                );
                continue;
            }
            self.apply_injection(session.as_mut(), injection, descriptor)?;
            touched = true;
        }
        if !touched {
            return Ok(None);
        }
        session.commit().map(Some)
    }

    fn apply_injection(
        &self,
        session: &mut dyn ClassEditor,
        injection: &MethodInjection,
        descriptor: &ClassDescriptor,
    ) -> Result<(), crate::editor::EditError> {
        let code = injection.fragment.render(descriptor);
        match injection.insertion_point {
            InsertionPoint::Before => session.insert_before(
                &injection.signature,
                &self.guard.wrap(injection.fragment.label(), &code),
            ),
            InsertionPoint::After => session.insert_after(
                &injection.signature,
                &self.guard.wrap(injection.fragment.label(), &code),
            ),
            InsertionPoint::Replace => session.replace_body(&injection.signature, &code),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class_matcher::ClassMatcher;
    use crate::editor::EditError;
    use crate::injection::{InjectedFragment, MethodSignature};
    use std::collections::HashSet;

    /// Recording fake backend. Sessions accumulate textual ops; commit
    /// encodes them one per line so tests can assert on application order.
    struct RecordingEditor {
        methods: HashSet<String>,
        fail_on_code: Option<String>,
        opened: AtomicU64,
    }

    impl RecordingEditor {
        fn with_methods(methods: &[&str]) -> Arc<Self> {
            Arc::new(RecordingEditor {
                methods: methods.iter().map(|m| m.to_string()).collect(),
                fail_on_code: None,
                opened: AtomicU64::new(0),
            })
        }

        fn failing_on(methods: &[&str], code_marker: &str) -> Arc<Self> {
            Arc::new(RecordingEditor {
                methods: methods.iter().map(|m| m.to_string()).collect(),
                fail_on_code: Some(code_marker.to_string()),
                opened: AtomicU64::new(0),
            })
        }

        fn opened(&self) -> u64 {
            self.opened.load(Ordering::Relaxed)
        }
    }

    struct RecordingSession {
        methods: HashSet<String>,
        fail_on_code: Option<String>,
        ops: Vec<String>,
    }

    impl BytecodeEditor for RecordingEditor {
        fn open(
            &self,
            _descriptor: &ClassDescriptor,
            bytecode: &[u8],
        ) -> Result<Box<dyn ClassEditor>, EditError> {
            self.opened.fetch_add(1, Ordering::Relaxed);
            let existing = String::from_utf8_lossy(bytecode);
            let ops = if existing.starts_with("edited\n") {
                existing.lines().skip(1).map(str::to_string).collect()
            } else {
                Vec::new()
            };
            Ok(Box::new(RecordingSession {
                methods: self.methods.clone(),
                fail_on_code: self.fail_on_code.clone(),
                ops,
            }))
        }
    }

    impl RecordingSession {
        fn record(&mut self, kind: &str, sig: &MethodSignature, code: &str) -> Result<(), EditError> {
            if let Some(marker) = &self.fail_on_code {
                if code.contains(marker.as_str()) {
                    return Err(EditError::UnresolvedSymbol(marker.clone()));
                }
            }
            self.ops.push(format!("{kind} {sig}: {code}"));
            Ok(())
        }
    }

    impl ClassEditor for RecordingSession {
        fn has_method(&self, signature: &MethodSignature) -> bool {
            self.methods.contains(&signature.name)
        }

        fn insert_before(
            &mut self,
            signature: &MethodSignature,
            code: &str,
        ) -> Result<(), EditError> {
            self.record("before", signature, code)
        }

        fn insert_after(
            &mut self,
            signature: &MethodSignature,
            code: &str,
        ) -> Result<(), EditError> {
            self.record("after", signature, code)
        }

        fn replace_body(
            &mut self,
            signature: &MethodSignature,
            code: &str,
        ) -> Result<(), EditError> {
            self.record("replace", signature, code)
        }

        fn commit(self: Box<Self>) -> Result<Vec<u8>, EditError> {
            let mut out = String::from("edited\n");
            out.push_str(&self.ops.join("\n"));
            Ok(out.into_bytes())
        }
    }

    fn init_logs() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn before_rule(name: &str, class: &str, marker: &str) -> InjectionRule {
        InjectionRule::new(name, ClassMatcher::Named(class.into())).with_injection(
            MethodInjection::new(
                MethodSignature::new("handle", "()V"),
                InsertionPoint::Before,
                InjectedFragment::fixed(name, marker),
            ),
        )
    }

    fn descriptor() -> ClassDescriptor {
        ClassDescriptor::named("com.example.Server")
    }

    #[test]
    fn no_match_returns_unchanged_without_opening_the_editor() {
        let editor = RecordingEditor::with_methods(&["handle"]);
        let engine = TransformationEngine::new(
            vec![before_rule("other", "com.example.Other", "x();")],
            editor.clone(),
        )
        .unwrap();

        let outcome = engine.consider_class(&descriptor(), b"raw");
        assert_eq!(outcome, TransformOutcome::Unchanged);
        // Repeated calls stay Unchanged and hit the match cache.
        let outcome = engine.consider_class(&descriptor(), b"raw");
        assert_eq!(outcome, TransformOutcome::Unchanged);
        assert_eq!(editor.opened(), 0);
    }

    #[test]
    fn multiple_before_injections_apply_in_registration_order() {
        let editor = RecordingEditor::with_methods(&["handle"]);
        let engine = TransformationEngine::new(
            vec![
                before_rule("first", "com.example.Server", "first();"),
                before_rule("second", "com.example.Server", "second();"),
            ],
            editor,
        )
        .unwrap();

        let outcome = engine.consider_class(&descriptor(), b"raw");
        let TransformOutcome::Modified(bytes) = outcome else {
            panic!("expected modification");
        };
        let text = String::from_utf8(bytes).unwrap();
        let first_at = text.find("first();").unwrap();
        let second_at = text.find("second();").unwrap();
        assert!(first_at < second_at);
    }

    #[test]
    fn failing_rule_does_not_block_other_rules() {
        init_logs();
        let editor = RecordingEditor::failing_on(&["handle"], "boom();");
        let engine = TransformationEngine::new(
            vec![
                before_rule("broken", "com.example.Server", "boom();"),
                before_rule("healthy", "com.example.Server", "ok();"),
            ],
            editor,
        )
        .unwrap();

        let outcome = engine.consider_class(&descriptor(), b"raw");
        let TransformOutcome::Modified(bytes) = outcome else {
            panic!("expected healthy rule to commit");
        };
        let text = String::from_utf8(bytes).unwrap();
        assert!(!text.contains("boom();"));
        assert!(text.contains("ok();"));
        assert_eq!(
            engine.rule_stats(0).unwrap().failed.load(Ordering::Relaxed),
            1
        );
        assert_eq!(
            engine
                .rule_stats(1)
                .unwrap()
                .applied
                .load(Ordering::Relaxed),
            1
        );
    }

    #[test]
    fn single_failing_rule_returns_unchanged() {
        init_logs();
        let editor = RecordingEditor::failing_on(&["handle"], "boom();");
        let engine = TransformationEngine::new(
            vec![before_rule("broken", "com.example.Server", "boom();")],
            editor,
        )
        .unwrap();

        let outcome = engine.consider_class(&descriptor(), b"raw");
        assert_eq!(outcome, TransformOutcome::Unchanged);
    }

    #[test]
    fn absent_target_method_is_a_silent_skip() {
        let editor = RecordingEditor::with_methods(&["other"]);
        let engine = TransformationEngine::new(
            vec![before_rule("versioned", "com.example.Server", "x();")],
            editor,
        )
        .unwrap();

        let outcome = engine.consider_class(&descriptor(), b"raw");
        assert_eq!(outcome, TransformOutcome::Unchanged);
        assert_eq!(
            engine
                .rule_stats(0)
                .unwrap()
                .target_absent
                .load(Ordering::Relaxed),
            1
        );
    }

    #[test]
    fn before_fragments_are_guarded_replace_is_not() {
        let editor = RecordingEditor::with_methods(&["handle", "render"]);
        let replace_rule = InjectionRule::new(
            "replacer",
            ClassMatcher::Named("com.example.Server".into()),
        )
        .with_injection(MethodInjection::new(
            MethodSignature::new("render", "()V"),
            InsertionPoint::Replace,
            InjectedFragment::fixed("replacer", "return fixed();"),
        ));
        let engine = TransformationEngine::new(
            vec![
                before_rule("observer", "com.example.Server", "observe();"),
                replace_rule,
            ],
            editor,
        )
        .unwrap();

        let TransformOutcome::Modified(bytes) = engine.consider_class(&descriptor(), b"raw")
        else {
            panic!("expected modification");
        };
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("try {\nobserve();"));
        assert!(text.contains("replace render()V: return fixed();"));
        assert!(!text.contains("try {\nreturn fixed();"));
    }

    #[test]
    fn conflicting_rule_set_is_rejected_at_construction() {
        let matcher = ClassMatcher::Named("com.example.Server".into());
        let replace = InjectionRule::new("replace", matcher.clone()).with_injection(
            MethodInjection::new(
                MethodSignature::new("handle", "()V"),
                InsertionPoint::Replace,
                InjectedFragment::fixed("replace", "return;"),
            ),
        );
        let before = before_rule("before", "com.example.Server", "x();");
        let editor = RecordingEditor::with_methods(&["handle"]);
        assert!(TransformationEngine::new(vec![replace, before], editor).is_err());
    }

    #[test]
    fn templated_fragment_renders_against_the_loaded_class() {
        let editor = RecordingEditor::with_methods(&["handle"]);
        let rule = InjectionRule::new(
            "tagger",
            ClassMatcher::Prefixed("com.example.".into()),
        )
        .with_injection(MethodInjection::new(
            MethodSignature::new("handle", "()V"),
            InsertionPoint::Before,
            InjectedFragment::templated("tagger", |d| format!("tag(\"{}\");", d.class_name)),
        ));
        let engine = TransformationEngine::new(vec![rule], editor).unwrap();

        let TransformOutcome::Modified(bytes) = engine.consider_class(&descriptor(), b"raw")
        else {
            panic!("expected modification");
        };
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("tag(\"com.example.Server\");"));
    }
}
