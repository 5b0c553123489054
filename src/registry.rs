//! Test and hook registry
//!
//! The registry is populated explicitly from the entry point before the
//! run starts, then read-only for the rest of the process. Registration
//! order is preserved within each of the five sequences.

/// Zero-argument callable run inside the isolated child (tests) or the
/// parent (hooks).
pub type Body = Box<dyn Fn()>;

/// Lifecycle hook kinds
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HookKind {
    BeforeAll,
    BeforeEach,
    AfterAll,
    AfterEach,
}

/// A registered test case
pub struct TestCase {
    /// Category name; "" is the implicit uncategorized group
    pub category: String,
    pub name: String,
    /// None = unset (fall back to the global default); Some(t) with t <= 0
    /// means unbounded
    pub timeout_ms: Option<i64>,
    pub body: Body,
    /// Flipped true by the scheduler exactly once
    pub executed: bool,
}

/// A lifecycle hook; `category: None` means global
pub struct Hook {
    pub category: Option<String>,
    pub body: Body,
}

/// Process-wide list of declared tests and hooks
#[derive(Default)]
pub struct Registry {
    pub(crate) tests: Vec<TestCase>,
    before_all: Vec<Hook>,
    before_each: Vec<Hook>,
    after_all: Vec<Hook>,
    after_each: Vec<Hook>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tests.len()
    }

    /// Registered tests in registration order
    pub fn tests(&self) -> &[TestCase] {
        &self.tests
    }

    /// Append a test case. Never fails; registration order is preserved.
    pub fn add_test(
        &mut self,
        category: &str,
        name: &str,
        timeout_ms: Option<i64>,
        body: impl Fn() + 'static,
    ) {
        self.tests.push(TestCase {
            category: category.to_string(),
            name: name.to_string(),
            timeout_ms,
            body: Box::new(body),
            executed: false,
        });
    }

    /// Register a test with the default timeout
    pub fn test(&mut self, category: &str, name: &str, body: impl Fn() + 'static) {
        self.add_test(category, name, None, body);
    }

    /// Register a test with an explicit timeout override in ms
    pub fn test_with_timeout(
        &mut self,
        category: &str,
        name: &str,
        timeout_ms: i64,
        body: impl Fn() + 'static,
    ) {
        self.add_test(category, name, Some(timeout_ms), body);
    }

    /// Append a hook to the sequence for `kind`
    pub fn add_hook(&mut self, kind: HookKind, category: Option<&str>, body: impl Fn() + 'static) {
        let hook = Hook {
            category: category.map(str::to_string),
            body: Box::new(body),
        };
        match kind {
            HookKind::BeforeAll => self.before_all.push(hook),
            HookKind::BeforeEach => self.before_each.push(hook),
            HookKind::AfterAll => self.after_all.push(hook),
            HookKind::AfterEach => self.after_each.push(hook),
        }
    }

    pub fn before_all(&mut self, category: Option<&str>, body: impl Fn() + 'static) {
        self.add_hook(HookKind::BeforeAll, category, body);
    }

    pub fn before_each(&mut self, category: Option<&str>, body: impl Fn() + 'static) {
        self.add_hook(HookKind::BeforeEach, category, body);
    }

    pub fn after_all(&mut self, category: Option<&str>, body: impl Fn() + 'static) {
        self.add_hook(HookKind::AfterAll, category, body);
    }

    pub fn after_each(&mut self, category: Option<&str>, body: impl Fn() + 'static) {
        self.add_hook(HookKind::AfterEach, category, body);
    }

    pub(crate) fn hooks(&self, kind: HookKind) -> &[Hook] {
        match kind {
            HookKind::BeforeAll => &self.before_all,
            HookKind::BeforeEach => &self.before_each,
            HookKind::AfterAll => &self.after_all,
            HookKind::AfterEach => &self.after_each,
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_order_preserved() {
        let mut reg = Registry::new();
        reg.test("A", "first", || {});
        reg.test("", "second", || {});
        reg.test("A", "third", || {});
        let names: Vec<&str> = reg.tests.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["first", "second", "third"]);
    }

    #[test]
    fn test_hooks_land_in_their_sequence() {
        let mut reg = Registry::new();
        reg.before_all(None, || {});
        reg.before_each(Some("X"), || {});
        reg.after_each(Some("X"), || {});
        reg.after_all(None, || {});
        assert_eq!(reg.hooks(HookKind::BeforeAll).len(), 1);
        assert_eq!(reg.hooks(HookKind::BeforeEach).len(), 1);
        assert_eq!(reg.hooks(HookKind::AfterAll).len(), 1);
        assert_eq!(reg.hooks(HookKind::AfterEach).len(), 1);
        assert!(reg.hooks(HookKind::BeforeAll)[0].category.is_none());
        assert_eq!(
            reg.hooks(HookKind::BeforeEach)[0].category.as_deref(),
            Some("X")
        );
    }

    #[test]
    fn test_timeout_sentinel() {
        let mut reg = Registry::new();
        reg.test("", "plain", || {});
        reg.test_with_timeout("", "bounded", 50, || {});
        assert_eq!(reg.tests[0].timeout_ms, None);
        assert_eq!(reg.tests[1].timeout_ms, Some(50));
    }

    #[test]
    fn test_executed_starts_false() {
        let mut reg = Registry::new();
        reg.test("", "t", || {});
        assert!(!reg.tests[0].executed);
    }
}
