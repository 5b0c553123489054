//! Scheduler: category ordering, hooks and result aggregation
//!
//! Categories run as contiguous blocks: the implicit "" category first
//! (no banner), then the rest in first-encountered registration order.
//! Global before-all hooks run once up front, global after-all hooks once
//! at the end; category-scoped variants bound their category's block.
//! Per test, the each-hooks run in the parent around the isolated child,
//! regardless of the outcome.

use anyhow::Result;
use std::time::Instant;

use crate::config::RunConfig;
use crate::isolation;
use crate::registry::{Hook, HookKind, Registry};
use crate::style::{BBLUE, BGREEN, BRED, BYELLOW, GRAY, RESET, YELLOW};

/// Aggregated result of one full run
#[derive(Debug)]
pub struct RunStats {
    pub total: usize,
    pub failed: usize,
    pub duration_ms: u64,
}

/// Execute every registered test. Only isolation-primitive failures
/// propagate as errors; test failures of any kind are counted.
pub fn run(registry: &mut Registry, config: &RunConfig) -> Result<RunStats> {
    let start = Instant::now();
    let total = registry.len();
    let mut failed = 0usize;

    run_hooks(registry.hooks(HookKind::BeforeAll), None);

    for category in category_order(registry) {
        if !category.is_empty() {
            println!("{BBLUE}\n{category}{GRAY}:{RESET}");
        }
        run_hooks(registry.hooks(HookKind::BeforeAll), Some(category.as_str()));

        for i in 0..registry.tests.len() {
            if registry.tests[i].executed || registry.tests[i].category != category {
                continue;
            }
            registry.tests[i].executed = true;

            run_hooks(registry.hooks(HookKind::BeforeEach), Some(category.as_str()));
            run_hooks(registry.hooks(HookKind::BeforeEach), None);

            let outcome = isolation::run_isolated(&registry.tests[i], config)?;

            run_hooks(registry.hooks(HookKind::AfterEach), Some(category.as_str()));
            run_hooks(registry.hooks(HookKind::AfterEach), None);

            if !outcome.passed() {
                failed += 1;
            }
        }

        run_hooks(registry.hooks(HookKind::AfterAll), Some(category.as_str()));
    }

    run_hooks(registry.hooks(HookKind::AfterAll), None);

    let duration_ms = start.elapsed().as_millis() as u64;
    print_summary(total, failed, duration_ms);

    Ok(RunStats {
        total,
        failed,
        duration_ms,
    })
}

/// "" first, then remaining categories in first-encountered order
fn category_order(registry: &Registry) -> Vec<String> {
    let mut order: Vec<String> = Vec::new();
    for test in &registry.tests {
        if !order.contains(&test.category) {
            order.push(test.category.clone());
        }
    }
    if let Some(pos) = order.iter().position(String::is_empty) {
        let root = order.remove(pos);
        order.insert(0, root);
    }
    order
}

/// Run the hooks matching `category`: None selects global hooks,
/// Some(cat) the hooks scoped to that category.
fn run_hooks(hooks: &[Hook], category: Option<&str>) {
    for hook in hooks {
        if hook.category.as_deref() == category {
            (hook.body)();
        }
    }
}

fn print_summary(total: usize, failed: usize, duration_ms: u64) {
    if failed == 0 {
        print!("{BGREEN}\n\u{2705} All {total} tests passed!");
    } else {
        print!(
            "{BRED}\n\u{274c} Failed {BYELLOW}{failed}{GRAY}/{YELLOW}{total}{BRED} test(s)"
        );
    }
    println!("{GRAY} - {YELLOW}{duration_ms}ms{RESET}");
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_order_root_first() {
        let mut reg = Registry::new();
        reg.test("Math", "m1", || {});
        reg.test("", "t1", || {});
        reg.test("Str", "s1", || {});
        reg.test("Math", "m2", || {});
        assert_eq!(category_order(&reg), ["", "Math", "Str"]);
    }

    #[test]
    fn test_category_order_without_root() {
        let mut reg = Registry::new();
        reg.test("B", "b", || {});
        reg.test("A", "a", || {});
        assert_eq!(category_order(&reg), ["B", "A"]);
    }

    #[test]
    fn test_hook_category_selection() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let mut reg = Registry::new();
        let global = Arc::new(AtomicUsize::new(0));
        let scoped = Arc::new(AtomicUsize::new(0));
        let g = Arc::clone(&global);
        let s = Arc::clone(&scoped);
        reg.before_all(None, move || {
            g.fetch_add(1, Ordering::SeqCst);
        });
        reg.before_all(Some("X"), move || {
            s.fetch_add(1, Ordering::SeqCst);
        });

        run_hooks(reg.hooks(HookKind::BeforeAll), None);
        assert_eq!(global.load(Ordering::SeqCst), 1);
        assert_eq!(scoped.load(Ordering::SeqCst), 0);

        run_hooks(reg.hooks(HookKind::BeforeAll), Some("X"));
        assert_eq!(scoped.load(Ordering::SeqCst), 1);
    }
}
