//! One-shot gate for single-flight execution.
//!
//! ```text
//!  armed ── call_once(f) ──→ running ── f done ──→ fired
//!    ↑                          │                    │
//!    └──── caller dropped ──────┘                    │
//!    └────────────────────── rearm() ────────────────┘
//! ```
//!
//! While one caller runs `f`, every other caller waits on the gate and
//! returns once `f` has finished. A caller dropped mid-run leaves the gate
//! armed, so the next waiter runs `f` itself.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

#[derive(Debug, Default)]
pub struct Gate {
    fired: AtomicBool,
    running: Mutex<()>,
}

impl Gate {
    pub fn new() -> Self {
        Self::default()
    }

    /// A gate that has already fired; `call_once` is a no-op until `rearm`.
    pub fn fired() -> Self {
        Self {
            fired: AtomicBool::new(true),
            running: Mutex::new(()),
        }
    }

    pub fn is_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// Run `f` unless the gate has already fired.
    ///
    /// Returns `f`'s output if this call ran it, `None` if it was a no-op.
    pub async fn call_once<F, Fut, T>(&self, f: F) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        if self.is_fired() {
            return None;
        }
        let _running = self.running.lock().await;
        if self.is_fired() {
            return None;
        }
        let out = f().await;
        self.fired.store(true, Ordering::Release);
        Some(out)
    }

    /// Arm the gate again so the next `call_once` runs.
    pub fn rearm(&self) {
        self.fired.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_runs_once() {
        let gate = Gate::new();
        let runs = AtomicUsize::new(0);
        let first = gate
            .call_once(|| async { runs.fetch_add(1, Ordering::SeqCst) })
            .await;
        assert_eq!(first, Some(0));
        let second = gate
            .call_once(|| async { runs.fetch_add(1, Ordering::SeqCst) })
            .await;
        assert!(second.is_none());
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(gate.is_fired());
    }

    #[tokio::test]
    async fn test_rearm_allows_second_run() {
        let gate = Gate::new();
        gate.call_once(|| async {}).await;
        gate.rearm();
        assert!(!gate.is_fired());
        assert!(gate.call_once(|| async {}).await.is_some());
    }

    #[tokio::test]
    async fn test_prefired_gate_skips_until_rearmed() {
        let gate = Gate::fired();
        assert!(gate.is_fired());
        assert!(gate.call_once(|| async {}).await.is_none());
        gate.rearm();
        assert!(gate.call_once(|| async {}).await.is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_wait_for_first() {
        let gate = Arc::new(Gate::new());
        let runs = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..16 {
            let gate = Arc::clone(&gate);
            let runs = Arc::clone(&runs);
            handles.push(tokio::spawn(async move {
                gate.call_once(|| async {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    runs.fetch_add(1, Ordering::SeqCst);
                })
                .await;
                // Nobody returns before the single run completed.
                runs.load(Ordering::SeqCst)
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.expect("task should not panic"), 1);
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dropped_caller_leaves_gate_armed() {
        let gate = Gate::new();
        let attempt = gate.call_once(|| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        let timed_out = tokio::time::timeout(Duration::from_millis(10), attempt).await;
        assert!(timed_out.is_err());
        assert!(!gate.is_fired());
        assert!(gate.call_once(|| async {}).await.is_some());
    }
}
