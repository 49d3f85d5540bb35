// Thread dumps: OS-level thread listing annotated with application context
// (principal, call record, lock holdings/waits) and a lock-cycle report.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::Write as _;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::runtime_probe::linux;

/// Assumed kernel clock rate (USER_HZ) for converting /proc CPU ticks. Linux exports
/// 100 on common architectures; where USER_HZ differs, per-thread cpu= values are
/// scaled wrong by that factor.
const CLOCK_TICKS_PER_SEC: u64 = 100;

pub trait ThreadDumper: Send + Sync {
    fn dump(&self) -> String;
}

/// Application context attached to a thread while it serves a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThreadContext {
    pub thread_name: String,
    pub principal: Option<String>,
    pub call_record: Option<String>,
    pub held_locks: BTreeSet<String>,
    pub waiting_on: Option<String>,
}

/// Registry keyed by kernel thread id (or a process-local sequence off Linux).
#[derive(Debug, Default)]
pub struct ThreadContextRegistry {
    threads: std::sync::Mutex<HashMap<u32, ThreadContext>>,
}

/// Detaches the calling thread's context on drop.
pub struct ThreadContextGuard {
    registry: Arc<ThreadContextRegistry>,
    key: u32,
}

impl Drop for ThreadContextGuard {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.key);
    }
}

fn current_thread_key() -> u32 {
    static NEXT: AtomicU32 = AtomicU32::new(1);
    thread_local! {
        static KEY: u32 = linux::current_thread_id()
            .unwrap_or_else(|| NEXT.fetch_add(1, Ordering::Relaxed));
    }
    KEY.with(|k| *k)
}

impl ThreadContextRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u32, ThreadContext>> {
        self.threads
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Attaches `principal` and `call_record` to the calling thread until the guard drops.
    pub fn attach(
        self: &Arc<Self>,
        principal: Option<&str>,
        call_record: Option<&str>,
    ) -> ThreadContextGuard {
        let key = current_thread_key();
        let thread_name = std::thread::current()
            .name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("thread-{}", key));
        let mut threads = self.lock();
        let ctx = threads.entry(key).or_default();
        ctx.thread_name = thread_name;
        ctx.principal = principal.map(str::to_string);
        ctx.call_record = call_record.map(str::to_string);
        ThreadContextGuard {
            registry: self.clone(),
            key,
        }
    }

    /// The calling thread starts waiting for `lock_name`.
    pub fn waiting_on(&self, lock_name: &str) {
        if let Some(ctx) = self.lock().get_mut(&current_thread_key()) {
            ctx.waiting_on = Some(lock_name.to_string());
        }
    }

    /// The calling thread now owns `lock_name` (and is no longer waiting for it).
    pub fn acquired(&self, lock_name: &str) {
        if let Some(ctx) = self.lock().get_mut(&current_thread_key()) {
            if ctx.waiting_on.as_deref() == Some(lock_name) {
                ctx.waiting_on = None;
            }
            ctx.held_locks.insert(lock_name.to_string());
        }
    }

    pub fn released(&self, lock_name: &str) {
        if let Some(ctx) = self.lock().get_mut(&current_thread_key()) {
            ctx.held_locks.remove(lock_name);
        }
    }

    pub fn contexts(&self) -> BTreeMap<u32, ThreadContext> {
        self.lock().iter().map(|(k, v)| (*k, v.clone())).collect()
    }
}

/// Finds cycles in the graph thread -> (lock it waits on) -> owning thread. Each cycle
/// lists thread keys in wait order, starting from its smallest key.
pub fn deadlock_cycles(contexts: &BTreeMap<u32, ThreadContext>) -> Vec<Vec<u32>> {
    let owner: HashMap<&str, u32> = contexts
        .iter()
        .flat_map(|(k, c)| c.held_locks.iter().map(move |l| (l.as_str(), *k)))
        .collect();
    let next = |k: u32| -> Option<u32> {
        let lock = contexts.get(&k)?.waiting_on.as_deref()?;
        owner.get(lock).copied().filter(|o| *o != k)
    };

    let mut seen_cycles: BTreeSet<Vec<u32>> = BTreeSet::new();
    for &start in contexts.keys() {
        let mut path = vec![start];
        let mut cur = start;
        while let Some(n) = next(cur) {
            if let Some(pos) = path.iter().position(|p| *p == n) {
                let mut cycle = path[pos..].to_vec();
                let min_pos = cycle
                    .iter()
                    .enumerate()
                    .min_by_key(|(_, k)| **k)
                    .map(|(i, _)| i)
                    .unwrap_or(0);
                cycle.rotate_left(min_pos);
                seen_cycles.insert(cycle);
                break;
            }
            path.push(n);
            cur = n;
        }
    }
    seen_cycles.into_iter().collect()
}

/// Lists the process's kernel threads from /proc and merges registered context.
pub struct ProcThreadDumper {
    contexts: Arc<ThreadContextRegistry>,
}

impl ProcThreadDumper {
    pub fn new(contexts: Arc<ThreadContextRegistry>) -> Self {
        Self { contexts }
    }
}

fn describe_state(state: char) -> &'static str {
    match state {
        'R' => "RUNNABLE",
        'S' | 'I' => "WAITING",
        'D' => "BLOCKED (in kernel)",
        'T' | 't' => "SUSPENDED",
        'Z' | 'X' => "TERMINATED",
        _ => "UNKNOWN",
    }
}

fn write_context(out: &mut String, ctx: &ThreadContext) {
    if let Some(p) = &ctx.principal {
        let _ = writeln!(out, "    principal: {}", p);
    }
    if let Some(r) = &ctx.call_record {
        let _ = writeln!(out, "    call: {}", r);
    }
    for l in &ctx.held_locks {
        let _ = writeln!(out, "    - locked <{}>", l);
    }
    if let Some(w) = &ctx.waiting_on {
        let _ = writeln!(out, "    - waiting to lock <{}>", w);
    }
}

impl ThreadDumper for ProcThreadDumper {
    fn dump(&self) -> String {
        let mut contexts = self.contexts.contexts();
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Full thread dump {} {} (pid {}) at {}",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            std::process::id(),
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z")
        );

        for tid in linux::list_thread_ids() {
            let name = linux::read_thread_comm(tid).unwrap_or_else(|| "?".into());
            let _ = write!(out, "\n\"{}\" tid={}", name, tid);
            if let Some((state, ticks)) = linux::read_thread_stat(tid) {
                let _ = write!(
                    out,
                    " state={} cpu={}ms",
                    describe_state(state),
                    ticks * 1000 / CLOCK_TICKS_PER_SEC
                );
            }
            if let Some(wchan) = linux::read_thread_wchan(tid) {
                let _ = write!(out, " wchan={}", wchan);
            }
            out.push('\n');
            if let Some(ctx) = contexts.remove(&tid) {
                let _ = writeln!(out, "    thread: {}", ctx.thread_name);
                write_context(&mut out, &ctx);
            }
        }

        // Registered threads without an OS entry (non-Linux, or exited meanwhile).
        for (key, ctx) in &contexts {
            let _ = writeln!(out, "\n\"{}\" key={}", ctx.thread_name, key);
            write_context(&mut out, ctx);
        }

        let all = self.contexts.contexts();
        let cycles = deadlock_cycles(&all);
        if !cycles.is_empty() {
            let _ = writeln!(out, "\nFound {} deadlock cycle(s):", cycles.len());
            for cycle in cycles {
                out.push_str("=============================\n");
                for k in cycle {
                    if let Some(ctx) = all.get(&k) {
                        let _ = writeln!(
                            out,
                            "\"{}\" ({}): waiting to lock <{}>",
                            ctx.thread_name,
                            k,
                            ctx.waiting_on.as_deref().unwrap_or("?")
                        );
                    }
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(name: &str, held: &[&str], waiting: Option<&str>) -> ThreadContext {
        ThreadContext {
            thread_name: name.into(),
            held_locks: held.iter().map(|s| s.to_string()).collect(),
            waiting_on: waiting.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn two_thread_cycle_is_reported_once() {
        let mut m = BTreeMap::new();
        m.insert(7, ctx("a", &["L1"], Some("L2")));
        m.insert(3, ctx("b", &["L2"], Some("L1")));
        m.insert(9, ctx("c", &[], Some("L1")));
        assert_eq!(deadlock_cycles(&m), vec![vec![3, 7]]);
    }

    #[test]
    fn chain_without_cycle_is_not_a_deadlock() {
        let mut m = BTreeMap::new();
        m.insert(1, ctx("a", &["L1"], Some("L2")));
        m.insert(2, ctx("b", &["L2"], None));
        assert!(deadlock_cycles(&m).is_empty());
    }

    #[test]
    fn attached_context_shows_in_dump_and_detaches() {
        let registry = Arc::new(ThreadContextRegistry::new());
        let dumper = ProcThreadDumper::new(registry.clone());
        {
            let _g = registry.attach(Some("alice"), Some("GET /api/nodes"));
            registry.waiting_on("cache");
            registry.acquired("cache");
            let text = dumper.dump();
            assert!(text.contains("principal: alice"));
            assert!(text.contains("- locked <cache>"));
            assert!(!text.contains("waiting to lock <cache>"));
        }
        assert!(registry.contexts().is_empty());
        assert!(!dumper.dump().contains("alice"));
    }
}
