// Linux-specific helpers: cgroup memory limit, per-thread /proc details.

/// Memory limit of the enclosing cgroup (v2 `memory.max`, then v1 `limit_in_bytes`).
/// `None` when unlimited or unavailable.
pub(crate) fn read_cgroup_memory_limit() -> Option<u64> {
    #[cfg(target_os = "linux")]
    {
        for path in [
            "/sys/fs/cgroup/memory.max",
            "/sys/fs/cgroup/memory/memory.limit_in_bytes",
        ] {
            if let Ok(content) = std::fs::read_to_string(path) {
                let v = content.trim();
                if v == "max" {
                    return None;
                }
                // v1 reports "unlimited" as a huge page-aligned number.
                if let Ok(limit) = v.parse::<u64>()
                    && limit > 0
                    && limit < (1u64 << 62)
                {
                    return Some(limit);
                }
            }
        }
    }
    None
}

/// Kernel wait channel of a thread of this process (what it is blocked in), if any.
pub(crate) fn read_thread_wchan(tid: u32) -> Option<String> {
    #[cfg(target_os = "linux")]
    {
        let path = format!("/proc/self/task/{}/wchan", tid);
        let v = std::fs::read_to_string(path).ok()?;
        let v = v.trim();
        if v.is_empty() || v == "0" {
            return None;
        }
        return Some(v.to_string());
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = tid;
        None
    }
}

/// Thread name as the kernel sees it (`comm`, at most 15 bytes).
pub(crate) fn read_thread_comm(tid: u32) -> Option<String> {
    #[cfg(target_os = "linux")]
    {
        let path = format!("/proc/self/task/{}/comm", tid);
        let v = std::fs::read_to_string(path).ok()?;
        let v = v.trim();
        if v.is_empty() {
            return None;
        }
        return Some(v.to_string());
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = tid;
        None
    }
}

/// Memory map of this process, used as heap-dump payload.
pub(crate) fn read_process_smaps() -> Option<String> {
    #[cfg(target_os = "linux")]
    {
        return std::fs::read_to_string("/proc/self/smaps").ok();
    }
    #[cfg(not(target_os = "linux"))]
    None
}

/// Thread ids of this process from /proc/self/task, ascending.
pub(crate) fn list_thread_ids() -> Vec<u32> {
    #[cfg(target_os = "linux")]
    {
        let Ok(entries) = std::fs::read_dir("/proc/self/task") else {
            return Vec::new();
        };
        let mut ids: Vec<u32> = entries
            .filter_map(|e| e.ok())
            .filter_map(|e| e.file_name().to_str().and_then(|s| s.parse().ok()))
            .collect();
        ids.sort_unstable();
        return ids;
    }
    #[cfg(not(target_os = "linux"))]
    Vec::new()
}

/// Scheduler state letter and user+system CPU ticks from /proc/self/task/<tid>/stat.
pub(crate) fn read_thread_stat(tid: u32) -> Option<(char, u64)> {
    #[cfg(target_os = "linux")]
    {
        let content = std::fs::read_to_string(format!("/proc/self/task/{}/stat", tid)).ok()?;
        // comm may contain spaces and parens; fields resume after the last ')'.
        let rest = &content[content.rfind(')')? + 1..];
        let fields: Vec<&str> = rest.split_whitespace().collect();
        let state = fields.first()?.chars().next()?;
        // utime and stime are fields 14 and 15 of the full line, 12 and 13 here.
        let utime: u64 = fields.get(11)?.parse().ok()?;
        let stime: u64 = fields.get(12)?.parse().ok()?;
        return Some((state, utime + stime));
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = tid;
        None
    }
}

/// Kernel thread id of the calling thread (via the /proc/thread-self link).
pub(crate) fn current_thread_id() -> Option<u32> {
    #[cfg(target_os = "linux")]
    {
        let link = std::fs::read_link("/proc/thread-self").ok()?;
        return link.file_name()?.to_str()?.parse().ok();
    }
    #[cfg(not(target_os = "linux"))]
    None
}
