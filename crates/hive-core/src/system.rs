use time::{OffsetDateTime, format_description::FormatItem, macros::format_description};

const TIMESTAMP_FORMAT: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]");

/// Local wall-clock time used in signal payloads.
pub fn timestamp() -> String {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    now.format(TIMESTAMP_FORMAT).unwrap_or_default()
}

/// Resident set size of the current process in whole megabytes (Linux only, best effort).
pub fn memory_usage_mb() -> Option<u64> {
    #[cfg(target_os = "linux")]
    {
        let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
        let resident_pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if page_size <= 0 {
            return None;
        }
        Some((resident_pages * page_size as u64 + 512 * 1024) / (1024 * 1024))
    }

    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}

/// Status line reporting memory usage.
pub fn memory_line() -> String {
    match memory_usage_mb() {
        Some(mb) => format!("Memory usage: ~{mb} mb"),
        None => "Memory usage: unknown".to_string(),
    }
}

/// Host name, or `"unknown-host"`.
pub fn host_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown-host".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_has_millisecond_precision() {
        let ts = timestamp();
        // YYYY-MM-DD HH:MM:SS.mmm
        assert_eq!(ts.len(), 23, "{ts}");
        assert_eq!(&ts[10..11], " ");
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn memory_is_reported_on_linux() {
        assert!(memory_usage_mb().is_some());
        assert!(memory_line().starts_with("Memory usage: ~"));
    }

    #[test]
    fn host_name_is_not_empty() {
        assert!(!host_name().is_empty());
    }
}
