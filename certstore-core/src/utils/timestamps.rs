use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds between 1601-01-01 (FILETIME epoch) and 1970-01-01.
const FILETIME_EPOCH_OFFSET_SECS: u64 = 11_644_473_600;

/// Current time as a Windows FILETIME (100ns ticks since 1601).
pub fn windows_filetime_now() -> u64 {
    let since_unix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    filetime_from_unix(since_unix.as_secs(), since_unix.subsec_nanos())
}

fn filetime_from_unix(secs: u64, nanos: u32) -> u64 {
    (secs + FILETIME_EPOCH_OFFSET_SECS) * 10_000_000 + u64::from(nanos / 100)
}

/// User agent string for requests to the listener
pub fn user_agent(agent_name: &str, agent_version: &str) -> String {
    format!("{}/{}", agent_name, agent_version)
}
