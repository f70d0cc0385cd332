use crate::analytics::PoolStats;

pub fn format_pool_stats(pool: &str, stats: PoolStats) -> String {
    format!(
        "pool={pool}\nprobes={}\nprobe_failures={}\nthrottled_checks={}\nsessions_opened={}\nlifetime_retirements={}\nconnect_failures={}\nrouted={}",
        stats.probes,
        stats.probe_failures,
        stats.throttled_checks,
        stats.sessions_opened,
        stats.lifetime_retirements,
        stats.connect_failures,
        stats.routed
    )
}
