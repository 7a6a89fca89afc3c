//! Stats collector (spec §4.K): thread-safe counters and duration
//! buckets by channel type, built on the generic metrics primitives in
//! `courier-telemetry`.

use courier_telemetry::{Counter, Histogram};
use dashmap::DashMap;
use std::time::Duration;

pub struct Stats {
    pub contacts_created: Counter,
    pub msgs_received: Counter,
    pub msgs_spooled: Counter,
    pub statuses_unresolved: Counter,
    per_channel_type: DashMap<String, ChannelTypeStats>,
}

struct ChannelTypeStats {
    sent: Counter,
    errored: Counter,
    send_duration: Histogram,
}

impl Default for Stats {
    fn default() -> Self {
        Self {
            contacts_created: Counter::new("contacts_created"),
            msgs_received: Counter::new("msgs_received"),
            msgs_spooled: Counter::new("msgs_spooled"),
            statuses_unresolved: Counter::new("statuses_unresolved"),
            per_channel_type: DashMap::new(),
        }
    }
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, channel_type: &str) -> dashmap::mapref::one::Ref<'_, String, ChannelTypeStats> {
        if !self.per_channel_type.contains_key(channel_type) {
            self.per_channel_type.insert(
                channel_type.to_string(),
                ChannelTypeStats {
                    sent: Counter::new(&format!("{channel_type}_sent")),
                    errored: Counter::new(&format!("{channel_type}_errored")),
                    send_duration: Histogram::new(&format!("{channel_type}_send_duration_ms")),
                },
            );
        }
        self.per_channel_type.get(channel_type).unwrap()
    }

    pub fn record_sent(&self, channel_type: &str, elapsed: Duration) {
        let entry = self.entry(channel_type);
        entry.sent.inc();
        entry.send_duration.record(elapsed.as_millis() as f64);
    }

    pub fn record_errored(&self, channel_type: &str) {
        self.entry(channel_type).errored.inc();
    }

    pub fn send_p50_ms(&self, channel_type: &str) -> f64 {
        self.entry(channel_type).send_duration.percentile(50.0)
    }

    pub fn send_p99_ms(&self, channel_type: &str) -> f64 {
        self.entry(channel_type).send_duration.p99()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_channel_type_counters_are_independent() {
        let stats = Stats::new();
        stats.record_sent("KN", Duration::from_millis(10));
        stats.record_sent("KN", Duration::from_millis(20));
        stats.record_errored("TG");

        assert_eq!(stats.entry("KN").sent.get(), 2);
        assert_eq!(stats.entry("TG").errored.get(), 1);
        assert_eq!(stats.entry("TG").sent.get(), 0);
    }

    #[test]
    fn send_duration_percentiles_track_recorded_samples() {
        let stats = Stats::new();
        for ms in 1..=100u64 {
            stats.record_sent("KN", Duration::from_millis(ms));
        }
        assert!((stats.send_p50_ms("KN") - 50.0).abs() < 1.0);
        assert!(stats.send_p99_ms("KN") >= stats.send_p50_ms("KN"));
    }

    #[test]
    fn global_counters_track_contacts_created() {
        let stats = Stats::new();
        stats.contacts_created.inc();
        stats.contacts_created.inc();
        assert_eq!(stats.contacts_created.get(), 2);
    }
}
