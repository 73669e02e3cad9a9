//! Run statistics.

use std::time::Duration;

use dispatcher::MetricsSnapshot;
use observability::MetricsSummary;

use super::scenario::ReplayStats;

/// Statistics of one `aisc run`
#[derive(Debug, Clone, Default)]
pub struct RunStats {
    pub duration: Duration,
    pub intersections: usize,
    /// Images pushed through the mock detector
    pub images_ingested: u64,
    pub replay: Option<ReplayStats>,
    /// Events dropped by full subscriber queues
    pub hub_events_dropped: u64,
    pub observers: Vec<(String, MetricsSnapshot)>,
    pub metrics: MetricsSummary,
}

impl RunStats {
    /// Snapshots published per second
    pub fn snapshot_rate(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.metrics.snapshots as f64 / secs
        } else {
            0.0
        }
    }

    pub fn print_summary(&self) {
        println!("\n╔══════════════════════════════════════════════════════════════╗");
        println!("║                     AISC Run Statistics                      ║");
        println!("╚══════════════════════════════════════════════════════════════╝\n");

        println!("Overview");
        println!("   ├─ Duration: {:.2}s", self.duration.as_secs_f64());
        println!("   ├─ Intersections: {}", self.intersections);
        println!("   ├─ Snapshots/s: {:.2}", self.snapshot_rate());
        println!("   ├─ Images ingested: {}", self.images_ingested);
        println!("   └─ Hub events dropped: {}", self.hub_events_dropped);

        if let Some(replay) = &self.replay {
            println!("\nScenario");
            println!("   ├─ Steps: {}", replay.steps);
            println!("   ├─ Failed: {}", replay.failed);
            println!("   └─ Alerts accepted: {}", replay.alerts_accepted);
        }

        if !self.observers.is_empty() {
            println!("\nObservers");
            for (name, m) in &self.observers {
                println!(
                    "   ├─ {}: written {}, failed {}, dropped {}",
                    name, m.write_count, m.failure_count, m.dropped_count
                );
            }
        }

        println!("\n{}", self.metrics);
    }
}
