use std::mem::discriminant;
use std::time::{Duration, Instant};

use super::UpgradePhase;

/// Rate limiter for install progress notes: one per `interval`, except that
/// a phase change always gets through.
pub struct ProgressThrottle {
    interval: Duration,
    last: Option<(Instant, std::mem::Discriminant<UpgradePhase>)>,
}

impl ProgressThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    pub fn should_emit(&mut self, phase: &UpgradePhase, now: Instant) -> bool {
        let kind = discriminant(phase);
        let emit = match self.last {
            None => true,
            Some((at, last_kind)) => {
                last_kind != kind || now.saturating_duration_since(at) >= self.interval
            }
        };
        if emit {
            self.last = Some((now, kind));
        }
        emit
    }
}

/// "12.5 MiB / 40.0 MiB (31%)", or just the byte count without a length.
pub fn describe_bytes(done: u64, total: Option<u64>) -> String {
    const MIB: f64 = 1024.0 * 1024.0;
    let done_mib = done as f64 / MIB;
    match total {
        Some(total) if total > 0 => format!(
            "{:.1} MiB / {:.1} MiB ({}%)",
            done_mib,
            total as f64 / MIB,
            (done.min(total) * 100) / total
        ),
        _ => format!("{:.1} MiB", done_mib),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throttles_within_interval() {
        let mut t = ProgressThrottle::new(Duration::from_millis(100));
        let start = Instant::now();
        let phase = UpgradePhase::Downloading;
        assert!(t.should_emit(&phase, start));
        assert!(!t.should_emit(&phase, start + Duration::from_millis(40)));
        assert!(!t.should_emit(&phase, start + Duration::from_millis(99)));
        assert!(t.should_emit(&phase, start + Duration::from_millis(100)));
    }

    #[test]
    fn test_phase_change_always_emits() {
        let mut t = ProgressThrottle::new(Duration::from_millis(100));
        let start = Instant::now();
        assert!(t.should_emit(&UpgradePhase::Downloading, start));
        assert!(t.should_emit(&UpgradePhase::Extracting, start + Duration::from_millis(1)));
        assert!(!t.should_emit(&UpgradePhase::Extracting, start + Duration::from_millis(2)));
    }

    #[test]
    fn test_describe_bytes() {
        assert_eq!(describe_bytes(1024 * 1024, Some(4 * 1024 * 1024)), "1.0 MiB / 4.0 MiB (25%)");
        assert_eq!(describe_bytes(512 * 1024, None), "0.5 MiB");
    }
}
