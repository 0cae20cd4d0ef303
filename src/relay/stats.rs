//! Relay statistics

/// Counters kept by the flow controller
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Chunks handed to the sink
    pub frames_submitted: u64,
    /// Bytes received in complete chunks
    pub bytes_received: u64,
    /// Iterations spent waiting for a free slot
    pub slot_waits: u64,
    /// Highest in-flight count observed
    pub peak_in_flight: u64,
    /// Times the sink ran dry, as last reported by the sink
    pub underruns: u64,
    /// Buffers the pool still owned, and freed, at shutdown
    pub buffers_freed: u64,
}

impl RelayStats {
    /// Fraction of loop iterations that found no free slot
    pub fn wait_ratio(&self) -> f32 {
        let total = self.slot_waits + self.frames_submitted;
        if total == 0 {
            0.0
        } else {
            self.slot_waits as f32 / total as f32
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wait_ratio() {
        let mut stats = RelayStats::default();
        assert_eq!(stats.wait_ratio(), 0.0);

        stats.frames_submitted = 3;
        stats.slot_waits = 1;
        assert!((stats.wait_ratio() - 0.25).abs() < f32::EPSILON);
    }
}
