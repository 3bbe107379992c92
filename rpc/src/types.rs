use serde::Deserialize;
use ufo_alien_core::{Address, Hash};

/// The slice of a remote snapshot a side chain cares about. Field tags
/// match the persisted snapshot blob; everything else is ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotSummary {
    pub number: u64,

    pub period: u64,

    #[serde(rename = "loopStartTime")]
    pub loop_start_time: u64,

    #[serde(default)]
    pub signers: Vec<Address>,

    pub hash: Hash,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_reads_the_persisted_snapshot_shape() {
        let blob = r#"{
            "period": 5,
            "number": 42,
            "confirmedNumber": 28,
            "hash": "0x1111111111111111111111111111111111111111111111111111111111111111",
            "historyHash": [],
            "signers": ["0x00000000000000000000000000000000000000aa"],
            "votes": {},
            "tally": {},
            "voters": {},
            "cancels": {},
            "cancelers": {},
            "candidates": {},
            "punished": {},
            "confirms": {},
            "headerTime": 1540000209,
            "loopStartTime": 1540000105
        }"#;
        let summary: SnapshotSummary = serde_json::from_str(blob).unwrap();
        assert_eq!(summary.number, 42);
        assert_eq!(summary.period, 5);
        assert_eq!(summary.loop_start_time, 1_540_000_105);
        assert_eq!(summary.signers.len(), 1);
        assert_eq!(summary.signers[0], Address::from_low_u64_be(0xaa));
    }
}
