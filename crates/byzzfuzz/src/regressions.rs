//! Canned fault schedules that reproduced real liveness bugs.
//!
//! Each instance is stored in its canonical JSON form and decodable by
//! name from the `verify` command. They double as fixtures: a schedule
//! that once found a bug must keep decoding and replaying bit-for-bit.

use crate::error::ConfigError;
use crate::schedule::InstanceConfig;

// Two drops around the first proposal; the cluster never recovered,
// even with a five-minute grace window.
const BUG001: &str = r#"{"drops":[{"step":1,"partition":[[1],[3],[0,2]]},{"step":6,"partition":[[0,2],[1,3]]}],"corruptions":[],"timeout":60000000000}"#;

// Partitioned at step 2 and never recovers.
const BUG002: &str = r#"{"drops":[{"step":6,"partition":[[0],[3],[1,2]]},{"step":2,"partition":[[0],[2],[1,3]]}],"corruptions":[],"timeout":60000000000}"#;

// Stalls at step 8.
const BUG003: &str = r#"{"drops":[{"step":8,"partition":[[0,2],[1,3]]},{"step":0,"partition":[[0],[1,2,3]]}],"corruptions":[],"timeout":60000000000}"#;

// One replica repeatedly cut off: exercises catch-up after lagging.
const LAGGING: &str = r#"{"drops":[{"step":2,"partition":[[3],[0,1,2]]},{"step":5,"partition":[[3],[0,1,2]]},{"step":8,"partition":[[3],[0,1,2]]}],"corruptions":[],"timeout":60000000000}"#;

/// Names accepted by [`regression`].
pub const REGRESSION_NAMES: &[&str] = &["bug001", "bug002", "bug003", "lagging"];

/// Decodes a canned regression instance by name.
pub fn regression(name: &str) -> Result<InstanceConfig, ConfigError> {
    let json = match name {
        "bug001" => BUG001,
        "bug002" => BUG002,
        "bug003" => BUG003,
        "lagging" => LAGGING,
        other => return Err(ConfigError::UnknownRegression(other.to_owned())),
    };
    InstanceConfig::from_json_str(json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::ReplicaId;

    #[test]
    fn every_regression_decodes_and_validates() {
        for name in REGRESSION_NAMES {
            let instance = regression(name).unwrap();
            instance.validate(4).unwrap();
            assert!(!instance.drops.is_empty(), "{name} has no drops");
        }
    }

    #[test]
    fn unknown_names_are_config_errors() {
        assert!(matches!(
            regression("bug999"),
            Err(ConfigError::UnknownRegression(_))
        ));
    }

    #[test]
    fn lagging_always_cuts_off_the_same_replica() {
        let instance = regression("lagging").unwrap();
        assert_eq!(instance.drops.len(), 3);
        for drop in &instance.drops {
            assert!(drop
                .partition
                .isolates(ReplicaId::new(3), ReplicaId::new(0)));
        }
    }

    #[test]
    fn timeouts_come_from_the_stored_schedule() {
        let instance = regression("bug001").unwrap();
        assert_eq!(instance.timeout(), std::time::Duration::from_secs(60));
        // liveness_timeout was absent in the stored form, defaults.
        assert_eq!(
            instance.liveness_timeout(),
            std::time::Duration::from_secs(60)
        );
    }
}
