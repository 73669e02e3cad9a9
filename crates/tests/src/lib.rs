//! # Integration Tests
//!
//! Cross-crate tests for the signal controller.
//!
//! - `scenarios`: timing and preemption scenarios driven against the signal
//!   engine with synthetic time, checking the safety invariants every step
//! - `e2e`: controllers, hub and observers running together (no detector
//!   model required)

#[cfg(test)]
mod harness;

#[cfg(test)]
mod scenarios;

#[cfg(test)]
mod e2e;

#[cfg(test)]
mod contract_tests {
    use contracts::{AckStatus, EmergencyAck};

    #[test]
    fn test_contracts_compile() {
        let _ = contracts::ConfigVersion::V1;
    }

    #[test]
    fn test_ack_wire_format() {
        let ack = EmergencyAck {
            alert_id: "amb-1".into(),
            status: AckStatus::Rejected {
                reason: "priority_level must be in [1, 5]".into(),
            },
        };
        let v = serde_json::to_value(&ack).unwrap();
        assert_eq!(v["alert_id"], "amb-1");
        assert_eq!(v["status"], "rejected");
        assert!(v["reason"].as_str().unwrap().contains("priority"));

        let back: EmergencyAck = serde_json::from_value(v).unwrap();
        assert_eq!(back, ack);
    }
}
