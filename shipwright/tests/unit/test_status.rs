//! Status mapping properties

use proptest::prelude::*;
use provider_api::BuildStatus;
use shipwright::status::{evaluate, mapper, DeploymentStatus, Transition};

fn raw_status() -> impl Strategy<Value = String> {
    prop_oneof![
        proptest::sample::select(
            BuildStatus::KNOWN
                .iter()
                .map(|s| s.as_str().to_string())
                .collect::<Vec<_>>()
        ),
        "[A-Z_]{0,16}",
        ".*",
    ]
}

fn internal_status() -> impl Strategy<Value = DeploymentStatus> {
    proptest::sample::select(DeploymentStatus::ALL.to_vec())
}

proptest! {
    #[test]
    fn mapping_is_total_and_agrees_on_terminality(raw in raw_status()) {
        let native = BuildStatus::from(raw.as_str());
        let mapped = mapper::map_str(&raw);
        prop_assert_eq!(mapped, mapper::map(&native));
        prop_assert_eq!(mapper::is_terminal(&native), mapped.is_terminal());
        prop_assert_ne!(mapped, DeploymentStatus::Pending);
    }

    #[test]
    fn accepted_sequences_only_move_forward(
        offered in proptest::collection::vec(internal_status(), 0..24)
    ) {
        let mut current: Option<DeploymentStatus> = None;
        let mut accepted = Vec::new();
        for next in offered {
            if evaluate(current, next) == Transition::Advance {
                accepted.push(next);
                current = Some(next);
            }
        }

        for pair in accepted.windows(2) {
            prop_assert!(pair[1].rank() > pair[0].rank());
            prop_assert!(!pair[0].is_terminal());
        }
    }
}

#[test]
fn native_statuses_map_to_the_documented_internal_status() {
    let cases = [
        ("STATUS_UNKNOWN", DeploymentStatus::Placed),
        ("PENDING", DeploymentStatus::Placed),
        ("QUEUED", DeploymentStatus::Placed),
        ("WORKING", DeploymentStatus::Running),
        ("SUCCESS", DeploymentStatus::Ready),
        ("FAILURE", DeploymentStatus::Error),
        ("INTERNAL_ERROR", DeploymentStatus::Error),
        ("TIMEOUT", DeploymentStatus::Error),
        ("EXPIRED", DeploymentStatus::Error),
        ("CANCELLED", DeploymentStatus::Aborted),
        ("SOMETHING_NEW", DeploymentStatus::Error),
    ];
    for (raw, expected) in cases {
        assert_eq!(mapper::map_str(raw), expected, "{raw}");
    }
}
