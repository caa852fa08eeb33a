//! ---
//! ems_section: "07-control-stabilization"
//! ems_subsection: "tests"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Controller, window and classifier integration tests."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use chrono::{DateTime, Duration, TimeZone, Utc};
use mgrid_common::config::{GridConfig, StabilizationConfig};
use mgrid_common::types::Channel;
use mgrid_control::{
    ramp_step, ActionClassifier, ActionLabel, ChannelWindows, StabilizationController,
};

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 10, 8, 0, 0).unwrap()
}

#[test]
fn manual_offset_end_to_end() {
    let grid = GridConfig::default();
    let stabilization = StabilizationConfig {
        auto_stabilize: false,
        ..StabilizationConfig::default()
    };
    let mut controller = StabilizationController::from_config(&grid, &stabilization);
    let classifier = ActionClassifier::new(&grid, &stabilization);
    let mut windows = ChannelWindows::new(10).unwrap();
    controller.set_offset(Channel::Voltage, 10.0).unwrap();

    for n in 0..10 {
        let out = controller.apply(230.0, 50.0, start() + Duration::seconds(n));
        assert_eq!(out.voltage, 240.0);
        assert_eq!(out.frequency, 50.0);
        windows.push(out.voltage, out.frequency);

        let label = classifier.label(
            Channel::Voltage,
            out.voltage,
            controller.state().auto_stabilize,
            out.voltage_deviation,
        );
        assert_eq!(
            label,
            ActionLabel::ManualControl {
                channel: Channel::Voltage,
                deviation: -10.0
            }
        );
    }
    assert!(windows.is_full());
}

#[test]
fn label_serializes_as_tagged_object() {
    let adjust = ActionLabel::Adjust {
        channel: Channel::Frequency,
        deviation: 0.25,
    };
    let json = serde_json::to_value(adjust).unwrap();
    assert_eq!(json["kind"], "adjust");
    assert_eq!(json["channel"], "frequency");
    assert_eq!(json["deviation"], 0.25);
    assert_eq!(
        serde_json::to_value(ActionLabel::NoAction).unwrap()["kind"],
        "no_action"
    );
}

#[test]
fn state_snapshot_serializes() {
    let mut controller =
        StabilizationController::from_config(&GridConfig::default(), &StabilizationConfig::default());
    controller.destabilize(start());
    let json = serde_json::to_value(controller.state()).unwrap();
    assert_eq!(json["auto_stabilize"], true);
    assert_eq!(json["stabilization_quality"], 0.0);
    assert!(json["last_destabilize"].is_string());
}

#[test]
fn ramp_sequence_is_monotone_to_zero() {
    let steps = 10;
    let values: Vec<f64> = (1..=steps)
        .scan(8.0, |offset, step| {
            *offset = ramp_step(*offset, step, steps);
            Some(*offset)
        })
        .collect();
    assert!(values.windows(2).all(|pair| pair[1] < pair[0]));
    assert_eq!(values.last().copied(), Some(0.0));
}
