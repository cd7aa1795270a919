use mach::inputs::{check_size, InputValue};
use mach::{MachError, MachInputs};

#[test]
fn inputs_hold_scalars_and_borrowed_fields() {
    let state = vec![1.0, 2.0, 3.0];
    let inputs = MachInputs::new().with("state", &state).with("dt", 0.1);
    assert_eq!(inputs.len(), 2);
    assert!(inputs.contains("state"));
    assert_eq!(inputs.get("dt"), Some(&InputValue::Scalar(0.1)));
    assert_eq!(inputs.field("state").unwrap(), Some(state.as_slice()));
    assert_eq!(inputs.scalar("dt").unwrap(), Some(0.1));
    assert_eq!(inputs.scalar("time").unwrap(), None);
    assert_eq!(inputs.require_field("state").unwrap(), &[1.0, 2.0, 3.0]);
}

#[test]
fn input_type_and_presence_errors() {
    let state = vec![0.0; 2];
    let inputs = MachInputs::new().with("state", &state).with("dt", 1.0);
    assert!(matches!(
        inputs.scalar("state"),
        Err(MachError::BadInputType { expected: "scalar", .. })
    ));
    assert!(matches!(
        inputs.field("dt"),
        Err(MachError::BadInputType { expected: "field", .. })
    ));
    assert!(matches!(inputs.require_scalar("time"), Err(MachError::MissingInput(key)) if key == "time"));
    assert!(matches!(inputs.require_field("state_dot"), Err(MachError::MissingInput(_))));
}

#[test]
fn later_insertions_replace_earlier_ones() {
    let a = vec![1.0];
    let b = vec![2.0];
    let mut inputs = MachInputs::new().with("state", &a);
    inputs.insert("state", &b);
    assert_eq!(inputs.require_field("state").unwrap(), &[2.0]);
    assert_eq!(inputs.len(), 1);
}

#[test]
fn check_size_reports_both_sizes() {
    assert!(check_size(3, 3).is_ok());
    assert!(matches!(
        check_size(3, 4),
        Err(MachError::SizeMismatch { expected: 3, actual: 4 })
    ));
}
