use mach::mesh::{boundary_attribute, CartesianMesh, Side};
use mach::MachError;
use serde_json::json;

#[test]
fn cartesian_mesh_elements_tile_the_box() {
    let mesh = CartesianMesh::new(&[4, 2], &[0.0, -1.0], &[2.0, 1.0]);
    assert_eq!(mesh.dim(), 2);
    assert_eq!(mesh.num_elements(), 8);
    assert_eq!(mesh.volume(), 4.0);

    let element = mesh.element(5);
    assert_eq!(mesh.element_cell(5), [1, 1, 0]);
    assert_eq!(element.origin, [0.5, 0.0, 0.0]);
    assert_eq!(element.widths, [0.5, 1.0, 1.0]);

    let total: f64 = mesh.elements().map(|e| e.widths[0] * e.widths[1]).sum();
    assert_eq!(total, mesh.volume());
}

#[test]
fn boundary_attributes_follow_box_numbering() {
    assert_eq!(boundary_attribute(1, 0, Side::Lower), 1);
    assert_eq!(boundary_attribute(1, 0, Side::Upper), 2);
    assert_eq!(boundary_attribute(2, 1, Side::Lower), 1);
    assert_eq!(boundary_attribute(2, 0, Side::Upper), 2);
    assert_eq!(boundary_attribute(2, 1, Side::Upper), 3);
    assert_eq!(boundary_attribute(2, 0, Side::Lower), 4);
    assert_eq!(boundary_attribute(3, 2, Side::Lower), 1);
    assert_eq!(boundary_attribute(3, 0, Side::Lower), 5);
    assert_eq!(boundary_attribute(3, 2, Side::Upper), 6);

    let mesh = CartesianMesh::unit_box(&[3, 2]);
    let faces = mesh.boundary_faces();
    assert_eq!(faces.len(), 10);
    for attribute in 1..=4 {
        let count = faces.iter().filter(|f| f.attribute == attribute).count();
        let expected = if attribute % 2 == 1 { 3 } else { 2 };
        assert_eq!(count, expected, "attribute {}", attribute);
    }
    assert_eq!(mesh.max_boundary_attribute(), 4);
}

#[test]
fn boundary_attributes_outside_the_box_are_reported_under_their_key() {
    let mesh = CartesianMesh::unit_box(&[2, 2]);
    assert!(mesh.check_boundary_attributes("bcs", &[1, 2, 3, 4]).is_ok());
    assert!(mesh.check_boundary_attributes("bcs", &[]).is_ok());
    match mesh.check_boundary_attributes("bcs", &[1, 5, 0]) {
        Err(MachError::UnknownOption { key, value }) => {
            assert_eq!(key, "bcs");
            assert_eq!(value, "5");
        }
        other => panic!("expected an unknown option, got {:?}", other),
    }

    let mesh = CartesianMesh::unit_box(&[2, 2, 2]);
    assert!(mesh.check_boundary_attributes("ess-bdr", &[6]).is_ok());
    assert!(mesh.check_boundary_attributes("ess-bdr", &[7]).is_err());
}

#[test]
fn periodic_axes_replace_boundary_faces_with_interior_faces() {
    let mesh = CartesianMesh::unit_box(&[3, 2]);
    assert_eq!(mesh.interior_faces().len(), 7);

    let periodic = CartesianMesh::unit_box(&[3, 2]).with_periodic_axes(&[0]);
    assert!(periodic.is_periodic(0));
    assert!(!periodic.is_periodic(1));
    assert_eq!(periodic.interior_faces().len(), 9);
    assert!(periodic.boundary_faces().iter().all(|f| f.axis == 1));

    let wrap = periodic
        .interior_faces()
        .into_iter()
        .find(|f| f.axis == 0 && f.left == 2)
        .unwrap();
    assert_eq!(wrap.right, 0);
}

#[test]
fn mesh_from_options() {
    let mesh = CartesianMesh::from_options(&json!({
        "num-cells": [2, 2, 2],
        "upper": [1.0, 2.0, 3.0],
        "periodic": [2]
    }))
    .unwrap();
    assert_eq!(mesh.num_elements(), 8);
    assert_eq!(mesh.volume(), 6.0);
    assert!(mesh.is_periodic(2));

    assert!(matches!(
        CartesianMesh::from_options(&json!({ "num-cells": [2, 0] })),
        Err(MachError::UnknownOption { .. })
    ));
    assert!(matches!(
        CartesianMesh::from_options(&json!({ "num-cells": [2], "periodic": [1] })),
        Err(MachError::UnknownOption { .. })
    ));
    assert!(matches!(
        CartesianMesh::from_options(&json!({ "num-cells": [2, 2], "lower": [0.0] })),
        Err(MachError::SizeMismatch { .. })
    ));
}
