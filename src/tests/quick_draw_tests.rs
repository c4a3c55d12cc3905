//! Quick draw: field and class auto-assignment and save-and-continue chaining.

use super::*;
use crate::model::FieldPath;
use crate::session::Editing;

fn two_fields() -> (FieldResolver, SampleDocument) {
    let resolver = FieldResolver::new()
        .with_field("beta", FieldSchema::new(LabelType::Detection, &["truck"]))
        .with_field("alpha", FieldSchema::new(LabelType::Detection, &["bike"]));
    let sample = SampleDocument::new("s1")
        .with_field(
            "beta",
            json!({"detections": [{"_id": "b1", "label": "truck", "bounding_box": [0.0, 0.0, 0.1, 0.1]}]}),
        )
        .with_field(
            "alpha",
            json!({"detections": [{"_id": "a1", "label": "bike", "bounding_box": [0.2, 0.2, 0.1, 0.1]}]}),
        );
    (resolver, sample)
}

#[test]
fn test_field_tie_goes_to_lexical_order() {
    let (resolver, sample) = two_fields();
    let mut h = Harness::with(resolver, sample, true);

    h.annotator.create(LabelType::Detection).unwrap();
    let label = h.annotator.current_label().unwrap();
    assert_eq!(label.field, FieldPath::from("alpha"));
    // Most frequent class across the type wins; the tie goes to the first seen
    assert_eq!(label.label_value(), Some("bike"));
}

#[test]
fn test_field_with_most_labels_wins() {
    let resolver = resolver().with_field("predictions", FieldSchema::new(LabelType::Detection, &[]));
    let mut h = Harness::with(resolver, sample(), true);
    h.annotator.create(LabelType::Detection).unwrap();
    assert_eq!(h.annotator.current_label().unwrap().field, FieldPath::from("ground_truth"));
}

#[test]
fn test_save_chains_next_label() {
    let mut h = Harness::new();
    h.annotator.enable_quick_draw(LabelType::Detection);

    let first = h.annotator.create(LabelType::Detection).unwrap().unwrap();
    h.annotator.update_attributes(&class("person")).unwrap();
    h.draw(&first, Bounds::new(0.3, 0.3, 0.2, 0.2));
    h.annotator.save().unwrap();

    let Editing::Editing(second) = h.annotator.editing().clone() else {
        panic!("expected a chained label");
    };
    assert_ne!(second, first);
    let label = h.annotator.current_label().unwrap();
    assert_eq!(label.kind, LabelType::Detection);
    assert_eq!(label.field, FieldPath::from("ground_truth"));
    assert!(label.is_new);
    assert_eq!(h.annotator.scene().interactive(), Some(&second));
    // Only the chained creation is undoable
    assert!(h.annotator.undo());
    assert!(!h.annotator.can_undo());
    assert!(h.annotator.session().contains(&first));

    h.annotator.poll_backend();
    assert!(!h.annotator.session().label(&first).unwrap().is_new);
}

#[test]
fn test_chain_reuses_saved_class() {
    let mut h = Harness::new();
    h.annotator.enable_quick_draw(LabelType::Detection);

    let first = h.annotator.create(LabelType::Detection).unwrap().unwrap();
    h.annotator.update_attributes(&class("person")).unwrap();
    h.draw(&first, Bounds::new(0.3, 0.3, 0.2, 0.2));
    h.annotator.save().unwrap();
    h.annotator.poll_backend();

    // Class counts are tied by now, so the third label's class can only
    // come from the first save
    let second = h.annotator.editing().label_id().cloned().unwrap();
    h.draw(&second, Bounds::new(0.6, 0.6, 0.1, 0.1));
    h.annotator.update_attributes(&class("car")).unwrap();
    h.annotator.save().unwrap();

    assert_eq!(h.annotator.current_label().unwrap().label_value(), Some("person"));
}

#[test]
fn test_disabled_quick_draw_stays_on_saved_label() {
    let mut h = Harness::new();
    h.annotator.enable_quick_draw(LabelType::Detection);
    let id = h.annotator.create(LabelType::Detection).unwrap().unwrap();
    h.draw(&id, Bounds::new(0.3, 0.3, 0.2, 0.2));

    h.annotator.disable_quick_draw();
    assert!(!h.annotator.quick_draw().is_active());
    h.annotator.save().unwrap();

    assert_eq!(h.annotator.editing(), &Editing::Editing(id));
    assert_eq!(h.annotator.labels().len(), 4);
}

#[test]
fn test_failed_save_does_not_chain() {
    let mut h = Harness::new();
    h.annotator.enable_quick_draw(LabelType::Detection);
    let id = h.annotator.create(LabelType::Detection).unwrap().unwrap();

    // Not drawn yet
    assert!(h.annotator.save().is_err());
    assert_eq!(h.annotator.editing(), &Editing::Editing(id));
    assert_eq!(h.annotator.labels().len(), 4);
}
