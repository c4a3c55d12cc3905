//! Save and delete round trips with the backend, including failures and
//! responses arriving after the sample changed.

use super::*;
use crate::confirm::DeleteDecision;
use crate::error::SessionError;
use crate::model::{FieldPath, SyncState};
use crate::notify::{NotificationLevel, RetryAction};
use crate::persistence::{PersistOk, PersistResponse};
use crate::sample::SampleId;

fn s1() -> SampleId {
    SampleId::from("s1")
}

fn confirm() -> DeleteDecision {
    DeleteDecision::Confirm { dont_ask_again: false }
}

/// Create a detection and draw it, leaving it under edit.
fn drawn_detection(h: &mut Harness) -> LabelId {
    let id = h.annotator.create(LabelType::Detection).unwrap().unwrap();
    h.draw(&id, Bounds::new(0.3, 0.3, 0.2, 0.2));
    id
}

#[test]
fn test_save_new_label() {
    let mut h = Harness::new();
    let id = drawn_detection(&mut h);
    assert!(h.annotator.has_changes());

    h.annotator.save().unwrap();
    assert!(matches!(h.submitted()[..], [PersistOp::CreateLabel { .. }]));
    assert_eq!(h.annotator.pending_requests(), 1);

    h.annotator.poll_backend();
    let label = h.annotator.session().label(&id).unwrap();
    assert!(!label.is_new);
    assert_eq!(label.sync, SyncState::Synced);
    assert_eq!(h.annotator.backend().stored_count(&s1()), 4);
    assert_eq!(h.annotator.pending_requests(), 0);

    // Further edits are sent as a diff
    h.annotator.update_attributes(&class("person")).unwrap();
    h.annotator.save().unwrap();
    match h.submitted()[1] {
        PersistOp::UpdateLabel { diff, .. } => {
            assert_eq!(diff.len(), 1);
            assert_eq!(diff[LABEL_ATTRIBUTE], Some(AttributeValue::from("person")));
        }
        other => panic!("unexpected op: {:?}", other),
    }
}

#[test]
fn test_save_requires_geometry() {
    let mut h = Harness::new();
    h.annotator.create(LabelType::Detection).unwrap();

    let err = h.annotator.save().unwrap_err();
    assert!(matches!(err, SessionError::Validation { .. }));
    assert!(h.submitted().is_empty());
    assert!(h.annotator.current_label().unwrap().is_new);
}

#[test]
fn test_failed_save_keeps_changes_and_offers_retry() {
    let mut h = Harness::new();
    let d1 = LabelId::from("d1");
    h.annotator.select(&d1).unwrap();
    h.annotator.update_attributes(&class("person")).unwrap();

    h.annotator.backend_mut().fail_next(1);
    h.annotator.save().unwrap();
    h.annotator.poll_backend();

    let label = h.annotator.current_label().unwrap();
    assert_eq!(label.sync, SyncState::Dirty);
    assert_eq!(label.label_value(), Some("person"));
    assert!(h.annotator.has_changes());

    let notifications = h.annotator.take_notifications();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].level, NotificationLevel::Error);
    assert_eq!(notifications[0].retry, Some(RetryAction::Save));

    // Retry goes through
    h.annotator.save().unwrap();
    h.annotator.poll_backend();
    assert!(!h.annotator.has_changes());
    assert_eq!(h.annotator.current_label().unwrap().sync, SyncState::Synced);
    let stored = h.annotator.backend().stored(&s1(), &d1).unwrap();
    assert_eq!(stored.get(LABEL_ATTRIBUTE), Some(&AttributeValue::from("person")));
}

#[test]
fn test_delete_new_label_is_local() {
    let mut h = Harness::new();
    let id = drawn_detection(&mut h);
    assert_eq!(h.annotator.scene().overlay_count(), 4);

    assert!(h.annotator.delete().unwrap());
    assert!(h.submitted().is_empty());
    assert_eq!(h.prompt.delete_prompts(), 0);
    assert!(!h.annotator.session().contains(&id));
    assert!(h.annotator.editing().is_idle());
    assert_eq!(h.annotator.scene().overlay_count(), 3);
}

#[test]
fn test_delete_persisted_label_waits_for_backend() {
    let mut h = Harness::new();
    let d2 = LabelId::from("d2");
    h.annotator.select(&d2).unwrap();
    h.prompt.answer_delete(confirm());

    assert!(h.annotator.delete().unwrap());
    assert_eq!(h.prompt.delete_prompts(), 1);
    assert!(matches!(h.submitted()[..], [PersistOp::DeleteLabel { .. }]));
    // Still shown until the backend confirms
    assert!(h.annotator.session().contains(&d2));
    assert!(h.annotator.scene().has_overlay(&d2));

    h.annotator.poll_backend();
    assert!(!h.annotator.session().contains(&d2));
    assert!(!h.annotator.scene().has_overlay(&d2));
    assert!(h.annotator.editing().is_idle());
    assert_eq!(h.annotator.backend().stored_count(&s1()), 2);
}

#[test]
fn test_delete_without_confirmation_preference() {
    let mut h = Harness::with(resolver(), sample(), false);
    h.annotator.select(&LabelId::from("d2")).unwrap();

    assert!(h.annotator.delete().unwrap());
    assert_eq!(h.prompt.delete_prompts(), 0);
    assert_eq!(h.submitted().len(), 1);
}

#[test]
fn test_cancelled_delete_does_nothing() {
    let mut h = Harness::new();
    let d2 = LabelId::from("d2");
    h.annotator.select(&d2).unwrap();
    h.prompt.answer_delete(DeleteDecision::Cancel);

    assert!(!h.annotator.delete().unwrap());
    assert!(h.submitted().is_empty());
    assert_eq!(h.annotator.editing().label_id(), Some(&d2));
}

#[test]
fn test_failed_delete_keeps_label() {
    let mut h = Harness::new();
    let d2 = LabelId::from("d2");
    h.annotator.select(&d2).unwrap();
    h.prompt.answer_delete(confirm());
    h.annotator.backend_mut().fail_next(1);

    h.annotator.delete().unwrap();
    h.annotator.poll_backend();

    let label = h.annotator.session().label(&d2).unwrap();
    assert_eq!(label.sync, SyncState::Synced);
    assert!(h.annotator.scene().has_overlay(&d2));
    assert_eq!(h.annotator.editing().label_id(), Some(&d2));

    let notifications = h.annotator.take_notifications();
    assert_eq!(notifications[0].retry, Some(RetryAction::Delete));
}

#[test]
fn test_undo_delete_recreates_label() {
    let mut h = Harness::new();
    let d2 = LabelId::from("d2");
    h.annotator.select(&d2).unwrap();
    h.prompt.answer_delete(confirm());
    h.annotator.delete().unwrap();
    h.annotator.poll_backend();
    assert!(h.annotator.can_undo());

    assert!(h.annotator.undo());
    assert!(h.annotator.scene().has_overlay(&d2));
    assert!(matches!(h.submitted().last(), Some(PersistOp::CreateLabel { id, .. }) if *id == d2));

    h.annotator.poll_backend();
    let label = h.annotator.session().label(&d2).unwrap();
    assert!(!label.is_new);
    assert_eq!(label.sync, SyncState::Synced);
    assert_eq!(h.annotator.backend().stored_count(&s1()), 3);
    assert_eq!(label.label_value(), Some("person"));
}

#[test]
fn test_redo_delete_while_restore_in_flight() {
    let mut h = Harness::new();
    let d2 = LabelId::from("d2");
    h.annotator.select(&d2).unwrap();
    h.prompt.answer_delete(confirm());
    h.annotator.delete().unwrap();
    h.annotator.poll_backend();

    h.annotator.backend_mut().hold_responses(true);
    assert!(h.annotator.undo());
    assert!(h.annotator.redo());
    assert!(!h.annotator.session().contains(&d2));

    // The restore lands after the label was deleted again
    h.annotator.backend_mut().release();
    h.annotator.poll_backend();
    assert!(matches!(h.submitted().last(), Some(PersistOp::DeleteLabel { id, .. }) if *id == d2));
    h.annotator.poll_backend();

    assert!(h.annotator.backend().stored(&s1(), &d2).is_none());
    assert_eq!(h.annotator.backend().stored_count(&s1()), 2);
    assert_eq!(h.annotator.pending_requests(), 0);
    assert!(h.annotator.take_notifications().is_empty());
}

#[test]
fn test_undo_saved_creation_removes_it_remotely() {
    let mut h = Harness::new();
    let id = drawn_detection(&mut h);
    h.annotator.save().unwrap();
    h.annotator.poll_backend();
    assert_eq!(h.annotator.backend().stored_count(&s1()), 4);

    assert!(h.annotator.undo());
    assert!(!h.annotator.session().contains(&id));
    assert!(matches!(h.submitted().last(), Some(PersistOp::DeleteLabel { .. })));

    h.annotator.poll_backend();
    assert_eq!(h.annotator.backend().stored_count(&s1()), 3);
}

#[test]
fn test_geometry_of_other_label_is_synced() {
    let mut h = Harness::new();
    let d2 = LabelId::from("d2");
    let bounds = Bounds::new(0.6, 0.6, 0.1, 0.1);
    h.draw(&d2, bounds);

    assert!(matches!(h.submitted()[..], [PersistOp::UpdateLabel { .. }]));
    h.annotator.poll_backend();
    assert_eq!(h.annotator.session().label(&d2).unwrap().sync, SyncState::Synced);
    let stored = h.annotator.backend().stored(&s1(), &d2).unwrap();
    assert_eq!(stored.get("bounding_box"), Some(&bounds.to_attribute()));
}

#[test]
fn test_stale_response_after_sample_switch_is_discarded() {
    let mut h = Harness::new();
    h.annotator.select(&LabelId::from("d1")).unwrap();
    h.annotator.update_attributes(&class("person")).unwrap();
    h.annotator.backend_mut().hold_responses(true);
    h.annotator.backend_mut().fail_next(1);
    h.annotator.save().unwrap();

    assert!(h.annotator.load_sample(other_sample()));
    h.annotator.backend_mut().release();
    h.annotator.poll_backend();

    assert_eq!(h.annotator.labels().len(), 1);
    assert!(h.annotator.editing().is_idle());
    assert!(h.annotator.take_notifications().is_empty());
    assert_eq!(h.annotator.pending_requests(), 0);
}

#[test]
fn test_schema_responses_survive_sample_switch() {
    let mut h = Harness::new();
    h.annotator.backend_mut().hold_responses(true);
    h.annotator.provision_field(
        FieldPath::from("predictions"),
        FieldSchema::new(LabelType::Detection, &["car"]),
    );
    h.annotator.load_sample(other_sample());
    h.annotator.backend_mut().release();
    h.annotator.poll_backend();

    assert!(h.annotator.resolver().get(&FieldPath::from("predictions")).is_some());
}

#[test]
fn test_empty_schema_listing_warns() {
    let mut h = Harness::new();
    h.annotator.backend_mut().hold_responses(true);
    let request = h.annotator.refresh_schemas();

    h.annotator.on_persist_response(PersistResponse {
        request,
        sample: s1(),
        result: Ok(PersistOk::Done),
    });

    let notifications = h.annotator.take_notifications();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].level, NotificationLevel::Warning);
    assert_eq!(h.annotator.resolver().len(), 3);
    assert_eq!(h.annotator.pending_requests(), 0);
}

#[test]
fn test_refresh_schemas_replaces_resolver() {
    let mut h = Harness::with(FieldResolver::new(), sample(), true);
    assert!(h.annotator.labels().is_empty());

    let mut backend_schemas = MemoryBackend::new();
    for (path, schema) in resolver().fields() {
        backend_schemas = backend_schemas.with_schema(path.as_str(), schema.clone());
    }
    *h.annotator.backend_mut() = backend_schemas;

    h.annotator.refresh_schemas();
    h.annotator.poll_backend();
    assert_eq!(h.annotator.resolver().len(), 3);
    // Labels of the now-known fields show up without reloading the sample
    assert_eq!(h.annotator.labels().len(), 3);
    assert_eq!(h.annotator.scene().overlay_count(), 3);
    assert!(h.annotator.editing().is_idle());
}

#[test]
fn test_provisioned_field_shows_existing_labels() {
    let mut resolver = resolver();
    resolver.remove(&FieldPath::from("weather"));
    let mut h = Harness::with(resolver, sample(), true);
    let c1 = LabelId::from("c1");
    h.annotator.select(&LabelId::from("d1")).unwrap();
    h.annotator.update_attributes(&class("person")).unwrap();
    assert!(!h.annotator.session().contains(&c1));

    h.annotator.provision_field(
        FieldPath::from("weather"),
        FieldSchema::new(LabelType::Classification, &["cat", "dog"]),
    );
    h.annotator.poll_backend();

    assert!(h.annotator.scene().has_overlay(&c1));
    assert_eq!(h.label_value("c1").as_deref(), Some("cat"));
    // The edit in progress is untouched
    assert_eq!(h.annotator.editing().label_id(), Some(&LabelId::from("d1")));
    assert!(h.annotator.has_changes());

    // A second listing does not duplicate them
    h.annotator.refresh_schemas();
    h.annotator.poll_backend();
    assert_eq!(h.annotator.labels().len(), 3);
}
