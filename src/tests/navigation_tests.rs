//! Sample navigation while editing.

use std::time::Duration;

use web_time::Instant;

use super::*;
use crate::confirm::ExitChoice;
use crate::navigator::NavigationTarget;
use crate::session::Editing;

#[derive(Debug, Default)]
struct Pager {
    moves: Vec<usize>,
}

impl NavigationTarget for Pager {
    fn on_start(&mut self) {}

    fn go(&mut self, offset: usize) {
        self.moves.push(offset);
    }
}

fn ms(value: u64) -> Duration {
    Duration::from_millis(value)
}

#[test]
fn test_navigation_leaves_editing_first() {
    let mut h = Harness::new();
    let mut pager = Pager::default();
    h.annotator.select(&LabelId::from("d1")).unwrap();

    h.annotator.navigate(Instant::now(), false, &mut pager);
    assert!(h.annotator.editing().is_idle());
    assert_eq!(pager.moves, vec![1]);
}

#[test]
fn test_cancelled_exit_blocks_navigation() {
    let mut h = Harness::new();
    let mut pager = Pager::default();
    h.annotator.select(&LabelId::from("d1")).unwrap();
    h.annotator.update_attributes(&class("person")).unwrap();

    h.prompt.answer_exit(ExitChoice::Cancel);
    h.annotator.navigate(Instant::now(), false, &mut pager);

    assert!(pager.moves.is_empty());
    assert_eq!(h.annotator.editing(), &Editing::Editing(LabelId::from("d1")));
    assert_eq!(h.prompt.exit_prompts(), 1);
}

#[test]
fn test_burst_uses_configured_window() {
    let mut h = Harness::new();
    let mut pager = Pager::default();
    let t0 = Instant::now();
    let window = h.annotator.config().navigation.debounce();

    h.annotator.navigate(t0, false, &mut pager);
    h.annotator.navigate(t0 + ms(40), false, &mut pager);
    h.annotator.navigate(t0 + ms(80), false, &mut pager);
    assert_eq!(pager.moves, vec![1]);

    assert!(!h.annotator.poll_navigation(t0 + ms(80) + window - ms(1), &mut pager));
    assert!(h.annotator.poll_navigation(t0 + ms(80) + window, &mut pager));
    assert_eq!(pager.moves, vec![1, 2]);
}

#[test]
fn test_sample_switch_cancels_pending_move() {
    let mut h = Harness::new();
    let mut pager = Pager::default();
    let t0 = Instant::now();

    h.annotator.navigate(t0, false, &mut pager);
    h.annotator.navigate(t0 + ms(20), false, &mut pager);
    assert!(h.annotator.load_sample(other_sample()));

    assert!(!h.annotator.poll_navigation(t0 + ms(1000), &mut pager));
    assert_eq!(pager.moves, vec![1]);
}

#[test]
fn test_same_view_keeps_session() {
    let mut h = Harness::new();
    h.annotator.select(&LabelId::from("d1")).unwrap();
    h.annotator.update_attributes(&class("person")).unwrap();

    assert!(!h.annotator.load_sample(sample()));
    assert_eq!(h.annotator.editing(), &Editing::Editing(LabelId::from("d1")));
    assert!(h.annotator.has_changes());
    assert!(h.annotator.can_undo());
}

#[test]
fn test_new_slice_resets_session() {
    let mut h = Harness::new();
    h.annotator.select(&LabelId::from("d1")).unwrap();

    assert!(h.annotator.load_sample(sample().with_slice("right")));
    assert!(h.annotator.editing().is_idle());
    assert_eq!(h.annotator.labels().len(), 3);
    assert_eq!(h.annotator.scene().overlay_count(), 3);
}
