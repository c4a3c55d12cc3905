//! End-to-end tests of the annotation surface.
//!
//! Each test drives an [`Annotator`] over a [`RecordingScene`] and a
//! [`MemoryBackend`], answering dialogs through a [`ScriptedPrompt`].

mod navigation_tests;
mod persistence_tests;
mod quick_draw_tests;

use serde_json::json;

use crate::annotator::Annotator;
use crate::config::SessionConfig;
use crate::confirm::{ConfirmWorkflow, MemoryPreferences, ScriptedPrompt};
use crate::fields::FieldResolver;
use crate::model::{
    AttributeKind, AttributeSpec, AttributeValue, Attributes, Bounds, FieldSchema, LABEL_ATTRIBUTE, LabelId,
    LabelType,
};
use crate::persistence::{MemoryBackend, PersistOp};
use crate::sample::SampleDocument;
use crate::scene::{RecordingScene, RendererEvent, Scene, SceneBus};

/// Fields of the test dataset.
fn resolver() -> FieldResolver {
    FieldResolver::new()
        .with_field(
            "ground_truth",
            FieldSchema::new(LabelType::Detection, &["car", "person"])
                .with_attribute(AttributeSpec::new("confidence", AttributeKind::Float)),
        )
        .with_field("weather", FieldSchema::new(LabelType::Classification, &["cat", "dog"]))
        .with_field("lanes", FieldSchema::new(LabelType::Polyline, &["lane"]))
}

/// A sample with two detections and one classification.
fn sample() -> SampleDocument {
    SampleDocument::new("s1")
        .with_field(
            "ground_truth",
            json!({
                "_cls": "Detections",
                "detections": [
                    {"_id": "d1", "_cls": "Detection", "label": "car", "bounding_box": [0.1, 0.1, 0.2, 0.2]},
                    {"_id": "d2", "_cls": "Detection", "label": "person", "bounding_box": [0.5, 0.5, 0.1, 0.3]}
                ]
            }),
        )
        .with_field("weather", json!({"_id": "c1", "_cls": "Classification", "label": "cat"}))
}

fn other_sample() -> SampleDocument {
    SampleDocument::new("s2").with_field(
        "ground_truth",
        json!({"detections": [{"_id": "d9", "label": "car", "bounding_box": [0.0, 0.0, 0.5, 0.5]}]}),
    )
}

/// Annotator plus the handles a test needs to observe it.
struct Harness {
    annotator: Annotator<RecordingScene, MemoryBackend>,
    bus: SceneBus,
    prompt: ScriptedPrompt,
}

impl Harness {
    /// Dataset of [`resolver`] with [`sample`] loaded.
    fn new() -> Self {
        Self::with(resolver(), sample(), true)
    }

    fn with(resolver: FieldResolver, sample: SampleDocument, ask_before_delete: bool) -> Self {
        let prompt = ScriptedPrompt::new();
        let confirm = ConfirmWorkflow::new(
            Box::new(prompt.clone()),
            Box::new(MemoryPreferences::new(ask_before_delete)),
        );
        let mut backend = MemoryBackend::new()
            .with_sample(&sample, &resolver)
            .with_sample(&other_sample(), &resolver);
        for (path, schema) in resolver.fields() {
            backend = backend.with_schema(path.as_str(), schema.clone());
        }

        let mut bus = SceneBus::new();
        let mut annotator = Annotator::new(RecordingScene::new(), backend, SessionConfig::default(), confirm)
            .with_resolver(resolver);
        annotator.attach(&mut bus);
        annotator.load_sample(sample);
        annotator.scene_mut().take_commands();

        Self {
            annotator,
            bus,
            prompt,
        }
    }

    /// Publish a renderer event on the current scene and process it.
    fn renderer(&mut self, event: RendererEvent) {
        let scene = self.annotator.scene().scene_id();
        self.bus.publish(scene, event);
        self.annotator.pump_scene_events(&mut self.bus);
    }

    /// Finish a drag or draw of `id` with new bounds.
    fn draw(&mut self, id: &LabelId, bounds: Bounds) {
        self.renderer(RendererEvent::OverlayBoundsChanged { id: id.clone(), bounds });
    }

    /// Operations submitted to the backend so far.
    fn submitted(&self) -> Vec<&PersistOp> {
        self.annotator
            .backend()
            .submitted()
            .iter()
            .map(|request| &request.op)
            .collect()
    }

    fn label_value(&self, id: &str) -> Option<String> {
        self.annotator
            .session()
            .label(&LabelId::from(id))
            .and_then(|label| label.label_value().map(str::to_string))
    }
}

fn class(value: &str) -> Attributes {
    Attributes::from([(LABEL_ATTRIBUTE.to_string(), AttributeValue::from(value))])
}
