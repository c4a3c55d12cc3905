//! Replays a scripted editing session against the in-memory scene and
//! backend, then prints the resulting labels and renderer traffic as JSON.
//!
//! Usage: `label-session-replay <script.json>`

#[cfg(not(target_arch = "wasm32"))]
fn main() {
    let Some(path) = std::env::args().nth(1) else {
        eprintln!("Usage: label-session-replay <script.json>");
        std::process::exit(2);
    };

    let config = label_session::SessionConfig::load_from_default_path().unwrap_or_default();
    env_logger::Builder::new()
        .filter_level(config.preferences.log_level.to_level_filter())
        .parse_default_env()
        .init();

    match replay::run(std::path::Path::new(&path), config) {
        Ok(output) => println!("{}", output),
        Err(e) => {
            eprintln!("Replay error: {}", e);
            std::process::exit(1);
        }
    }
}

#[cfg(target_arch = "wasm32")]
fn main() {}

#[cfg(not(target_arch = "wasm32"))]
mod replay {
    use std::collections::BTreeMap;
    use std::path::Path;

    use serde::Deserialize;
    use serde_json::json;
    use thiserror::Error;

    use label_session::Annotator;
    use label_session::SessionConfig;
    use label_session::confirm::{ConfirmWorkflow, DeleteDecision, ExitChoice, MemoryPreferences, ScriptedPrompt};
    use label_session::fields::FieldResolver;
    use label_session::model::{Attributes, FieldPath, FieldSchema, LabelId, LabelType};
    use label_session::persistence::MemoryBackend;
    use label_session::sample::SampleDocument;
    use label_session::scene::{RecordingScene, RendererEvent, Scene, SceneBus};

    #[derive(Error, Debug)]
    pub enum ReplayError {
        #[error("I/O error: {0}")]
        Io(#[from] std::io::Error),

        #[error("Invalid script: {0}")]
        Json(#[from] serde_json::Error),
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "lowercase")]
    enum ExitAnswer {
        Cancel,
        Discard,
        Save,
    }

    #[derive(Debug, Deserialize)]
    #[serde(tag = "action", rename_all = "snake_case")]
    enum Step {
        LoadSample { sample: SampleDocument },
        Create { kind: LabelType },
        Select { id: LabelId },
        Update { attributes: Attributes },
        Input { name: String, value: String },
        Save,
        Delete,
        Exit,
        Undo,
        Redo,
        EnableQuickDraw { kind: LabelType },
        DisableQuickDraw,
        ProvisionField { field: FieldPath, schema: FieldSchema },
        ActivateField { field: FieldPath },
        DeactivateField { field: FieldPath },
        RefreshSchemas,
        Renderer { event: RendererEvent },
        ReinitializeRenderer,
        PollBackend,
    }

    #[derive(Debug, Deserialize)]
    struct Script {
        /// Schemas known to both the session and the backend
        #[serde(default)]
        schemas: BTreeMap<FieldPath, FieldSchema>,
        /// Default field per label type
        #[serde(default)]
        defaults: BTreeMap<LabelType, FieldPath>,
        #[serde(default = "default_ask_before_delete")]
        ask_before_delete: bool,
        /// Answers to delete confirmations (true = delete)
        #[serde(default)]
        delete_answers: Vec<bool>,
        /// Answers to unsaved-changes dialogs
        #[serde(default)]
        exit_answers: Vec<ExitAnswer>,
        steps: Vec<Step>,
    }

    fn default_ask_before_delete() -> bool {
        true
    }

    pub fn run(path: &Path, config: SessionConfig) -> Result<String, ReplayError> {
        let script: Script = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        log::info!("▶️ Replaying {} steps from {:?}", script.steps.len(), path);

        let prompt = ScriptedPrompt::new();
        for answer in &script.delete_answers {
            prompt.answer_delete(if *answer {
                DeleteDecision::Confirm { dont_ask_again: false }
            } else {
                DeleteDecision::Cancel
            });
        }
        for answer in &script.exit_answers {
            prompt.answer_exit(match answer {
                ExitAnswer::Cancel => ExitChoice::Cancel,
                ExitAnswer::Discard => ExitChoice::Discard,
                ExitAnswer::Save => ExitChoice::Save,
            });
        }
        let confirm = ConfirmWorkflow::new(
            Box::new(prompt),
            Box::new(MemoryPreferences::new(script.ask_before_delete)),
        );

        let mut resolver = FieldResolver::new();
        let mut backend = MemoryBackend::new();
        for (field, schema) in &script.schemas {
            resolver.insert(field.clone(), schema.clone());
            backend = backend.with_schema(field.as_str(), schema.clone());
        }
        for (kind, field) in &script.defaults {
            resolver.set_default(*kind, field.clone());
        }

        let mut bus = SceneBus::new();
        let mut annotator =
            Annotator::new(RecordingScene::new(), backend, config, confirm).with_resolver(resolver);
        annotator.attach(&mut bus);

        let mut errors = Vec::new();
        for (index, step) in script.steps.into_iter().enumerate() {
            log::debug!("Step {}: {:?}", index, step);
            if let Err(message) = apply(&mut annotator, &mut bus, step) {
                log::warn!("Step {} failed: {}", index, message);
                errors.push(json!({ "step": index, "error": message }));
            }
        }

        let labels: Vec<_> = annotator
            .labels()
            .iter()
            .map(|label| {
                json!({
                    "id": label.id,
                    "field": label.field,
                    "type": label.kind,
                    "is_new": label.is_new,
                    "attributes": label.attributes,
                })
            })
            .collect();
        let notifications: Vec<_> = annotator
            .take_notifications()
            .into_iter()
            .map(|n| n.message)
            .collect();
        let output = json!({
            "editing": annotator.editing().label_id(),
            "labels": labels,
            "commands": annotator.scene().commands(),
            "notifications": notifications,
            "errors": errors,
        });
        Ok(serde_json::to_string_pretty(&output)?)
    }

    fn apply(
        annotator: &mut Annotator<RecordingScene, MemoryBackend>,
        bus: &mut SceneBus,
        step: Step,
    ) -> Result<(), String> {
        let err = |e: label_session::SessionError| e.to_string();
        match step {
            Step::LoadSample { sample } => {
                annotator.load_sample(sample);
            }
            Step::Create { kind } => {
                annotator.create(kind).map_err(err)?;
            }
            Step::Select { id } => {
                annotator.select(&id).map_err(err)?;
            }
            Step::Update { attributes } => annotator.update_attributes(&attributes).map_err(err)?,
            Step::Input { name, value } => annotator.set_attribute_input(&name, &value).map_err(err)?,
            Step::Save => annotator.save().map_err(err)?,
            Step::Delete => {
                annotator.delete().map_err(err)?;
            }
            Step::Exit => {
                annotator.exit();
            }
            Step::Undo => {
                annotator.undo();
            }
            Step::Redo => {
                annotator.redo();
            }
            Step::EnableQuickDraw { kind } => annotator.enable_quick_draw(kind),
            Step::DisableQuickDraw => annotator.disable_quick_draw(),
            Step::ProvisionField { field, schema } => {
                annotator.provision_field(field, schema);
            }
            Step::ActivateField { field } => {
                annotator.activate_field(field);
            }
            Step::DeactivateField { field } => {
                annotator.deactivate_field(field);
            }
            Step::RefreshSchemas => {
                annotator.refresh_schemas();
            }
            Step::Renderer { event } => {
                bus.publish(annotator.scene().scene_id(), event);
                annotator.pump_scene_events(bus);
            }
            Step::ReinitializeRenderer => {
                annotator.scene_mut().reinitialize();
                bus.publish(annotator.scene().scene_id(), RendererEvent::Ready);
                annotator.pump_scene_events(bus);
            }
            Step::PollBackend => {
                annotator.poll_backend();
            }
        }
        Ok(())
    }
}
