//! The annotation surface: one editing session wired to its renderer,
//! persistence backend, undo history and confirmation dialogs.
//!
//! Every public operation leaves the renderer in sync with the session, so
//! callers never relay session changes themselves.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use web_time::Instant;

use crate::bridge::{BridgeAction, RendererBridge};
use crate::config::SessionConfig;
use crate::confirm::{ConfirmWorkflow, ExitGate};
use crate::error::SessionError;
use crate::fields::FieldResolver;
use crate::history::{CommandHistory, ContextId, UndoAvailability};
use crate::model::{
    AttributeKind, AttributeSpec, Attributes, BOUNDING_BOX_ATTRIBUTE, FieldPath, FieldSchema, LABEL_ATTRIBUTE, Label,
    LabelId, LabelType, POINTS_ATTRIBUTE, SyncState, diff_attributes, is_geometry_attribute,
};
use crate::navigator::{DebouncedNavigator, NavigationTarget};
use crate::notify::{Notification, Notifications, RetryAction};
use crate::persistence::{LabelBackend, PersistOk, PersistOp, PersistRequest, PersistResponse, RequestId};
use crate::quick_draw::QuickDraw;
use crate::sample::{SampleDocument, SampleId};
use crate::scene::{RendererEvent, Scene, SceneBus, SceneId};
use crate::session::{Editing, EditingSession, SessionCommand, SessionEvent};

/// What an in-flight request was issued for.
#[derive(Debug, Clone)]
enum PendingKind {
    /// User save of a label
    Save {
        id: LabelId,
        kind: LabelType,
        field: FieldPath,
        label_value: Option<String>,
        previous_snapshot: Option<Attributes>,
        was_new: bool,
    },
    /// User delete of a persisted label
    Delete { id: LabelId },
    /// Backend catching up with a local create (undo of a delete)
    RestoreCreate { id: LabelId, field: FieldPath },
    /// Backend catching up with a local removal (undo of a create)
    RestoreDelete { id: LabelId },
    /// Backend catching up with local attribute changes
    RestoreUpdate { id: LabelId },
    ListSchemas,
    CreateField { field: FieldPath, schema: FieldSchema },
    SetActive { field: FieldPath, active: bool },
}

impl PendingKind {
    /// Whether the response only makes sense for the sample it was issued for.
    fn is_sample_scoped(&self) -> bool {
        !matches!(
            self,
            PendingKind::ListSchemas | PendingKind::CreateField { .. } | PendingKind::SetActive { .. }
        )
    }
}

#[derive(Debug, Clone)]
struct Pending {
    /// Session epoch at submission
    epoch: u64,
    kind: PendingKind,
}

/// Editing session facade used by the embedding UI.
pub struct Annotator<S: Scene, B: LabelBackend> {
    config: SessionConfig,
    context: ContextId,
    session: EditingSession,
    history: CommandHistory<SessionCommand>,
    resolver: FieldResolver,
    quick_draw: QuickDraw,
    bridge: RendererBridge,
    confirm: ConfirmWorkflow,
    navigator: DebouncedNavigator,
    notifications: Notifications,
    scene: S,
    backend: B,
    /// Sample currently displayed
    sample: Option<SampleDocument>,
    next_request: RequestId,
    pending: HashMap<RequestId, Pending>,
}

impl<S: Scene, B: LabelBackend> Annotator<S, B> {
    pub fn new(scene: S, backend: B, config: SessionConfig, confirm: ConfirmWorkflow) -> Self {
        log::debug!("🚀 Annotator created (context '{}')", config.history.context_id);
        Self {
            context: config.history.context(),
            history: CommandHistory::with_config(config.history.undo_config()),
            navigator: DebouncedNavigator::new(config.navigation.debounce()),
            config,
            session: EditingSession::new(),
            resolver: FieldResolver::new(),
            quick_draw: QuickDraw::new(),
            bridge: RendererBridge::new(),
            confirm,
            notifications: Notifications::new(),
            scene,
            backend,
            sample: None,
            next_request: 0,
            pending: HashMap::new(),
        }
    }

    /// Start from a known set of field schemas.
    pub fn with_resolver(mut self, resolver: FieldResolver) -> Self {
        self.resolver = resolver;
        self
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn session(&self) -> &EditingSession {
        &self.session
    }

    pub fn editing(&self) -> &Editing {
        self.session.editing()
    }

    pub fn labels(&self) -> &[Label] {
        self.session.labels()
    }

    pub fn current_label(&self) -> Option<&Label> {
        self.session.current()
    }

    pub fn has_changes(&self) -> bool {
        self.session.has_changes()
    }

    pub fn resolver(&self) -> &FieldResolver {
        &self.resolver
    }

    /// Declare the default field for new labels of `kind`.
    pub fn set_default_field(&mut self, kind: LabelType, field: FieldPath) {
        self.resolver.set_default(kind, field);
    }

    pub fn quick_draw(&self) -> &QuickDraw {
        &self.quick_draw
    }

    pub fn bridge(&self) -> &RendererBridge {
        &self.bridge
    }

    pub fn scene(&self) -> &S {
        &self.scene
    }

    pub fn scene_mut(&mut self) -> &mut S {
        &mut self.scene
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn sample(&self) -> Option<&SampleDocument> {
        self.sample.as_ref()
    }

    /// Number of requests waiting for a response.
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    /// Take queued notifications, oldest first.
    pub fn take_notifications(&mut self) -> Vec<Notification> {
        self.notifications.drain()
    }

    // ------------------------------------------------------------------
    // Editing
    // ------------------------------------------------------------------

    /// Start a new label of `kind`. Returns the new label's id, or `None`
    /// when no field can hold it yet and the session awaits a schema.
    /// Unsaved edits of the current label go through the exit dialog first.
    pub fn create(&mut self, kind: LabelType) -> Result<Option<LabelId>, SessionError> {
        if !self.leave() {
            self.flush();
            return Err(SessionError::UnsavedChanges);
        }
        let created = self.create_label(kind);
        self.flush();
        Ok(created)
    }

    /// Begin editing an existing label. Returns false when the user kept
    /// editing the current label instead.
    pub fn select(&mut self, id: &LabelId) -> Result<bool, SessionError> {
        if !self.session.contains(id) {
            return Err(SessionError::UnknownLabel { id: id.clone() });
        }
        if self.session.editing().label_id() == Some(id) {
            return Ok(true);
        }
        if !self.leave() {
            self.flush();
            return Ok(false);
        }
        let result = self.session.select(id);
        self.flush();
        result.map(|()| true)
    }

    /// Merge `partial` into the label being edited, as one undoable step.
    pub fn update_attributes(&mut self, partial: &Attributes) -> Result<(), SessionError> {
        let label = self.session.current().ok_or_else(not_editing)?;
        if self.resolver.is_read_only(&label.field) {
            return Err(SessionError::ReadOnlyField {
                field: label.field.clone(),
            });
        }
        let command = SessionCommand::update(label, partial);
        if command.is_noop() {
            return Ok(());
        }
        self.history.execute(&self.context, command, &mut self.session);
        self.flush();
        Ok(())
    }

    /// Parse raw form input for one attribute and apply it. Invalid input
    /// is returned as a validation error and never reaches the label.
    pub fn set_attribute_input(&mut self, name: &str, raw: &str) -> Result<(), SessionError> {
        let label = self.session.current().ok_or_else(not_editing)?;
        let schema = self.resolver.require(&label.field)?;
        if schema.read_only {
            return Err(SessionError::ReadOnlyField {
                field: label.field.clone(),
            });
        }
        let spec = if name == LABEL_ATTRIBUTE {
            schema.label_spec()
        } else {
            schema
                .attribute(name)
                .cloned()
                .unwrap_or_else(|| AttributeSpec::new(name, AttributeKind::Text))
        };
        let value = spec.parse_input(raw)?;
        self.update_attributes(&Attributes::from([(name.to_string(), value)]))
    }

    /// Persist the label being edited. With quick draw on, a new label of
    /// the same type is started right away.
    pub fn save(&mut self) -> Result<(), SessionError> {
        let result = self.submit_save();
        if let Ok(kind) = result {
            if self.quick_draw.is_active() {
                log::debug!("⚡ Chaining next {}", kind.name());
                self.session.exit();
                self.history.clear(&self.context);
                self.create_label(kind);
            }
        }
        self.flush();
        result.map(|_| ())
    }

    /// Delete the label being edited. Unsaved labels are discarded locally;
    /// persisted ones are removed once the backend confirms. Returns false
    /// when the user cancelled.
    pub fn delete(&mut self) -> Result<bool, SessionError> {
        let label = self.session.current().cloned().ok_or_else(not_editing)?;
        if let Err(e) = self.resolver.require(&label.field) {
            log::warn!("Refusing to delete {}: {}", label.id, e);
            self.notifications.push(Notification::error(&e, None));
            return Err(e);
        }

        if label.is_new {
            log::debug!("🗑️ Discarding unsaved label {}", label.id);
            self.history
                .execute(&self.context, SessionCommand::DeleteLabel { label }, &mut self.session);
            self.flush();
            return Ok(true);
        }

        if !self.confirm.gate_delete() {
            return Ok(false);
        }
        let op = PersistOp::DeleteLabel {
            field: label.field.clone(),
            id: label.id.clone(),
        };
        let request = self.submit(op, PendingKind::Delete { id: label.id.clone() });
        self.session.set_sync(&label.id, SyncState::Pending(request))?;
        Ok(true)
    }

    /// Leave the editing state through the unsaved-changes dialog. Returns
    /// false when the user cancelled.
    pub fn exit(&mut self) -> bool {
        let left = self.leave();
        self.flush();
        left
    }

    pub fn undo(&mut self) -> bool {
        let done = self.history.undo(&self.context, &mut self.session);
        if done {
            let command = self
                .history
                .stack(&self.context)
                .and_then(|stack| stack.peek_redo())
                .cloned();
            log::debug!("↩️ Undo: {:?}", command.as_ref().map(SessionCommand::label_id));
            self.reconcile(command, true);
        }
        self.flush();
        done
    }

    pub fn redo(&mut self) -> bool {
        let done = self.history.redo(&self.context, &mut self.session);
        if done {
            let command = self
                .history
                .stack(&self.context)
                .and_then(|stack| stack.peek_undo())
                .cloned();
            log::debug!("↪️ Redo: {:?}", command.as_ref().map(SessionCommand::label_id));
            self.reconcile(command, false);
        }
        self.flush();
        done
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo(&self.context)
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo(&self.context)
    }

    /// Undo/redo flags for UI affordances.
    pub fn availability(&self) -> UndoAvailability {
        self.history.availability(&self.context)
    }

    pub fn enable_quick_draw(&mut self, kind: LabelType) {
        self.quick_draw.enable(kind);
    }

    pub fn disable_quick_draw(&mut self) {
        self.quick_draw.disable();
    }

    // ------------------------------------------------------------------
    // Field schemas
    // ------------------------------------------------------------------

    /// Ask the backend to create a field. A session awaiting a schema of
    /// the same type resumes once it exists.
    pub fn provision_field(&mut self, field: FieldPath, schema: FieldSchema) -> RequestId {
        let op = PersistOp::CreateFieldSchema {
            field: field.clone(),
            schema: schema.clone(),
        };
        self.submit(op, PendingKind::CreateField { field, schema })
    }

    pub fn activate_field(&mut self, field: FieldPath) -> RequestId {
        let op = PersistOp::ActivateFieldSchema { field: field.clone() };
        self.submit(op, PendingKind::SetActive { field, active: true })
    }

    pub fn deactivate_field(&mut self, field: FieldPath) -> RequestId {
        let op = PersistOp::DeactivateFieldSchema { field: field.clone() };
        self.submit(op, PendingKind::SetActive { field, active: false })
    }

    /// Reload every field schema from the backend.
    pub fn refresh_schemas(&mut self) -> RequestId {
        self.submit(PersistOp::ListFieldSchema, PendingKind::ListSchemas)
    }

    // ------------------------------------------------------------------
    // Samples
    // ------------------------------------------------------------------

    /// Show `sample`. A different sample or slice resets the session;
    /// returns whether it did.
    pub fn load_sample(&mut self, sample: SampleDocument) -> bool {
        if self.sample.as_ref().is_some_and(|current| current.is_same_view(&sample)) {
            log::debug!("Sample {} unchanged, keeping session", sample.id);
            self.sample = Some(sample);
            return false;
        }

        log::info!("📄 Loading sample {}", sample.id);
        self.navigator.cleanup();
        self.session.reset();
        self.history.clear_all();
        let labels = sample.labels(&self.resolver);
        self.session.hydrate(labels);
        self.sample = Some(sample);
        self.flush();
        true
    }

    fn sample_id(&self) -> SampleId {
        self.sample.as_ref().map(|s| s.id.clone()).unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // Renderer
    // ------------------------------------------------------------------

    /// Subscribe to the renderer's current generation and replay the session into it.
    pub fn attach(&mut self, bus: &mut SceneBus) {
        self.bridge.attach(bus, &self.scene);
        self.rebuild_scene();
    }

    /// Process one renderer event of generation `scene_id`.
    pub fn handle_renderer_event(&mut self, scene_id: SceneId, event: RendererEvent) {
        let action = match self.bridge.handle_event(&self.scene, scene_id, event) {
            Ok(Some(action)) => action,
            Ok(None) => return,
            Err(e) => {
                log::warn!("Ignoring renderer event: {}", e);
                return;
            }
        };

        match action {
            BridgeAction::Select(id) => {
                let current = self.session.editing().label_id().cloned();
                match self.select(&id) {
                    Ok(true) => {}
                    Ok(false) => {
                        if let Some(current) = current {
                            self.bridge.force_select(&mut self.scene, &current);
                        }
                    }
                    Err(e) => log::warn!("Ignoring selection of {}: {}", id, e),
                }
            }
            BridgeAction::Deselect(id) => {
                if self.session.editing().label_id() == Some(&id) && !self.leave() {
                    self.bridge.force_select(&mut self.scene, &id);
                }
            }
            BridgeAction::Geometry { id, attributes } => self.apply_geometry(id, attributes),
            BridgeAction::Ready => self.rebuild_scene(),
        }
        self.flush();
    }

    /// Drain the subscription and handle every event. Re-attaches first when
    /// the renderer moved to a new generation.
    pub fn pump_scene_events(&mut self, bus: &mut SceneBus) -> usize {
        if !self.bridge.is_attached() || self.scene.scene_id() != self.bridge.scene() {
            self.attach(bus);
        }
        let scene_id = self.bridge.scene();
        let events = self.bridge.drain_events();
        let count = events.len();
        for event in events {
            self.handle_renderer_event(scene_id, event);
        }
        count
    }

    fn apply_geometry(&mut self, id: LabelId, geometry: Attributes) {
        let before = self.session.label(&id).map(|l| l.attributes.clone());
        if let Err(e) = self.session.apply_geometry(&id, geometry) {
            log::warn!("Dropping geometry update: {}", e);
            return;
        }

        // The label under edit is persisted by `save`; others catch up now
        if self.session.editing().label_id() == Some(&id) {
            return;
        }
        let Some(label) = self.session.label(&id) else {
            return;
        };
        if label.is_new {
            return;
        }
        let diff: BTreeMap<_, _> = diff_attributes(&before.unwrap_or_default(), &label.attributes)
            .into_iter()
            .filter(|(key, _)| is_geometry_attribute(key))
            .collect();
        if diff.is_empty() {
            return;
        }
        let op = PersistOp::UpdateLabel {
            field: label.field.clone(),
            id: id.clone(),
            diff,
        };
        let request = self.submit(op, PendingKind::RestoreUpdate { id: id.clone() });
        let _ = self.session.set_sync(&id, SyncState::Pending(request));
    }

    fn rebuild_scene(&mut self) {
        let created = self.bridge.rebuild(&mut self.scene, &self.session);
        for (id, overlay) in created {
            self.session.set_overlay(&id, Some(overlay));
        }
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    /// Feed every completion the backend has delivered.
    pub fn poll_backend(&mut self) -> usize {
        let responses = self.backend.poll_responses();
        let count = responses.len();
        for response in responses {
            self.on_persist_response(response);
        }
        count
    }

    /// Reconcile local state with one completed request.
    pub fn on_persist_response(&mut self, response: PersistResponse) {
        let Some(pending) = self.pending.remove(&response.request) else {
            log::warn!("Response for unknown request #{}", response.request);
            return;
        };
        if pending.kind.is_sample_scoped()
            && (response.sample != self.sample_id() || pending.epoch != self.session.epoch())
        {
            log::info!(
                "Discarding response #{} for previous sample {}",
                response.request,
                response.sample
            );
            return;
        }

        match (pending.kind, response.result) {
            (
                PendingKind::Save {
                    id,
                    kind,
                    field,
                    label_value,
                    was_new,
                    ..
                },
                Ok(_),
            ) => self.on_saved(response.request, id, kind, field, label_value, was_new),
            (
                PendingKind::Save {
                    id,
                    previous_snapshot,
                    ..
                },
                Err(e),
            ) => {
                let _ = self.session.set_sync(&id, SyncState::Dirty);
                self.session.restore_snapshot(&id, previous_snapshot);
                let error = SessionError::persistence("save label", e.to_string());
                self.notifications.push(Notification::error(&error, Some(RetryAction::Save)));
            }
            (PendingKind::Delete { id }, Ok(_)) => {
                if let Some(mut label) = self.session.label(&id).cloned() {
                    log::info!("🗑️ Deleted label {}", id);
                    // Coming back through undo means re-creating it
                    label.is_new = true;
                    label.sync = SyncState::Dirty;
                    label.overlay = None;
                    self.history
                        .execute(&self.context, SessionCommand::DeleteLabel { label }, &mut self.session);
                }
            }
            (PendingKind::Delete { id }, Err(e)) => {
                let _ = self.session.set_sync(&id, SyncState::Synced);
                let error = SessionError::persistence("delete label", e.to_string());
                self.notifications
                    .push(Notification::error(&error, Some(RetryAction::Delete)));
            }
            (PendingKind::RestoreCreate { id, field }, Ok(_)) => match self.session.label(&id).map(|l| l.sync) {
                Some(sync) if sync == SyncState::Pending(response.request) => {
                    let _ = self.session.mark_persisted(&id);
                }
                Some(_) => {}
                None => {
                    // Redone away while the restore was in flight
                    log::debug!("Label {} gone before its restore completed, removing it remotely", id);
                    let op = PersistOp::DeleteLabel { field, id: id.clone() };
                    self.submit(op, PendingKind::RestoreDelete { id });
                }
            },
            (PendingKind::RestoreUpdate { id }, Ok(_)) => {
                if self.session.label(&id).map(|l| l.sync) == Some(SyncState::Pending(response.request)) {
                    let _ = self.session.mark_persisted(&id);
                }
            }
            (PendingKind::RestoreDelete { id }, Ok(_)) => {
                log::debug!("Backend removed {}", id);
            }
            (
                PendingKind::RestoreCreate { id, .. }
                | PendingKind::RestoreUpdate { id }
                | PendingKind::RestoreDelete { id },
                Err(e),
            ) => {
                let _ = self.session.set_sync(&id, SyncState::Dirty);
                let error = SessionError::persistence("sync label", e.to_string());
                self.notifications.push(Notification::error(&error, None));
            }
            (PendingKind::ListSchemas, Ok(PersistOk::Schemas(schemas))) => {
                let known = self.known_fields();
                self.resolver.replace_all(schemas);
                self.hydrate_new_fields(&known);
                self.resume_awaiting();
            }
            (PendingKind::ListSchemas, Ok(PersistOk::Done)) => {
                log::warn!("Schema listing returned no schemas");
                self.notifications
                    .push(Notification::warning("Field schemas could not be refreshed"));
            }
            (PendingKind::CreateField { field, schema }, Ok(_)) => {
                log::info!("Created field '{}'", field);
                let known = self.known_fields();
                self.resolver.insert(field, schema);
                self.hydrate_new_fields(&known);
                self.resume_awaiting();
            }
            (PendingKind::SetActive { field, active }, Ok(_)) => {
                if active {
                    self.resolver.activate(&field);
                    self.resume_awaiting();
                } else {
                    self.resolver.deactivate(&field);
                }
            }
            (PendingKind::ListSchemas, Err(e)) => {
                let error = SessionError::persistence("load field schemas", e.to_string());
                self.notifications.push(Notification::error(&error, None));
            }
            (PendingKind::CreateField { field, .. }, Err(e)) => {
                let error = SessionError::persistence(format!("create field '{}'", field), e.to_string());
                self.notifications.push(Notification::error(&error, None));
            }
            (PendingKind::SetActive { field, active }, Err(e)) => {
                let verb = if active { "activate" } else { "deactivate" };
                let error = SessionError::persistence(format!("{} field '{}'", verb, field), e.to_string());
                self.notifications.push(Notification::error(&error, None));
            }
        }
        self.flush();
    }

    fn on_saved(
        &mut self,
        request: RequestId,
        id: LabelId,
        kind: LabelType,
        field: FieldPath,
        label_value: Option<String>,
        was_new: bool,
    ) {
        let Some(label) = self.session.label(&id) else {
            if was_new {
                // Removed locally while the create was in flight
                log::debug!("Label {} gone before its save completed, removing it remotely", id);
                let op = PersistOp::DeleteLabel { field, id: id.clone() };
                self.submit(op, PendingKind::RestoreDelete { id });
            }
            return;
        };

        log::info!("💾 Saved label {}", id);
        let notice = Notification::info(format!("{} saved to '{}'", kind.name(), field));
        if label.sync == SyncState::Pending(request) {
            let _ = self.session.mark_persisted(&id);
        } else {
            // A newer request is still in flight; only the creation is settled
            let sync = label.sync;
            let _ = self.session.mark_persisted(&id);
            let _ = self.session.set_sync(&id, sync);
        }
        self.quick_draw.track(kind, &field, label_value.as_deref());
        self.notifications.push(notice);
    }

    fn known_fields(&self) -> BTreeSet<FieldPath> {
        self.resolver.fields().map(|(path, _)| path.clone()).collect()
    }

    /// Show the current sample's labels in fields that gained a schema
    /// since the sample was loaded.
    fn hydrate_new_fields(&mut self, known: &BTreeSet<FieldPath>) {
        let Some(sample) = &self.sample else {
            return;
        };
        let labels: Vec<Label> = sample
            .labels(&self.resolver)
            .into_iter()
            .filter(|label| !known.contains(&label.field) && !self.session.contains(&label.id))
            .collect();
        if labels.is_empty() {
            return;
        }
        log::debug!("Hydrating {} labels from new fields of {}", labels.len(), sample.id);
        self.session.hydrate(labels);
    }

    fn submit(&mut self, op: PersistOp, kind: PendingKind) -> RequestId {
        self.next_request += 1;
        let id = self.next_request;
        log::debug!("📤 Request #{}: {}", id, op.describe());
        self.pending.insert(
            id,
            Pending {
                epoch: self.session.epoch(),
                kind,
            },
        );
        self.backend.submit(PersistRequest {
            id,
            sample: self.sample_id(),
            op,
        });
        id
    }

    // ------------------------------------------------------------------
    // Navigation
    // ------------------------------------------------------------------

    /// Request a move to the next sample. Editing is left first; a cancelled
    /// unsaved-changes dialog blocks the move.
    pub fn navigate<T: NavigationTarget>(&mut self, now: Instant, illegal: bool, target: &mut T) {
        let mut navigator = std::mem::take(&mut self.navigator);
        navigator.navigate(
            now,
            illegal,
            &mut LeaveThenGo {
                annotator: self,
                target,
                blocked: false,
            },
        );
        self.navigator = navigator;
    }

    /// Fire a coalesced move whose quiet window elapsed by `now`.
    pub fn poll_navigation<T: NavigationTarget>(&mut self, now: Instant, target: &mut T) -> bool {
        let mut navigator = std::mem::take(&mut self.navigator);
        let fired = navigator.poll(
            now,
            &mut LeaveThenGo {
                annotator: self,
                target,
                blocked: false,
            },
        );
        self.navigator = navigator;
        fired
    }

    /// Unmount: cancel pending navigation, drop the subscription and all
    /// local state. In-flight requests are left to complete unobserved.
    pub fn teardown(&mut self, bus: &mut SceneBus) {
        log::debug!("Annotator teardown");
        self.navigator.cleanup();
        self.bridge.detach(bus);
        self.session.reset();
        self.session.take_events();
        self.history.clear_all();
        self.pending.clear();
        self.sample = None;
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Leave the editing state, asking about unsaved changes. Clears the
    /// undo history on success.
    fn leave(&mut self) -> bool {
        match self.session.editing() {
            Editing::Idle => return true,
            Editing::AwaitingSchema(_) => {
                self.session.exit();
                return true;
            }
            Editing::Editing(_) => {}
        }

        match self.confirm.gate_exit(self.session.has_changes()) {
            ExitGate::Proceed => {}
            ExitGate::Cancel => {
                log::debug!("Exit cancelled, still editing");
                return false;
            }
            ExitGate::Discard => {
                if let Err(e) = self.session.revert() {
                    log::error!("Revert failed: {}", e);
                }
            }
            ExitGate::SaveFirst => {
                if let Err(e) = self.submit_save() {
                    log::warn!("Save before exit failed: {}", e);
                    self.notifications.push(Notification::error(&e, Some(RetryAction::Save)));
                    return false;
                }
            }
        }
        self.session.exit();
        self.history.clear(&self.context);
        true
    }

    fn create_label(&mut self, kind: LabelType) -> Option<LabelId> {
        let Some(field) = self
            .quick_draw
            .resolve_field(kind, self.session.labels(), &self.resolver)
        else {
            self.session.await_schema(kind);
            return None;
        };
        let label_value =
            self.quick_draw
                .resolve_label_value(kind, &field, self.session.labels(), &self.resolver);
        let label = EditingSession::new_label(kind, field, label_value);
        let id = label.id.clone();
        log::debug!("✨ Creating {} {} in '{}'", kind.name(), id, label.field);
        self.history
            .execute(&self.context, SessionCommand::CreateLabel { label }, &mut self.session);
        Some(id)
    }

    /// Continue a creation that was waiting for a schema, if one is now eligible.
    fn resume_awaiting(&mut self) {
        if let Editing::AwaitingSchema(kind) = *self.session.editing() {
            if self.resolver.default_field(kind).is_some() {
                log::debug!("Schema available for {}, resuming creation", kind.name());
                self.create_label(kind);
            }
        }
    }

    /// Validate and submit the label under edit. Returns its type.
    fn submit_save(&mut self) -> Result<LabelType, SessionError> {
        let label = self.session.current().ok_or_else(not_editing)?;
        if self.resolver.is_read_only(&label.field) {
            return Err(SessionError::ReadOnlyField {
                field: label.field.clone(),
            });
        }
        if label.kind.is_spatial() && label.geometry().is_none() {
            let attribute = match label.kind {
                LabelType::Polyline => POINTS_ATTRIBUTE,
                _ => BOUNDING_BOX_ATTRIBUTE,
            };
            return Err(SessionError::validation(attribute, "the label has not been drawn yet"));
        }
        let label_value = label.label_value().map(str::to_string);

        let request = self.session.prepare_save()?;
        let op = if request.is_new {
            PersistOp::CreateLabel {
                field: request.field.clone(),
                id: request.id.clone(),
                attributes: request.attributes,
            }
        } else if request.diff.is_empty() {
            log::debug!("Nothing to save for {}", request.id);
            return Ok(request.kind);
        } else {
            PersistOp::UpdateLabel {
                field: request.field.clone(),
                id: request.id.clone(),
                diff: request.diff,
            }
        };
        let pending = PendingKind::Save {
            id: request.id.clone(),
            kind: request.kind,
            field: request.field,
            label_value,
            previous_snapshot: request.previous_snapshot,
            was_new: request.is_new,
        };
        let id = request.id;
        let submitted = self.submit(op, pending);
        self.session.set_sync(&id, SyncState::Pending(submitted))?;
        Ok(request.kind)
    }

    /// Bring the backend in line with an undone or redone command.
    fn reconcile(&mut self, command: Option<SessionCommand>, undone: bool) {
        let events = self.session.take_events();
        for event in &events {
            match event {
                SessionEvent::LabelRemoved(label) if !label.is_new => {
                    let op = PersistOp::DeleteLabel {
                        field: label.field.clone(),
                        id: label.id.clone(),
                    };
                    self.submit(op, PendingKind::RestoreDelete { id: label.id.clone() });
                }
                SessionEvent::LabelAdded(id) => {
                    let Some(label) = self.session.label(id) else {
                        continue;
                    };
                    let orphaned = match label.sync {
                        SyncState::Dirty => true,
                        SyncState::Pending(request) => !self.pending.contains_key(&request),
                        SyncState::Local | SyncState::Synced => false,
                    };
                    if label.is_new && orphaned {
                        let op = PersistOp::CreateLabel {
                            field: label.field.clone(),
                            id: id.clone(),
                            attributes: label.attributes.clone(),
                        };
                        let pending = PendingKind::RestoreCreate {
                            id: id.clone(),
                            field: label.field.clone(),
                        };
                        let request = self.submit(op, pending);
                        let _ = self.session.set_sync(id, SyncState::Pending(request));
                    }
                }
                _ => {}
            }
        }

        if let Some(SessionCommand::UpdateAttributes { id, before, after }) = command {
            let persisted_elsewhere = self.session.editing().label_id() != Some(&id)
                && self.session.label(&id).is_some_and(|l| !l.is_new);
            if persisted_elsewhere {
                let field = self.session.label(&id).map(|l| l.field.clone());
                if let Some(field) = field {
                    let diff = if undone { before } else { after };
                    let op = PersistOp::UpdateLabel {
                        field,
                        id: id.clone(),
                        diff,
                    };
                    let request = self.submit(op, PendingKind::RestoreUpdate { id: id.clone() });
                    let _ = self.session.set_sync(&id, SyncState::Pending(request));
                }
            }
        }

        self.relay(&events);
    }

    /// Relay queued session changes to the renderer.
    fn flush(&mut self) {
        let events = self.session.take_events();
        self.relay(&events);
    }

    fn relay(&mut self, events: &[SessionEvent]) {
        if events.is_empty() {
            return;
        }
        let created = self
            .bridge
            .apply_session_events(&mut self.scene, &self.session, events);
        for (id, overlay) in created {
            self.session.set_overlay(&id, Some(overlay));
        }
    }
}

impl<S: Scene + std::fmt::Debug, B: LabelBackend + std::fmt::Debug> std::fmt::Debug for Annotator<S, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Annotator")
            .field("context", &self.context)
            .field("editing", self.session.editing())
            .field("labels", &self.session.labels().len())
            .field("pending", &self.pending.len())
            .field("scene", &self.scene)
            .field("backend", &self.backend)
            .finish_non_exhaustive()
    }
}

fn not_editing() -> SessionError {
    log::error!("Label operation with no label being edited");
    SessionError::NotEditing
}

/// Navigation target that leaves the editing state before every move.
struct LeaveThenGo<'a, S: Scene, B: LabelBackend, T: NavigationTarget> {
    annotator: &'a mut Annotator<S, B>,
    target: &'a mut T,
    /// Set when the user chose to keep editing
    blocked: bool,
}

impl<S: Scene, B: LabelBackend, T: NavigationTarget> NavigationTarget for LeaveThenGo<'_, S, B, T> {
    fn on_start(&mut self) {
        self.blocked = !self.annotator.exit();
        if !self.blocked {
            self.target.on_start();
        }
    }

    fn go(&mut self, offset: usize) {
        if self.blocked {
            log::debug!("Navigation by {} blocked by unsaved changes", offset);
            return;
        }
        self.target.go(offset);
    }
}
