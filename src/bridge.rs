//! Bridge between the editing session and the external renderer.
//!
//! Session → renderer: structural changes, displayed attributes and
//! geometry restored by undo are issued as [`RendererCommand`]s.
//! Renderer → session: selection and geometry events are turned into
//! [`BridgeAction`]s for the caller to apply.
//!
//! Both directions go through the same "last synced" record per overlay, so
//! a value that came from the renderer is never echoed back to it, and a
//! renderer event repeating already-synced data produces nothing.

use std::collections::HashMap;

use crate::error::SessionError;
use crate::model::{Attributes, Geometry, Label, LabelId, OverlayRef, is_geometry_attribute};
use crate::scene::{RendererCommand, RendererEvent, Scene, SceneBus, SceneId, Subscription, Viewport};
use crate::session::{EditingSession, SessionEvent};

/// What the caller should do in response to a renderer event.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeAction {
    /// The user selected an overlay
    Select(LabelId),
    /// The user deselected an overlay
    Deselect(LabelId),
    /// New geometry for a label, to be written into its attributes
    Geometry { id: LabelId, attributes: Attributes },
    /// The renderer (re)initialized and needs the session replayed
    Ready,
}

/// Last values exchanged with the renderer for one overlay.
#[derive(Debug, Clone, Default, PartialEq)]
struct Synced {
    display: Attributes,
    geometry: Attributes,
}

impl Synced {
    fn of(label: &Label) -> Self {
        let (geometry, display) = label
            .attributes
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .partition(|(key, _)| is_geometry_attribute(key));
        Self { display, geometry }
    }
}

/// Pan/zoom mirror with snap-back prevention.
#[derive(Debug, Clone, Default)]
pub struct ViewportSync {
    shared: Option<Viewport>,
    last_applied: Option<Viewport>,
    interacting: bool,
}

impl ViewportSync {
    /// Shared viewport value, if the renderer ever reported one.
    pub fn shared(&self) -> Option<Viewport> {
        self.shared
    }

    pub fn is_interacting(&self) -> bool {
        self.interacting
    }

    pub fn begin_interaction(&mut self) {
        self.interacting = true;
    }

    pub fn end_interaction(&mut self) {
        self.interacting = false;
    }

    /// Mirror a viewport reported by the renderer.
    fn record(&mut self, viewport: Viewport) {
        // Echo of our own SetViewport
        if self.last_applied == Some(viewport) {
            self.last_applied = None;
            return;
        }
        self.shared = Some(viewport);
    }

    /// Viewport to apply to a freshly initialized renderer.
    fn restore(&mut self) -> Option<Viewport> {
        if self.interacting {
            return None;
        }
        let viewport = self.shared?;
        self.last_applied = Some(viewport);
        Some(viewport)
    }
}

/// The only component that talks to the scene graph.
#[derive(Debug, Default)]
pub struct RendererBridge {
    scene: SceneId,
    subscription: Option<Subscription>,
    synced: HashMap<LabelId, Synced>,
    selected: Option<LabelId>,
    interactive: Option<LabelId>,
    viewport: ViewportSync,
}

impl RendererBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scene generation the bridge is bound to.
    pub fn scene(&self) -> SceneId {
        self.scene
    }

    pub fn is_attached(&self) -> bool {
        self.subscription.is_some()
    }

    pub fn selected(&self) -> Option<&LabelId> {
        self.selected.as_ref()
    }

    pub fn viewport(&self) -> &ViewportSync {
        &self.viewport
    }

    /// Bind to the current generation of `scene`, replacing any previous subscription.
    pub fn attach<S: Scene>(&mut self, bus: &mut SceneBus, scene: &S) {
        self.detach(bus);
        self.scene = scene.scene_id();
        self.subscription = Some(bus.subscribe(self.scene));
        log::debug!("🔗 Bridge attached to scene {}", self.scene);
    }

    /// Drop the subscription and every synced record.
    pub fn detach(&mut self, bus: &mut SceneBus) {
        if let Some(subscription) = self.subscription.take() {
            bus.unsubscribe(subscription);
        }
        self.synced.clear();
        self.selected = None;
        self.interactive = None;
    }

    /// Events received on the subscription since the last call.
    pub fn drain_events(&self) -> Vec<RendererEvent> {
        self.subscription
            .as_ref()
            .map(Subscription::drain)
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // Renderer -> Session
    // ------------------------------------------------------------------

    /// Interpret one renderer event of generation `scene_id`.
    ///
    /// Events from an older generation are dropped. An event naming an
    /// overlay the current scene no longer holds is a `StaleOverlay` error.
    pub fn handle_event<S: Scene>(
        &mut self,
        scene: &S,
        scene_id: SceneId,
        event: RendererEvent,
    ) -> Result<Option<BridgeAction>, SessionError> {
        if scene_id != self.scene {
            log::debug!("Ignoring event from stale scene {} (current {})", scene_id, self.scene);
            return Ok(None);
        }
        if let Some(id) = event.overlay_id() {
            if !scene.has_overlay(id) {
                return Err(SessionError::StaleOverlay { id: id.clone() });
            }
        }

        let action = match event {
            RendererEvent::OverlaySelect { id } => {
                if self.selected.as_ref() == Some(&id) {
                    return Ok(None);
                }
                self.selected = Some(id.clone());
                Some(BridgeAction::Select(id))
            }
            RendererEvent::OverlayDeselect { id } => {
                if self.selected.as_ref() == Some(&id) {
                    self.selected = None;
                }
                Some(BridgeAction::Deselect(id))
            }
            RendererEvent::OverlayDragMove { id } | RendererEvent::OverlayResizeMove { id } => {
                log::trace!("Overlay {} moving", id);
                self.viewport.begin_interaction();
                None
            }
            RendererEvent::OverlayBoundsChanged { id, bounds } => {
                self.viewport.end_interaction();
                self.read_back(id, Geometry::Bounds(bounds).to_attributes())
            }
            RendererEvent::CommandExecuted { id, geometry }
            | RendererEvent::Undo { id, geometry }
            | RendererEvent::Redo { id, geometry } => self.read_back(id, geometry),
            RendererEvent::Ready => Some(BridgeAction::Ready),
            RendererEvent::ViewportMoved { scale, x, y } => {
                self.viewport.record(Viewport { scale, x, y });
                None
            }
        };
        Ok(action)
    }

    fn read_back(&mut self, id: LabelId, geometry: Attributes) -> Option<BridgeAction> {
        let synced = self.synced.entry(id.clone()).or_default();
        if synced.geometry == geometry {
            log::trace!("Geometry of {} unchanged, not syncing", id);
            return None;
        }
        synced.geometry = geometry.clone();
        if self.interactive.as_ref() == Some(&id) {
            self.interactive = None;
        }
        Some(BridgeAction::Geometry {
            id,
            attributes: geometry,
        })
    }

    // ------------------------------------------------------------------
    // Session -> Renderer
    // ------------------------------------------------------------------

    /// Relay drained session events to the renderer. Returns the overlay
    /// handles of labels that received a new overlay.
    pub fn apply_session_events<S: Scene>(
        &mut self,
        scene: &mut S,
        session: &EditingSession,
        events: &[SessionEvent],
    ) -> Vec<(LabelId, OverlayRef)> {
        let mut created = Vec::new();
        for event in events {
            match event {
                SessionEvent::LabelAdded(id) => {
                    if let Some(label) = session.label(id) {
                        created.push((id.clone(), self.add_overlay(scene, label)));
                    }
                }
                SessionEvent::LabelRemoved(label) => self.remove_overlay(scene, &label.id),
                SessionEvent::AttributesChanged(id) => {
                    if let Some(label) = session.label(id) {
                        self.push_label(scene, label);
                    }
                }
                SessionEvent::EditingChanged { current, .. } => {
                    self.sync_selection(scene, session, current.as_ref());
                }
            }
        }
        created
    }

    /// Replay the whole session into a fresh renderer generation.
    pub fn rebuild<S: Scene>(&mut self, scene: &mut S, session: &EditingSession) -> Vec<(LabelId, OverlayRef)> {
        self.synced.clear();
        self.selected = None;
        self.interactive = None;
        let created = session
            .labels()
            .iter()
            .map(|label| (label.id.clone(), self.add_overlay(scene, label)))
            .collect();
        self.sync_selection(scene, session, session.editing().label_id());
        if let Some(viewport) = self.viewport.restore() {
            scene.apply(RendererCommand::SetViewport(viewport));
        }
        log::debug!("Scene {} rebuilt with {} overlays", self.scene, session.labels().len());
        created
    }

    /// Put the renderer's selection back on `id` after a cancelled deselect.
    pub fn force_select<S: Scene>(&mut self, scene: &mut S, id: &LabelId) {
        log::debug!("Restoring renderer selection to {}", id);
        self.selected = Some(id.clone());
        scene.apply(RendererCommand::SelectOverlay { id: id.clone() });
    }

    fn add_overlay<S: Scene>(&mut self, scene: &mut S, label: &Label) -> OverlayRef {
        let synced = Synced::of(label);
        scene.apply(RendererCommand::AddOverlay {
            id: label.id.clone(),
            kind: label.kind,
            geometry: label.geometry(),
            attributes: synced.display.clone(),
        });
        self.synced.insert(label.id.clone(), synced);
        OverlayRef { scene: self.scene }
    }

    fn remove_overlay<S: Scene>(&mut self, scene: &mut S, id: &LabelId) {
        self.synced.remove(id);
        if self.selected.as_ref() == Some(id) {
            self.selected = None;
        }
        if self.interactive.as_ref() == Some(id) {
            self.interactive = None;
            scene.apply(RendererCommand::ExitInteractiveMode);
        }
        if scene.has_overlay(id) {
            scene.apply(RendererCommand::RemoveOverlay { id: id.clone() });
        } else {
            log::debug!("Overlay {} already gone", id);
        }
    }

    /// Push a label's attributes, skipping whatever the renderer already has.
    fn push_label<S: Scene>(&mut self, scene: &mut S, label: &Label) {
        let next = Synced::of(label);
        let synced = self.synced.entry(label.id.clone()).or_default();
        if synced.display != next.display {
            scene.apply(RendererCommand::UpdateLabel {
                id: label.id.clone(),
                attributes: next.display.clone(),
            });
        }
        if synced.geometry != next.geometry {
            scene.apply(RendererCommand::TransformOverlay {
                id: label.id.clone(),
                geometry: label.geometry(),
            });
        }
        *synced = next;

        if self.interactive.as_ref() == Some(&label.id) && !label.geometry().is_none() {
            self.interactive = None;
            scene.apply(RendererCommand::ExitInteractiveMode);
        }
    }

    fn sync_selection<S: Scene>(&mut self, scene: &mut S, session: &EditingSession, current: Option<&LabelId>) {
        if self.selected.as_ref() != current {
            match current {
                Some(id) => scene.apply(RendererCommand::SelectOverlay { id: id.clone() }),
                None => {
                    if let Some(previous) = &self.selected {
                        scene.apply(RendererCommand::DeselectOverlay { id: previous.clone() });
                    }
                }
            }
            self.selected = current.cloned();
        }

        let needs_drawing = current
            .and_then(|id| session.label(id))
            .filter(|label| label.kind.is_spatial() && label.geometry().is_none());
        match (needs_drawing, self.interactive.clone()) {
            (Some(label), interactive) if interactive.as_ref() != Some(&label.id) => {
                self.interactive = Some(label.id.clone());
                scene.apply(RendererCommand::EnterInteractiveMode {
                    id: label.id.clone(),
                    kind: label.kind,
                });
            }
            (None, Some(_)) => {
                self.interactive = None;
                scene.apply(RendererCommand::ExitInteractiveMode);
            }
            _ => {}
        }
    }
}
