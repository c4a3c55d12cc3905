//! Renderer boundary: typed events from the scene graph, commands into it,
//! and a scene-scoped publish/subscribe channel carrying the events.
//!
//! The renderer runs its own draw loop and never shares memory with the
//! session; everything crosses this boundary as messages.

use std::collections::{BTreeMap, HashMap};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};

use serde::{Deserialize, Serialize};

use crate::model::{Attributes, Bounds, Geometry, LabelId, LabelType};

/// Generation of a renderer scene. A re-initialized renderer gets a new id,
/// and events from older generations are stale.
pub type SceneId = u64;

/// Pan/zoom state of the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub scale: f64,
    pub x: f64,
    pub y: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            scale: 1.0,
            x: 0.0,
            y: 0.0,
        }
    }
}

/// Events emitted by the renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum RendererEvent {
    /// The user selected an overlay
    OverlaySelect { id: LabelId },
    /// The user deselected an overlay
    OverlayDeselect { id: LabelId },
    /// A drag or resize finished with new bounds
    OverlayBoundsChanged { id: LabelId, bounds: Bounds },
    /// An overlay is being dragged
    OverlayDragMove { id: LabelId },
    /// An overlay is being resized
    OverlayResizeMove { id: LabelId },
    /// The renderer ran one of its own commands touching `id`
    CommandExecuted { id: LabelId, geometry: Attributes },
    /// The renderer undid one of its commands
    Undo { id: LabelId, geometry: Attributes },
    /// The renderer redid one of its commands
    Redo { id: LabelId, geometry: Attributes },
    /// The renderer (re)initialized
    Ready,
    /// The viewport moved
    ViewportMoved { scale: f64, x: f64, y: f64 },
}

impl RendererEvent {
    /// Overlay the event refers to, if any.
    pub fn overlay_id(&self) -> Option<&LabelId> {
        match self {
            RendererEvent::OverlaySelect { id }
            | RendererEvent::OverlayDeselect { id }
            | RendererEvent::OverlayBoundsChanged { id, .. }
            | RendererEvent::OverlayDragMove { id }
            | RendererEvent::OverlayResizeMove { id }
            | RendererEvent::CommandExecuted { id, .. }
            | RendererEvent::Undo { id, .. }
            | RendererEvent::Redo { id, .. } => Some(id),
            RendererEvent::Ready | RendererEvent::ViewportMoved { .. } => None,
        }
    }
}

/// Commands issued to the renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "kebab-case")]
pub enum RendererCommand {
    AddOverlay {
        id: LabelId,
        kind: LabelType,
        geometry: Geometry,
        attributes: Attributes,
    },
    RemoveOverlay {
        id: LabelId,
    },
    SelectOverlay {
        id: LabelId,
    },
    DeselectOverlay {
        id: LabelId,
    },
    /// Refresh the displayed (non-geometry) attributes of an overlay
    UpdateLabel {
        id: LabelId,
        attributes: Attributes,
    },
    TransformOverlay {
        id: LabelId,
        geometry: Geometry,
    },
    SetViewport(Viewport),
    /// Let the user draw the geometry of a new label
    EnterInteractiveMode {
        id: LabelId,
        kind: LabelType,
    },
    ExitInteractiveMode,
}

/// The external scene graph.
pub trait Scene {
    /// Current generation.
    fn scene_id(&self) -> SceneId;

    /// Whether an overlay exists in the current generation.
    fn has_overlay(&self, id: &LabelId) -> bool;

    /// Apply a command.
    fn apply(&mut self, command: RendererCommand);
}

// ============================================================================
// Publish / Subscribe
// ============================================================================

/// Handle returned by [`SceneBus::subscribe`].
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    scene: SceneId,
    receiver: Receiver<RendererEvent>,
}

impl Subscription {
    pub fn scene(&self) -> SceneId {
        self.scene
    }

    /// Drain every event received so far.
    pub fn drain(&self) -> Vec<RendererEvent> {
        let mut events = Vec::new();
        loop {
            match self.receiver.try_recv() {
                Ok(event) => events.push(event),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        events
    }
}

/// Scene-scoped event channel: subscribers only see events published for
/// the scene generation they subscribed to.
#[derive(Debug, Default)]
pub struct SceneBus {
    subscribers: HashMap<u64, (SceneId, Sender<RendererEvent>)>,
    next_id: u64,
}

impl SceneBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to the events of `scene`.
    pub fn subscribe(&mut self, scene: SceneId) -> Subscription {
        let (sender, receiver) = mpsc::channel();
        let id = self.next_id;
        self.next_id += 1;
        self.subscribers.insert(id, (scene, sender));
        log::trace!("Subscription {} to scene {}", id, scene);
        Subscription {
            id,
            scene,
            receiver,
        }
    }

    /// End a subscription.
    pub fn unsubscribe(&mut self, subscription: Subscription) {
        self.subscribers.remove(&subscription.id);
        log::trace!("Subscription {} ended", subscription.id);
    }

    /// Publish an event of `scene` to its subscribers. Returns the number of
    /// subscribers reached.
    pub fn publish(&mut self, scene: SceneId, event: RendererEvent) -> usize {
        let mut delivered = 0;
        self.subscribers.retain(|_, (subscribed, sender)| {
            if *subscribed != scene {
                return true;
            }
            // A dropped receiver means the subscriber went away
            let alive = sender.send(event.clone()).is_ok();
            delivered += usize::from(alive);
            alive
        });
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

// ============================================================================
// Recording scene
// ============================================================================

/// A scene that keeps overlays in memory and records every command.
#[derive(Debug, Default)]
pub struct RecordingScene {
    scene_id: SceneId,
    overlays: BTreeMap<LabelId, Geometry>,
    selected: Option<LabelId>,
    viewport: Viewport,
    interactive: Option<LabelId>,
    commands: Vec<RendererCommand>,
}

impl RecordingScene {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a renderer re-initialization: overlays are dropped and the
    /// generation advances.
    pub fn reinitialize(&mut self) {
        self.scene_id += 1;
        self.overlays.clear();
        self.selected = None;
        self.interactive = None;
    }

    pub fn commands(&self) -> &[RendererCommand] {
        &self.commands
    }

    pub fn take_commands(&mut self) -> Vec<RendererCommand> {
        std::mem::take(&mut self.commands)
    }

    pub fn overlay(&self, id: &LabelId) -> Option<&Geometry> {
        self.overlays.get(id)
    }

    pub fn overlay_count(&self) -> usize {
        self.overlays.len()
    }

    pub fn selected(&self) -> Option<&LabelId> {
        self.selected.as_ref()
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn interactive(&self) -> Option<&LabelId> {
        self.interactive.as_ref()
    }
}

impl Scene for RecordingScene {
    fn scene_id(&self) -> SceneId {
        self.scene_id
    }

    fn has_overlay(&self, id: &LabelId) -> bool {
        self.overlays.contains_key(id)
    }

    fn apply(&mut self, command: RendererCommand) {
        match &command {
            RendererCommand::AddOverlay { id, geometry, .. } => {
                self.overlays.insert(id.clone(), geometry.clone());
            }
            RendererCommand::RemoveOverlay { id } => {
                self.overlays.remove(id);
                if self.selected.as_ref() == Some(id) {
                    self.selected = None;
                }
            }
            RendererCommand::SelectOverlay { id } => self.selected = Some(id.clone()),
            RendererCommand::DeselectOverlay { id } => {
                if self.selected.as_ref() == Some(id) {
                    self.selected = None;
                }
            }
            RendererCommand::TransformOverlay { id, geometry } => {
                if let Some(current) = self.overlays.get_mut(id) {
                    *current = geometry.clone();
                }
            }
            RendererCommand::SetViewport(viewport) => self.viewport = *viewport,
            RendererCommand::EnterInteractiveMode { id, .. } => self.interactive = Some(id.clone()),
            RendererCommand::ExitInteractiveMode => self.interactive = None,
            RendererCommand::UpdateLabel { .. } => {}
        }
        self.commands.push(command);
    }
}
