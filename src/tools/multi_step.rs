//! Multi-step collection placement tools.
//!
//! A multi-step tool anchors a collection-like annotation at the first
//! click, then delegates every entry to a child tool (point, two-point, or a
//! nested multi-step tool). The collection stays pending until `complete` is
//! called, so serialization and completion checks never observe a
//! half-built structure.

use std::cell::Cell;
use std::rc::Rc;

use super::two_point::{PointTool, TwoPointKind, TwoPointTool};
use super::{assign_to_parent, ParentLink, PlacementTool, ToolContext};
use crate::model::{Annotation, AnnotationId, CollectionState, Geometry};
use crate::source::{AnnotationReference, AnnotationSource};

/// Which collection-like annotation a [`MultiStepTool`] builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionKind {
    /// Unconnected grouping.
    Collection,
    /// Connected line sequence.
    LineStrip {
        /// Close the strip back to its first point.
        looped: bool,
    },
    /// Lines radiating from the anchor.
    Spoke {
        /// Treat the endpoints as an implicit rim.
        wheeled: bool,
    },
}

impl CollectionKind {
    fn geometry(self, source: Vec<f32>) -> Geometry {
        let collection = CollectionState {
            source,
            connected: !matches!(self, CollectionKind::Collection),
            children_visible: true,
            ..Default::default()
        };
        match self {
            CollectionKind::Collection => Geometry::Collection(collection),
            CollectionKind::LineStrip { looped } => Geometry::LineStrip { collection, looped },
            CollectionKind::Spoke { wheeled } => Geometry::Spoke { collection, wheeled },
        }
    }

    /// Whether entries form a connected path (strip/spoke).
    pub fn connected(self) -> bool {
        !matches!(self, CollectionKind::Collection)
    }

    fn label(self) -> &'static str {
        match self {
            CollectionKind::Collection => "collection",
            CollectionKind::LineStrip { .. } => "line strip",
            CollectionKind::Spoke { .. } => "spoke",
        }
    }
}

/// The child tool a multi-step tool delegates entries to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildToolKind {
    /// Single-click points.
    Point,
    /// Two-click lines.
    Line,
    /// Two-click bounding boxes.
    BoundingBox,
    /// Nested line strip.
    LineStrip,
    /// Nested spoke.
    Spoke,
}

/// A child tool instance owned by a [`MultiStepTool`].
#[derive(Debug)]
pub enum ChildTool {
    /// Single-click child.
    Point(PointTool),
    /// Two-click child.
    TwoPoint(TwoPointTool),
    /// Nested multi-step child.
    MultiStep(Box<MultiStepTool>),
}

impl ChildTool {
    fn trigger(&mut self, ctx: &mut ToolContext<'_>) {
        match self {
            ChildTool::Point(tool) => tool.trigger(ctx),
            ChildTool::TwoPoint(tool) => tool.trigger(ctx),
            ChildTool::MultiStep(tool) => tool.trigger(ctx),
        }
    }

    fn motion(&mut self, ctx: &mut ToolContext<'_>) {
        match self {
            ChildTool::Point(tool) => tool.motion(ctx),
            ChildTool::TwoPoint(tool) => tool.motion(ctx),
            ChildTool::MultiStep(tool) => tool.motion(ctx),
        }
    }

    fn deactivate(&mut self, source: &mut AnnotationSource) {
        match self {
            ChildTool::Point(tool) => tool.deactivate(source),
            ChildTool::TwoPoint(tool) => tool.deactivate(source),
            ChildTool::MultiStep(tool) => tool.deactivate(source),
        }
    }
}

#[derive(Debug)]
enum MultiStepState {
    Idle,
    Collecting {
        collection: AnnotationReference,
        child: ChildTool,
    },
}

/// Placement tool for collections, line strips, and spokes.
#[derive(Debug)]
pub struct MultiStepTool {
    kind: CollectionKind,
    toolset: ChildToolKind,
    parent: Option<ParentLink>,
    state: MultiStepState,
    active_child: Rc<Cell<u64>>,
    next_token: u64,
}

impl MultiStepTool {
    /// Standalone multi-step tool.
    pub fn new(kind: CollectionKind, toolset: ChildToolKind) -> Self {
        Self {
            kind,
            toolset,
            parent: None,
            state: MultiStepState::Idle,
            active_child: Rc::new(Cell::new(0)),
            next_token: 0,
        }
    }

    /// Multi-step tool acting as the child of another multi-step tool.
    pub fn with_parent(kind: CollectionKind, toolset: ChildToolKind, parent: ParentLink) -> Self {
        let mut tool = Self::new(kind, toolset);
        tool.parent = Some(parent);
        tool
    }

    /// The in-progress collection, while collecting.
    pub fn collection(&self) -> Option<&AnnotationReference> {
        match &self.state {
            MultiStepState::Collecting { collection, .. } => Some(collection),
            MultiStepState::Idle => None,
        }
    }

    /// Number of entries (committed or pending) in the in-progress
    /// collection.
    pub fn entry_count(&self, source: &AnnotationSource) -> usize {
        self.collection()
            .and_then(|c| source.get(&c.id()))
            .and_then(|a| a.geometry.collection())
            .map(|c| c.entries.len())
            .unwrap_or(0)
    }

    fn spawn_child(&mut self, collection: AnnotationReference) -> ChildTool {
        self.next_token += 1;
        self.active_child.set(self.next_token);
        let link = ParentLink::new(collection, Rc::clone(&self.active_child), self.next_token);
        match self.toolset {
            ChildToolKind::Point => ChildTool::Point(PointTool::with_parent(link)),
            ChildToolKind::Line => {
                ChildTool::TwoPoint(TwoPointTool::with_parent(TwoPointKind::Line, link))
            }
            ChildToolKind::BoundingBox => {
                ChildTool::TwoPoint(TwoPointTool::with_parent(TwoPointKind::BoundingBox, link))
            }
            ChildToolKind::LineStrip => ChildTool::MultiStep(Box::new(MultiStepTool::with_parent(
                CollectionKind::LineStrip { looped: false },
                ChildToolKind::Line,
                link,
            ))),
            ChildToolKind::Spoke => ChildTool::MultiStep(Box::new(MultiStepTool::with_parent(
                CollectionKind::Spoke { wheeled: false },
                ChildToolKind::Line,
                link,
            ))),
        }
    }

    /// Refresh the collection's `last_a`/`last_b` bookkeeping (the two most
    /// recently added entries) after a forwarded trigger.
    fn update_last_entries(source: &mut AnnotationSource, collection: &AnnotationReference) {
        let Some(mut annotation) = source.get(&collection.id()).cloned() else {
            return;
        };
        let Some(state) = annotation.geometry.collection_mut() else {
            return;
        };
        let n = state.entries.len();
        state.last_a = state.entries.last().cloned();
        state.last_b = if n >= 2 {
            Some(state.entries[n - 2].clone())
        } else {
            None
        };
        if let Err(err) = source.update(collection, annotation) {
            log::warn!("collection bookkeeping update failed: {err}");
        }
    }

    /// Finalize the in-progress collection.
    ///
    /// `shortcut` marks a completion issued through a double-click style
    /// shortcut whose trailing clicks left provisional entries behind; those
    /// (`last_a`, and `last_b` for connected kinds) are deleted first. If the
    /// active child tool is itself a multi-step tool with two or more entries
    /// in progress, that nested collection is completed before this one.
    /// Requires at least one committed entry; otherwise posts a status
    /// message and returns false without mutating anything.
    pub fn complete(&mut self, ctx: &mut ToolContext<'_>, shortcut: bool) -> bool {
        let kind = self.kind;
        let MultiStepState::Collecting { collection, child } = &mut self.state else {
            ctx.status.transient("No annotation in progress to complete");
            return false;
        };
        let collection = collection.clone();

        let mut nested_completed = false;
        if let ChildTool::MultiStep(nested) = child {
            if nested.entry_count(ctx.source) >= 2 {
                nested_completed = nested.complete(ctx, shortcut);
            }
        }

        // Entries that would survive completion.
        let stored = ctx
            .source
            .get(&collection.id())
            .and_then(|a| a.geometry.collection())
            .cloned()
            .unwrap_or_default();
        let mut provisional: Vec<AnnotationId> = Vec::new();
        if shortcut && !nested_completed {
            provisional.extend(stored.last_a.clone());
            if kind.connected() {
                provisional.extend(stored.last_b.clone());
            }
        }
        let committed = stored
            .entries
            .iter()
            .filter(|&e| !ctx.source.is_pending(e) && !provisional.contains(e))
            .count();
        if committed == 0 {
            ctx.status
                .transient(format!("Unable to complete {}: no entries", kind.label()));
            return false;
        }

        for id in &provisional {
            let reference = ctx.source.get_reference(id);
            ctx.source.delete(&reference, true);
        }
        // Cancel whatever the child tool still has half-drawn.
        child.deactivate(ctx.source);

        ctx.source.segment_set(collection.id());
        ctx.source.commit(&collection);
        ctx.status
            .transient(format!("Completed {} with {committed} entries", kind.label()));
        log::debug!("completed {} {}", kind.label(), collection.id());
        self.state = MultiStepState::Idle;
        true
    }
}

impl PlacementTool for MultiStepTool {
    fn trigger(&mut self, ctx: &mut ToolContext<'_>) {
        if self.parent.as_ref().is_some_and(ParentLink::is_stale) {
            return;
        }
        if matches!(self.state, MultiStepState::Idle) {
            let annotation = Annotation::new(
                String::new(),
                self.kind.geometry(ctx.position.clone()),
            );
            let result = match &self.parent {
                Some(parent) => {
                    assign_to_parent(ctx.source, annotation, false, parent.collection())
                }
                None => ctx.source.add(annotation, false, None),
            };
            match result {
                Ok(collection) => {
                    let child = self.spawn_child(collection.clone());
                    self.state = MultiStepState::Collecting { collection, child };
                }
                Err(err) => {
                    log::warn!("collection placement failed: {err}");
                    return;
                }
            }
        }
        if let MultiStepState::Collecting { collection, child } = &mut self.state {
            let collection = collection.clone();
            child.trigger(ctx);
            Self::update_last_entries(ctx.source, &collection);
        }
    }

    fn motion(&mut self, ctx: &mut ToolContext<'_>) {
        if let MultiStepState::Collecting { child, .. } = &mut self.state {
            child.motion(ctx);
        }
    }

    fn deactivate(&mut self, source: &mut AnnotationSource) {
        if let MultiStepState::Collecting { collection, child } =
            std::mem::replace(&mut self.state, MultiStepState::Idle)
        {
            let mut child = child;
            child.deactivate(source);
            // The half-built structure has no valid persisted form.
            source.delete(&collection, true);
        }
    }

    fn in_progress(&self) -> bool {
        matches!(self.state, MultiStepState::Collecting { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AnnotationType;
    use crate::status::StatusLog;

    fn ctx<'a>(
        source: &'a mut AnnotationSource,
        status: &'a mut StatusLog,
        position: &[f32],
    ) -> ToolContext<'a> {
        let _ = env_logger::builder().is_test(true).try_init();
        ToolContext {
            source,
            status,
            position: position.to_vec(),
            segments: Vec::new(),
        }
    }

    #[test]
    fn test_collection_of_points() {
        let mut source = AnnotationSource::new();
        let mut status = StatusLog::new();
        let mut tool = MultiStepTool::new(CollectionKind::Collection, ChildToolKind::Point);

        tool.trigger(&mut ctx(&mut source, &mut status, &[0.0, 0.0]));
        tool.trigger(&mut ctx(&mut source, &mut status, &[1.0, 0.0]));
        tool.trigger(&mut ctx(&mut source, &mut status, &[2.0, 0.0]));
        assert!(tool.in_progress());
        assert_eq!(tool.entry_count(&source), 3);

        let collection_id = tool.collection().unwrap().id();
        assert!(source.is_pending(&collection_id));
        let state = source
            .get(&collection_id)
            .unwrap()
            .geometry
            .collection()
            .unwrap();
        assert_eq!(state.last_a.as_ref(), state.entries.last());
        assert_eq!(state.last_b.as_ref(), Some(&state.entries[1]));

        assert!(tool.complete(&mut ctx(&mut source, &mut status, &[2.0, 0.0]), false));
        assert!(!tool.in_progress());
        assert!(!source.is_pending(&collection_id));
        assert_eq!(source.pending_count(), 0);
    }

    #[test]
    fn test_complete_without_entries_fails() {
        let mut source = AnnotationSource::new();
        let mut status = StatusLog::new();
        let mut tool =
            MultiStepTool::new(CollectionKind::LineStrip { looped: false }, ChildToolKind::Line);
        assert!(!tool.complete(&mut ctx(&mut source, &mut status, &[0.0]), false));
        assert!(status.latest().is_some());

        // First click opens the strip and a pending first line; still nothing
        // committed, so completion must refuse and leave the state alone.
        tool.trigger(&mut ctx(&mut source, &mut status, &[0.0]));
        assert!(!tool.complete(&mut ctx(&mut source, &mut status, &[0.0]), false));
        assert!(tool.in_progress());
    }

    #[test]
    fn test_line_strip_placement_and_completion() {
        let mut source = AnnotationSource::new();
        let mut status = StatusLog::new();
        let mut tool =
            MultiStepTool::new(CollectionKind::LineStrip { looped: false }, ChildToolKind::Line);

        tool.trigger(&mut ctx(&mut source, &mut status, &[0.0, 0.0]));
        tool.motion(&mut ctx(&mut source, &mut status, &[1.0, 0.0]));
        tool.trigger(&mut ctx(&mut source, &mut status, &[1.0, 0.0]));
        tool.trigger(&mut ctx(&mut source, &mut status, &[1.0, 1.0]));
        tool.trigger(&mut ctx(&mut source, &mut status, &[2.0, 1.0]));

        let collection_id = tool.collection().unwrap().id();
        assert!(tool.complete(&mut ctx(&mut source, &mut status, &[2.0, 1.0]), false));
        let strip = source.get(&collection_id).unwrap();
        assert_eq!(strip.annotation_type(), AnnotationType::LineStrip);
        assert_eq!(strip.geometry.collection().unwrap().entries.len(), 2);
        assert_eq!(source.pending_count(), 0);
    }

    #[test]
    fn test_shortcut_completion_discards_provisional_entries() {
        let mut source = AnnotationSource::new();
        let mut status = StatusLog::new();
        let mut tool =
            MultiStepTool::new(CollectionKind::Collection, ChildToolKind::Point);

        tool.trigger(&mut ctx(&mut source, &mut status, &[0.0]));
        tool.trigger(&mut ctx(&mut source, &mut status, &[1.0]));
        // The double-click shortcut leaves a spurious final point (last_a).
        tool.trigger(&mut ctx(&mut source, &mut status, &[1.0]));
        let collection_id = tool.collection().unwrap().id();
        assert!(tool.complete(&mut ctx(&mut source, &mut status, &[1.0]), true));

        let state = source
            .get(&collection_id)
            .unwrap()
            .geometry
            .collection()
            .unwrap();
        assert_eq!(state.entries.len(), 2);
    }

    #[test]
    fn test_shortcut_completion_on_line_strip_discards_two_entries() {
        let mut source = AnnotationSource::new();
        let mut status = StatusLog::new();
        let mut tool =
            MultiStepTool::new(CollectionKind::LineStrip { looped: false }, ChildToolKind::Line);

        tool.trigger(&mut ctx(&mut source, &mut status, &[0.0, 0.0]));
        tool.trigger(&mut ctx(&mut source, &mut status, &[1.0, 0.0]));
        tool.trigger(&mut ctx(&mut source, &mut status, &[1.0, 1.0]));
        tool.trigger(&mut ctx(&mut source, &mut status, &[2.0, 1.0]));
        // On a connected kind the double-click shortcut leaves two trailing
        // half-entries behind: a committed spurious line and the pending
        // line started by the final click.
        tool.trigger(&mut ctx(&mut source, &mut status, &[2.0, 2.0]));

        let strip_id = tool.collection().unwrap().id();
        assert_eq!(tool.entry_count(&source), 3);
        assert!(tool.complete(&mut ctx(&mut source, &mut status, &[2.0, 2.0]), true));

        let strip = source.get(&strip_id).unwrap();
        assert_eq!(strip.annotation_type(), AnnotationType::LineStrip);
        assert_eq!(strip.geometry.collection().unwrap().entries.len(), 1);
        assert!(!source.is_pending(&strip_id));
        assert_eq!(source.pending_count(), 0);
        assert_eq!(source.len(), 2);
    }

    #[test]
    fn test_derived_segments_on_completion() {
        let mut source = AnnotationSource::new();
        let mut status = StatusLog::new();
        let mut tool = MultiStepTool::new(CollectionKind::Collection, ChildToolKind::Point);

        let mut c = ctx(&mut source, &mut status, &[0.0]);
        c.segments = vec![11];
        tool.trigger(&mut c);
        let mut c = ctx(&mut source, &mut status, &[1.0]);
        c.segments = vec![11, 12];
        tool.trigger(&mut c);

        let collection_id = tool.collection().unwrap().id();
        assert!(tool.complete(&mut ctx(&mut source, &mut status, &[1.0]), false));
        assert_eq!(source.get(&collection_id).unwrap().segments, vec![11, 12]);
    }

    #[test]
    fn test_deactivate_cancels_whole_structure() {
        let mut source = AnnotationSource::new();
        let mut status = StatusLog::new();
        let mut tool = MultiStepTool::new(CollectionKind::Collection, ChildToolKind::Point);
        tool.trigger(&mut ctx(&mut source, &mut status, &[0.0]));
        tool.trigger(&mut ctx(&mut source, &mut status, &[1.0]));
        assert!(!source.is_empty());
        tool.deactivate(&mut source);
        assert!(source.is_empty());
    }

    #[test]
    fn test_nested_multi_step_completes_inner_first() {
        let mut source = AnnotationSource::new();
        let mut status = StatusLog::new();
        let mut tool =
            MultiStepTool::new(CollectionKind::Collection, ChildToolKind::LineStrip);

        // Outer collection and nested strip open together; place two lines
        // in the nested strip.
        tool.trigger(&mut ctx(&mut source, &mut status, &[0.0, 0.0]));
        tool.trigger(&mut ctx(&mut source, &mut status, &[1.0, 0.0]));
        tool.trigger(&mut ctx(&mut source, &mut status, &[1.0, 1.0]));
        tool.trigger(&mut ctx(&mut source, &mut status, &[2.0, 1.0]));

        let outer_id = tool.collection().unwrap().id();
        assert!(tool.complete(&mut ctx(&mut source, &mut status, &[2.0, 1.0]), false));
        assert!(!source.is_pending(&outer_id));
        assert_eq!(source.pending_count(), 0);

        let outer = source.get(&outer_id).unwrap();
        let entries = &outer.geometry.collection().unwrap().entries;
        assert_eq!(entries.len(), 1);
        let inner = source.get(&entries[0]).unwrap();
        assert_eq!(inner.annotation_type(), AnnotationType::LineStrip);
        assert_eq!(inner.geometry.collection().unwrap().entries.len(), 2);
    }
}
