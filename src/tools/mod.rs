//! Interactive annotation placement tools.
//!
//! Tools are small state machines layered over [`AnnotationSource`]: a
//! trigger (mouse click) advances the state, pointer motion continuously
//! updates in-progress geometry, and deactivation cancels whatever is not
//! yet committed. Multi-step collection tools recursively delegate each
//! entry to a child tool.
//!
//! Tools never fail on ordinary interaction; "cannot complete" conditions go
//! through the [`StatusLog`](crate::status::StatusLog) as transient
//! messages.

mod multi_step;
mod ops;
mod two_point;

pub use multi_step::{ChildTool, ChildToolKind, CollectionKind, MultiStepTool};
pub use ops::{annotation_anchor, group_annotations, generate_spoke, reassign_to};
pub use two_point::{PointTool, TwoPointKind, TwoPointTool};

use std::cell::Cell;
use std::rc::Rc;

use crate::error::AnnotationError;
use crate::model::Annotation;
use crate::source::{AnnotationReference, AnnotationSource};
use crate::status::StatusLog;

/// Per-interaction context handed to tools.
pub struct ToolContext<'a> {
    /// The annotation store owned by the active layer.
    pub source: &'a mut AnnotationSource,
    /// Sink for transient user-facing messages.
    pub status: &'a mut StatusLog,
    /// Current pointer position in layer coordinates.
    pub position: Vec<f32>,
    /// Segment ids currently selected in the segmentation layer; associated
    /// with newly created annotations.
    pub segments: Vec<u64>,
}

/// Common interface of all placement tools.
pub trait PlacementTool {
    /// Primary action (mouse click).
    fn trigger(&mut self, ctx: &mut ToolContext<'_>);

    /// Pointer moved while the tool is active.
    fn motion(&mut self, ctx: &mut ToolContext<'_>);

    /// Tool switched away; cancels in-progress geometry. Cancellation is
    /// immediate and permanent, there is no undo at this layer.
    fn deactivate(&mut self, source: &mut AnnotationSource);

    /// Whether the tool holds uncommitted geometry.
    fn in_progress(&self) -> bool;
}

/// Link from a transient child tool back to its multi-step parent.
///
/// The parent bumps the shared counter whenever it installs a new child
/// tool; a child whose token no longer matches is an orphan and must discard
/// in-progress updates instead of applying them.
#[derive(Debug, Clone)]
pub struct ParentLink {
    collection: AnnotationReference,
    active_child: Rc<Cell<u64>>,
    token: u64,
}

impl ParentLink {
    pub(crate) fn new(
        collection: AnnotationReference,
        active_child: Rc<Cell<u64>>,
        token: u64,
    ) -> Self {
        Self {
            collection,
            active_child,
            token,
        }
    }

    /// The collection this child places entries into.
    pub fn collection(&self) -> &AnnotationReference {
        &self.collection
    }

    /// Whether the parent has moved on to a different child tool.
    pub fn is_stale(&self) -> bool {
        self.active_child.get() != self.token
    }
}

/// Add a brand-new annotation directly under `parent`.
///
/// The child has no prior parent to detach from, so this bypasses the
/// general reassignment path: the store links it at the tail of the parent's
/// entries and sibling ring in one step.
pub fn assign_to_parent(
    source: &mut AnnotationSource,
    annotation: Annotation,
    commit: bool,
    parent: &AnnotationReference,
) -> Result<AnnotationReference, AnnotationError> {
    source.add(annotation, commit, Some(parent))
}
