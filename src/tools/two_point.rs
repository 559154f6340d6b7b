//! Single-click and two-click placement tools.

use super::{assign_to_parent, ParentLink, PlacementTool, ToolContext};
use crate::model::{Annotation, Geometry};
use crate::source::{AnnotationReference, AnnotationSource};

/// Places a committed point per click.
#[derive(Debug, Default)]
pub struct PointTool {
    parent: Option<ParentLink>,
}

impl PointTool {
    /// Standalone point tool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Point tool acting as a child of a multi-step collection tool.
    pub fn with_parent(parent: ParentLink) -> Self {
        Self {
            parent: Some(parent),
        }
    }
}

impl PlacementTool for PointTool {
    fn trigger(&mut self, ctx: &mut ToolContext<'_>) {
        if let Some(parent) = &self.parent {
            if parent.is_stale() {
                return;
            }
        }
        let mut annotation = Annotation::new(
            String::new(),
            Geometry::Point {
                point: ctx.position.clone(),
            },
        );
        annotation.segments = ctx.segments.clone();
        let result = match &self.parent {
            Some(parent) => assign_to_parent(ctx.source, annotation, true, parent.collection()),
            None => ctx.source.add(annotation, true, None),
        };
        if let Err(err) = result {
            log::warn!("point placement failed: {err}");
        }
    }

    fn motion(&mut self, _ctx: &mut ToolContext<'_>) {}

    fn deactivate(&mut self, _source: &mut AnnotationSource) {}

    fn in_progress(&self) -> bool {
        false
    }
}

/// Geometry variant placed by a [`TwoPointTool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TwoPointKind {
    /// Line segment.
    Line,
    /// Axis-aligned bounding box.
    BoundingBox,
}

impl TwoPointKind {
    fn geometry(self, point_a: Vec<f32>, point_b: Vec<f32>) -> Geometry {
        match self {
            TwoPointKind::Line => Geometry::Line { point_a, point_b },
            TwoPointKind::BoundingBox => Geometry::AxisAlignedBoundingBox { point_a, point_b },
        }
    }
}

#[derive(Debug)]
enum TwoPointState {
    Idle,
    AwaitingSecondPoint { reference: AnnotationReference },
}

/// Two-click tool for lines and bounding boxes.
///
/// The first trigger creates the annotation with both points at the pointer,
/// uncommitted; motion tracks the second point while awaiting; the second
/// trigger commits. An incomplete two-point annotation has no valid
/// persisted form, so deactivation deletes it outright.
#[derive(Debug)]
pub struct TwoPointTool {
    kind: TwoPointKind,
    parent: Option<ParentLink>,
    state: TwoPointState,
}

impl TwoPointTool {
    /// Standalone tool of the given kind.
    pub fn new(kind: TwoPointKind) -> Self {
        Self {
            kind,
            parent: None,
            state: TwoPointState::Idle,
        }
    }

    /// Tool acting as a child of a multi-step collection tool.
    pub fn with_parent(kind: TwoPointKind, parent: ParentLink) -> Self {
        Self {
            kind,
            parent: Some(parent),
            state: TwoPointState::Idle,
        }
    }

    fn is_orphaned(&self) -> bool {
        self.parent.as_ref().is_some_and(ParentLink::is_stale)
    }

    fn apply_second_point(&self, ctx: &mut ToolContext<'_>, commit: bool) {
        let TwoPointState::AwaitingSecondPoint { reference } = &self.state else {
            return;
        };
        let Some(mut annotation) = reference.annotation() else {
            return;
        };
        match &mut annotation.geometry {
            Geometry::Line { point_b, .. } | Geometry::AxisAlignedBoundingBox { point_b, .. } => {
                *point_b = ctx.position.clone();
            }
            _ => return,
        }
        if ctx.source.update(reference, annotation).is_err() {
            return;
        }
        if commit {
            ctx.source.commit(reference);
        }
    }
}

impl PlacementTool for TwoPointTool {
    fn trigger(&mut self, ctx: &mut ToolContext<'_>) {
        if self.is_orphaned() {
            return;
        }
        match &self.state {
            TwoPointState::Idle => {
                let mut annotation = Annotation::new(
                    String::new(),
                    self.kind
                        .geometry(ctx.position.clone(), ctx.position.clone()),
                );
                annotation.segments = ctx.segments.clone();
                let result = match &self.parent {
                    Some(parent) => {
                        assign_to_parent(ctx.source, annotation, false, parent.collection())
                    }
                    None => ctx.source.add(annotation, false, None),
                };
                match result {
                    Ok(reference) => {
                        self.state = TwoPointState::AwaitingSecondPoint { reference };
                    }
                    Err(err) => log::warn!("two-point placement failed: {err}"),
                }
            }
            TwoPointState::AwaitingSecondPoint { .. } => {
                self.apply_second_point(ctx, true);
                // Further motion is ignored until a fresh click starts a new
                // annotation.
                self.state = TwoPointState::Idle;
            }
        }
    }

    fn motion(&mut self, ctx: &mut ToolContext<'_>) {
        if self.is_orphaned() {
            // Stale child of a multi-step parent: discard, do not apply.
            return;
        }
        self.apply_second_point(ctx, false);
    }

    fn deactivate(&mut self, source: &mut AnnotationSource) {
        if let TwoPointState::AwaitingSecondPoint { reference } = &self.state {
            source.delete(reference, false);
        }
        self.state = TwoPointState::Idle;
    }

    fn in_progress(&self) -> bool {
        matches!(self.state, TwoPointState::AwaitingSecondPoint { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::AnnotationSource;
    use crate::status::StatusLog;

    fn ctx<'a>(
        source: &'a mut AnnotationSource,
        status: &'a mut StatusLog,
        position: &[f32],
    ) -> ToolContext<'a> {
        ToolContext {
            source,
            status,
            position: position.to_vec(),
            segments: Vec::new(),
        }
    }

    #[test]
    fn test_point_tool_places_committed_point() {
        let mut source = AnnotationSource::new();
        let mut status = StatusLog::new();
        let mut tool = PointTool::new();
        tool.trigger(&mut ctx(&mut source, &mut status, &[1.0, 2.0, 3.0]));
        assert_eq!(source.len(), 1);
        assert_eq!(source.pending_count(), 0);
    }

    #[test]
    fn test_line_tool_click_move_click() {
        let mut source = AnnotationSource::new();
        let mut status = StatusLog::new();
        let mut tool = TwoPointTool::new(TwoPointKind::Line);

        tool.trigger(&mut ctx(&mut source, &mut status, &[0.0, 0.0, 0.0]));
        assert!(tool.in_progress());
        assert_eq!(source.pending_count(), 1);

        tool.motion(&mut ctx(&mut source, &mut status, &[0.5, 0.0, 0.0]));
        tool.motion(&mut ctx(&mut source, &mut status, &[1.0, 0.0, 0.0]));
        assert_eq!(source.pending_count(), 1);

        tool.trigger(&mut ctx(&mut source, &mut status, &[1.0, 0.0, 0.0]));
        assert!(!tool.in_progress());
        assert_eq!(source.pending_count(), 0);
        assert_eq!(source.len(), 1);

        let id = source.root_ids()[0].clone();
        match &source.get(&id).unwrap().geometry {
            Geometry::Line { point_a, point_b } => {
                assert_eq!(point_a, &vec![0.0, 0.0, 0.0]);
                assert_eq!(point_b, &vec![1.0, 0.0, 0.0]);
            }
            other => panic!("expected line, got {other:?}"),
        }
    }

    #[test]
    fn test_motion_after_commit_is_ignored() {
        let mut source = AnnotationSource::new();
        let mut status = StatusLog::new();
        let mut tool = TwoPointTool::new(TwoPointKind::Line);
        tool.trigger(&mut ctx(&mut source, &mut status, &[0.0]));
        tool.trigger(&mut ctx(&mut source, &mut status, &[1.0]));
        tool.motion(&mut ctx(&mut source, &mut status, &[9.0]));
        let id = source.root_ids()[0].clone();
        match &source.get(&id).unwrap().geometry {
            Geometry::Line { point_b, .. } => assert_eq!(point_b, &vec![1.0]),
            other => panic!("expected line, got {other:?}"),
        }
    }

    #[test]
    fn test_deactivate_deletes_incomplete_annotation() {
        let mut source = AnnotationSource::new();
        let mut status = StatusLog::new();
        let mut tool = TwoPointTool::new(TwoPointKind::BoundingBox);
        tool.trigger(&mut ctx(&mut source, &mut status, &[0.0, 0.0]));
        assert_eq!(source.len(), 1);
        tool.deactivate(&mut source);
        assert!(source.is_empty());
        assert_eq!(source.pending_count(), 0);
    }
}
