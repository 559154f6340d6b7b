//! Selection-driven structure operations.
//!
//! Unlike placement tools these act on already-existing annotations: group a
//! selection under a fresh collection, move it under another parent, or
//! derive a spoke from a set of points. Rejected operations report through
//! the status log and leave the store untouched.

use crate::model::{Annotation, AnnotationId, CollectionState, Geometry};
use crate::source::{AnnotationReference, AnnotationSource};
use crate::status::StatusLog;

/// Representative position of an annotation, used to anchor derived
/// structures and to focus the view on a selection.
pub fn annotation_anchor(annotation: &Annotation) -> Vec<f32> {
    match &annotation.geometry {
        Geometry::Point { point } => point.clone(),
        Geometry::Line { point_a, .. } | Geometry::AxisAlignedBoundingBox { point_a, .. } => {
            point_a.clone()
        }
        Geometry::Ellipsoid { center, .. } => center.clone(),
        Geometry::Collection(c)
        | Geometry::LineStrip { collection: c, .. }
        | Geometry::Spoke { collection: c, .. } => c.source.clone(),
    }
}

/// Group `targets` (with their subtrees) under a new committed collection.
///
/// The collection is anchored at the first target and created under that
/// target's current parent, so grouping never moves the selection elsewhere
/// in the tree. Former parents left empty by the move are deleted.
pub fn group_annotations(
    source: &mut AnnotationSource,
    status: &mut StatusLog,
    targets: &[AnnotationId],
) -> Option<AnnotationReference> {
    let Some(first) = targets.first().and_then(|id| source.get(id)) else {
        status.transient("Nothing selected to group");
        return None;
    };
    let anchor = annotation_anchor(first);
    let parent = first.parent_id.clone().map(|p| source.get_reference(&p));

    let collection = Annotation::new(
        String::new(),
        Geometry::Collection(CollectionState {
            source: anchor,
            children_visible: true,
            ..Default::default()
        }),
    );
    let collection = match source.add(collection, true, parent.as_ref()) {
        Ok(reference) => reference,
        Err(err) => {
            log::warn!("grouping failed: {err}");
            return None;
        }
    };
    let emptied = source.child_reassignment(targets, Some(&collection));
    for former in &emptied {
        source.delete(former, false);
    }
    status.transient(format!("Grouped {} annotations", targets.len()));
    Some(collection)
}

/// Move `targets` under `new_parent`, or to the root when `None`.
///
/// Inserting an annotation into itself or into one of its descendants is
/// reported and skipped. Former parents left empty are deleted.
pub fn reassign_to(
    source: &mut AnnotationSource,
    status: &mut StatusLog,
    targets: &[AnnotationId],
    new_parent: Option<&AnnotationReference>,
) {
    if let Some(parent) = new_parent {
        let parent_id = parent.id();
        for target in targets {
            if *target == parent_id || source.has_ancestor(&parent_id, target) {
                status.transient("Cannot insert annotation into itself");
                return;
            }
        }
    }
    let emptied = source.child_reassignment(targets, new_parent);
    for former in &emptied {
        source.delete(former, false);
    }
}

/// Build a committed spoke from a set of point annotations.
///
/// The first point is the hub; every further point contributes a line from
/// the hub to it. Requires at least two targets, all of them points. The
/// input points themselves are left in place.
pub fn generate_spoke(
    source: &mut AnnotationSource,
    status: &mut StatusLog,
    targets: &[AnnotationId],
    wheeled: bool,
) -> Option<AnnotationReference> {
    if targets.len() < 2 {
        status.transient("Spoke generation needs at least two points");
        return None;
    }
    let mut points: Vec<Vec<f32>> = Vec::with_capacity(targets.len());
    for id in targets {
        match source.get(id).map(|a| (&a.geometry, a.annotation_type())) {
            Some((Geometry::Point { point }, _)) => points.push(point.clone()),
            Some((_, other)) => {
                status.transient(format!(
                    "Spoke generation needs points, selection contains {}",
                    other.name()
                ));
                return None;
            }
            None => {
                status.transient("Spoke generation: selection no longer exists");
                return None;
            }
        }
    }

    let hub = points[0].clone();
    let spoke = Annotation::new(
        String::new(),
        Geometry::Spoke {
            collection: CollectionState {
                source: hub.clone(),
                connected: true,
                children_visible: true,
                ..Default::default()
            },
            wheeled,
        },
    );
    let spoke = match source.add(spoke, true, None) {
        Ok(reference) => reference,
        Err(err) => {
            log::warn!("spoke generation failed: {err}");
            return None;
        }
    };
    for rim in &points[1..] {
        let line = Annotation::new(
            String::new(),
            Geometry::Line {
                point_a: hub.clone(),
                point_b: rim.clone(),
            },
        );
        if let Err(err) = source.add(line, true, Some(&spoke)) {
            log::warn!("spoke line placement failed: {err}");
        }
    }
    status.transient(format!("Generated spoke with {} lines", points.len() - 1));
    Some(spoke)
}
