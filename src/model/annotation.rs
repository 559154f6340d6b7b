//! Annotation record model.
//!
//! Defines the tagged-union annotation entity types (points, lines, boxes,
//! ellipsoids, and the collection-like composites) together with the
//! per-type handler table used for JSON round trips and packed binary
//! serialization. Coordinates are rank-N `Vec<f32>` vectors so the same
//! records serve 2D slice views and higher-dimensional volumes.

use std::collections::BTreeSet;

use rand::RngCore;
use serde_json::{Map, Value};

use crate::error::AnnotationError;

/// Opaque annotation identifier, globally unique within a store.
pub type AnnotationId = String;

/// Generate a random 160-bit hex annotation id.
pub fn random_annotation_id() -> AnnotationId {
    let mut bytes = [0u8; 20];
    rand::thread_rng().fill_bytes(&mut bytes);
    let mut id = String::with_capacity(40);
    for b in bytes {
        id.push_str(&format!("{b:02x}"));
    }
    id
}

/// The discriminant of the annotation tagged union.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnnotationType {
    /// A single point marker.
    Point,
    /// A line segment between two points.
    Line,
    /// An axis-aligned box given by two unordered corners.
    AxisAlignedBoundingBox,
    /// An ellipsoid given by center and per-axis radii.
    Ellipsoid,
    /// An unordered grouping of child annotations.
    Collection,
    /// A connected sequence of line entries, optionally looped.
    LineStrip,
    /// Lines radiating from a shared source point, optionally wheeled.
    Spoke,
}

impl AnnotationType {
    /// All annotation types, in binary serialization group order.
    pub fn all() -> &'static [AnnotationType] {
        &[
            AnnotationType::Point,
            AnnotationType::Line,
            AnnotationType::AxisAlignedBoundingBox,
            AnnotationType::Ellipsoid,
            AnnotationType::Collection,
            AnnotationType::LineStrip,
            AnnotationType::Spoke,
        ]
    }

    /// Stable index of this type in [`AnnotationType::all`].
    pub fn index(self) -> usize {
        match self {
            AnnotationType::Point => 0,
            AnnotationType::Line => 1,
            AnnotationType::AxisAlignedBoundingBox => 2,
            AnnotationType::Ellipsoid => 3,
            AnnotationType::Collection => 4,
            AnnotationType::LineStrip => 5,
            AnnotationType::Spoke => 6,
        }
    }

    /// JSON discriminant (snake_cased type name).
    pub fn name(self) -> &'static str {
        match self {
            AnnotationType::Point => "point",
            AnnotationType::Line => "line",
            AnnotationType::AxisAlignedBoundingBox => "axis_aligned_bounding_box",
            AnnotationType::Ellipsoid => "ellipsoid",
            AnnotationType::Collection => "collection",
            AnnotationType::LineStrip => "line_strip",
            AnnotationType::Spoke => "spoke",
        }
    }

    /// Parse a JSON discriminant back into a type.
    pub fn from_name(name: &str) -> Result<Self, AnnotationError> {
        for &t in Self::all() {
            if t.name() == name {
                return Ok(t);
            }
        }
        Err(AnnotationError::UnknownType {
            name: name.to_string(),
        })
    }

    /// Whether this type carries child entries.
    pub fn is_collection_like(self) -> bool {
        matches!(
            self,
            AnnotationType::Collection | AnnotationType::LineStrip | AnnotationType::Spoke
        )
    }
}

/// Shared state of the collection-like types.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CollectionState {
    /// Anchor point of the collection.
    pub source: Vec<f32>,
    /// Ordered child annotation ids.
    pub entries: Vec<AnnotationId>,
    /// Whether entries form an implicit connected path.
    pub connected: bool,
    /// Whether children are rendered.
    pub children_visible: bool,
    /// Most recently added child, used to discard the provisional entry a
    /// double-click completion leaves behind. Transient, never serialized.
    pub last_a: Option<AnnotationId>,
    /// Second most recently added child. Transient, never serialized.
    pub last_b: Option<AnnotationId>,
}

/// Type-specific geometry of an annotation.
#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    /// Single point.
    Point {
        /// Position, rank-N.
        point: Vec<f32>,
    },
    /// Line segment.
    Line {
        /// First endpoint.
        point_a: Vec<f32>,
        /// Second endpoint.
        point_b: Vec<f32>,
    },
    /// Axis-aligned box. Corners are unordered; serialization normalizes to
    /// min/max per axis.
    AxisAlignedBoundingBox {
        /// One corner.
        point_a: Vec<f32>,
        /// Opposite corner.
        point_b: Vec<f32>,
    },
    /// Ellipsoid.
    Ellipsoid {
        /// Center position.
        center: Vec<f32>,
        /// Per-axis radii.
        radii: Vec<f32>,
    },
    /// Plain grouping.
    Collection(CollectionState),
    /// Connected line sequence.
    LineStrip {
        /// Shared collection state.
        collection: CollectionState,
        /// Whether the strip closes back on its first point.
        looped: bool,
    },
    /// Lines sharing a source point.
    Spoke {
        /// Shared collection state.
        collection: CollectionState,
        /// Whether the spoke endpoints form an implicit rim.
        wheeled: bool,
    },
}

impl Geometry {
    /// The discriminant for this geometry.
    pub fn annotation_type(&self) -> AnnotationType {
        match self {
            Geometry::Point { .. } => AnnotationType::Point,
            Geometry::Line { .. } => AnnotationType::Line,
            Geometry::AxisAlignedBoundingBox { .. } => AnnotationType::AxisAlignedBoundingBox,
            Geometry::Ellipsoid { .. } => AnnotationType::Ellipsoid,
            Geometry::Collection(_) => AnnotationType::Collection,
            Geometry::LineStrip { .. } => AnnotationType::LineStrip,
            Geometry::Spoke { .. } => AnnotationType::Spoke,
        }
    }

    /// Collection state, if this is a collection-like geometry.
    pub fn collection(&self) -> Option<&CollectionState> {
        match self {
            Geometry::Collection(c)
            | Geometry::LineStrip { collection: c, .. }
            | Geometry::Spoke { collection: c, .. } => Some(c),
            _ => None,
        }
    }

    /// Mutable collection state, if collection-like.
    pub fn collection_mut(&mut self) -> Option<&mut CollectionState> {
        match self {
            Geometry::Collection(c)
            | Geometry::LineStrip { collection: c, .. }
            | Geometry::Spoke { collection: c, .. } => Some(c),
            _ => None,
        }
    }
}

/// A single annotation record.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    /// Unique identifier; empty means "assign one on add".
    pub id: AnnotationId,
    /// Type-specific geometry.
    pub geometry: Geometry,
    /// Optional free-form description.
    pub description: Option<String>,
    /// Tags applied to this annotation (store-scoped tag ids).
    pub tag_ids: BTreeSet<u32>,
    /// 64-bit segment ids associated with this annotation. On
    /// collection-like annotations this is a derived union of descendant
    /// segments, recomputed by the store on structural change.
    pub segments: Vec<u64>,
    /// Back-reference to the enclosing collection-like annotation.
    pub parent_id: Option<AnnotationId>,
}

impl Annotation {
    /// Create an annotation with the given geometry and no metadata.
    pub fn new(id: AnnotationId, geometry: Geometry) -> Self {
        Self {
            id,
            geometry,
            description: None,
            tag_ids: BTreeSet::new(),
            segments: Vec::new(),
            parent_id: None,
        }
    }

    /// The annotation's type discriminant.
    pub fn annotation_type(&self) -> AnnotationType {
        self.geometry.annotation_type()
    }

    /// Whether this annotation can hold child entries.
    pub fn is_collection_like(&self) -> bool {
        self.annotation_type().is_collection_like()
    }

    /// Serialize to the flat wire JSON object.
    pub fn to_json(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("type".to_string(), Value::from(self.annotation_type().name()));
        obj.insert("id".to_string(), Value::from(self.id.clone()));
        if let Some(description) = &self.description {
            obj.insert("description".to_string(), Value::from(description.clone()));
        }
        if !self.tag_ids.is_empty() {
            let ids: Vec<Value> = self.tag_ids.iter().map(|&t| Value::from(t)).collect();
            obj.insert("tagIds".to_string(), Value::Array(ids));
        }
        if let Some(parent_id) = &self.parent_id {
            obj.insert("parentId".to_string(), Value::from(parent_id.clone()));
        }
        if !self.segments.is_empty() {
            // 64-bit ids as decimal strings; JSON numbers cannot hold them.
            let segments: Vec<Value> =
                self.segments.iter().map(|s| Value::from(s.to_string())).collect();
            obj.insert("segments".to_string(), Value::Array(segments));
        }
        type_handler(self.annotation_type()).geometry_to_json(&self.geometry, &mut obj);
        Value::Object(obj)
    }

    /// Deserialize from the flat wire JSON object.
    pub fn from_json(value: &Value) -> Result<Self, AnnotationError> {
        let obj = value
            .as_object()
            .ok_or_else(|| AnnotationError::invalid_json("annotation must be an object"))?;
        let type_name = obj
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| AnnotationError::missing_field("type"))?;
        let annotation_type = AnnotationType::from_name(type_name)?;
        let id = obj
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| AnnotationError::missing_field("id"))?
            .to_string();
        let description = obj
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string);
        let mut tag_ids = BTreeSet::new();
        if let Some(tags) = obj.get("tagIds").and_then(Value::as_array) {
            for tag in tags {
                let tag = tag
                    .as_u64()
                    .ok_or_else(|| AnnotationError::invalid_json("tagIds must be integers"))?;
                tag_ids.insert(tag as u32);
            }
        }
        let parent_id = obj
            .get("parentId")
            .and_then(Value::as_str)
            .map(str::to_string);
        let mut segments = Vec::new();
        if let Some(list) = obj.get("segments").and_then(Value::as_array) {
            for segment in list {
                let segment = match segment {
                    Value::String(s) => s.parse::<u64>().map_err(|_| {
                        AnnotationError::invalid_json("segments must be decimal 64-bit ids")
                    })?,
                    Value::Number(n) => n.as_u64().ok_or_else(|| {
                        AnnotationError::invalid_json("segments must be unsigned integers")
                    })?,
                    _ => {
                        return Err(AnnotationError::invalid_json(
                            "segments must be strings or integers",
                        ));
                    }
                };
                segments.push(segment);
            }
        }
        let geometry = type_handler(annotation_type).geometry_from_json(obj)?;
        Ok(Self {
            id,
            geometry,
            description,
            tag_ids,
            segments,
            parent_id,
        })
    }
}

/// Per-type serialization contract.
///
/// The handler table is the single extension point for annotation types: JSON
/// round trips cover only the type-specific geometry fields (common fields
/// are handled generically by [`Annotation::to_json`]), and `write_geometry`
/// packs the geometry as 32-bit floats for the GPU buffer.
pub trait AnnotationTypeHandler: Sync {
    /// The type this handler serves.
    fn annotation_type(&self) -> AnnotationType;

    /// Fixed byte footprint of one instance at the given rank.
    fn serialized_bytes(&self, rank: usize) -> usize;

    /// Write the geometry fields into a wire JSON object.
    fn geometry_to_json(&self, geometry: &Geometry, obj: &mut Map<String, Value>);

    /// Read the geometry fields back from a wire JSON object.
    fn geometry_from_json(&self, obj: &Map<String, Value>) -> Result<Geometry, AnnotationError>;

    /// Pack the geometry as f32s into `out`, whose length equals
    /// `serialized_bytes(rank) / 4`. Bounding boxes are normalized so
    /// `point_a <= point_b` per axis on write.
    fn write_geometry(&self, geometry: &Geometry, out: &mut [f32]);
}

/// Look up the handler for an annotation type.
pub fn type_handler(annotation_type: AnnotationType) -> &'static dyn AnnotationTypeHandler {
    match annotation_type {
        AnnotationType::Point => &PointHandler,
        AnnotationType::Line => &LineHandler,
        AnnotationType::AxisAlignedBoundingBox => &BoundingBoxHandler,
        AnnotationType::Ellipsoid => &EllipsoidHandler,
        AnnotationType::Collection => &CollectionHandler {
            annotation_type: AnnotationType::Collection,
        },
        AnnotationType::LineStrip => &CollectionHandler {
            annotation_type: AnnotationType::LineStrip,
        },
        AnnotationType::Spoke => &CollectionHandler {
            annotation_type: AnnotationType::Spoke,
        },
    }
}

fn vector_to_json(v: &[f32]) -> Value {
    Value::Array(v.iter().map(|&x| Value::from(x)).collect())
}

fn vector_from_json(obj: &Map<String, Value>, field: &str) -> Result<Vec<f32>, AnnotationError> {
    let list = obj
        .get(field)
        .and_then(Value::as_array)
        .ok_or_else(|| AnnotationError::missing_field(field))?;
    let mut out = Vec::with_capacity(list.len());
    for x in list {
        let x = x
            .as_f64()
            .ok_or_else(|| AnnotationError::invalid_json(format!("{field} must be numeric")))?;
        out.push(x as f32);
    }
    Ok(out)
}

struct PointHandler;

impl AnnotationTypeHandler for PointHandler {
    fn annotation_type(&self) -> AnnotationType {
        AnnotationType::Point
    }

    fn serialized_bytes(&self, rank: usize) -> usize {
        4 * rank
    }

    fn geometry_to_json(&self, geometry: &Geometry, obj: &mut Map<String, Value>) {
        if let Geometry::Point { point } = geometry {
            obj.insert("point".to_string(), vector_to_json(point));
        }
    }

    fn geometry_from_json(&self, obj: &Map<String, Value>) -> Result<Geometry, AnnotationError> {
        Ok(Geometry::Point {
            point: vector_from_json(obj, "point")?,
        })
    }

    fn write_geometry(&self, geometry: &Geometry, out: &mut [f32]) {
        if let Geometry::Point { point } = geometry {
            out.copy_from_slice(point);
        }
    }
}

struct LineHandler;

impl AnnotationTypeHandler for LineHandler {
    fn annotation_type(&self) -> AnnotationType {
        AnnotationType::Line
    }

    fn serialized_bytes(&self, rank: usize) -> usize {
        8 * rank
    }

    fn geometry_to_json(&self, geometry: &Geometry, obj: &mut Map<String, Value>) {
        if let Geometry::Line { point_a, point_b } = geometry {
            obj.insert("pointA".to_string(), vector_to_json(point_a));
            obj.insert("pointB".to_string(), vector_to_json(point_b));
        }
    }

    fn geometry_from_json(&self, obj: &Map<String, Value>) -> Result<Geometry, AnnotationError> {
        Ok(Geometry::Line {
            point_a: vector_from_json(obj, "pointA")?,
            point_b: vector_from_json(obj, "pointB")?,
        })
    }

    fn write_geometry(&self, geometry: &Geometry, out: &mut [f32]) {
        if let Geometry::Line { point_a, point_b } = geometry {
            let rank = point_a.len();
            out[..rank].copy_from_slice(point_a);
            out[rank..].copy_from_slice(point_b);
        }
    }
}

struct BoundingBoxHandler;

impl AnnotationTypeHandler for BoundingBoxHandler {
    fn annotation_type(&self) -> AnnotationType {
        AnnotationType::AxisAlignedBoundingBox
    }

    fn serialized_bytes(&self, rank: usize) -> usize {
        8 * rank
    }

    fn geometry_to_json(&self, geometry: &Geometry, obj: &mut Map<String, Value>) {
        if let Geometry::AxisAlignedBoundingBox { point_a, point_b } = geometry {
            obj.insert("pointA".to_string(), vector_to_json(point_a));
            obj.insert("pointB".to_string(), vector_to_json(point_b));
        }
    }

    fn geometry_from_json(&self, obj: &Map<String, Value>) -> Result<Geometry, AnnotationError> {
        Ok(Geometry::AxisAlignedBoundingBox {
            point_a: vector_from_json(obj, "pointA")?,
            point_b: vector_from_json(obj, "pointB")?,
        })
    }

    fn write_geometry(&self, geometry: &Geometry, out: &mut [f32]) {
        if let Geometry::AxisAlignedBoundingBox { point_a, point_b } = geometry {
            // Corners are unordered in the record; the packed form is
            // normalized to min then max per axis.
            let rank = point_a.len();
            for i in 0..rank {
                out[i] = point_a[i].min(point_b[i]);
                out[rank + i] = point_a[i].max(point_b[i]);
            }
        }
    }
}

struct EllipsoidHandler;

impl AnnotationTypeHandler for EllipsoidHandler {
    fn annotation_type(&self) -> AnnotationType {
        AnnotationType::Ellipsoid
    }

    fn serialized_bytes(&self, rank: usize) -> usize {
        8 * rank
    }

    fn geometry_to_json(&self, geometry: &Geometry, obj: &mut Map<String, Value>) {
        if let Geometry::Ellipsoid { center, radii } = geometry {
            obj.insert("center".to_string(), vector_to_json(center));
            obj.insert("radii".to_string(), vector_to_json(radii));
        }
    }

    fn geometry_from_json(&self, obj: &Map<String, Value>) -> Result<Geometry, AnnotationError> {
        Ok(Geometry::Ellipsoid {
            center: vector_from_json(obj, "center")?,
            radii: vector_from_json(obj, "radii")?,
        })
    }

    fn write_geometry(&self, geometry: &Geometry, out: &mut [f32]) {
        if let Geometry::Ellipsoid { center, radii } = geometry {
            let rank = center.len();
            out[..rank].copy_from_slice(center);
            out[rank..].copy_from_slice(radii);
        }
    }
}

struct CollectionHandler {
    annotation_type: AnnotationType,
}

impl AnnotationTypeHandler for CollectionHandler {
    fn annotation_type(&self) -> AnnotationType {
        self.annotation_type
    }

    fn serialized_bytes(&self, rank: usize) -> usize {
        // Only the anchor point is rendered for a collection.
        4 * rank
    }

    fn geometry_to_json(&self, geometry: &Geometry, obj: &mut Map<String, Value>) {
        let Some(collection) = geometry.collection() else {
            return;
        };
        obj.insert("source".to_string(), vector_to_json(&collection.source));
        let entries: Vec<Value> = collection
            .entries
            .iter()
            .map(|e| Value::from(e.clone()))
            .collect();
        obj.insert("entries".to_string(), Value::Array(entries));
        obj.insert(
            "childrenVisible".to_string(),
            Value::from(collection.children_visible),
        );
        match geometry {
            Geometry::LineStrip { looped, .. } => {
                obj.insert("looped".to_string(), Value::from(*looped));
            }
            Geometry::Spoke { wheeled, .. } => {
                obj.insert("wheeled".to_string(), Value::from(*wheeled));
            }
            _ => {}
        }
    }

    fn geometry_from_json(&self, obj: &Map<String, Value>) -> Result<Geometry, AnnotationError> {
        let source = vector_from_json(obj, "source")?;
        let mut entries = Vec::new();
        if let Some(list) = obj.get("entries").and_then(Value::as_array) {
            for entry in list {
                let entry = entry
                    .as_str()
                    .ok_or_else(|| AnnotationError::invalid_json("entries must be id strings"))?;
                entries.push(entry.to_string());
            }
        }
        let children_visible = obj
            .get("childrenVisible")
            .and_then(Value::as_bool)
            .unwrap_or(true);
        let collection = CollectionState {
            source,
            entries,
            connected: self.annotation_type != AnnotationType::Collection,
            children_visible,
            last_a: None,
            last_b: None,
        };
        Ok(match self.annotation_type {
            AnnotationType::LineStrip => Geometry::LineStrip {
                collection,
                looped: obj.get("looped").and_then(Value::as_bool).unwrap_or(false),
            },
            AnnotationType::Spoke => Geometry::Spoke {
                collection,
                wheeled: obj.get("wheeled").and_then(Value::as_bool).unwrap_or(false),
            },
            _ => Geometry::Collection(collection),
        })
    }

    fn write_geometry(&self, geometry: &Geometry, out: &mut [f32]) {
        if let Some(collection) = geometry.collection() {
            out.copy_from_slice(&collection.source);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_id_shape() {
        let id = random_annotation_id();
        assert_eq!(id.len(), 40);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, random_annotation_id());
    }

    #[test]
    fn test_type_name_round_trip() {
        for &t in AnnotationType::all() {
            assert_eq!(AnnotationType::from_name(t.name()).unwrap(), t);
        }
        assert!(AnnotationType::from_name("blob").is_err());
    }

    #[test]
    fn test_point_json_round_trip() {
        let mut a = Annotation::new(
            "abc".to_string(),
            Geometry::Point {
                point: vec![1.0, 2.0, 3.0],
            },
        );
        a.description = Some("soma".to_string());
        a.tag_ids.insert(2);
        a.segments = vec![10, u64::MAX];
        let json = a.to_json();
        assert_eq!(json["type"], "point");
        assert_eq!(json["segments"][1], u64::MAX.to_string());
        let back = Annotation::from_json(&json).unwrap();
        assert_eq!(back, a);
    }

    #[test]
    fn test_line_strip_json_round_trip() {
        let a = Annotation::new(
            "ls".to_string(),
            Geometry::LineStrip {
                collection: CollectionState {
                    source: vec![0.0, 0.0],
                    entries: vec!["e1".to_string(), "e2".to_string()],
                    connected: true,
                    children_visible: false,
                    last_a: Some("e2".to_string()),
                    last_b: Some("e1".to_string()),
                },
                looped: true,
            },
        );
        let json = a.to_json();
        assert_eq!(json["type"], "line_strip");
        assert_eq!(json["looped"], true);
        let back = Annotation::from_json(&json).unwrap();
        // last_a/last_b are transient placement bookkeeping.
        let collection = back.geometry.collection().unwrap();
        assert_eq!(collection.last_a, None);
        assert_eq!(collection.entries, vec!["e1", "e2"]);
        assert!(collection.connected);
        assert!(!collection.children_visible);
    }

    #[test]
    fn test_bbox_write_normalizes_corners() {
        let a = Geometry::AxisAlignedBoundingBox {
            point_a: vec![5.0, 1.0, 3.0],
            point_b: vec![1.0, 4.0, 0.0],
        };
        let handler = type_handler(AnnotationType::AxisAlignedBoundingBox);
        assert_eq!(handler.serialized_bytes(3), 24);
        let mut out = [0.0f32; 6];
        handler.write_geometry(&a, &mut out);
        assert_eq!(out, [1.0, 1.0, 0.0, 5.0, 4.0, 3.0]);
    }

    #[test]
    fn test_serialized_bytes_per_type() {
        assert_eq!(type_handler(AnnotationType::Point).serialized_bytes(3), 12);
        assert_eq!(type_handler(AnnotationType::Line).serialized_bytes(3), 24);
        assert_eq!(type_handler(AnnotationType::Ellipsoid).serialized_bytes(2), 16);
        assert_eq!(type_handler(AnnotationType::Spoke).serialized_bytes(3), 12);
    }
}
