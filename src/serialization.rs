//! Packed binary geometry serialization for the GPU renderer.
//!
//! Geometry is laid out type-grouped: all points first, then all lines, and
//! so on, each group tightly packed at its per-type byte footprint. The
//! renderer can then issue one draw call per annotation type without
//! per-instance type dispatch on the GPU. Parallel to the geometry buffer, a
//! segment table records, per annotation in global serialization order, an
//! index range into a flattened low/high 32-bit segment-id pair array.

use crate::model::{type_handler, Annotation, AnnotationId, AnnotationType};

/// Output of [`serialize_annotations`], consumed by the rendering
/// collaborator.
#[derive(Debug, Clone, Default)]
pub struct SerializedAnnotations {
    /// Packed f32 geometry, type-grouped, little-endian bytes.
    pub data: Vec<u8>,
    /// Annotation ids per type, in serialization order. Indexed by
    /// [`AnnotationType::index`].
    pub type_to_ids: Vec<Vec<AnnotationId>>,
    /// Byte offset of each type group within `data`.
    pub type_to_offset: Vec<usize>,
    /// Per annotation in global serialization order, the start index of its
    /// segments within `segment_list`, counted in low/high pairs. Has one
    /// trailing entry so ranges are `index[i] .. index[i + 1]`.
    pub segment_list_index: Vec<u32>,
    /// Flattened low/high 32-bit halves of the 64-bit segment ids.
    pub segment_list: Vec<u32>,
}

impl SerializedAnnotations {
    /// Total number of serialized annotations.
    pub fn len(&self) -> usize {
        self.segment_list_index.len().saturating_sub(1)
    }

    /// Whether no annotations were serialized.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The 64-bit segment ids of the annotation at the given global
    /// serialization index.
    pub fn segments(&self, index: usize) -> Vec<u64> {
        let start = self.segment_list_index[index] as usize;
        let end = self.segment_list_index[index + 1] as usize;
        (start..end)
            .map(|i| {
                let low = self.segment_list[i * 2] as u64;
                let high = self.segment_list[i * 2 + 1] as u64;
                low | (high << 32)
            })
            .collect()
    }
}

/// Pack a set of annotations into the type-grouped binary layout.
///
/// `annotations` are taken in a caller-defined stable order; within each type
/// group, serialization order matches iteration order. All geometry must have
/// the given coordinate rank.
pub fn serialize_annotations<'a>(
    annotations: impl IntoIterator<Item = &'a Annotation>,
    rank: usize,
) -> SerializedAnnotations {
    let type_count = AnnotationType::all().len();
    let mut groups: Vec<Vec<&Annotation>> = vec![Vec::new(); type_count];
    for annotation in annotations {
        groups[annotation.annotation_type().index()].push(annotation);
    }

    // Byte offsets per type group.
    let mut type_to_offset = Vec::with_capacity(type_count);
    let mut total_bytes = 0usize;
    for (&annotation_type, group) in AnnotationType::all().iter().zip(&groups) {
        type_to_offset.push(total_bytes);
        total_bytes += type_handler(annotation_type).serialized_bytes(rank) * group.len();
    }

    let mut floats = vec![0.0f32; total_bytes / 4];
    let mut type_to_ids = Vec::with_capacity(type_count);
    let mut segment_list_index = Vec::new();
    let mut segment_list = Vec::new();

    for (group_index, (&annotation_type, group)) in
        AnnotationType::all().iter().zip(&groups).enumerate()
    {
        let handler = type_handler(annotation_type);
        let instance_floats = handler.serialized_bytes(rank) / 4;
        let group_start = type_to_offset[group_index] / 4;
        let mut ids = Vec::with_capacity(group.len());
        for (i, annotation) in group.iter().enumerate() {
            let start = group_start + i * instance_floats;
            handler.write_geometry(
                &annotation.geometry,
                &mut floats[start..start + instance_floats],
            );
            ids.push(annotation.id.clone());

            segment_list_index.push((segment_list.len() / 2) as u32);
            for &segment in &annotation.segments {
                segment_list.push(segment as u32);
                segment_list.push((segment >> 32) as u32);
            }
        }
        type_to_ids.push(ids);
    }
    segment_list_index.push((segment_list.len() / 2) as u32);

    SerializedAnnotations {
        data: bytemuck::cast_slice(&floats).to_vec(),
        type_to_ids,
        type_to_offset,
        segment_list_index,
        segment_list,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Geometry;

    fn point(id: &str, p: &[f32]) -> Annotation {
        Annotation::new(id.to_string(), Geometry::Point { point: p.to_vec() })
    }

    fn line(id: &str, a: &[f32], b: &[f32]) -> Annotation {
        Annotation::new(
            id.to_string(),
            Geometry::Line {
                point_a: a.to_vec(),
                point_b: b.to_vec(),
            },
        )
    }

    fn floats(data: &[u8]) -> Vec<f32> {
        bytemuck::cast_slice(data).to_vec()
    }

    #[test]
    fn test_type_grouping_and_offsets() {
        // Interleaved input; output must be grouped points-then-lines.
        let annotations = vec![
            line("l1", &[0.0, 0.0, 0.0], &[1.0, 0.0, 0.0]),
            point("p1", &[1.0, 2.0, 3.0]),
            point("p2", &[4.0, 5.0, 6.0]),
        ];
        let serialized = serialize_annotations(&annotations, 3);
        assert_eq!(serialized.len(), 3);
        assert_eq!(serialized.type_to_ids[0], vec!["p1", "p2"]);
        assert_eq!(serialized.type_to_ids[1], vec!["l1"]);
        // Points group starts at offset 0, lines after 2 points.
        assert_eq!(serialized.type_to_offset[0], 0);
        assert_eq!(serialized.type_to_offset[1], 24);
        let f = floats(&serialized.data);
        assert_eq!(&f[0..3], &[1.0, 2.0, 3.0]);
        assert_eq!(&f[3..6], &[4.0, 5.0, 6.0]);
        assert_eq!(&f[6..12], &[0.0, 0.0, 0.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_bbox_normalized_in_packed_output() {
        let a = Annotation::new(
            "b".to_string(),
            Geometry::AxisAlignedBoundingBox {
                point_a: vec![5.0, 1.0, 3.0],
                point_b: vec![1.0, 4.0, 0.0],
            },
        );
        let serialized = serialize_annotations([&a], 3);
        let offset = serialized.type_to_offset[2];
        let f = floats(&serialized.data[offset..offset + 24]);
        assert_eq!(f, vec![1.0, 1.0, 0.0, 5.0, 4.0, 3.0]);
    }

    #[test]
    fn test_segment_table() {
        let mut p1 = point("p1", &[0.0]);
        p1.segments = vec![7, (3 << 32) | 9];
        let p2 = point("p2", &[1.0]);
        let mut l1 = line("l1", &[0.0], &[1.0]);
        l1.segments = vec![42];
        let annotations = vec![l1, p1, p2];
        let serialized = serialize_annotations(&annotations, 1);
        // Global order: p1, p2 (points), l1 (lines).
        assert_eq!(serialized.segment_list_index, vec![0, 2, 2, 3]);
        assert_eq!(serialized.segments(0), vec![7, (3 << 32) | 9]);
        assert_eq!(serialized.segments(1), Vec::<u64>::new());
        assert_eq!(serialized.segments(2), vec![42]);
        assert_eq!(serialized.segment_list.len(), 6);
    }

    #[test]
    fn test_empty_input() {
        let serialized = serialize_annotations(std::iter::empty::<&Annotation>(), 3);
        assert!(serialized.is_empty());
        assert!(serialized.data.is_empty());
        assert_eq!(serialized.segment_list_index, vec![0]);
    }
}
