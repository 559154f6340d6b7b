//! In-memory annotation store.
//!
//! [`AnnotationSource`] owns a forest of annotation records. Sibling order
//! under each parent (and at the root) is maintained with an intrusive
//! circular doubly-linked structure keyed by parent id, with a tail index
//! per group for O(1) append. Uncommitted in-progress annotations live in a
//! `pending` set: they are fully linked into the tree but excluded from
//! serialization and from completion checks.
//!
//! Mutations run to completion before any notification is recorded, so
//! observers draining [`AnnotationSource::take_events`] never see a
//! transiently inconsistent tree.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::rc::{Rc, Weak};

use serde_json::Value;

use crate::error::AnnotationError;
use crate::model::{random_annotation_id, Annotation, AnnotationId, AnnotationTag};

/// Resolution state of an [`AnnotationReference`].
#[derive(Debug, Clone, PartialEq)]
pub enum ReferenceValue {
    /// Not yet resolved. A local store resolves every reference eagerly in
    /// [`AnnotationSource::get_reference`], so only remote-backed sources,
    /// which resolve asynchronously, leave a slot in this state.
    Unresolved,
    /// The referenced annotation was deleted, or never existed.
    Deleted,
    /// The live annotation.
    Live(Annotation),
}

#[derive(Debug)]
struct ReferenceSlot {
    id: AnnotationId,
    value: ReferenceValue,
    generation: u64,
}

/// A live, reference-counted handle to an annotation by id.
///
/// References are deduplicated per id: all clones for the same id share one
/// slot, and the store pushes mutations and deletions into it. Dropping the
/// last clone releases the store's bookkeeping entry for that id.
#[derive(Debug, Clone)]
pub struct AnnotationReference {
    slot: Rc<RefCell<ReferenceSlot>>,
}

impl AnnotationReference {
    /// The id this reference points at.
    pub fn id(&self) -> AnnotationId {
        self.slot.borrow().id.clone()
    }

    /// Current resolution state.
    pub fn value(&self) -> ReferenceValue {
        self.slot.borrow().value.clone()
    }

    /// The live annotation, if resolved and not deleted.
    pub fn annotation(&self) -> Option<Annotation> {
        match &self.slot.borrow().value {
            ReferenceValue::Live(a) => Some(a.clone()),
            _ => None,
        }
    }

    /// Whether the referenced annotation has been deleted.
    pub fn is_deleted(&self) -> bool {
        matches!(self.slot.borrow().value, ReferenceValue::Deleted)
    }

    /// Bumped each time the store rebinds this reference; observers compare
    /// generations to detect changes without callbacks.
    pub fn generation(&self) -> u64 {
        self.slot.borrow().generation
    }
}

/// Change notification recorded by the store.
///
/// For every mutation the specific signal is recorded first, with the
/// general `Changed` alongside, after all invariants (sibling links, derived
/// segments) have been restored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnnotationEvent {
    /// An annotation was added.
    ChildAdded(AnnotationId),
    /// An annotation was updated, committed, or reparented.
    ChildUpdated(AnnotationId),
    /// An annotation was deleted.
    ChildDeleted(AnnotationId),
    /// Store-wide change signal.
    Changed,
}

#[derive(Debug, Clone)]
struct AnnotationNode {
    annotation: Annotation,
    prev: AnnotationId,
    next: AnnotationId,
}

/// Mutation-tracked, reference-counted annotation store.
pub struct AnnotationSource {
    annotations: HashMap<AnnotationId, AnnotationNode>,
    /// Tail of each sibling ring; `None` key is the root group.
    last_per_parent: HashMap<Option<AnnotationId>, AnnotationId>,
    /// Ids created but not yet committed.
    pending: HashSet<AnnotationId>,
    references: RefCell<HashMap<AnnotationId, Weak<RefCell<ReferenceSlot>>>>,
    tags: BTreeMap<u32, AnnotationTag>,
    next_tag_id: u32,
    /// Ids currently being torn down; suppresses empty-parent garbage
    /// collection from re-entering their deletion.
    in_deletion: HashSet<AnnotationId>,
    events: Vec<AnnotationEvent>,
    dirty: bool,
}

impl Default for AnnotationSource {
    fn default() -> Self {
        Self::new()
    }
}

impl AnnotationSource {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            annotations: HashMap::new(),
            last_per_parent: HashMap::new(),
            pending: HashSet::new(),
            references: RefCell::new(HashMap::new()),
            tags: BTreeMap::new(),
            next_tag_id: 1,
            in_deletion: HashSet::new(),
            events: Vec::new(),
            dirty: false,
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Number of annotations, including pending ones.
    pub fn len(&self) -> usize {
        self.annotations.len()
    }

    /// Whether the store holds no annotations.
    pub fn is_empty(&self) -> bool {
        self.annotations.is_empty()
    }

    /// Look up an annotation by id.
    pub fn get(&self, id: &str) -> Option<&Annotation> {
        self.annotations.get(id).map(|node| &node.annotation)
    }

    /// Whether the id is in the pending (uncommitted) set.
    pub fn is_pending(&self, id: &str) -> bool {
        self.pending.contains(id)
    }

    /// Number of pending annotations.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Ids of the root sibling group, in insertion order.
    pub fn root_ids(&self) -> Vec<AnnotationId> {
        self.group_order(&None)
    }

    /// All ids in depth-first order: root siblings in link order, each
    /// followed by its subtree. This is the store's canonical serialization
    /// order.
    pub fn ordered_ids(&self) -> Vec<AnnotationId> {
        let mut out = Vec::with_capacity(self.annotations.len());
        let mut stack: Vec<AnnotationId> = self.group_order(&None);
        stack.reverse();
        while let Some(id) = stack.pop() {
            let children = self.group_order(&Some(id.clone()));
            out.push(id);
            for child in children.into_iter().rev() {
                stack.push(child);
            }
        }
        out
    }

    /// Iterate all annotations in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = &Annotation> {
        self.annotations.values().map(|node| &node.annotation)
    }

    /// Walk `id`'s parent chain; true if `ancestor` appears in it.
    pub fn has_ancestor(&self, id: &str, ancestor: &str) -> bool {
        let mut current = self
            .annotations
            .get(id)
            .and_then(|node| node.annotation.parent_id.clone());
        while let Some(parent_id) = current {
            if parent_id == ancestor {
                return true;
            }
            current = self
                .annotations
                .get(&parent_id)
                .and_then(|node| node.annotation.parent_id.clone());
        }
        false
    }

    // ========================================================================
    // Change tracking
    // ========================================================================

    /// Drain all notifications recorded since the last call.
    pub fn take_events(&mut self) -> Vec<AnnotationEvent> {
        std::mem::take(&mut self.events)
    }

    /// Whether the store changed since the last [`Self::clear_dirty`].
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Clear the dirty flag. Call after rebuilding derived render state.
    #[inline]
    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    fn record(&mut self, event: AnnotationEvent) {
        if event != AnnotationEvent::Changed {
            self.events.push(event);
        }
        self.events.push(AnnotationEvent::Changed);
        self.dirty = true;
    }

    // ========================================================================
    // References
    // ========================================================================

    /// Return a reference-counted handle for `id`, reusing the existing slot
    /// if any holder is still registered.
    pub fn get_reference(&self, id: &str) -> AnnotationReference {
        let mut references = self.references.borrow_mut();
        if let Some(weak) = references.get(id) {
            if let Some(slot) = weak.upgrade() {
                return AnnotationReference { slot };
            }
        }
        let value = match self.annotations.get(id) {
            Some(node) => ReferenceValue::Live(node.annotation.clone()),
            None => ReferenceValue::Deleted,
        };
        let slot = Rc::new(RefCell::new(ReferenceSlot {
            id: id.to_string(),
            value,
            generation: 0,
        }));
        references.insert(id.to_string(), Rc::downgrade(&slot));
        references.retain(|_, weak| weak.strong_count() > 0);
        AnnotationReference { slot }
    }

    fn rebind_reference(&self, id: &str, value: ReferenceValue) {
        let references = self.references.borrow();
        if let Some(slot) = references.get(id).and_then(Weak::upgrade) {
            let mut slot = slot.borrow_mut();
            slot.value = value;
            slot.generation += 1;
        }
    }

    // ========================================================================
    // Sibling rings
    // ========================================================================

    fn group_order(&self, key: &Option<AnnotationId>) -> Vec<AnnotationId> {
        let Some(tail) = self.last_per_parent.get(key) else {
            return Vec::new();
        };
        let head = self.annotations[tail].next.clone();
        let mut out = Vec::new();
        let mut current = head.clone();
        loop {
            out.push(current.clone());
            current = self.annotations[&current].next.clone();
            if current == head {
                break;
            }
        }
        out
    }

    /// Append `id` at the tail of the sibling ring for `key`.
    fn link_tail(&mut self, key: Option<AnnotationId>, id: &AnnotationId) {
        match self.last_per_parent.get(&key).cloned() {
            Some(tail) => {
                let head = self.annotations[&tail].next.clone();
                self.annotations.get_mut(&tail).expect("ring tail").next = id.clone();
                self.annotations.get_mut(&head).expect("ring head").prev = id.clone();
                let node = self.annotations.get_mut(id).expect("linked node");
                node.prev = tail;
                node.next = head;
            }
            None => {
                let node = self.annotations.get_mut(id).expect("linked node");
                node.prev = id.clone();
                node.next = id.clone();
            }
        }
        self.last_per_parent.insert(key, id.clone());
    }

    /// Remove `id` from the sibling ring for `key`.
    fn unlink(&mut self, key: &Option<AnnotationId>, id: &AnnotationId) {
        let node = self.annotations.get(id).expect("unlinked node");
        let prev = node.prev.clone();
        let next = node.next.clone();
        if next == *id {
            self.last_per_parent.remove(key);
        } else {
            self.annotations.get_mut(&prev).expect("ring prev").next = next.clone();
            self.annotations.get_mut(&next).expect("ring next").prev = prev.clone();
            if self.last_per_parent.get(key) == Some(id) {
                self.last_per_parent.insert(key.clone(), prev);
            }
        }
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Add an annotation, assigning an id if its id is empty.
    ///
    /// With `commit` false the annotation is linked in but marked pending:
    /// excluded from serialization and treated as still being drawn. If
    /// `parent` is given, the annotation is appended at the tail of that
    /// parent's entries and sibling ring; the bidirectional
    /// `entries`/`parent_id` invariant is maintained here, never by callers.
    pub fn add(
        &mut self,
        mut annotation: Annotation,
        commit: bool,
        parent: Option<&AnnotationReference>,
    ) -> Result<AnnotationReference, AnnotationError> {
        if annotation.id.is_empty() {
            annotation.id = random_annotation_id();
        }
        let id = annotation.id.clone();
        if self.annotations.contains_key(&id) {
            return Err(AnnotationError::DuplicateId { id });
        }
        if let Some(parent) = parent {
            annotation.parent_id = Some(parent.id());
        }
        let parent_id = annotation.parent_id.clone();
        self.annotations.insert(
            id.clone(),
            AnnotationNode {
                annotation,
                prev: id.clone(),
                next: id.clone(),
            },
        );
        self.link_tail(parent_id.clone(), &id);
        if let Some(parent_id) = &parent_id {
            if let Some(parent_node) = self.annotations.get_mut(parent_id) {
                if let Some(collection) = parent_node.annotation.geometry.collection_mut() {
                    if !collection.entries.contains(&id) {
                        collection.entries.push(id.clone());
                    }
                }
                self.segment_set(parent_id.clone());
                let parent_value = self.annotations[parent_id].annotation.clone();
                self.rebind_reference(parent_id, ReferenceValue::Live(parent_value));
            }
        }
        if !commit {
            self.pending.insert(id.clone());
        }
        let value = self.annotations[&id].annotation.clone();
        self.rebind_reference(&id, ReferenceValue::Live(value));
        log::debug!("added annotation {id} (commit={commit})");
        self.record(AnnotationEvent::ChildAdded(id.clone()));
        Ok(self.get_reference(&id))
    }

    /// Add several annotations in order.
    pub fn add_all(
        &mut self,
        annotations: Vec<Annotation>,
        commit: bool,
    ) -> Result<Vec<AnnotationReference>, AnnotationError> {
        let mut references = Vec::with_capacity(annotations.len());
        for annotation in annotations {
            references.push(self.add(annotation, commit, None)?);
        }
        Ok(references)
    }

    /// Finalize a pending annotation. No-op if it was already committed.
    pub fn commit(&mut self, reference: &AnnotationReference) {
        let id = reference.id();
        if self.pending.remove(&id) {
            log::debug!("committed annotation {id}");
            self.record(AnnotationEvent::ChildUpdated(id));
        }
    }

    /// Replace the stored annotation behind `reference`.
    ///
    /// The stored id and parent linkage are preserved; reparenting must go
    /// through [`Self::child_reassignment`]. Fails if the reference's
    /// annotation was already deleted.
    pub fn update(
        &mut self,
        reference: &AnnotationReference,
        mut annotation: Annotation,
    ) -> Result<(), AnnotationError> {
        let id = reference.id();
        let node = self
            .annotations
            .get_mut(&id)
            .ok_or(AnnotationError::ReferenceDeleted { id: id.clone() })?;
        annotation.id = id.clone();
        annotation.parent_id = node.annotation.parent_id.clone();
        node.annotation = annotation;
        if let Some(parent_id) = self.annotations[&id].annotation.parent_id.clone() {
            // A child's segments feed its parent's derived set.
            self.segment_set(parent_id);
        }
        let value = self.annotations[&id].annotation.clone();
        self.rebind_reference(&id, ReferenceValue::Live(value));
        self.record(AnnotationEvent::ChildUpdated(id));
        Ok(())
    }

    /// Delete the referenced annotation.
    ///
    /// Children of a collection-like annotation are orphaned to the deleted
    /// node's own parent, or deleted recursively when `flush` is set. A
    /// parent left empty by the deletion is itself deleted unless pending.
    /// No-op if the annotation is already gone.
    pub fn delete(&mut self, reference: &AnnotationReference, flush: bool) {
        let id = reference.id();
        self.delete_by_id(&id, flush);
    }

    fn delete_by_id(&mut self, id: &AnnotationId, flush: bool) {
        if !self.annotations.contains_key(id) || self.in_deletion.contains(id) {
            return;
        }
        self.in_deletion.insert(id.clone());

        let entries = self
            .annotations[id]
            .annotation
            .geometry
            .collection()
            .map(|c| c.entries.clone())
            .unwrap_or_default();
        let parent_id = self.annotations[id].annotation.parent_id.clone();

        if !entries.is_empty() {
            if flush {
                for child in &entries {
                    self.delete_by_id(child, true);
                }
            } else {
                let parent_reference = parent_id.as_deref().map(|p| self.get_reference(p));
                self.child_reassignment(&entries, parent_reference.as_ref());
            }
        }

        if let Some(parent_id) = &parent_id {
            if let Some(parent_node) = self.annotations.get_mut(parent_id) {
                let mut now_empty = false;
                if let Some(collection) = parent_node.annotation.geometry.collection_mut() {
                    collection.entries.retain(|e| e != id);
                    now_empty = collection.entries.is_empty();
                }
                self.segment_set(parent_id.clone());
                if now_empty && !self.pending.contains(parent_id) {
                    let parent_id = parent_id.clone();
                    self.delete_by_id(&parent_id, false);
                }
            }
        }

        // The group key is the node's parent at link time.
        let key = self
            .annotations
            .get(id)
            .and_then(|node| node.annotation.parent_id.clone());
        self.unlink(&key, id);
        self.annotations.remove(id);
        self.pending.remove(id);
        self.in_deletion.remove(id);
        self.rebind_reference(id, ReferenceValue::Deleted);
        log::debug!("deleted annotation {id} (flush={flush})");
        self.record(AnnotationEvent::ChildDeleted(id.clone()));
    }

    /// Move each target (with its subtree) under `new_parent`, or to the
    /// root when `new_parent` is `None`.
    ///
    /// A target whose intended parent is the target itself or one of its
    /// descendants is skipped entirely, descendants included; a bulk
    /// reassignment makes partial progress rather than failing. Returns
    /// references to former parents left with zero children, for the caller
    /// to garbage-collect.
    pub fn child_reassignment(
        &mut self,
        targets: &[AnnotationId],
        new_parent: Option<&AnnotationReference>,
    ) -> Vec<AnnotationReference> {
        let new_parent_id = new_parent.map(|p| p.id());
        let mut emptied: Vec<AnnotationReference> = Vec::new();
        let mut emptied_ids: HashSet<AnnotationId> = HashSet::new();
        self.reassign_inner(targets, &new_parent_id, &mut emptied, &mut emptied_ids);
        emptied
    }

    fn reassign_inner(
        &mut self,
        targets: &[AnnotationId],
        new_parent_id: &Option<AnnotationId>,
        emptied: &mut Vec<AnnotationReference>,
        emptied_ids: &mut HashSet<AnnotationId>,
    ) {
        for target in targets {
            let Some(node) = self.annotations.get(target) else {
                continue;
            };
            let old_parent_id = node.annotation.parent_id.clone();
            if old_parent_id != *new_parent_id {
                if let Some(new_parent_id) = new_parent_id {
                    if new_parent_id == target || self.has_ancestor(new_parent_id, target) {
                        // Would create a cycle; skip this subtree outright.
                        log::debug!("skipping reassignment of {target}: cycle");
                        continue;
                    }
                }
                if let Some(old_parent_id) = &old_parent_id {
                    if let Some(old_parent) = self.annotations.get_mut(old_parent_id) {
                        let mut now_empty = false;
                        if let Some(collection) = old_parent.annotation.geometry.collection_mut() {
                            collection.entries.retain(|e| e != target);
                            now_empty = collection.entries.is_empty();
                        }
                        self.segment_set(old_parent_id.clone());
                        if now_empty && emptied_ids.insert(old_parent_id.clone()) {
                            emptied.push(self.get_reference(old_parent_id));
                        }
                    }
                }
                self.unlink(&old_parent_id, target);
                self.annotations
                    .get_mut(target)
                    .expect("reassigned node")
                    .annotation
                    .parent_id = new_parent_id.clone();
                self.link_tail(new_parent_id.clone(), target);
                if let Some(new_parent_id) = new_parent_id {
                    if let Some(new_parent) = self.annotations.get_mut(new_parent_id) {
                        if let Some(collection) = new_parent.annotation.geometry.collection_mut() {
                            if !collection.entries.contains(target) {
                                collection.entries.push(target.clone());
                            }
                        }
                        self.segment_set(new_parent_id.clone());
                    }
                }
                let value = self.annotations[target].annotation.clone();
                self.rebind_reference(target, ReferenceValue::Live(value));
                self.record(AnnotationEvent::ChildUpdated(target.clone()));
            }
            // The subtree follows its root: reapply with the target itself
            // as surrogate parent.
            let children = self
                .annotations
                .get(target)
                .and_then(|node| node.annotation.geometry.collection())
                .map(|c| c.entries.clone())
                .unwrap_or_default();
            if !children.is_empty() {
                self.reassign_inner(&children, &Some(target.clone()), emptied, emptied_ids);
            }
        }
    }

    /// Recompute the derived segment union of a collection-like annotation
    /// from its children, deduplicated, preserving first-seen order.
    ///
    /// Must be called after any structural change to the node's entries; it
    /// is not kept in sync by a reactive mechanism.
    pub fn segment_set(&mut self, id: AnnotationId) {
        let Some(node) = self.annotations.get(&id) else {
            return;
        };
        let Some(collection) = node.annotation.geometry.collection() else {
            return;
        };
        let entries = collection.entries.clone();
        let mut seen: HashSet<u64> = HashSet::new();
        let mut segments: Vec<u64> = Vec::new();
        for entry in &entries {
            if let Some(child) = self.annotations.get(entry) {
                for &segment in &child.annotation.segments {
                    if seen.insert(segment) {
                        segments.push(segment);
                    }
                }
            }
        }
        self.annotations
            .get_mut(&id)
            .expect("segment_set node")
            .annotation
            .segments = segments;
    }

    // ========================================================================
    // Tags
    // ========================================================================

    /// Register a new tag and return its id.
    pub fn add_tag(&mut self, label: &str) -> u32 {
        let id = self.next_tag_id;
        self.next_tag_id += 1;
        self.tags.insert(id, AnnotationTag::new(id, label));
        self.record(AnnotationEvent::Changed);
        id
    }

    /// Remove a tag from the registry and from every annotation carrying it.
    pub fn delete_tag(&mut self, tag_id: u32) {
        if self.tags.remove(&tag_id).is_none() {
            return;
        }
        for node in self.annotations.values_mut() {
            node.annotation.tag_ids.remove(&tag_id);
        }
        self.record(AnnotationEvent::Changed);
    }

    /// Look up a tag.
    pub fn get_tag(&self, tag_id: u32) -> Option<&AnnotationTag> {
        self.tags.get(&tag_id)
    }

    /// All registered tags, in id order.
    pub fn tags(&self) -> impl Iterator<Item = &AnnotationTag> {
        self.tags.values()
    }

    /// Toggle a registered tag on the referenced annotation.
    pub fn toggle_annotation_tag(
        &mut self,
        reference: &AnnotationReference,
        tag_id: u32,
    ) -> Result<(), AnnotationError> {
        if !self.tags.contains_key(&tag_id) {
            return Ok(());
        }
        let id = reference.id();
        let node = self
            .annotations
            .get_mut(&id)
            .ok_or(AnnotationError::ReferenceDeleted { id: id.clone() })?;
        if !node.annotation.tag_ids.remove(&tag_id) {
            node.annotation.tag_ids.insert(tag_id);
        }
        let value = self.annotations[&id].annotation.clone();
        self.rebind_reference(&id, ReferenceValue::Live(value));
        self.record(AnnotationEvent::ChildUpdated(id));
        Ok(())
    }

    // ========================================================================
    // Snapshot
    // ========================================================================

    /// Serialize all committed annotations, in depth-first sibling order.
    ///
    /// Pending annotations and their subtrees are skipped, and entries lists
    /// are filtered to serialized ids, so a snapshot never references
    /// geometry that is still being drawn.
    pub fn to_json(&self) -> Value {
        let mut out = Vec::new();
        for id in self.ordered_ids() {
            if self.pending.contains(&id) || self.has_pending_ancestor(&id) {
                continue;
            }
            let annotation = &self.annotations[&id].annotation;
            let mut json = annotation.to_json();
            if let Some(entries) = json.get_mut("entries").and_then(Value::as_array_mut) {
                entries.retain(|e| {
                    e.as_str()
                        .map(|e| !self.pending.contains(e))
                        .unwrap_or(false)
                });
            }
            out.push(json);
        }
        Value::Array(out)
    }

    fn has_pending_ancestor(&self, id: &str) -> bool {
        let mut current = self
            .annotations
            .get(id)
            .and_then(|node| node.annotation.parent_id.clone());
        while let Some(parent_id) = current {
            if self.pending.contains(&parent_id) {
                return true;
            }
            current = self
                .annotations
                .get(&parent_id)
                .and_then(|node| node.annotation.parent_id.clone());
        }
        false
    }

    /// Serialize the tag registry.
    pub fn tags_to_json(&self) -> Value {
        serde_json::to_value(self.tags.values().collect::<Vec<_>>())
            .unwrap_or(Value::Array(Vec::new()))
    }

    /// Replace all store contents from serialized state.
    ///
    /// Clears existing state first. Nodes are rebuilt and linked in array
    /// order, so sibling order matches serialization order; outstanding
    /// references are rebound afterwards.
    pub fn restore_state(
        &mut self,
        annotations: &Value,
        tags: &Value,
    ) -> Result<(), AnnotationError> {
        self.clear();
        self.tags.clear();
        self.next_tag_id = 1;

        if !tags.is_null() {
            let restored: Vec<AnnotationTag> = serde_json::from_value(tags.clone())?;
            for tag in restored {
                self.next_tag_id = self.next_tag_id.max(tag.id + 1);
                self.tags.insert(tag.id, tag);
            }
        }

        let list = annotations
            .as_array()
            .ok_or_else(|| AnnotationError::invalid_json("annotations must be an array"))?;
        // Pass 1: insert and link in array order.
        for value in list {
            let annotation = Annotation::from_json(value)?;
            let id = annotation.id.clone();
            if self.annotations.contains_key(&id) {
                return Err(AnnotationError::DuplicateId { id });
            }
            let parent_id = annotation.parent_id.clone();
            self.annotations.insert(
                id.clone(),
                AnnotationNode {
                    annotation,
                    prev: id.clone(),
                    next: id.clone(),
                },
            );
            self.link_tail(parent_id, &id);
        }
        // Pass 2: rebind outstanding references.
        let ids: Vec<AnnotationId> = self.references.borrow().keys().cloned().collect();
        for id in ids {
            let value = match self.annotations.get(&id) {
                Some(node) => ReferenceValue::Live(node.annotation.clone()),
                None => ReferenceValue::Deleted,
            };
            self.rebind_reference(&id, value);
        }
        log::debug!("restored {} annotations", self.annotations.len());
        self.record(AnnotationEvent::Changed);
        Ok(())
    }

    /// Delete all annotations, leaving the tag registry intact.
    pub fn clear(&mut self) {
        let ids: Vec<AnnotationId> = self.annotations.keys().cloned().collect();
        for id in &ids {
            self.rebind_reference(id, ReferenceValue::Deleted);
        }
        self.annotations.clear();
        self.last_per_parent.clear();
        self.pending.clear();
        if !ids.is_empty() {
            self.record(AnnotationEvent::Changed);
        }
    }

    /// Delete all annotations and tags.
    pub fn reset(&mut self) {
        self.clear();
        self.tags.clear();
        self.next_tag_id = 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CollectionState, Geometry};

    fn init_logs() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn point(id: &str, p: &[f32]) -> Annotation {
        Annotation::new(id.to_string(), Geometry::Point { point: p.to_vec() })
    }

    fn collection(id: &str, source: &[f32]) -> Annotation {
        Annotation::new(
            id.to_string(),
            Geometry::Collection(CollectionState {
                source: source.to_vec(),
                children_visible: true,
                ..Default::default()
            }),
        )
    }

    #[test]
    fn test_add_and_get_reference() {
        init_logs();
        let mut source = AnnotationSource::new();
        let mut a = point("p1", &[1.0, 2.0, 3.0]);
        a.segments = vec![5];
        let reference = source.add(a.clone(), true, None).unwrap();
        assert_eq!(reference.annotation().unwrap(), a);
        assert!(!source.is_pending("p1"));
        // References are deduplicated per id.
        let other = source.get_reference("p1");
        assert!(Rc::ptr_eq(&reference.slot, &other.slot));
    }

    #[test]
    fn test_add_assigns_id_and_rejects_duplicates() {
        let mut source = AnnotationSource::new();
        let reference = source.add(point("", &[0.0]), true, None).unwrap();
        assert_eq!(reference.id().len(), 40);
        let err = source.add(point(&reference.id(), &[0.0]), true, None);
        assert!(matches!(err, Err(AnnotationError::DuplicateId { .. })));
    }

    #[test]
    fn test_sibling_order_preserved() {
        let mut source = AnnotationSource::new();
        for id in ["a", "b", "c"] {
            source.add(point(id, &[0.0]), true, None).unwrap();
        }
        assert_eq!(source.root_ids(), vec!["a", "b", "c"]);
        let b = source.get_reference("b");
        source.delete(&b, false);
        assert_eq!(source.root_ids(), vec!["a", "c"]);
        source.add(point("d", &[0.0]), true, None).unwrap();
        assert_eq!(source.root_ids(), vec!["a", "c", "d"]);
    }

    #[test]
    fn test_parent_entries_invariant() {
        let mut source = AnnotationSource::new();
        let parent = source.add(collection("c", &[0.0]), true, None).unwrap();
        source.add(point("p1", &[0.0]), true, Some(&parent)).unwrap();
        source.add(point("p2", &[1.0]), true, Some(&parent)).unwrap();
        let c = source.get("c").unwrap();
        assert_eq!(c.geometry.collection().unwrap().entries, vec!["p1", "p2"]);
        assert_eq!(source.get("p1").unwrap().parent_id.as_deref(), Some("c"));
    }

    #[test]
    fn test_add_all_preserves_order_and_stops_on_duplicate() {
        let mut source = AnnotationSource::new();
        let references = source
            .add_all(
                vec![point("a", &[0.0]), point("b", &[1.0]), point("c", &[2.0])],
                true,
            )
            .unwrap();
        assert_eq!(references.len(), 3);
        assert_eq!(source.root_ids(), vec!["a", "b", "c"]);

        // A duplicate id fails the bulk add at the offending element;
        // elements added before it stay.
        let err = source.add_all(vec![point("d", &[3.0]), point("b", &[0.0])], true);
        assert!(matches!(err, Err(AnnotationError::DuplicateId { .. })));
        assert_eq!(source.root_ids(), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_commit_is_idempotent() {
        let mut source = AnnotationSource::new();
        let reference = source.add(point("p", &[0.0]), false, None).unwrap();
        assert!(source.is_pending("p"));
        source.commit(&reference);
        assert!(!source.is_pending("p"));
        let events_after_first = source.take_events();
        assert!(!events_after_first.is_empty());
        source.commit(&reference);
        assert!(source.take_events().is_empty());
        assert!(!source.is_pending("p"));
    }

    #[test]
    fn test_update_rejects_deleted_reference() {
        let mut source = AnnotationSource::new();
        let reference = source.add(point("p", &[0.0]), true, None).unwrap();
        source.delete(&reference, false);
        assert!(reference.is_deleted());
        let err = source.update(&reference, point("p", &[1.0]));
        assert!(matches!(err, Err(AnnotationError::ReferenceDeleted { .. })));
    }

    #[test]
    fn test_update_preserves_linkage() {
        let mut source = AnnotationSource::new();
        let parent = source.add(collection("c", &[0.0]), true, None).unwrap();
        let child = source.add(point("p", &[0.0]), true, Some(&parent)).unwrap();
        let mut updated = point("p", &[9.0]);
        updated.parent_id = Some("elsewhere".to_string());
        source.update(&child, updated).unwrap();
        assert_eq!(source.get("p").unwrap().parent_id.as_deref(), Some("c"));
        if let Geometry::Point { point } = &source.get("p").unwrap().geometry {
            assert_eq!(point, &vec![9.0]);
        } else {
            panic!("expected point");
        }
    }

    #[test]
    fn test_derived_segments_on_delete() {
        let mut source = AnnotationSource::new();
        let parent = source.add(collection("c", &[0.0]), true, None).unwrap();
        let mut e1 = point("e1", &[0.0]);
        e1.segments = vec![1, 2];
        let mut e2 = point("e2", &[1.0]);
        e2.segments = vec![2, 3];
        let e1 = source.add(e1, true, Some(&parent)).unwrap();
        source.add(e2, true, Some(&parent)).unwrap();
        assert_eq!(source.get("c").unwrap().segments, vec![1, 2, 3]);
        source.delete(&e1, false);
        assert_eq!(source.get("c").unwrap().segments, vec![2, 3]);
        let c = source.get("c").unwrap();
        assert_eq!(c.geometry.collection().unwrap().entries, vec!["e2"]);
    }

    #[test]
    fn test_delete_orphans_children_to_grandparent() {
        let mut source = AnnotationSource::new();
        let outer = source.add(collection("outer", &[0.0]), true, None).unwrap();
        let inner = source
            .add(collection("inner", &[0.0]), true, Some(&outer))
            .unwrap();
        source.add(point("p", &[0.0]), true, Some(&inner)).unwrap();
        source.delete(&inner, false);
        assert!(source.get("inner").is_none());
        assert_eq!(source.get("p").unwrap().parent_id.as_deref(), Some("outer"));
        let outer = source.get("outer").unwrap();
        assert_eq!(outer.geometry.collection().unwrap().entries, vec!["p"]);
    }

    #[test]
    fn test_delete_flush_cascades() {
        init_logs();
        let mut source = AnnotationSource::new();
        let outer = source.add(collection("outer", &[0.0]), true, None).unwrap();
        let inner = source
            .add(collection("inner", &[0.0]), true, Some(&outer))
            .unwrap();
        source.add(point("p", &[0.0]), true, Some(&inner)).unwrap();
        source.delete(&outer, true);
        assert!(source.is_empty());
    }

    #[test]
    fn test_delete_last_child_collects_empty_parent() {
        let mut source = AnnotationSource::new();
        let parent = source.add(collection("c", &[0.0]), true, None).unwrap();
        let child = source.add(point("p", &[0.0]), true, Some(&parent)).unwrap();
        source.delete(&child, false);
        // The now-empty committed parent is garbage-collected too.
        assert!(source.get("c").is_none());
        assert!(parent.is_deleted());
    }

    #[test]
    fn test_pending_parent_not_collected() {
        let mut source = AnnotationSource::new();
        let parent = source.add(collection("c", &[0.0]), false, None).unwrap();
        let child = source.add(point("p", &[0.0]), true, Some(&parent)).unwrap();
        source.delete(&child, false);
        assert!(source.get("c").is_some());
    }

    #[test]
    fn test_child_reassignment_moves_subtree() {
        let mut source = AnnotationSource::new();
        let a = source.add(collection("a", &[0.0]), true, None).unwrap();
        let b = source.add(collection("b", &[0.0]), true, None).unwrap();
        source.add(point("p", &[0.0]), true, Some(&a)).unwrap();
        let emptied = source.child_reassignment(&["p".to_string()], Some(&b));
        assert_eq!(source.get("p").unwrap().parent_id.as_deref(), Some("b"));
        assert_eq!(
            source.get("b").unwrap().geometry.collection().unwrap().entries,
            vec!["p"]
        );
        assert!(source
            .get("a")
            .unwrap()
            .geometry
            .collection()
            .unwrap()
            .entries
            .is_empty());
        assert_eq!(emptied.len(), 1);
        assert_eq!(emptied[0].id(), "a");
    }

    #[test]
    fn test_child_reassignment_refuses_cycle() {
        let mut source = AnnotationSource::new();
        let a = source.add(collection("a", &[0.0]), true, None).unwrap();
        let b = source.add(collection("b", &[0.0]), true, Some(&a)).unwrap();
        // A is an ancestor of B; moving A under B must be skipped.
        let emptied = source.child_reassignment(&["a".to_string()], Some(&b));
        assert!(emptied.is_empty());
        assert_eq!(source.get("a").unwrap().parent_id, None);
        assert_eq!(source.get("b").unwrap().parent_id.as_deref(), Some("a"));
    }

    #[test]
    fn test_event_order() {
        let mut source = AnnotationSource::new();
        source.add(point("p", &[0.0]), true, None).unwrap();
        let events = source.take_events();
        assert_eq!(
            events,
            vec![
                AnnotationEvent::ChildAdded("p".to_string()),
                AnnotationEvent::Changed
            ]
        );
    }

    #[test]
    fn test_json_round_trip_excludes_pending() {
        let mut source = AnnotationSource::new();
        let tag = source.add_tag("dendrite");
        let parent = source.add(collection("c", &[0.0, 0.0]), true, None).unwrap();
        let mut p1 = point("p1", &[1.0, 2.0]);
        p1.tag_ids.insert(tag);
        p1.segments = vec![7];
        source.add(p1, true, Some(&parent)).unwrap();
        source.add(point("draft", &[0.0, 0.0]), false, None).unwrap();

        let annotations_json = source.to_json();
        let tags_json = source.tags_to_json();
        assert_eq!(annotations_json.as_array().unwrap().len(), 2);

        let mut restored = AnnotationSource::new();
        restored.restore_state(&annotations_json, &tags_json).unwrap();
        assert_eq!(restored.to_json(), annotations_json);
        assert_eq!(restored.tags_to_json(), tags_json);
        assert_eq!(restored.root_ids(), vec!["c"]);
        assert_eq!(restored.get_tag(tag).unwrap().label, "dendrite");
        assert!(restored.get("draft").is_none());
    }

    #[test]
    fn test_restore_rebinds_references() {
        let mut source = AnnotationSource::new();
        source.add(point("p", &[1.0]), true, None).unwrap();
        let snapshot = source.to_json();
        let reference = source.get_reference("p");

        source.restore_state(&Value::Array(Vec::new()), &Value::Null).unwrap();
        assert!(reference.is_deleted());
        source.restore_state(&snapshot, &Value::Null).unwrap();
        assert!(reference.annotation().is_some());
    }

    #[test]
    fn test_toggle_annotation_tag() {
        let mut source = AnnotationSource::new();
        let tag = source.add_tag("review");
        let reference = source.add(point("p", &[0.0]), true, None).unwrap();
        source.toggle_annotation_tag(&reference, tag).unwrap();
        assert!(source.get("p").unwrap().tag_ids.contains(&tag));
        source.toggle_annotation_tag(&reference, tag).unwrap();
        assert!(!source.get("p").unwrap().tag_ids.contains(&tag));
        source.delete_tag(tag);
        assert!(source.get_tag(tag).is_none());
    }
}
