//! Fixed-capacity, identifier-indexed holding area for capture records.
//!
//! A ring of slots plus a side index gives O(1) insert and eviction: age is
//! implicit in ring position, so no per-record timers or ordered maps are
//! needed. Once evicted, an id may be reused by an unrelated future record.

use std::collections::HashMap;
use std::sync::Mutex;

use super::llm::LlmMetadata;
use super::record::{BodyKind, CaptureRecord, CapturedResponse, ListFilter};
use super::tags::FlowTags;

struct Slots {
    ring: Vec<Option<CaptureRecord>>,
    index: HashMap<String, usize>,
    cursor: usize,
}

/// Shared capture table. All operations are atomic at the level of a single
/// record; the cursor advance and index mutation on insert happen under one
/// lock so two exchanges can never claim the same slot.
pub struct CaptureStore {
    inner: Mutex<Slots>,
    capacity: usize,
}

impl CaptureStore {
    /// Capacity is fixed at construction and not resizable at runtime.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "capacity must be greater than 0");
        Self {
            inner: Mutex::new(Slots {
                ring: (0..capacity).map(|_| None).collect(),
                index: HashMap::with_capacity(capacity),
                cursor: 0,
            }),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Store a request-only record, evicting whatever occupied the slot.
    pub fn insert(&self, record: CaptureRecord) {
        let mut slots = self.inner.lock().unwrap();
        let cursor = slots.cursor;
        if let Some(old) = slots.ring[cursor].take() {
            slots.index.remove(&old.id);
        }
        slots.index.insert(record.id.clone(), cursor);
        slots.ring[cursor] = Some(record);
        slots.cursor = (cursor + 1) % self.capacity;
    }

    /// Fill in the request body fields once the inbound body has fully
    /// streamed. The record itself is created on arrival, before any body
    /// bytes exist to describe.
    pub fn update_request_body(
        &self,
        id: &str,
        body_bytes: u64,
        body_preview: Option<String>,
        encoding: Option<BodyKind>,
    ) {
        let mut slots = self.inner.lock().unwrap();
        if let Some(&slot) = slots.index.get(id) {
            if let Some(record) = slots.ring[slot].as_mut() {
                record.request.body_bytes = body_bytes;
                record.request.body_preview = body_preview;
                record.request.encoding = encoding;
            }
        }
    }

    /// Attach the response to an in-flight record. Silently ignored when the
    /// id was already evicted; that is the race between a slow upstream and
    /// store pressure, not an error.
    pub fn attach_response(&self, id: &str, response: CapturedResponse) {
        let mut slots = self.inner.lock().unwrap();
        if let Some(&slot) = slots.index.get(id) {
            if let Some(record) = slots.ring[slot].as_mut() {
                record.response = Some(response);
            }
        }
    }

    /// Post-response enrichment: LLM metadata and flow tags. Same eviction
    /// semantics as [`attach_response`](Self::attach_response).
    pub fn enrich(&self, id: &str, llm: Option<LlmMetadata>, tags: FlowTags) {
        let mut slots = self.inner.lock().unwrap();
        if let Some(&slot) = slots.index.get(id) {
            if let Some(record) = slots.ring[slot].as_mut() {
                record.llm = llm;
                record.session_id = tags.session_id;
                record.correlation_id = tags.correlation_id;
                record.user_id = tags.user_id;
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<CaptureRecord> {
        let slots = self.inner.lock().unwrap();
        let &slot = slots.index.get(id)?;
        slots.ring[slot].clone()
    }

    /// All currently-held records matching the filter, newest first.
    pub fn list(&self, filter: &ListFilter) -> Vec<CaptureRecord> {
        let slots = self.inner.lock().unwrap();
        let mut records: Vec<CaptureRecord> = slots
            .ring
            .iter()
            .flatten()
            .filter(|r| r.matches(filter))
            .cloned()
            .collect();
        records.sort_by(|a, b| b.request.ts.cmp(&a.request.ts));
        records
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
