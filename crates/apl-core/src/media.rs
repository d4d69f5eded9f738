#![forbid(unsafe_code)]

//! Media resource tracking.
//!
//! [`MediaManager`] is the seam between the engine and the host's resource
//! loader. [`CoreMediaManager`] is the default implementation:
//!
//! - requests are deduplicated by exact URL: while any handle to a URL is
//!   alive, `request` returns that same shared [`MediaObject`];
//! - newly seen URLs are batched and flushed as one `MediaRequest` event per
//!   media type by `process_media_requests`, so N components mounted in the
//!   same frame cost the host one event, not N;
//! - `media_load_complete` moves an object from Pending to Ready or Error and
//!   fires its callbacks once;
//! - the manager holds only weak tracking entries. Dropping the last handle
//!   evicts the entry immediately, and a late completion for an evicted URL
//!   is ignored.
//!
//! # Threading
//!
//! The default manager is single-threaded (`Rc`/`RefCell`). A host sharing a
//! manager across rendering surfaces on several threads must supply its own
//! thread-safe implementation of the trait.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use serde_json::Value;

use crate::event::{Event, EventProperty, EventQueue, EventType};
use crate::headers::{HeaderRule, filter_headers};

/// Kind of media being fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaType {
    Image,
    VectorGraphic,
    Video,
}

impl MediaType {
    pub const fn name(self) -> &'static str {
        match self {
            MediaType::Image => "Image",
            MediaType::VectorGraphic => "VectorGraphic",
            MediaType::Video => "Video",
        }
    }
}

/// Load state of a tracked object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaState {
    Pending,
    Ready,
    Error,
}

/// Identifier returned by [`MediaObject::add_callback`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallbackId(u32);

type Callback = Box<dyn FnMut(&MediaObject)>;

struct ObjectState {
    state: MediaState,
    error_code: i32,
    error_description: String,
    callbacks: Vec<(CallbackId, Callback)>,
    next_callback: u32,
}

/// Shared tracked state of one media URL.
pub struct MediaObject {
    url: String,
    kind: MediaType,
    headers: Vec<String>,
    inner: RefCell<ObjectState>,
    registry: Weak<RefCell<Registry>>,
}

/// Shared handle; the object lives as long as its last handle.
pub type MediaObjectPtr = Rc<MediaObject>;

impl MediaObject {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn media_type(&self) -> MediaType {
        self.kind
    }

    /// Normalised, filtered request headers.
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn state(&self) -> MediaState {
        self.inner.borrow().state
    }

    pub fn error_code(&self) -> i32 {
        self.inner.borrow().error_code
    }

    pub fn error_description(&self) -> String {
        self.inner.borrow().error_description.clone()
    }

    /// Register a callback fired once when the object leaves Pending.
    ///
    /// Returns `None` (and drops the callback) if the object already settled.
    pub fn add_callback(&self, callback: impl FnMut(&MediaObject) + 'static) -> Option<CallbackId> {
        let mut inner = self.inner.borrow_mut();
        if inner.state != MediaState::Pending {
            return None;
        }
        let id = CallbackId(inner.next_callback);
        inner.next_callback += 1;
        inner.callbacks.push((id, Box::new(callback)));
        Some(id)
    }

    /// Remove a previously registered callback.
    pub fn remove_callback(&self, id: CallbackId) {
        self.inner.borrow_mut().callbacks.retain(|(cb, _)| *cb != id);
    }

    fn settle(&self, state: MediaState, error_code: i32, error_description: &str) {
        let callbacks = {
            let mut inner = self.inner.borrow_mut();
            inner.state = state;
            inner.error_code = error_code;
            inner.error_description = error_description.to_owned();
            std::mem::take(&mut inner.callbacks)
        };
        for (_, mut callback) in callbacks {
            callback(self);
        }
    }
}

impl fmt::Debug for MediaObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaObject")
            .field("url", &self.url)
            .field("kind", &self.kind)
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for MediaObject {
    fn drop(&mut self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        // If the registry is busy the dead entry is purged on its next pass.
        if let Ok(mut registry) = registry.try_borrow_mut() {
            if registry.objects.get(&self.url).is_some_and(|w| w.strong_count() == 0) {
                registry.objects.remove(&self.url);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

/// Engine-facing media loader interface.
pub trait MediaManager {
    /// Track `url`, returning the shared object for it.
    fn request(&self, url: &str, kind: MediaType, headers: &[String]) -> MediaObjectPtr;

    /// Flush newly requested URLs to the host as `MediaRequest` events.
    fn process_media_requests(&self, events: &mut EventQueue);

    /// Host report that `url` finished loading (`ready`) or failed.
    fn media_load_complete(&self, url: &str, ready: bool, error_code: i32, error_reason: &str);
}

#[derive(Default)]
struct Registry {
    objects: HashMap<String, Weak<MediaObject>>,
    unsent: Vec<Weak<MediaObject>>,
}

impl Registry {
    fn purge(&mut self) {
        self.objects.retain(|_, w| w.strong_count() > 0);
        self.unsent.retain(|w| w.strong_count() > 0);
    }
}

/// Default deduplicating media manager.
#[derive(Clone)]
pub struct CoreMediaManager {
    registry: Rc<RefCell<Registry>>,
    header_rules: Rc<Vec<HeaderRule>>,
}

impl Default for CoreMediaManager {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl fmt::Debug for CoreMediaManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoreMediaManager")
            .field("tracked", &self.object_map_size())
            .field("unsent", &self.pending_size())
            .field("header_rules", &self.header_rules.len())
            .finish()
    }
}

impl CoreMediaManager {
    /// Create a manager that filters request headers through `header_rules`.
    pub fn new(header_rules: Vec<HeaderRule>) -> Self {
        Self {
            registry: Rc::new(RefCell::new(Registry::default())),
            header_rules: Rc::new(header_rules),
        }
    }

    /// Number of live tracked URLs.
    pub fn object_map_size(&self) -> usize {
        let mut registry = self.registry.borrow_mut();
        registry.purge();
        registry.objects.len()
    }

    /// Number of live objects waiting to be sent to the host.
    pub fn pending_size(&self) -> usize {
        let mut registry = self.registry.borrow_mut();
        registry.purge();
        registry.unsent.len()
    }
}

impl MediaManager for CoreMediaManager {
    fn request(&self, url: &str, kind: MediaType, headers: &[String]) -> MediaObjectPtr {
        let mut registry = self.registry.borrow_mut();
        if let Some(existing) = registry.objects.get(url).and_then(Weak::upgrade) {
            return existing;
        }
        let object = Rc::new(MediaObject {
            url: url.to_owned(),
            kind,
            headers: filter_headers(headers, &self.header_rules),
            inner: RefCell::new(ObjectState {
                state: MediaState::Pending,
                error_code: 0,
                error_description: String::new(),
                callbacks: Vec::new(),
                next_callback: 1,
            }),
            registry: Rc::downgrade(&self.registry),
        });
        registry.objects.insert(url.to_owned(), Rc::downgrade(&object));
        registry.unsent.push(Rc::downgrade(&object));
        object
    }

    fn process_media_requests(&self, events: &mut EventQueue) {
        let batch: Vec<MediaObjectPtr> = {
            let mut registry = self.registry.borrow_mut();
            std::mem::take(&mut registry.unsent)
                .iter()
                .filter_map(Weak::upgrade)
                .collect()
        };
        if batch.is_empty() {
            return;
        }
        crate::debug!(count = batch.len(), "flushing media requests");

        let mut order: Vec<MediaType> = Vec::new();
        for object in &batch {
            if !order.contains(&object.kind) {
                order.push(object.kind);
            }
        }
        for kind in order {
            let (sources, headers): (Vec<Value>, Vec<Value>) = batch
                .iter()
                .filter(|o| o.kind == kind)
                .map(|o| {
                    (
                        Value::String(o.url.clone()),
                        Value::Array(o.headers.iter().cloned().map(Value::String).collect()),
                    )
                })
                .unzip();
            events.push(
                Event::new(EventType::MediaRequest)
                    .with(EventProperty::MediaType, Value::String(kind.name().to_owned()))
                    .with(EventProperty::Source, Value::Array(sources))
                    .with(EventProperty::Headers, Value::Array(headers)),
            );
        }
    }

    fn media_load_complete(&self, url: &str, ready: bool, error_code: i32, error_reason: &str) {
        let object = self.registry.borrow().objects.get(url).and_then(Weak::upgrade);
        let Some(object) = object else {
            crate::trace!(url = %url, "load completion for untracked media ignored");
            return;
        };
        if object.state() != MediaState::Pending {
            return;
        }
        let state = if ready {
            MediaState::Ready
        } else {
            MediaState::Error
        };
        object.settle(state, error_code, error_reason);
    }
}
