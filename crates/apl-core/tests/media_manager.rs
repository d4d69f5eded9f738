//! Dedup, batching and reference-lifecycle tests for the default media manager.

use std::cell::RefCell;
use std::rc::Rc;

use apl_core::event::{EventProperty, EventQueue, EventType};
use apl_core::media::{CoreMediaManager, MediaManager, MediaState, MediaType};
use serde_json::json;

const URLS: [&str; 5] = ["test1", "test2", "test3", "test4", "test5"];

#[test]
fn dedup_by_url_shares_state() {
    let manager = CoreMediaManager::default();
    let a = manager.request("same", MediaType::Image, &[]);
    let b = manager.request("same", MediaType::Image, &[]);
    assert!(Rc::ptr_eq(&a, &b));
    assert_eq!(manager.object_map_size(), 1);
    assert_eq!(manager.pending_size(), 1);

    manager.media_load_complete("same", true, 0, "");
    assert_eq!(b.state(), MediaState::Ready);
}

#[test]
fn one_event_per_batch_with_only_new_urls() {
    let manager = CoreMediaManager::default();
    let mut events = EventQueue::new();

    let first: Vec<_> = URLS
        .iter()
        .map(|u| manager.request(u, MediaType::Image, &[]))
        .collect();
    assert_eq!(manager.pending_size(), 5);
    assert_eq!(manager.object_map_size(), 5);

    manager.process_media_requests(&mut events);
    assert_eq!(manager.pending_size(), 0);
    assert_eq!(events.len(), 1);
    let event = events.pop();
    assert_eq!(event.kind(), EventType::MediaRequest);
    assert_eq!(event.value(EventProperty::MediaType), Some(&json!("Image")));
    assert_eq!(event.value(EventProperty::Source), Some(&json!(URLS)));

    // Nothing new: no event.
    manager.process_media_requests(&mut events);
    assert!(events.is_empty());
    drop(first);
}

#[test]
fn batches_are_partitioned_by_media_type() {
    let manager = CoreMediaManager::default();
    let mut events = EventQueue::new();
    let _a = manager.request("a.png", MediaType::Image, &[]);
    let _b = manager.request("b.json", MediaType::VectorGraphic, &[]);
    let _c = manager.request("c.png", MediaType::Image, &[]);
    manager.process_media_requests(&mut events);

    assert_eq!(events.len(), 2);
    let images = events.pop();
    assert_eq!(images.value(EventProperty::Source), Some(&json!(["a.png", "c.png"])));
    let graphics = events.pop();
    assert_eq!(graphics.value(EventProperty::MediaType), Some(&json!("VectorGraphic")));
}

#[test]
fn dropped_handles_are_evicted_and_late_loads_ignored() {
    let manager = CoreMediaManager::default();
    let mut events = EventQueue::new();

    let mut objects: Vec<_> = URLS
        .iter()
        .map(|u| manager.request(u, MediaType::Image, &[]))
        .collect();
    manager.process_media_requests(&mut events);

    let counter = Rc::new(RefCell::new(0));
    for object in &objects {
        let counter = Rc::clone(&counter);
        object
            .add_callback(move |_| *counter.borrow_mut() += 1)
            .expect("pending");
    }

    // Drop test4 and test5.
    objects.truncate(3);
    assert_eq!(manager.object_map_size(), 3);

    manager.media_load_complete("test1", true, 0, "");
    manager.media_load_complete("test4", true, 0, "");
    manager.media_load_complete("test5", false, 500, "boom");
    assert_eq!(*counter.borrow(), 1);
    assert_eq!(objects[0].state(), MediaState::Ready);

    // Requesting everything again only creates the two evicted entries.
    let again: Vec<_> = URLS
        .iter()
        .map(|u| manager.request(u, MediaType::Image, &[]))
        .collect();
    assert_eq!(manager.object_map_size(), 5);
    assert_eq!(manager.pending_size(), 2);
    assert_eq!(again[0].state(), MediaState::Ready);

    // A load for test3 reaches both the old and the new handle, which are the same object.
    let seen = Rc::new(RefCell::new(0));
    let sink = Rc::clone(&seen);
    again[2]
        .add_callback(move |o| {
            assert_eq!(o.url(), "test3");
            *sink.borrow_mut() += 1;
        })
        .expect("still pending");
    manager.media_load_complete("test3", true, 0, "");
    assert_eq!(*seen.borrow(), 1);
    assert_eq!(*counter.borrow(), 2);
    assert_eq!(objects[2].state(), MediaState::Ready);
}

#[test]
fn failure_records_code_and_reason() {
    let manager = CoreMediaManager::default();
    let object = manager.request("bad", MediaType::Video, &[]);
    manager.media_load_complete("bad", false, 404, "Not found");
    assert_eq!(object.state(), MediaState::Error);
    assert_eq!(object.error_code(), 404);
    assert_eq!(object.error_description(), "Not found");
}
