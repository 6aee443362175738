//! Publish and delivery: ids, envelopes, fan-out, consumer groups, batches.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use interlink::bus::{BatchEvent, EventBus, InMemoryStreams, PublishOptions};
use serde_json::json;

use crate::support::{count, fast_config, recorder, wait_until, WAIT};

#[test]
fn order_created_reaches_billing() {
    let streams = InMemoryStreams::new();
    let orders = EventBus::in_memory("orders", fast_config(), &streams);
    let billing = EventBus::in_memory("billing", fast_config(), &streams);

    let (seen, handler) = recorder();
    billing.subscribe("order.created", handler).unwrap();

    let id = orders
        .publish(
            "order.created",
            json!({ "orderId": "A1", "total": 42 }),
            PublishOptions::new().with_correlation_id("req-42"),
        )
        .unwrap();

    assert!(wait_until(WAIT, || count(&seen) == 1));
    let event = seen.lock().unwrap()[0].clone();
    assert_eq!(event.id(), id);
    assert_eq!(event.event_type(), "order.created");
    assert_eq!(event.source(), "orders");
    assert_eq!(event.payload(), &json!({ "orderId": "A1", "total": 42 }));
    assert_eq!(event.correlation_id(), Some("req-42"));
    assert!(event.published_at().is_some());

    assert!(wait_until(WAIT, || billing.stats().acknowledged == 1));
    assert_eq!(billing.pending_count("order.created"), 0);

    orders.close().unwrap();
    billing.close().unwrap();
}

#[test]
fn published_entry_is_stored_under_prefixed_stream() {
    let streams = InMemoryStreams::new();
    let bus = EventBus::in_memory("orders", fast_config(), &streams);

    let id = bus
        .publish(
            "order.shipped",
            json!({ "orderId": "A1" }),
            PublishOptions::new().with_metadata("tenant", "acme"),
        )
        .unwrap();

    let stored = streams.events("events:order.shipped");
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id(), id);
    assert_eq!(stored[0].metadata_value("tenant"), Some("acme"));

    let raw: serde_json::Value =
        serde_json::from_str(&streams.bodies("events:order.shipped")[0]).unwrap();
    assert_eq!(raw["type"], "order.shipped");
    assert_eq!(raw["source"], "orders");
    assert!(raw.get("correlationId").is_none());
}

#[test]
fn every_handler_for_a_type_runs() {
    let streams = InMemoryStreams::new();
    let bus = EventBus::in_memory("billing", fast_config(), &streams);

    let (first, first_handler) = recorder();
    let (second, second_handler) = recorder();
    bus.subscribe("invoice.issued", first_handler).unwrap();
    bus.subscribe("invoice.issued", second_handler).unwrap();

    bus.publish("invoice.issued", json!({ "n": 1 }), PublishOptions::new())
        .unwrap();

    assert!(wait_until(WAIT, || count(&first) == 1 && count(&second) == 1));
    assert!(wait_until(WAIT, || bus.stats().acknowledged == 1));
    assert_eq!(count(&first), 1);
    assert_eq!(count(&second), 1);
    bus.close().unwrap();
}

#[test]
fn each_service_gets_its_own_copy() {
    let streams = InMemoryStreams::new();
    let orders = EventBus::in_memory("orders", fast_config(), &streams);
    let billing = EventBus::in_memory("billing", fast_config(), &streams);
    let shipping = EventBus::in_memory("shipping", fast_config(), &streams);

    let (billed, bill) = recorder();
    let (shipped, ship) = recorder();
    billing.subscribe("order.created", bill).unwrap();
    shipping.subscribe("order.created", ship).unwrap();

    for n in 0..3 {
        orders
            .publish("order.created", json!({ "n": n }), PublishOptions::new())
            .unwrap();
    }

    assert!(wait_until(WAIT, || count(&billed) == 3 && count(&shipped) == 3));
    assert_eq!(
        streams.bodies("events:order.created").len(),
        3,
        "the log holds each event once"
    );
}

#[test]
fn instances_of_one_service_share_deliveries() {
    let streams = InMemoryStreams::new();
    let publisher = EventBus::in_memory("orders", fast_config(), &streams);
    let first = EventBus::in_memory("billing", fast_config(), &streams);
    let second = EventBus::in_memory("billing", fast_config(), &streams);
    assert_ne!(first.consumer_name(), second.consumer_name());

    let (seen, handler) = recorder();
    let (seen_too, handler_too) = recorder();
    first.subscribe("order.created", handler).unwrap();
    second.subscribe("order.created", handler_too).unwrap();

    for n in 0..20 {
        publisher
            .publish("order.created", json!({ "n": n }), PublishOptions::new())
            .unwrap();
    }

    assert!(wait_until(WAIT, || count(&seen) + count(&seen_too) == 20));

    let mut ids = HashSet::new();
    for event in seen.lock().unwrap().iter().chain(seen_too.lock().unwrap().iter()) {
        assert!(ids.insert(event.id().to_string()), "duplicate delivery");
    }
    assert_eq!(ids.len(), 20);
}

#[test]
fn batch_returns_one_id_per_event() {
    let streams = InMemoryStreams::new();
    let orders = EventBus::in_memory("orders", fast_config(), &streams);
    let audit = EventBus::in_memory("audit", fast_config(), &streams);

    let (created, on_created) = recorder();
    let (paid, on_paid) = recorder();
    audit.subscribe("order.created", on_created).unwrap();
    audit.subscribe("order.paid", on_paid).unwrap();

    let ids = orders
        .publish_batch(vec![
            BatchEvent::new("order.created", json!({ "orderId": "A1" })),
            BatchEvent::new("order.created", json!({ "orderId": "A2" })),
            BatchEvent::new("order.paid", json!({ "orderId": "A1" }))
                .with_options(PublishOptions::new().with_correlation_id("pay-1")),
        ])
        .unwrap();

    assert_eq!(ids.len(), 3);
    assert_eq!(ids.iter().collect::<HashSet<_>>().len(), 3);

    assert!(wait_until(WAIT, || count(&created) == 2 && count(&paid) == 1));

    let delivered: HashSet<String> = created
        .lock()
        .unwrap()
        .iter()
        .chain(paid.lock().unwrap().iter())
        .map(|e| e.id().to_string())
        .collect();
    assert_eq!(delivered, ids.into_iter().collect::<HashSet<String>>());
    assert_eq!(paid.lock().unwrap()[0].correlation_id(), Some("pay-1"));
}

#[test]
fn ids_are_unique() {
    let streams = InMemoryStreams::new();
    let bus = EventBus::in_memory("orders", fast_config(), &streams);

    let ids: HashSet<String> = (0..200)
        .map(|n| {
            bus.publish("order.created", json!({ "n": n }), PublishOptions::new())
                .unwrap()
        })
        .collect();
    assert_eq!(ids.len(), 200);
}

#[test]
fn events_published_before_subscribing_are_delivered() {
    let streams = InMemoryStreams::new();
    let orders = EventBus::in_memory("orders", fast_config(), &streams);
    orders
        .publish("order.created", json!({ "orderId": "early" }), PublishOptions::new())
        .unwrap();

    let billing = EventBus::in_memory("billing", fast_config(), &streams);
    let (seen, handler) = recorder();
    billing.subscribe("order.created", handler).unwrap();

    assert!(wait_until(WAIT, || count(&seen) == 1));
    assert_eq!(seen.lock().unwrap()[0].payload()["orderId"], "early");
}

#[test]
fn stream_is_trimmed_to_max_len() {
    let streams = InMemoryStreams::new();
    let bus = EventBus::in_memory("metrics", fast_config().with_max_len(5), &streams);

    for n in 0..12 {
        bus.publish("sample.taken", json!({ "n": n }), PublishOptions::new())
            .unwrap();
    }

    let retained = streams.events("events:sample.taken");
    assert_eq!(retained.len(), 5);
    assert_eq!(retained[0].payload()["n"], 7);
    assert_eq!(retained[4].payload()["n"], 11);
}

#[test]
fn handlers_for_other_types_are_not_called() {
    let streams = InMemoryStreams::new();
    let bus = EventBus::in_memory("billing", fast_config(), &streams);

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    bus.subscribe("order.cancelled", move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    })
    .unwrap();
    let (created, on_created) = recorder();
    bus.subscribe("order.created", on_created).unwrap();

    bus.publish("order.created", json!({}), PublishOptions::new())
        .unwrap();

    assert!(wait_until(WAIT, || count(&created) == 1));
    assert!(wait_until(WAIT, || bus.stats().acknowledged == 1));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}
