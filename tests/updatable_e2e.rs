mod support;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use notify_chain::{when, MergeStrategy, Model, ModelSchema, Observable, SourceFault, Updatable, Value};
use serde_json::json;
use support::EventCapture;
use tracing_subscriber::layer::SubscriberExt;

#[test]
fn null_into_a_merging_cell_is_logged_and_ignored() {
    let capture = EventCapture::default();
    let subscriber = tracing_subscriber::registry().with(capture.clone());

    let cell = Updatable::builder().strategy(MergeStrategy::Merge).build();
    tracing::subscriber::with_default(subscriber, || {
        cell.next(Value::from(json!({"a": 1})));
        cell.next(Value::Null);
    });

    assert_eq!(cell.peek(), Some(Value::from(json!({"a": 1}))));
    let warnings = capture.messages_at(tracing::Level::WARN);
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].contains("received null"));
}

#[test]
fn deep_merge_accumulates_partial_updates() {
    let cell = Updatable::builder().strategy(MergeStrategy::MergeDeep).build();
    let rec = cell.observe().record();

    cell.next(Value::from(json!({"user": {"name": "ada"}, "tags": ["a"]})));
    cell.next(Value::from(json!({"user": {"id": 7}, "tags": ["b"]})));

    assert_eq!(
        rec.last(),
        Some(Value::from(json!({"user": {"name": "ada", "id": 7}, "tags": ["a", "b"]})))
    );
}

#[test]
fn release_fires_when_the_last_chain_observer_leaves() {
    let released = Arc::new(AtomicUsize::new(0));
    let r = Arc::clone(&released);
    let cell = Updatable::builder()
        .factory(|| Observable::of(Value::Int(1)))
        .on_release(move |_| {
            r.fetch_add(1, Ordering::SeqCst);
        })
        .build();

    let model = Model::new(&ModelSchema::new("Holder"));
    model.set("cell", &cell).unwrap();

    let first = when(&model, "cell").unwrap().record();
    let second = when(&model, "cell").unwrap().record();
    assert_eq!(first.values(), vec![Some(Value::Int(1))]);
    assert_eq!(second.values(), vec![Some(Value::Int(1))]);
    assert_eq!(cell.ref_count(), 2);

    first.unsubscribe();
    assert_eq!(released.load(Ordering::SeqCst), 0);
    second.unsubscribe();
    assert_eq!(released.load(Ordering::SeqCst), 1);
    assert_eq!(cell.ref_count(), 0);
}

#[test]
fn faulted_cell_replays_its_fault_to_chain_observers() {
    let cell = Updatable::with_factory(|| Observable::throw(SourceFault::new("offline")));
    let model = Model::new(&ModelSchema::new("Holder"));
    model.set("cell", &cell).unwrap();

    let rec = when(&model, "cell").unwrap().record();
    assert!(rec.is_empty());
    assert_eq!(rec.faults(), vec![SourceFault::new("offline")]);
    assert_eq!(cell.value(), Err(SourceFault::new("offline")));
}

#[cfg(feature = "tokio")]
mod async_sources {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn async_factory_populates_the_cell() {
        let cell = Updatable::with_factory(|| {
            Observable::from_future(async {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok(Value::from("loaded"))
            })
        });
        assert!(!cell.has_value());

        let value = cell.wait_for_value().await.unwrap();
        assert_eq!(value, Value::from("loaded"));
        assert_eq!(cell.peek(), Some(Value::from("loaded")));
    }

    #[tokio::test]
    async fn manual_write_beats_a_slow_factory() {
        let cell = Updatable::with_factory(|| {
            Observable::from_future(async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(Value::Int(1))
            })
        });
        let rec = cell.observe().record();
        assert!(cell.has_pending_value());

        cell.next(Value::Int(2));
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(rec.values(), vec![Value::Int(2)]);
        assert_eq!(cell.peek(), Some(Value::Int(2)));
    }

    #[tokio::test]
    async fn async_fault_surfaces_through_wait() {
        let cell = Updatable::with_factory(|| {
            Observable::from_future(async { Err::<Value, _>(SourceFault::new("timeout")) })
        });
        let err = cell.wait_for_value().await.unwrap_err();
        assert!(matches!(err, notify_chain::WhenError::Source(_)));
    }
}
