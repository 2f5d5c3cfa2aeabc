#![allow(dead_code)]

use std::ops::Deref;
use std::sync::{Arc, Mutex, OnceLock};

use notify_chain::{MergeStrategy, Model, ModelSchema, Observable, SourceFault, Subject, Updatable, Value};
use tracing::field::{Field, Visit};
use tracing::Subscriber;
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

/// Shared fixture: a model with notifying, bound, and lazily bound fields.
pub struct TestClass {
    pub model: Model,
    pub some_subject: Subject<i64>,
    pub updatable_foo: Updatable,
}

fn schema() -> &'static ModelSchema {
    static SCHEMA: OnceLock<ModelSchema> = OnceLock::new();
    SCHEMA.get_or_init(|| {
        ModelSchema::new("TestClass")
            .notify_for(["foo", "bar", "arrayFoo"])
            .expect("fixture field names are identifiers")
    })
}

impl TestClass {
    pub fn new() -> Self {
        let model = Model::new(schema());
        let some_subject = Subject::new();
        let updatable_foo = Updatable::with_factory(|| Observable::of(Value::Int(6)));

        model.set("arrayFoo", Value::List(vec![Value::Int(1)])).unwrap();
        model.set("updatableFoo", &updatable_foo).unwrap();
        model
            .set("updatableTodo", Updatable::with_factory(|| Observable::of(Value::Null)))
            .unwrap();

        model.bind_to_stream("derived", Observable::of(Value::Int(42))).unwrap();
        model
            .bind_to_stream(
                "subjectDerived",
                some_subject.as_observable().map(|x| Value::Int(x * 10)).start_with(Value::Int(0)),
            )
            .unwrap();
        model
            .bind_to_stream("explodingProperty", Observable::throw(SourceFault::new("Kaplowie")))
            .unwrap();

        model
            .bind_lazily("lazyFoo", || Observable::of(Value::Int(6)), MergeStrategy::Overwrite)
            .unwrap();
        model
            .bind_lazily(
                "lazyExplodingFoo",
                || Observable::throw(SourceFault::new("Kaplowie")),
                MergeStrategy::Overwrite,
            )
            .unwrap();

        Self {
            model,
            some_subject,
            updatable_foo,
        }
    }

    pub fn value(&self) -> Value {
        Value::from(&self.model)
    }
}

impl Deref for TestClass {
    type Target = Model;

    fn deref(&self) -> &Model {
        &self.model
    }
}

/// Captures the level, message, and other fields of every event.
#[derive(Clone, Default)]
pub struct EventCapture {
    pub events: Arc<Mutex<Vec<CapturedEvent>>>,
}

#[derive(Clone, Debug)]
pub struct CapturedEvent {
    pub level: tracing::Level,
    pub message: String,
    pub fields: Vec<(String, String)>,
}

impl CapturedEvent {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }
}

impl EventCapture {
    pub fn at(&self, level: tracing::Level) -> Vec<CapturedEvent> {
        self.events
            .lock()
            .expect("capture lock")
            .iter()
            .filter(|e| e.level == level)
            .cloned()
            .collect()
    }

    pub fn messages_at(&self, level: tracing::Level) -> Vec<String> {
        self.at(level).into_iter().map(|e| e.message).collect()
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: String,
    fields: Vec<(String, String)>,
}

impl Visit for FieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.push((field.name().to_string(), value.to_string()));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.fields.push((field.name().to_string(), format!("{value:?}")));
        }
    }
}

impl<S: Subscriber> Layer<S> for EventCapture {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);
        self.events.lock().expect("capture lock").push(CapturedEvent {
            level: *event.metadata().level(),
            message: visitor.message,
            fields: visitor.fields,
        });
    }
}
