//! Notifying models.
//!
//! A `Model` owns two multicast hubs, `changing` and `changed`. Fields
//! declared in its `ModelSchema` notify on every distinct write; fields bound
//! to a stream (or lazily to an `Updatable`) notify on every distinct value
//! the source delivers. Everything a model subscribes to is released by
//! `teardown`.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::ModelConfig;
use crate::error::{WhenError, WhenResult};
use crate::stream::{lock, Observable, Subject, Subscription};
use crate::value::Value;

/// Stream and cell bindings.
pub mod binding;
/// Per-type field declarations.
pub mod schema;

use binding::{FieldSlot, Setter};
pub use schema::ModelSchema;

/// Unique identity of a model instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelId(Uuid);

impl ModelId {
    /// Creates a new random model ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ModelId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One property change, as delivered on `changing` and `changed`.
///
/// On `changing`, `value` is the value before the write; on `changed`, the
/// value after it. `None` means the property had no value.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeNotification {
    /// The object the property belongs to (or the root of an observed chain).
    pub sender: Value,
    /// Property name, dotted for chains.
    pub property: String,
    /// The value carried by the notification.
    pub value: Option<Value>,
}

pub(crate) struct ModelInner {
    id: ModelId,
    schema: ModelSchema,
    config: ModelConfig,
    changing: Subject<ChangeNotification>,
    changed: Subject<ChangeNotification>,
    fields: Mutex<HashMap<String, FieldSlot>>,
    disposables: Subscription,
    torn_down: AtomicBool,
}

/// An object with change-notifying fields.
///
/// Clones are handles to the same model.
#[derive(Clone)]
pub struct Model {
    pub(crate) inner: Arc<ModelInner>,
}

impl Model {
    /// Creates a model with the default configuration.
    #[must_use]
    pub fn new(schema: &ModelSchema) -> Self {
        Self::with_config(schema, ModelConfig::default())
    }

    /// Creates a model with an explicit configuration.
    #[must_use]
    pub fn with_config(schema: &ModelSchema, config: ModelConfig) -> Self {
        Self {
            inner: Arc::new(ModelInner {
                id: ModelId::new(),
                schema: schema.clone(),
                config,
                changing: Subject::new(),
                changed: Subject::new(),
                fields: Mutex::new(HashMap::new()),
                disposables: Subscription::new(),
                torn_down: AtomicBool::new(false),
            }),
        }
    }

    /// This instance's identity.
    #[must_use]
    pub fn id(&self) -> ModelId {
        self.inner.id
    }

    /// The schema's type name.
    #[must_use]
    pub fn type_name(&self) -> &str {
        self.inner.schema.type_name()
    }

    /// The schema this model was built from.
    #[must_use]
    pub fn schema(&self) -> &ModelSchema {
        &self.inner.schema
    }

    /// True when both handles refer to the same instance.
    #[must_use]
    pub fn ptr_eq(&self, other: &Model) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Notifications sent just before a field changes, carrying the old value.
    #[must_use]
    pub fn changing(&self) -> Observable<ChangeNotification> {
        self.inner.changing.as_observable()
    }

    /// Notifications sent just after a field changes, carrying the new value.
    #[must_use]
    pub fn changed(&self) -> Observable<ChangeNotification> {
        self.inner.changed.as_observable()
    }

    /// Whether `field` is declared, bound, or has been set.
    #[must_use]
    pub fn has_property(&self, field: &str) -> bool {
        self.inner.schema.is_notifying(field) || lock(&self.inner.fields).contains_key(field)
    }

    /// Reads a field.
    ///
    /// Reading a bound field subscribes to its source on first access. A
    /// fault delivered by that source is returned as `WhenError::Source`.
    pub fn get(&self, field: &str) -> WhenResult<Option<Value>> {
        let needs_subscribe = {
            let fields = lock(&self.inner.fields);
            match fields.get(field) {
                Some(FieldSlot::Bound(binding)) => binding.subscription.is_none(),
                Some(slot) => return Ok(slot.current()),
                None => return Ok(None),
            }
        };
        if needs_subscribe {
            self.subscribe_binding(field);
        }

        let fields = lock(&self.inner.fields);
        match fields.get(field) {
            Some(FieldSlot::Bound(binding)) => match &binding.fault {
                Some(fault) => Err(WhenError::Source(fault.clone())),
                None => Ok(binding.latest.clone()),
            },
            Some(slot) => Ok(slot.current()),
            None => Ok(None),
        }
    }

    /// Writes a field.
    ///
    /// Declared fields emit `changing` then `changed` unless the new value
    /// equals the current one. Bound fields forward to their setter and fail
    /// with `ReadOnlyField` when they have none. Any other field is stored
    /// without notification.
    pub fn set(&self, field: &str, value: impl Into<Value>) -> WhenResult<()> {
        let value = value.into();

        let write = {
            let fields = lock(&self.inner.fields);
            match fields.get(field) {
                Some(FieldSlot::Bound(binding)) => Write::Forward(binding.setter.clone()),
                slot if self.inner.schema.is_notifying(field) => Write::Notify(slot.and_then(FieldSlot::current)),
                _ => Write::Plain,
            }
        };

        let old = match write {
            Write::Forward(Some(setter)) => {
                setter(value);
                return Ok(());
            }
            Write::Forward(None) => {
                return Err(WhenError::ReadOnlyField {
                    type_name: self.type_name().to_string(),
                    field: field.to_string(),
                });
            }
            Write::Plain => {
                lock(&self.inner.fields).insert(field.to_string(), FieldSlot::Plain(value));
                return Ok(());
            }
            Write::Notify(old) if old.as_ref() == Some(&value) => return Ok(()),
            Write::Notify(old) => old,
        };

        self.emit_changing(field, old);
        lock(&self.inner.fields).insert(field.to_string(), FieldSlot::Notifying(Some(value.clone())));
        self.emit_changed(field, Some(value));
        Ok(())
    }

    /// Invalidates a field: a lazily bound field re-runs its factory, any
    /// other field is written with `Null`.
    pub fn invalidate_field(&self, field: &str) -> WhenResult<()> {
        match self.cell_for(field) {
            Some(cell) => {
                cell.invalidate();
                Ok(())
            }
            None => self.set(field, Value::Null),
        }
    }

    /// Ties a subscription to this model's lifetime.
    pub fn add_teardown(&self, subscription: Subscription) {
        self.inner.disposables.add(subscription);
    }

    /// Releases every subscription the model created, tearing down any model
    /// currently held by a bound field. Idempotent.
    pub fn teardown(&self) {
        if self.inner.torn_down.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::debug!(model = %self.type_name(), id = %self.inner.id, "tearing down model");
        self.inner.disposables.unsubscribe();
    }

    /// Whether `teardown` has run.
    #[must_use]
    pub fn is_torn_down(&self) -> bool {
        self.inner.torn_down.load(Ordering::Acquire)
    }

    /// Current field values, without subscribing any bound source.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        lock(&self.inner.fields)
            .iter()
            .filter_map(|(name, slot)| slot.current().map(|v| (name.clone(), v)))
            .collect()
    }

    pub(crate) fn emit_changing(&self, field: &str, value: Option<Value>) {
        self.inner.changing.next(self.notification(field, value));
    }

    pub(crate) fn emit_changed(&self, field: &str, value: Option<Value>) {
        self.inner.changed.next(self.notification(field, value));
    }

    fn notification(&self, field: &str, value: Option<Value>) -> ChangeNotification {
        ChangeNotification {
            sender: Value::Model(self.clone()),
            property: field.to_string(),
            value,
        }
    }
}

enum Write {
    Forward(Option<Setter>),
    Notify(Option<Value>),
    Plain,
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("type_name", &self.type_name())
            .field("id", &self.inner.id)
            .finish_non_exhaustive()
    }
}
