use std::sync::{Arc, Weak};

use crate::chain::validate_identifier;
use crate::config::FaultPolicy;
use crate::error::{SourceFault, WhenError, WhenResult};
use crate::stream::{lock, Observable, Subscriber, Subscription};
use crate::updatable::{MergeStrategy, Updatable};
use crate::value::Value;

use super::{Model, ModelInner};

pub(crate) type Setter = Arc<dyn Fn(Value) + Send + Sync>;

/// Backing state of one field.
pub(crate) enum FieldSlot {
    /// A declared field written through `set`.
    Notifying(Option<Value>),
    /// An undeclared field, written without notification.
    Plain(Value),
    /// A field sourced from a stream.
    Bound(FieldBinding),
}

impl FieldSlot {
    pub(crate) fn current(&self) -> Option<Value> {
        match self {
            Self::Notifying(value) => value.clone(),
            Self::Plain(value) => Some(value.clone()),
            Self::Bound(binding) => binding.latest.clone(),
        }
    }
}

pub(crate) struct FieldBinding {
    source: Observable<Value>,
    cell: Option<Updatable>,
    pub(crate) setter: Option<Setter>,
    pub(crate) latest: Option<Value>,
    pub(crate) fault: Option<SourceFault>,
    pub(crate) subscription: Option<Subscription>,
}

impl Model {
    /// Sources a read-only field from `source`.
    ///
    /// The source is subscribed immediately. Each value that differs from the
    /// last one emits `changing` and `changed`. Fails with `DuplicateBinding`
    /// if the field is already bound.
    pub fn bind_to_stream(&self, field: &str, source: Observable<Value>) -> WhenResult<()> {
        self.bind(field, source, None, None)
    }

    /// Sources a field from `source`, forwarding writes to `setter`.
    ///
    /// The source is subscribed on first read.
    pub fn bind_to_stream_with_setter(
        &self,
        field: &str,
        source: Observable<Value>,
        setter: impl Fn(Value) + Send + Sync + 'static,
    ) -> WhenResult<()> {
        self.bind(field, source, None, Some(Arc::new(setter)))
    }

    /// Backs a field with a lazily populated `Updatable` and returns it.
    ///
    /// Writes to the field go to the cell. Calling this again for the same
    /// field returns the existing cell; a field bound to a plain stream
    /// fails with `DuplicateBinding`.
    pub fn bind_lazily(
        &self,
        field: &str,
        factory: impl Fn() -> Observable<Value> + Send + Sync + 'static,
        strategy: MergeStrategy,
    ) -> WhenResult<Updatable> {
        if let Some(cell) = self.cell_for(field) {
            return Ok(cell);
        }

        let cell = Updatable::builder().factory(factory).strategy(strategy).build();
        let target = cell.clone();
        self.bind(
            field,
            cell.observe(),
            Some(cell.clone()),
            Some(Arc::new(move |v| target.next(v))),
        )?;
        Ok(cell)
    }

    /// The cell backing a lazily bound field.
    #[must_use]
    pub fn cell_for(&self, field: &str) -> Option<Updatable> {
        match lock(&self.inner.fields).get(field) {
            Some(FieldSlot::Bound(binding)) => binding.cell.clone(),
            _ => None,
        }
    }

    fn bind(
        &self,
        field: &str,
        source: Observable<Value>,
        cell: Option<Updatable>,
        setter: Option<Setter>,
    ) -> WhenResult<()> {
        validate_identifier(field)?;
        let eager = setter.is_none();

        {
            let mut fields = lock(&self.inner.fields);
            if let Some(FieldSlot::Bound(_)) = fields.get(field) {
                return Err(WhenError::DuplicateBinding {
                    type_name: self.type_name().to_string(),
                    field: field.to_string(),
                });
            }
            fields.insert(
                field.to_string(),
                FieldSlot::Bound(FieldBinding {
                    source,
                    cell,
                    setter,
                    latest: None,
                    fault: None,
                    subscription: None,
                }),
            );
        }

        if eager {
            self.subscribe_binding(field);
        }
        Ok(())
    }

    pub(crate) fn subscribe_binding(&self, field: &str) {
        let (source, holder) = {
            let mut fields = lock(&self.inner.fields);
            let Some(FieldSlot::Bound(binding)) = fields.get_mut(field) else {
                return;
            };
            if binding.subscription.is_some() {
                return;
            }
            let holder = Subscription::new();
            binding.subscription = Some(holder.clone());
            (binding.source.clone(), holder)
        };

        let weak = Arc::downgrade(&self.inner);
        let name = field.to_string();
        holder.add_teardown(move || {
            if let Some(model) = upgrade(&weak) {
                model.release_binding(&name);
            }
        });
        self.inner.disposables.add(holder.clone());
        if holder.is_closed() {
            return;
        }

        let feed = Subscription::new();
        holder.add(feed.clone());

        let on_value = (Arc::downgrade(&self.inner), field.to_string());
        let on_fault = (Arc::downgrade(&self.inner), field.to_string());
        let on_complete = (Arc::downgrade(&self.inner), field.to_string());
        source.subscribe_with(Subscriber::with_subscription(
            feed,
            move |value| {
                if let Some(model) = upgrade(&on_value.0) {
                    model.apply_bound_value(&on_value.1, value);
                }
            },
            move |fault| {
                if let Some(model) = upgrade(&on_fault.0) {
                    model.record_fault(&on_fault.1, fault);
                }
            },
            move || {
                if let Some(model) = upgrade(&on_complete.0) {
                    tracing::debug!(
                        model = %model.type_name(),
                        field = %on_complete.1,
                        "bound field source completed"
                    );
                }
            },
        ));
    }

    fn apply_bound_value(&self, field: &str, value: Value) {
        let old = {
            let fields = lock(&self.inner.fields);
            match fields.get(field) {
                Some(FieldSlot::Bound(binding)) => {
                    if binding.latest.as_ref() == Some(&value) {
                        return;
                    }
                    binding.latest.clone()
                }
                _ => return,
            }
        };

        self.emit_changing(field, old);
        if let Some(FieldSlot::Bound(binding)) = lock(&self.inner.fields).get_mut(field) {
            binding.latest = Some(value.clone());
        }
        self.emit_changed(field, Some(value));
    }

    fn record_fault(&self, field: &str, fault: SourceFault) {
        let last = {
            let mut fields = lock(&self.inner.fields);
            match fields.get_mut(field) {
                Some(FieldSlot::Bound(binding)) => {
                    binding.fault = Some(fault.clone());
                    binding.latest.clone()
                }
                _ => None,
            }
        };

        tracing::warn!(
            model = %self.type_name(),
            field,
            error = %fault,
            last = %last.map_or(serde_json::Value::Null, |v| v.to_json()),
            "bound field source failed"
        );

        if let FaultPolicy::Escalate(hook) = &self.inner.config.fault_policy {
            hook(self.type_name(), field, &fault);
        }
    }

    fn release_binding(&self, field: &str) {
        let (previous, cell) = {
            let mut fields = lock(&self.inner.fields);
            match fields.get_mut(field) {
                Some(FieldSlot::Bound(binding)) => (binding.latest.take(), binding.cell.clone()),
                _ => (None, None),
            }
        };

        if let Some(Value::Model(nested)) = previous {
            nested.teardown();
        }
        if let Some(cell) = cell {
            cell.dispose();
        }
    }
}

fn upgrade(weak: &Weak<ModelInner>) -> Option<Model> {
    weak.upgrade().map(|inner| Model { inner })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;
    use crate::model::ModelSchema;
    use crate::stream::Subject;
    use std::sync::Mutex;

    fn schema() -> ModelSchema {
        ModelSchema::new("Bound").notify_for(["foo"]).unwrap()
    }

    #[test]
    fn test_canned_value() {
        let model = Model::new(&schema());
        model.bind_to_stream("derived", Observable::of(Value::Int(42))).unwrap();
        assert_eq!(model.get("derived").unwrap(), Some(Value::Int(42)));
    }

    #[test]
    fn test_binding_twice_fails() {
        let model = Model::new(&schema());
        model.bind_to_stream("derived", Observable::of(Value::Int(5))).unwrap();
        let err = model
            .bind_to_stream("derived", Observable::of(Value::Int(42)))
            .unwrap_err();
        assert!(matches!(err, WhenError::DuplicateBinding { .. }));
        assert_eq!(model.get("derived").unwrap(), Some(Value::Int(5)));
    }

    #[test]
    fn test_read_only_without_setter() {
        let model = Model::new(&schema());
        model.bind_to_stream("derived", Observable::of(Value::Int(5))).unwrap();
        let err = model.set("derived", 6).unwrap_err();
        assert!(matches!(err, WhenError::ReadOnlyField { .. }));
    }

    #[test]
    fn test_fault_raised_on_read() {
        let model = Model::new(&schema());
        let input: Subject<Value> = Subject::new();
        model.bind_to_stream("derived", input.as_observable()).unwrap();
        input.next(Value::Int(1));
        input.error(SourceFault::new("Kaplowie"));

        let err = model.get("derived").unwrap_err();
        assert_eq!(err.source_fault(), Some(&SourceFault::new("Kaplowie")));
        assert_eq!(model.get("foo").unwrap(), None);
    }

    #[test]
    fn test_fault_escalates_to_hook() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let config = ModelConfig::escalate_faults(move |ty, field, fault| {
            lock(&s).push(format!("{ty}.{field}: {fault}"));
        });
        let model = Model::with_config(&schema(), config);
        model
            .bind_to_stream("derived", Observable::throw(SourceFault::new("boom")))
            .unwrap();
        assert_eq!(*lock(&seen), vec!["Bound.derived: boom".to_string()]);
    }

    #[test]
    fn test_setter_variant_subscribes_on_first_read() {
        let model = Model::new(&schema());
        let input: Subject<Value> = Subject::new();
        let written = Arc::new(Mutex::new(Vec::new()));
        let w = Arc::clone(&written);
        model
            .bind_to_stream_with_setter("derived", input.as_observable(), move |v| lock(&w).push(v))
            .unwrap();
        assert_eq!(input.observer_count(), 0);

        assert_eq!(model.get("derived").unwrap(), None);
        assert_eq!(input.observer_count(), 1);

        model.set("derived", 3).unwrap();
        assert_eq!(*lock(&written), vec![Value::Int(3)]);
    }

    #[test]
    fn test_teardown_releases_sources_and_nested_models() {
        let outer = Model::new(&schema());
        let nested = Model::new(&schema());
        let input: Subject<Value> = Subject::new();
        outer.bind_to_stream("child", input.as_observable()).unwrap();
        input.next(Value::from(&nested));
        assert_eq!(input.observer_count(), 1);

        outer.teardown();
        assert_eq!(input.observer_count(), 0);
        assert!(nested.is_torn_down());
        assert_eq!(outer.get("child").unwrap(), None);
    }

    #[test]
    fn test_bind_lazily_twice_returns_same_cell() {
        let model = Model::new(&schema());
        let first = model
            .bind_lazily("lazy", || Observable::of(Value::Int(6)), MergeStrategy::Overwrite)
            .unwrap();
        let second = model
            .bind_lazily("lazy", || Observable::of(Value::Int(7)), MergeStrategy::Overwrite)
            .unwrap();
        assert!(first.ptr_eq(&second));
        assert_eq!(model.get("lazy").unwrap(), Some(Value::Int(6)));
    }

    #[test]
    fn test_bind_lazily_over_plain_binding_fails() {
        let model = Model::new(&schema());
        model.bind_to_stream("derived", Observable::of(Value::Int(1))).unwrap();
        let err = model
            .bind_lazily("derived", || Observable::of(Value::Int(2)), MergeStrategy::Overwrite)
            .unwrap_err();
        assert!(matches!(err, WhenError::DuplicateBinding { .. }));
    }
}
