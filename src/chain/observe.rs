use crate::config::ChainLimits;
use crate::error::WhenResult;
use crate::model::ChangeNotification;
use crate::stream::Observable;
use crate::value::Value;

use super::resolve::lookup;
use super::{Chain, IntoChain};

/// Which hub a chain observation follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ObserveMode {
    /// Values after each change.
    #[default]
    Changed,
    /// Values just before each change.
    Changing,
}

/// Observes `accessor` from `target` as a stream of notifications.
///
/// The stream starts with the chain's current value (when every hop is
/// present) and emits again whenever any hop changes, following only the
/// latest object at each intermediate hop. Consecutive notifications with
/// equal values are collapsed.
pub fn observe_chain(
    target: impl Into<Value>,
    accessor: impl IntoChain,
    mode: ObserveMode,
) -> WhenResult<Observable<ChangeNotification>> {
    let chain = accessor.into_chain(ChainLimits::default())?;
    Ok(observe_parsed(&target.into(), &chain, mode))
}

/// Observes the value at the end of `accessor`.
pub fn when(target: impl Into<Value>, accessor: impl IntoChain) -> WhenResult<Observable<Option<Value>>> {
    Ok(when_property(target, accessor)?.map(|n| n.value))
}

/// Observes `accessor` as full change notifications.
pub fn when_property(
    target: impl Into<Value>,
    accessor: impl IntoChain,
) -> WhenResult<Observable<ChangeNotification>> {
    observe_chain(target, accessor, ObserveMode::Changed)
}

pub(crate) fn observe_parsed(target: &Value, chain: &Chain, mode: ObserveMode) -> Observable<ChangeNotification> {
    if let Value::Cell(cell) = target {
        let chain = chain.clone();
        return cell
            .observe()
            .switch_map(move |value| observe_parsed(&value, &chain, mode));
    }

    let Some(rest) = chain.tail() else {
        return observe_property(target, chain.head(), chain.is_raw(), mode).distinct_until_changed_by(same_value);
    };

    let root = target.clone();
    let head = chain.head().to_string();
    observe_property(target, chain.head(), false, mode)
        .switch_map(move |hop| {
            let Some(value) = hop.value else {
                return Observable::never();
            };
            let root = root.clone();
            let head = head.clone();
            observe_parsed(&value, &rest, mode).map(move |inner| ChangeNotification {
                sender: root.clone(),
                property: format!("{head}.{}", inner.property),
                value: inner.value,
            })
        })
        .distinct_until_changed_by(same_value)
}

/// Notifications for one property, starting with its value at subscription.
fn observe_property(target: &Value, name: &str, raw: bool, mode: ObserveMode) -> Observable<ChangeNotification> {
    match target {
        Value::Model(model) => {
            let model = model.clone();
            let name = name.to_string();
            Observable::create(move |sub| {
                if !model.has_property(&name) {
                    return;
                }

                let current = match model.get(&name) {
                    Ok(value) => value,
                    Err(err) => {
                        tracing::debug!(model = %model.type_name(), field = %name, error = %err, "observing a faulted field");
                        None
                    }
                };
                let hub = match mode {
                    ObserveMode::Changed => model.changed(),
                    ObserveMode::Changing => model.changing(),
                };
                let property = name.clone();
                hub.filter(move |n| n.property == property)
                    .start_with(ChangeNotification {
                        sender: Value::Model(model.clone()),
                        property: name.clone(),
                        value: current,
                    })
                    .switch_map(move |n| follow_cell(n, raw))
                    .subscribe_with(sub);
            })
        }
        Value::Map(_) => {
            let target = target.clone();
            let name = name.to_string();
            Observable::create(move |sub| {
                let Ok(Some(value)) = lookup(&target, &name) else {
                    return;
                };
                Observable::never()
                    .start_with(ChangeNotification {
                        sender: target.clone(),
                        property: name.clone(),
                        value: Some(value),
                    })
                    .switch_map(move |n| follow_cell(n, raw))
                    .subscribe_with(sub);
            })
        }
        _ => Observable::never(),
    }
}

/// Replaces a notification carrying a cell with the cell's value stream.
fn follow_cell(notification: ChangeNotification, raw: bool) -> Observable<ChangeNotification> {
    match &notification.value {
        Some(Value::Cell(cell)) if !raw => {
            let sender = notification.sender.clone();
            let property = notification.property.clone();
            cell.observe().map(move |value| ChangeNotification {
                sender: sender.clone(),
                property: property.clone(),
                value: Some(value),
            })
        }
        _ => Observable::of(notification),
    }
}

fn same_value(a: &ChangeNotification, b: &ChangeNotification) -> bool {
    a.value == b.value
}
