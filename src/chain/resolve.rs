use crate::config::ChainLimits;
use crate::error::{ChainResolutionFailure, FailureReason, WhenResult};
use crate::model::ChangeNotification;
use crate::value::Value;

use super::{Chain, IntoChain};

/// Walks `chain` from `target` and returns the value at its end.
///
/// Cells met along the way are unwrapped to their current value, except at
/// the final hop of a raw chain. An undefined hop, a scalar with names left
/// to consume, or a faulted read stops the walk with a failure.
pub fn resolve_chain_value(target: &Value, chain: &Chain) -> Result<ChangeNotification, ChainResolutionFailure> {
    let names = chain.names();
    let last = names.len().saturating_sub(1);

    let mut current = match target {
        Value::Cell(_) => unwrap_cell(target, chain, chain.head())?,
        other => other.clone(),
    };

    for (i, name) in names.iter().enumerate() {
        current = match lookup(&current, name) {
            Ok(Some(value)) => value,
            Ok(None) => return Err(failure(chain, name, FailureReason::Undefined)),
            Err(reason) => return Err(failure(chain, name, reason)),
        };

        if !current.is_object() {
            if i == last {
                break;
            }
            return Err(failure(chain, name, FailureReason::NotTraversable));
        }

        if current.is_cell() && !(chain.is_raw() && i == last) {
            current = unwrap_cell(&current, chain, name)?;
        }
    }

    Ok(ChangeNotification {
        sender: target.clone(),
        property: chain.path(),
        value: Some(current),
    })
}

/// Resolves `accessor` against `target`, returning `None` when the walk fails.
///
/// Malformed accessors are still reported as errors.
pub fn get_value(target: impl Into<Value>, accessor: impl IntoChain) -> WhenResult<Option<Value>> {
    let chain = accessor.into_chain(ChainLimits::default())?;
    match resolve_chain_value(&target.into(), &chain) {
        Ok(notification) => Ok(notification.value),
        Err(failure) => {
            tracing::debug!(%failure, "chain did not resolve");
            Ok(None)
        }
    }
}

/// Reads one property of an object.
pub(crate) fn lookup(target: &Value, name: &str) -> Result<Option<Value>, FailureReason> {
    match target {
        Value::Model(model) => model.get(name).map_err(|err| match err.source_fault() {
            Some(fault) => FailureReason::Fault(fault.clone()),
            None => FailureReason::Undefined,
        }),
        Value::Map(map) => Ok(map.get(name).cloned()),
        Value::List(_) | Value::Cell(_) => Ok(None),
        _ => Err(FailureReason::NotTraversable),
    }
}

fn unwrap_cell(cell: &Value, chain: &Chain, hop: &str) -> Result<Value, ChainResolutionFailure> {
    let Value::Cell(cell) = cell else {
        return Ok(cell.clone());
    };
    match cell.value() {
        Ok(Some(value)) => Ok(value),
        Ok(None) => Err(failure(chain, hop, FailureReason::Undefined)),
        Err(fault) => Err(failure(chain, hop, FailureReason::Fault(fault))),
    }
}

fn failure(chain: &Chain, hop: &str, reason: FailureReason) -> ChainResolutionFailure {
    ChainResolutionFailure {
        chain: chain.path(),
        hop: hop.to_string(),
        reason,
    }
}
