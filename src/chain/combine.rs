use crate::config::ChainLimits;
use crate::error::{WhenError, WhenResult};
use crate::model::ChangeNotification;
use crate::stream::{Item, Observable};
use crate::value::Value;

use super::observe::{observe_parsed, ObserveMode};
use super::{Chain, IntoChain};

/// Observes several chains and feeds their latest notifications to
/// `combinator` whenever any of them changes.
///
/// Nothing is emitted until every chain has produced a value. Consecutive
/// equal results are collapsed. Fails with `InvalidArguments` when no
/// accessor is given.
pub fn get_combined<A, R>(
    target: impl Into<Value>,
    accessors: impl IntoIterator<Item = A>,
    mode: ObserveMode,
    combinator: impl Fn(&[ChangeNotification]) -> R + Send + Sync + 'static,
) -> WhenResult<Observable<R>>
where
    A: IntoChain,
    R: Item + PartialEq,
{
    let target = target.into();
    let watchers = parse_all(accessors)?
        .iter()
        .map(|chain| observe_parsed(&target, chain, mode))
        .collect();
    Ok(combine(watchers, combinator))
}

/// Combines the values at the end of several chains.
pub fn when_combined<A, R>(
    target: impl Into<Value>,
    accessors: impl IntoIterator<Item = A>,
    combinator: impl Fn(&[Option<Value>]) -> R + Send + Sync + 'static,
) -> WhenResult<Observable<R>>
where
    A: IntoChain,
    R: Item + PartialEq,
{
    let target = target.into();
    let watchers = parse_all(accessors)?
        .iter()
        .map(|chain| observe_parsed(&target, chain, ObserveMode::Changed).map(|n| n.value))
        .collect();
    Ok(combine(watchers, combinator))
}

/// Combines the change notifications of several chains.
pub fn when_property_combined<A, R>(
    target: impl Into<Value>,
    accessors: impl IntoIterator<Item = A>,
    combinator: impl Fn(&[ChangeNotification]) -> R + Send + Sync + 'static,
) -> WhenResult<Observable<R>>
where
    A: IntoChain,
    R: Item + PartialEq,
{
    get_combined(target, accessors, ObserveMode::Changed, combinator)
}

fn parse_all<A: IntoChain>(accessors: impl IntoIterator<Item = A>) -> WhenResult<Vec<Chain>> {
    let chains = accessors
        .into_iter()
        .map(|a| a.into_chain(ChainLimits::default()))
        .collect::<WhenResult<Vec<_>>>()?;
    if chains.is_empty() {
        return Err(WhenError::invalid_arguments("must specify at least one property"));
    }
    Ok(chains)
}

fn combine<T: Item, R: Item + PartialEq>(
    watchers: Vec<Observable<T>>,
    combinator: impl Fn(&[T]) -> R + Send + Sync + 'static,
) -> Observable<R> {
    Observable::combine_latest(watchers)
        .map(move |latest| combinator(&latest))
        .distinct_until_changed()
}
