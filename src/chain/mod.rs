//! Property-chain resolution and observation.
//!
//! A `Chain` names a path through nested models, maps, and cells. It can be
//! resolved synchronously (`resolve_chain_value`, `get_value`) or observed as
//! a live stream that re-subscribes whenever an intermediate hop is replaced
//! (`observe_chain`, `when`, `when_property`). Several chains can be combined
//! through a user function (`get_combined`, `when_combined`).

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

use crate::config::ChainLimits;
use crate::error::{WhenError, WhenResult};

/// Combining several chains into one stream.
pub mod combine;
/// Live chain observation.
pub mod observe;
/// Synchronous chain resolution.
pub mod resolve;

pub use combine::{get_combined, when_combined, when_property_combined};
pub use observe::{observe_chain, when, when_property, ObserveMode};
pub use resolve::{get_value, resolve_chain_value};

static IDENTIFIER: OnceLock<Regex> = OnceLock::new();

fn identifier() -> &'static Regex {
    IDENTIFIER.get_or_init(|| Regex::new(r"^[$A-Za-z_][0-9A-Za-z_$]*$").expect("identifier pattern compiles"))
}

/// Checks that `name` is a single property identifier.
pub(crate) fn validate_identifier(name: &str) -> WhenResult<()> {
    if identifier().is_match(name) {
        Ok(())
    } else {
        Err(WhenError::invalid_accessor(
            name,
            "property name must be of the form 'foo.bar.baz'",
        ))
    }
}

/// An ordered, non-empty list of property names.
///
/// When `raw` is set, a cell met at the final hop is returned as the cell
/// itself rather than unwrapped to its value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Chain {
    names: Vec<String>,
    raw_tail: bool,
}

impl Chain {
    /// Parses a dotted accessor such as `"foo.bar.baz"`.
    pub fn parse(accessor: &str) -> WhenResult<Self> {
        Self::parse_with(accessor, ChainLimits::default())
    }

    /// Parses a dotted accessor, enforcing `limits`.
    pub fn parse_with(accessor: &str, limits: ChainLimits) -> WhenResult<Self> {
        if accessor.is_empty() {
            return Err(WhenError::invalid_accessor(accessor, "accessor is empty"));
        }
        for name in accessor.split('.') {
            if !identifier().is_match(name) {
                return Err(WhenError::invalid_accessor(
                    accessor,
                    "property name must be of the form 'foo.bar.baz'",
                ));
            }
        }

        Self {
            names: accessor.split('.').map(str::to_string).collect(),
            raw_tail: false,
        }
        .check(limits)
    }

    /// Builds a chain from explicit names, validating each one.
    pub fn from_names<I, S>(names: I) -> WhenResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names: Vec<String> = names.into_iter().map(|s| s.as_ref().to_string()).collect();
        if names.is_empty() {
            return Err(WhenError::invalid_accessor("", "accessor is empty"));
        }
        for name in &names {
            validate_identifier(name)?;
        }
        Ok(Self {
            names,
            raw_tail: false,
        })
    }

    /// Builds a chain from identifiers already checked by the compiler.
    #[doc(hidden)]
    #[must_use]
    pub fn from_idents(names: &[&str]) -> Self {
        Self {
            names: names.iter().map(|s| (*s).to_string()).collect(),
            raw_tail: false,
        }
    }

    /// Requests the raw cell at the final hop instead of its value.
    #[must_use]
    pub fn raw(mut self) -> Self {
        self.raw_tail = true;
        self
    }

    /// Whether the final hop yields a raw cell.
    #[must_use]
    pub const fn is_raw(&self) -> bool {
        self.raw_tail
    }

    /// The property names, in order.
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Number of names.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Always false for a constructed chain.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// The first name.
    #[must_use]
    pub fn head(&self) -> &str {
        self.names.first().map_or("", String::as_str)
    }

    /// Everything after the first name, keeping the raw flag.
    #[must_use]
    pub fn tail(&self) -> Option<Chain> {
        if self.names.len() < 2 {
            return None;
        }
        Some(Self {
            names: self.names[1..].to_vec(),
            raw_tail: self.raw_tail,
        })
    }

    /// The dotted form of the chain.
    #[must_use]
    pub fn path(&self) -> String {
        self.names.join(".")
    }

    fn check(self, limits: ChainLimits) -> WhenResult<Self> {
        if self.names.len() > limits.max_depth {
            return Err(WhenError::invalid_accessor(
                self.path(),
                format!(
                    "chain has {} names, at most {} allowed",
                    self.names.len(),
                    limits.max_depth
                ),
            ));
        }
        Ok(self)
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

/// Anything that can describe a property chain.
pub trait IntoChain {
    /// Converts into a validated chain no longer than `limits` allows.
    fn into_chain(self, limits: ChainLimits) -> WhenResult<Chain>;
}

impl IntoChain for Chain {
    fn into_chain(self, limits: ChainLimits) -> WhenResult<Chain> {
        if self.names.is_empty() {
            return Err(WhenError::invalid_accessor("", "accessor is empty"));
        }
        self.check(limits)
    }
}

impl IntoChain for &Chain {
    fn into_chain(self, limits: ChainLimits) -> WhenResult<Chain> {
        self.clone().into_chain(limits)
    }
}

impl IntoChain for &str {
    fn into_chain(self, limits: ChainLimits) -> WhenResult<Chain> {
        Chain::parse_with(self, limits)
    }
}

impl IntoChain for String {
    fn into_chain(self, limits: ChainLimits) -> WhenResult<Chain> {
        Chain::parse_with(&self, limits)
    }
}

impl IntoChain for &String {
    fn into_chain(self, limits: ChainLimits) -> WhenResult<Chain> {
        Chain::parse_with(self, limits)
    }
}

impl IntoChain for &[&str] {
    fn into_chain(self, limits: ChainLimits) -> WhenResult<Chain> {
        Chain::from_names(self)?.check(limits)
    }
}

impl<const N: usize> IntoChain for [&str; N] {
    fn into_chain(self, limits: ChainLimits) -> WhenResult<Chain> {
        Chain::from_names(self)?.check(limits)
    }
}

impl IntoChain for Vec<&str> {
    fn into_chain(self, limits: ChainLimits) -> WhenResult<Chain> {
        Chain::from_names(self)?.check(limits)
    }
}

impl IntoChain for Vec<String> {
    fn into_chain(self, limits: ChainLimits) -> WhenResult<Chain> {
        Chain::from_names(self)?.check(limits)
    }
}

impl IntoChain for &[String] {
    fn into_chain(self, limits: ChainLimits) -> WhenResult<Chain> {
        Chain::from_names(self)?.check(limits)
    }
}

/// Builds a `Chain` from member-access syntax: `chain!(bar.foo)`.
#[macro_export]
macro_rules! chain {
    ($first:ident $(. $rest:ident)*) => {
        $crate::chain::Chain::from_idents(&[stringify!($first) $(, stringify!($rest))*])
    };
}
