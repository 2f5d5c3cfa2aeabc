//! # notify-chain
//!
//! Reactive state propagation for in-process object graphs.
//!
//! ## Core Concepts
//!
//! - **Model**: an object whose fields announce every change on its
//!   `changing` and `changed` hubs
//! - **Updatable**: a lazily populated, invalidatable, mergeable value cell
//! - **Chain**: a dotted path through nested models and cells that can be
//!   resolved once or observed as a live stream
//! - **Action**: an asynchronous command whose executions never overlap
//!
//! ## Usage
//!
//! ```rust
//! use notify_chain::{when, Model, ModelSchema, Value};
//!
//! let schema = ModelSchema::new("Todo").notify_for(["title"])?;
//! let todo = Model::new(&schema);
//!
//! let titles = when(&todo, "title")?.record();
//! todo.set("title", "write docs")?;
//!
//! assert_eq!(titles.last(), Some(Some(Value::from("write docs"))));
//! # Ok::<(), notify_chain::WhenError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Foundations
pub mod config;
pub mod error;
pub mod stream;
pub mod value;

// Notification graph
pub mod action;
pub mod chain;
pub mod model;
pub mod updatable;

pub use action::Action;
pub use chain::{
    get_combined, get_value, observe_chain, resolve_chain_value, when, when_combined, when_property,
    when_property_combined, Chain, IntoChain, ObserveMode,
};
pub use config::{ChainLimits, FaultPolicy, ModelConfig};
pub use error::{ChainResolutionFailure, FailureReason, SourceFault, WhenError, WhenResult};
pub use model::{ChangeNotification, Model, ModelId, ModelSchema};
pub use stream::{BehaviorSubject, Observable, ObservedStream, Recording, SerialSubscription, Subject, Subscription};
pub use updatable::{MergeStrategy, Updatable, UpdatableBuilder};
pub use value::Value;
