//! Value node evaluation trees for debugger inspection windows (locals, watch, hover).
//!
//! A [`ValueNode`] wraps one evaluated runtime [`Value`] and exposes:
//! - read-only presentation properties (expression, image, read-only flag, tri-state
//!   [`HasChildren`]);
//! - lazily materialized children, paged by index;
//! - four formatting facets (name, value, expected type, actual type) written to
//!   caller-provided [`TextColorWriter`] sinks.
//!
//! Every evaluation-bearing operation comes in a blocking form, a callback form and an
//! `async` form. All three are scheduled by the [`EvaluationManager`] onto the evaluation
//! worker of the node's runtime; language specifics are supplied by a
//! [`LanguageEvaluator`].

pub mod config;
pub mod error;
pub mod format;
pub mod hierarchy;
pub mod language;
pub mod manager;
pub mod mock;
pub mod node;
pub mod options;
pub mod text;
pub mod value;

pub use crate::config::{init_tracing, EvaluationConfig, LoggingConfig, ValueTreeConfig};
pub use crate::error::{ConfigError, ValueNodeError, ValueNodeResult};
pub use crate::format::{FacetBuffers, FormatRequest, TypeFormatter, ValueFormatter};
pub use crate::hierarchy::{DbgProcess, DbgRuntime, DbgThread, ProcessState, RuntimeKey};
pub use crate::language::{EvalContext, Language, LanguageEvaluator};
pub use crate::manager::{EvaluationManager, Pending};
pub use crate::node::{HasChildren, ImageName, NodeId, NodeInfo, ValueNode};
pub use crate::options::{NumberBase, TypeFormatterOptions, ValueFormatterOptions};
pub use crate::text::{FormattedText, SharedWriter, StringOutput, TextColor, TextColorWriter};
pub use crate::value::{Address, NodeKind, RawValue, Value};
