//! Domain module
//!
//! Value types, domain errors and domain events.

pub mod context;
pub mod error;
pub mod events;
pub mod money;
pub mod split;

pub use context::OperationContext;
pub use error::{DomainError, ValidationError};
pub use events::{AccountEvent, DomainEvent, FieldChange, TransactionEvent};
pub use money::{Currency, Money, MoneyError};
pub use split::{SplitInput, SplitLine, SplitTarget};
