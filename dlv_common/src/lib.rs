mod money;

pub mod helpers;
pub mod op;
mod secret;

pub use money::{Money, MoneyConversionError, BASIS_POINTS};
pub use secret::Secret;
