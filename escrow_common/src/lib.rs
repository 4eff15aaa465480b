mod helpers;
mod money;

pub mod op;
mod secret;

pub use helpers::{is_currency_code, parse_boolean_flag};
pub use money::{Money, MoneyConversionError, MINOR_UNITS_PER_MAJOR};
pub use secret::Secret;
