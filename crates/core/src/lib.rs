pub mod amount;
pub mod fuzzy;
pub mod receipt;

pub use amount::{Amount, AmountError};
pub use fuzzy::token_set_ratio;
pub use receipt::Receipt;
