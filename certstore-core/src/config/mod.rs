mod constants;
mod store_config;

pub use constants::*;
pub use store_config::{AuthScheme, StoreConfig};
