pub mod error;
pub mod profile;

pub use error::{ConfigError, ConfigResult};
pub use profile::{load_profile, parse_profile, Profile};
