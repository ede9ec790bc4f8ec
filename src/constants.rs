/// Common constants used across the shrinker.
///
/// These defaults are used for command line arguments and
/// for the layout of the working directory.
pub const DEFAULT_PROFILE: &str = "default";

/// Keys accepted in a profile section
pub const PROFILE_KEYS: &[&str] = &["workdir", "db_socket", "db_user", "db_password", "use_hardlink"];

/// Run state file, one per working directory
pub const STATE_FILE_NAME: &str = "ibshrink-state.json";
pub const LOCK_FILE_NAME: &str = ".ibshrink.lock";
pub const STATE_SCHEMA_VERSION: u32 = 1;

/// Schemas owned by the server itself, converted instead of exported
pub const CATALOG_SCHEMAS: &[&str] = &["mysql", "sys"];

/// Schemas never enumerated: they hold no persistent InnoDB tables
pub const EXCLUDED_SCHEMAS: &[&str] = &["information_schema", "performance_schema"];

/// Engine of tables living in (or registered with) the system tablespace
pub const TRANSACTIONAL_ENGINE: &str = "InnoDB";
/// File-based engine internal tables are parked in between the stages
pub const FILE_ENGINE: &str = "MyISAM";

pub const TABLESPACE_EXTENSION: &str = "ibd";
pub const METADATA_EXTENSION: &str = "cfg";
pub const DEFINITION_SUFFIX: &str = "createtable.sql";
