//! Versioning tables - operator version map, upgrader catalog, schemas

pub mod schema;
pub mod upgraders;
pub mod version_map;

pub use schema::{builtin_registry, OperatorSchema, SchemaOracle, SchemaRegistry, VersionMapOracle};
pub use upgraders::{builtin_upgraders, UpgraderCatalog};
pub use version_map::{
    builtin_version_map, find_upgrader, OperatorVersionMap, UpgraderEntry, MAX_OPERATOR_VERSION,
};
