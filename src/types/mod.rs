pub mod definition;
pub mod job;
pub mod schema;
pub mod table;

// Re-export all public types for convenient `use crate::types::*` imports.
pub use self::definition::*;
pub use self::job::*;
pub use self::schema::*;
pub use self::table::*;
