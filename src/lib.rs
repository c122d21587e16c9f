pub mod data;
pub mod error;
pub mod loader;
pub mod resource;

pub use data::model::{Dataset, DatasetSummary, Field, Record};
pub use data::parser::{parse, Validation};
pub use error::{DtdError, LoadError, ParseError};
pub use loader::{load, DatasetLoader, LoadResult};
pub use resource::{ResourceLocator, ResourceName};
