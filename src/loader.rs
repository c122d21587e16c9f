use log::info;

use crate::data::model::Dataset;
use crate::data::parser::{self, Validation};
use crate::error::LoadError;
use crate::resource::{ResourceLocator, ResourceName};

/// Outcome of one [`DatasetLoader::load`] call.
pub type LoadResult = Result<Dataset, LoadError>;

/// Loads an XML record database and its DTD from bundled resources.
///
/// The loader holds nothing but its resource roots, so it can be shared
/// between threads and called concurrently. Every call re-reads both files
/// and returns a dataset owned by the caller.
#[derive(Debug, Clone)]
pub struct DatasetLoader {
    locator: ResourceLocator,
}

impl DatasetLoader {
    /// Bundled databases are read leniently.
    pub const VALIDATION: Validation = Validation::Lenient;

    pub fn new(locator: ResourceLocator) -> Self {
        DatasetLoader { locator }
    }

    /// Loader over the roots configured in the environment
    /// (see [`ResourceLocator::from_env`]).
    pub fn from_env() -> Self {
        Self::new(ResourceLocator::from_env())
    }

    pub fn locator(&self) -> &ResourceLocator {
        &self.locator
    }

    /// Resolve both resources, then parse them.
    pub fn load(
        &self,
        xml: impl Into<ResourceName>,
        dtd: impl Into<ResourceName>,
    ) -> LoadResult {
        let xml = xml.into();
        let dtd = dtd.into();

        let xml_path = self.locator.resolve(&xml)?;
        let dtd_path = self.locator.resolve(&dtd)?;
        info!("loading `{xml}` against `{dtd}`");

        parser::parse(&xml_path, &dtd_path, Self::VALIDATION).map_err(|source| {
            LoadError::ParseFailure {
                xml: xml_path,
                source,
            }
        })
    }
}

/// Load `xml` and `dtd` from the roots configured in the environment.
pub fn load(xml: impl Into<ResourceName>, dtd: impl Into<ResourceName>) -> LoadResult {
    DatasetLoader::from_env().load(xml, dtd)
}
