//! Endpoint catalog: endpoint descriptors harvested from contract modules.
//!
//! Contract modules carry their endpoint declarations as embedded XML
//! resources whose name ends with [`ENDPOINTS_RESOURCE_SUFFIX`]:
//!
//! ```xml
//! <Config>
//!   <Endpoint Name="calc" Address="net.tcp://{host}/calc"
//!             Binding="TcpBinding" Contract="Acme.ICalc" />
//! </Config>
//! ```

use tracing::debug;

use crate::endpoint::EndpointDescriptor;
use crate::error::CatalogError;
use crate::manifest::{EmbeddedResource, ModuleManifest};

/// Case-insensitive suffix identifying endpoint configuration resources.
pub const ENDPOINTS_RESOURCE_SUFFIX: &str = "endpoints.config";

const ROOT_ELEMENT: &str = "Config";
const ENDPOINT_ELEMENT: &str = "Endpoint";

/// Ordered collection of endpoint descriptors.
///
/// Insertion order is preserved and duplicates are kept, including
/// duplicates loaded from different modules.
#[derive(Debug, Clone, Default)]
pub struct EndpointCatalog {
    endpoints: Vec<EndpointDescriptor>,
}

impl EndpointCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads every endpoint configuration resource embedded in `module`.
    ///
    /// Returns `Ok(false)` when the module has no such resource.
    ///
    /// # Errors
    ///
    /// Returns a [`CatalogError`] if a resource is not well-formed XML or an
    /// endpoint lacks a required attribute. Endpoints parsed from earlier
    /// resources of the same module remain in the catalog.
    pub fn try_load(&mut self, module: &ModuleManifest) -> Result<bool, CatalogError> {
        let mut found = false;
        for resource in module
            .resources
            .iter()
            .filter(|r| is_endpoints_resource(&r.name))
        {
            let endpoints = parse_resource(resource)?;
            debug!(
                "Loaded {} endpoint(s) from {} in {}",
                endpoints.len(),
                resource.name,
                module.name
            );
            self.endpoints.extend(endpoints);
            found = true;
        }
        Ok(found)
    }

    pub fn push(&mut self, endpoint: EndpointDescriptor) {
        self.endpoints.push(endpoint);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, EndpointDescriptor> {
        self.endpoints.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

impl<'a> IntoIterator for &'a EndpointCatalog {
    type Item = &'a EndpointDescriptor;
    type IntoIter = std::slice::Iter<'a, EndpointDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl Extend<EndpointDescriptor> for EndpointCatalog {
    fn extend<T: IntoIterator<Item = EndpointDescriptor>>(&mut self, iter: T) {
        self.endpoints.extend(iter);
    }
}

/// Returns `true` if a resource name ends with `endpoints.config`, ignoring case.
#[must_use]
pub fn is_endpoints_resource(name: &str) -> bool {
    let suffix_len = ENDPOINTS_RESOURCE_SUFFIX.len();
    name.len() >= suffix_len
        && name.is_char_boundary(name.len() - suffix_len)
        && name[name.len() - suffix_len..].eq_ignore_ascii_case(ENDPOINTS_RESOURCE_SUFFIX)
}

fn parse_resource(resource: &EmbeddedResource) -> Result<Vec<EndpointDescriptor>, CatalogError> {
    parse_endpoints(&resource.name, &resource.content)
}

/// Parses the `Config/Endpoint` elements of an endpoint configuration document.
///
/// A document whose root element is not `Config` yields no endpoints.
///
/// # Errors
///
/// See [`EndpointCatalog::try_load`].
pub fn parse_endpoints(resource: &str, text: &str) -> Result<Vec<EndpointDescriptor>, CatalogError> {
    let doc = roxmltree::Document::parse(text).map_err(|source| CatalogError::Markup {
        resource: resource.to_string(),
        source,
    })?;

    let root = doc.root_element();
    if !root.has_tag_name(ROOT_ELEMENT) {
        return Ok(Vec::new());
    }

    root.children()
        .filter(|node| node.is_element() && node.has_tag_name(ENDPOINT_ELEMENT))
        .map(|node| {
            let required = |attribute: &'static str| {
                node.attribute(attribute)
                    .ok_or_else(|| CatalogError::MissingAttribute {
                        resource: resource.to_string(),
                        attribute,
                    })
            };
            Ok(EndpointDescriptor::new(
                required("Name")?,
                required("Address")?,
                required("Binding")?,
                required("Contract")?,
            ))
        })
        .collect()
}
