//! Endpoint descriptors: one declared binding of a contract to an address.

use serde::{Deserialize, Serialize};

/// Token replaced with [`LOCAL_HOST`] when an address is resolved.
pub const HOST_TOKEN: &str = "{host}";

/// Token removed when an address is resolved.
pub const DEPLOYMENT_TOKEN: &str = "{Deployment}";

/// Host name substituted for [`HOST_TOKEN`].
pub const LOCAL_HOST: &str = "localhost";

/// Address prefix marking endpoints hosted by an external web server.
pub const WEB_ADDRESS_PREFIX: &str = "http";

/// An immutable endpoint declaration read from a contract module.
///
/// `name` is a label only and is not required to be unique. `binding` and
/// `contract` are type names resolved at bind time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointDescriptor {
    name: String,
    address: String,
    binding: String,
    contract: String,
}

impl EndpointDescriptor {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        address: impl Into<String>,
        binding: impl Into<String>,
        contract: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            binding: binding.into(),
            contract: contract.into(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The raw address, substitution tokens included.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    #[must_use]
    pub fn binding(&self) -> &str {
        &self.binding
    }

    #[must_use]
    pub fn contract(&self) -> &str {
        &self.contract
    }

    /// Returns `true` for addresses served by an external web server.
    ///
    /// The check is a plain prefix match, so both `http://` and `https://`
    /// addresses are excluded from local hosting.
    #[must_use]
    pub fn is_externally_hosted(&self) -> bool {
        self.address.starts_with(WEB_ADDRESS_PREFIX)
    }

    /// The address with all substitution tokens replaced.
    #[must_use]
    pub fn resolved_address(&self) -> String {
        resolve_address(&self.address)
    }
}

/// Replaces `{host}` with `localhost` and drops `{Deployment}`.
///
/// ```
/// use svchost_core::endpoint::resolve_address;
///
/// assert_eq!(
///     resolve_address("net.tcp://{host}/{Deployment}Foo"),
///     "net.tcp://localhost/Foo"
/// );
/// ```
#[must_use]
pub fn resolve_address(address: &str) -> String {
    address
        .replace(HOST_TOKEN, LOCAL_HOST)
        .replace(DEPLOYMENT_TOKEN, "")
}
