//! Service description published by metadata endpoints.

use serde::{Deserialize, Serialize};

use super::ServiceEndpoint;

/// Action answered by metadata endpoints.
pub const GET_ACTION: &str = "Get";

/// Describes one hosted service and every endpoint it exposes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescription {
    pub service: String,
    pub endpoints: Vec<EndpointDescription>,
}

/// One entry of a [`ServiceDescription`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointDescription {
    pub address: String,
    pub contract: String,
    pub binding: String,
}

impl ServiceDescription {
    #[must_use]
    pub fn describe(service: &str, endpoints: &[ServiceEndpoint]) -> Self {
        Self {
            service: service.to_string(),
            endpoints: endpoints
                .iter()
                .map(|endpoint| EndpointDescription {
                    address: endpoint.address.clone(),
                    contract: endpoint.contract.clone(),
                    binding: endpoint.binding.name().to_string(),
                })
                .collect(),
        }
    }
}
