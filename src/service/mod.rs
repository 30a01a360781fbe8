//! Service identity, the backend registry client, and the shared service list.

mod registry;
mod store;
mod types;

pub use registry::{HttpServiceRegistry, ServiceRegistry};
pub use store::{ServicesSnapshot, ServicesStore};
pub use types::{
    Address, DeploymentStatus, FundRequirementTemplate, Service, ServiceHash, ServiceKeys,
    ServiceTemplate, StakingProgram, TemplateConfiguration,
};
