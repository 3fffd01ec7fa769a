//! Orbit Catalogue - the replicated platform state model
//!
//! Value types for everything the control plane replicates: users, nodes,
//! namespaces, routers, TLS certificates, storage volumes, repositories and
//! deployments, plus the cluster-level join tokens. The catalogue itself is
//! a plain value; it knows nothing about its distributed nature. All
//! mutation goes through the finite state machine in `orbit-store`.

mod catalog;
mod certificate;
mod deployment;
mod error;
mod id;
mod namespace;
mod node;
mod repository;
mod router;
mod user;
mod volume;

pub use catalog::Catalog;
pub use certificate::{Certificate, Certificates, Challenge};
pub use deployment::{Deployment, Deployments};
pub use error::CatalogError;
pub use id::random_hex;
pub use namespace::{Namespace, Namespaces, ORBIT_SYSTEM_NAMESPACE};
pub use node::{Node, NodeRole, Nodes, NODE_FIELD_UNSET};
pub use repository::{Repositories, Repository};
pub use router::{Router, Routers};
pub use user::{Session, User, UserConfig, Users};
pub use volume::{Brick, Volume, VolumePaths, Volumes, ROOT_VOLUME_DIR};
