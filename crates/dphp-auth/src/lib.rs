//! Authorization for durable state transitions.
//!
//! Every activity, entity and orchestration has a [`Resource`] recording its
//! owners, [`Share`]s and access [`Mode`]. The [`ResourceManager`] loads and
//! creates resources, consulting a [`PermissionSource`] for the creation
//! policy of each definition.

#![deny(unsafe_code)]

pub mod cache;
pub mod error;
pub mod manager;
pub mod operation;
pub mod permissions;
pub mod resource;
pub mod share;
pub mod source;
pub mod token;

pub use cache::{CacheConfig, PermissionCache};
pub use error::{AuthError, AuthResult};
pub use manager::{delete_message, resources_bucket, ResourceManager, DELETE_SUFFIX, RESOURCES_BUCKET};
pub use operation::{parse_operations, Mode, Operation};
pub use permissions::{CreatePermissions, Limits};
pub use resource::Resource;
pub use share::{Grantee, Share};
pub use source::{GluePermissionSource, PermissionSource};
pub use token::TokenIssuer;
