//! Durable collaborators consumed by the engine: the auth blob store (C3)
//! and the instance metadata store (C4). Both are external systems per
//! §6.2-§6.3; this module defines the narrow interfaces and a concrete
//! filesystem / sqlx-backed implementation for each.

pub mod auth_blob;
pub mod metadata;

pub use auth_blob::{AuthBlobStore, FsAuthBlobStore};
pub use metadata::{InstanceMetadataStore, InstanceRecord, SqliteMetadataStore};
