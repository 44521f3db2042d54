//! keel-core
//!
//! Pure domain types for declarative infrastructure manifests: resource kinds,
//! descriptors, property expressions, scopes and parameters.
//! No async and no provider dependency. This is the shared vocabulary of keel.

#![recursion_limit = "256"]

pub mod addr;
pub mod error;
pub mod kind;
pub mod manifest;
pub mod params;
pub mod scope;
pub mod secret;
pub mod value;

pub use crate::addr::ResourceAddr;
pub use crate::error::{ManifestError, ValueError};
pub use crate::kind::ResourceKind;
pub use crate::manifest::{Manifest, Mode, ResourceDescriptor};
pub use crate::params::{BoundParameters, Parameter, ParameterValue, ParameterValues};
pub use crate::scope::{ScopeField, ScopeSpec};
pub use crate::secret::Secret;
pub use crate::value::{OutputRef, PropertyValue, Reference, Segment, Template};
