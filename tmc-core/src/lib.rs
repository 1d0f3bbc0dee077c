//! Core data model, keying and error taxonomy for the TMC overlay control
//! plane: §3 data model, C1 keying, the shared §7 error taxonomy, and the
//! §6 dynamic-resource-client boundary.

pub mod client;
pub mod constants;
pub mod error;
pub mod key;
pub mod model;
pub mod value;

pub use client::{ClientError, DynamicResourceClient, Gvr, PropagationPolicy};
pub use error::{is_retryable, ConflictType, Error, ErrorKind, Sentinel};
pub use key::{extract_original_name, is_workspace_resource, make_key, parse_key, qualify_name, ParsedKey, WorkspaceName};
pub use value::Object;
