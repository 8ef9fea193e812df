//! MMS value and type model.
//!
//! - `Variant` - Decoded data value (float, integer, timestamp, bit string)
//! - `AccessResult` - Per-variable read outcome
//! - `TypeSpecification` - Recursive type description
//! - `ObjectName` - Variable addressing
//! - `ParameterCbb` / `ServiceSupported` - Initiate capability flags

mod access_result;
mod capability;
mod object_name;
mod type_spec;
mod variant;

pub use access_result::*;
pub use capability::*;
pub use object_name::*;
pub use type_spec::*;
pub use variant::*;
