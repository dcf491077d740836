//! grafop core types: custom resources, resource identity, selector
//! evaluation, the shared configuration cache and the error taxonomy.

#![forbid(unsafe_code)]

pub mod config;
pub mod crd;
pub mod error;
pub mod selector;

pub use config::{ControllerConfig, Images};
pub use error::{Error, ErrorKind, Result};
