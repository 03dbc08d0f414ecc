//! Planta Common Library
//!
//! Shared constants, product identity types and configuration loading for
//! every crate of the production line workspace.
//!
//! # Module Structure
//!
//! - [`consts`] - Line topology and default names
//! - [`product`] - Product identity and in-flight records
//! - [`config`] - TOML configuration loading and the line configuration
//! - [`watchdog`] - Station process lifecycle contract
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use planta_common::prelude::*;
//!
//! let config = LineConfig::default();
//! assert_eq!(config.ipc.namespace, DEFAULT_NAMESPACE);
//! assert!(NUM_STATIONS > 1);
//! ```

pub mod config;
pub mod consts;
pub mod prelude;
pub mod product;
pub mod watchdog;
