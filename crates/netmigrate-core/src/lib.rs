//! Netmigrate Core Library
//!
//! This crate provides the pure, I/O-free half of netmigrate:
//! - Configuration parsing and validation
//! - The migration data model (request, source inventory, canonical spec)
//! - The data transformer (source inventory → canonical spec)
//! - The validation engine (schema and cross-field rules)
//! - Rendering of the generation brief
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Inventory  │────▶│  Transform  │────▶│  Validate   │
//! │   (JSON)    │     │             │     │  (report)   │
//! └─────────────┘     └─────────────┘     └─────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use netmigrate_core::{SourceInventory, ValidationMode, transform, validate};
//!
//! let inventory = SourceInventory::fallback("cn-hangzhou");
//! let transformed = transform(&inventory)?;
//! let report = validate(&transformed.spec, ValidationMode::PostTransform);
//! assert!(report.is_valid);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod brief;
pub mod canonical;
pub mod cidr;
pub mod config;
pub mod error;
pub mod inventory;
pub mod request;
pub mod transform;
pub mod validate;

pub use canonical::{CanonicalSpec, CanonicalSubnet, IngressRule, Protocol};
pub use cidr::Ipv4Cidr;
pub use config::{Config, MigrationConfig};
pub use error::{Error, Result};
pub use inventory::{FirewallRule, SecurityGroup, SourceInventory, SourceSubnet};
pub use request::{CredentialSource, MigrationRequest, RunId, SourceSelector};
pub use transform::{Diagnostic, Transformed, transform};
pub use validate::{ValidationMode, ValidationReport, Violation, validate};
