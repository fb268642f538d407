//! Netmigrate Runtime
//!
//! This crate provides the execution runtime for network migrations.
//!
//! # Features
//!
//! - Tool server client manager with multiplexed, deadline-bounded calls
//! - Crash-safe checkpoint store
//! - Resumable workflow engine with retry and fallback policy
//!
//! # Usage
//!
//! ```rust,ignore
//! use netmigrate_runtime::{ClientManager, EngineSettings, FileCheckpointStore, ProcessDialer, WorkflowEngine};
//!
//! let manager = Arc::new(ClientManager::new(Arc::new(ProcessDialer::new(config.servers.clone()))));
//! let store = Arc::new(FileCheckpointStore::new(".netmigrate/checkpoints"));
//! let engine = WorkflowEngine::new(manager.clone(), store, EngineSettings::from_config(&config));
//! let report = engine.run(request).await?;
//! manager.shutdown().await;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod checkpoint;
pub mod dialer;
pub mod engine;
pub mod error;
pub mod link;
pub mod manager;
pub mod protocol;

pub use checkpoint::{CheckpointStore, FileCheckpointStore, Stage, WorkflowCheckpoint, WorkflowState};
pub use dialer::{Connection, Dialer, ProcessDialer};
pub use engine::{EngineSettings, RunReport, StageResult, StageStatus, WorkflowEngine};
pub use error::{MigrationError, Result};
pub use manager::{ClientManager, ToolInvoker};
