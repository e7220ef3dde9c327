#![doc = "faas-supervisor-core: event classification and storage data movement for function supervisors."]

//! A supervisor wraps a user workload inside a serverless or batch runtime. This
//! crate holds the part that deals with data:
//!
//! - [`event`] classifies the trigger payload;
//! - [`auth`] and [`registry`] turn declared credentials into storage backends;
//! - [`download`] fetches the triggering object (or persists the payload);
//! - [`upload`] fans output files out to the configured destinations.
//!
//! Process launching, runtime bootstrapping and response shaping live with the
//! caller. [`invocation::Supervisor`] is the entry point they use.

pub mod auth;
pub mod backend;
pub mod config;
pub mod contract;
pub mod download;
pub mod error;
pub mod event;
pub mod invocation;
pub mod registry;
pub mod upload;

pub use error::{Result, SupervisorError};
pub use invocation::{ErrorResponse, InvocationContext, Supervisor, WorkloadInvocation};
