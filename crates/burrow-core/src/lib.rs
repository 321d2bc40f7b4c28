//! Orchestration for burrow environments.
//!
//! This crate ties the manifest model, the artifact cache, and the runtime
//! together: the parallel [`Resolver`] turns declared inputs into verified
//! artifacts, the lifecycle state machine guards each [`Session`] from
//! resolution through activation, and [`Engine`] wires both to a store and a
//! package provider picked from [`Config`].

pub mod concurrency;
pub mod config;
pub mod engine;
pub mod lifecycle;
pub mod resolver;

pub use concurrency::{install_signal_handler, shutdown_requested, CancelToken};
pub use config::Config;
pub use engine::{Engine, Session};
pub use lifecycle::{validate_transition, ActivationState};
pub use resolver::{MissingInput, MissingReason, ResolutionError, ResolveOptions, Resolver};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("manifest error: {0}")]
    Manifest(#[from] burrow_schema::ManifestError),
    #[error("lock error: {0}")]
    Lock(#[from] burrow_schema::LockError),
    #[error("store error: {0}")]
    Store(#[from] burrow_store::StoreError),
    #[error("runtime error: {0}")]
    Runtime(#[from] burrow_runtime::RuntimeError),
    #[error("activation error: {0}")]
    Activation(#[from] burrow_runtime::ActivationError),
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    #[error("config error in {path}: {reason}")]
    Config { path: String, reason: String },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
