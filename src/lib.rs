//! A Helm chart repository server.
//!
//! On startup every chart directory under the configured chart dir is
//! packaged with a single fixed version, an `index.yaml` is built over the
//! resulting archives, and both are served over HTTP until the process is
//! told to stop.

pub mod config;
pub mod conn;
pub mod error;
pub mod hostname;
pub mod logging;
pub mod pipeline;
pub mod server;
pub mod store;
pub mod web;

pub use config::{RepoArgs, RepoConfig};
pub use conn::ConnectionTimeouts;
pub use error::{RepoError, RepoResult};
pub use hostname::{HostnameResolver, IngressDomainResolver, StaticHostname};
pub use server::{LifecycleState, RepoServer, ShutdownOutcome};
pub use store::IndexStore;
