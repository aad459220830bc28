//! Server and model registry.
//!
//! The registry is the single source of truth for fleet topology: which
//! backends exist, which models they hold, whether they are healthy, and
//! which (server, model) pairs are administratively banned. URLs are
//! canonicalized on entry so the same backend can never be registered twice
//! under cosmetically different addresses.
//!
//! # Examples
//!
//! ```rust
//! use herd_registry::{Registry, ServerSpec};
//!
//! let registry = Registry::new(4);
//! let server = registry
//!     .add(ServerSpec::new("http://Node-1.local:80/"))
//!     .unwrap();
//!
//! // Default port and trailing slash are normalized away; a second add of
//! // the same backend is rejected.
//! assert_eq!(server.url, "http://node-1.local");
//! assert!(registry.add(ServerSpec::new("http://node-1.local")).is_err());
//! ```

mod bans;
mod events;
mod normalize;
mod registry;
mod server;

pub use bans::{Ban, BanKey};
pub use events::RegistryEvent;
pub use normalize::{normalize_url, NormalizeError};
pub use registry::{ProbeUpdate, Registry, RegistryError, ServerSpec, ServerUpdate};
pub use server::{LoadedModel, Server, ServerType};
