//! Git smart-HTTP transport: pkt-line framing, lazily created bare
//! repositories, stateless-RPC `upload-pack`/`receive-pack` invocations and
//! read-only blob access.

pub mod errors;
pub mod files;
pub mod pkt;
pub mod process;
pub mod reader;
pub mod repo;
pub mod router;
pub mod service;
pub mod smart;
pub mod state;

pub use errors::GitHttpError;
pub use process::{GitProcessRunner, ProcessOutput, ServiceProcessRunner};
pub use reader::{GixRepositoryReader, RepositoryReader};
pub use repo::{RepositoryProvider, RepositoryStore};
pub use router::git_router;
pub use service::Service;
pub use state::{GitHttpContext, GitHttpState};
