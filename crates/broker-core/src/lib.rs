//! The broker's transport-agnostic core: the hub, connection capability
//! interface, deduplication, storage/auth collaborators, and sister
//! federation. Nothing in this crate knows what an HTTP upgrade is.

pub mod auth;
pub mod connection;
pub mod deduper;
pub mod hub;
pub mod sister;
pub mod storage;

pub use auth::{HubAuth, OpenAuth};
pub use connection::{new_conn_id, Connection, ConnId, ConnectionState, WriteFailed};
pub use deduper::{Deduper, StandardDeduper};
pub use hub::{Hub, HubHandle, ServerHandler};
pub use sister::{start as start_sister_manager, SisterCandidate, SisterManager, SimpleSisterManager};
pub use storage::{RingStorage, Storage};
