//! Auth collaborator, hub-side half (§4.6).
//!
//! `IsValid`/`IsSister`/`ConnToRequest` are handshake-time predicates that
//! need the upgrade request (an `http::HeaderMap`, owned by the transport
//! crate) and live in `broker-server` instead — this crate stays transport
//! agnostic. `CanBind`/`CanWrite` run on the hub's hot path and only need
//! the `Connection` capability set, so they live here.

use broker_protocol::Message;

use crate::connection::Connection;

pub trait HubAuth: Send + Sync {
    fn can_bind(&self, conn: &dyn Connection, msg: &Message) -> bool;
    fn can_write(&self, conn: &dyn Connection, msg: &Message) -> bool;
}

/// Accepts every bind and applies the default write rule described in
/// §4.6: a connection may write to a channel it is bound to. Mirrors the
/// original's `SimpleAuthClient`, which accepts every connection with no
/// further checks.
pub struct OpenAuth;

impl HubAuth for OpenAuth {
    fn can_bind(&self, _conn: &dyn Connection, _msg: &Message) -> bool {
        true
    }

    fn can_write(&self, conn: &dyn Connection, msg: &Message) -> bool {
        conn.channels().iter().any(|c| c == &msg.channel)
    }
}
