//! Authentication hook run on every new connection.
//!
//! The login payload belongs to the command layer, so this crate only
//! defines the seam. Implementations exchange whatever messages they need
//! over the connection (typically with [`MessageType::Authenticate`]).
//!
//! [`MessageType::Authenticate`]: crate::protocol::MessageType::Authenticate

use std::fmt::Debug;

use async_trait::async_trait;
use corelib::Result;

use crate::connection::Connection;

/// Logs a freshly opened connection in.
///
/// Rejected credentials should be reported as
/// [`Error::NotAuthenticated`](corelib::Error::NotAuthenticated) so seeding
/// can tell them apart from connectivity failures.
#[async_trait]
pub trait Authenticator: Send + Sync + Debug {
    async fn authenticate(&self, conn: &mut Connection, user: &str, password: &[u8]) -> Result<()>;
}
