//! TCP connect with a bounded timeout.
//!
//! # Example
//!
//! ```ignore
//! use wirelink::{transport, ChannelConfig};
//!
//! let stream = transport::connect(&ChannelConfig::new("127.0.0.1", 9000)).await?;
//! ```

use tokio::net::TcpStream;

use crate::config::ChannelConfig;
use crate::error::{ChannelError, Result};

/// Open a TCP connection to `config.address()`.
///
/// Only the connect itself is bounded by `connection_timeout`; reads and
/// writes on the returned stream block until data or failure.
pub async fn connect(config: &ChannelConfig) -> Result<TcpStream> {
    let address = config.address();

    let connecting = TcpStream::connect(&address);
    let stream = match tokio::time::timeout(config.connection_timeout, connecting).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => return Err(ChannelError::Io(e)),
        Err(_) => return Err(ChannelError::ConnectTimeout(config.connection_timeout)),
    };

    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(error = %e, "Failed to set TCP_NODELAY");
    }

    tracing::debug!(address = %address, "TCP connection established");
    Ok(stream)
}
