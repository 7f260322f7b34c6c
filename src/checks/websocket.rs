use std::time::Duration;

use log::debug;

use crate::checks::describe;
use crate::config::CheckDescriptor;
use crate::report::Report;
use crate::transport::{Transport, WebSocketOptions};

pub const CONNECTED_MSG: &str = "websocket connected";

/// Opens a WebSocket, pings it and reports whether the connection is still alive. Connection
/// failures are reported the same way HTTP transport failures are.
pub async fn check<'a>(
    transport: &dyn Transport,
    check: &'a CheckDescriptor,
    default_timeout: Duration,
) -> Report<'a> {
    debug!("Running WebSocket check for {}", check.url);

    let options = match WebSocketOptions::from_args(&check.args, default_timeout) {
        Ok(options) => options,
        Err(e) => return Report::new(false, describe(&e), check),
    };
    let mut connection = match transport.open_websocket(&check.url, &options).await {
        Ok(connection) => connection,
        Err(e) => return Report::new(false, describe(&e), check),
    };

    let report = match connection.ping().await {
        Ok(()) => Report::new(connection.is_connected(), CONNECTED_MSG, check),
        Err(e) => Report::new(false, describe(&e), check),
    };
    connection.close().await;
    report
}
