//! Shared helpers for server-bound commands.

use labsync_core::{SyncClient, new_shared_state};
use tracing::debug;

use crate::config::Session;
use crate::error::CliError;

/// Connect and wait for the first `initial_state`.
///
/// On failure the client is shut down before the error is returned.
pub async fn connect(session: &Session) -> Result<SyncClient, CliError> {
    let state = new_shared_state(&session.sync);
    let client = SyncClient::new(session.sync.clone(), state)?;
    debug!(session_url = %client.session_url(), "connecting");
    client.connect().await;

    if let Err(e) = client.wait_for_hydration(session.hydration_timeout).await {
        client.shutdown().await;
        return Err(e.into());
    }
    Ok(client)
}

/// `"1.5"` for values with a fraction, `"2000"` for whole numbers.
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{value:.0}")
    } else {
        format!("{value:.2}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_numbers_drop_the_fraction() {
        assert_eq!(format_number(2000.0), "2000");
        assert_eq!(format_number(21.456), "21.46");
    }
}
