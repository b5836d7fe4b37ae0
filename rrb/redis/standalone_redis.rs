use std::time::Instant;

use crate::prelude::*;

use super::Backend;

/// Standalone redis-server process on a free port, used for integration testing.
pub struct RedisStandalone {
    /// The port the server is running on.
    pub port: u16,
    child: std::process::Child,
}

impl RedisStandalone {
    /// Find an unused port to run the server on.
    pub fn find_unused_port() -> RResult<u16> {
        portpicker::pick_unused_port().ok_or_else(|| {
            error_stack::report!(BrokerError::Backend)
                .attach_printable("could not find a free port to run RedisStandalone on")
        })
    }

    /// Start a server process with the given port and extra arguments.
    /// Killed on drop.
    pub async fn new_with_opts(port: u16, extra_args: Option<&[&str]>) -> RResult<Self> {
        let mut cmd = std::process::Command::new("redis-server");
        cmd.arg("--port").arg(port.to_string());
        if let Some(extra_args) = extra_args {
            for arg in extra_args {
                cmd.arg(arg);
            }
        }
        let child = cmd.spawn().change_context(BrokerError::Backend)?;

        let backend = Backend::new(format!("redis://localhost:{}", port))?;
        let mut up = false;
        let elapsed = Instant::now();
        while !up && elapsed.elapsed() < std::time::Duration::from_secs(10) {
            if let Ok(mut conn) = backend.command_conn().await {
                up = conn.ping().await;
            }
        }

        if up {
            Ok(Self { child, port })
        } else {
            Err(error_stack::report!(BrokerError::Backend)
                .attach_printable("RedisStandalone process not ready in 10 seconds"))
        }
    }

    /// Start a server process on an unused port. Killed on drop.
    pub async fn new() -> RResult<Self> {
        RedisStandalone::new_with_opts(Self::find_unused_port()?, None).await
    }

    /// Start a server process on an unused port with persistence disabled, which is usually
    /// what a test wants.
    pub async fn new_no_persistence() -> RResult<Self> {
        RedisStandalone::new_with_opts(
            Self::find_unused_port()?,
            Some(&["--appendonly", "no", "--save", "\"\""]),
        )
        .await
    }

    /// The connection string clients should use to reach this instance.
    pub fn client_conn_str(&self) -> String {
        format!("redis://localhost:{}", self.port)
    }

    /// Kill the server. Automatically called on drop.
    pub fn kill(mut self) {
        self.kill_inner()
    }

    fn kill_inner(&mut self) {
        let _ = self.child.kill();
    }
}

impl Drop for RedisStandalone {
    fn drop(&mut self) {
        self.kill_inner()
    }
}
