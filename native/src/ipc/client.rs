// Client side of the pipe channel: one fresh connection per command.

use super::protocol::FAILED_RESPONSE;
use super::IpcError;

#[cfg(windows)]
pub use windows_client::{CoreServiceClient, PipeClient};

/// Parse a decimal count response. The failure token and any malformed
/// payload become typed errors, never a parse panic.
pub fn parse_count_response(response: &str) -> Result<u32, IpcError> {
    if response == FAILED_RESPONSE {
        return Err(IpcError::CommandFailed);
    }
    response
        .parse()
        .map_err(|_| IpcError::MalformedResponse(response.to_string()))
}

/// Parse a lowercase boolean response.
pub fn parse_bool_response(response: &str) -> Result<bool, IpcError> {
    match response {
        "true" => Ok(true),
        "false" => Ok(false),
        FAILED_RESPONSE => Err(IpcError::CommandFailed),
        other => Err(IpcError::MalformedResponse(other.to_string())),
    }
}

#[cfg(windows)]
mod windows_client {
    use std::time::Duration;

    use log::debug;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::windows::named_pipe::{ClientOptions, NamedPipeClient};
    use windows::Win32::Foundation::{ERROR_FILE_NOT_FOUND, ERROR_PIPE_BUSY};

    use super::super::IpcError;
    use super::{parse_bool_response, parse_count_response};

    const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(50);
    const CONNECT_RETRY_LIMIT: u32 = 40;

    /// Opens a fresh pipe connection per call, writes one command line,
    /// reads one response line, and closes. No pooling, no async contract:
    /// callers that need non-blocking behavior wrap calls in their own
    /// background task.
    pub struct PipeClient {
        pipe_name: String,
        runtime: tokio::runtime::Runtime,
    }

    impl PipeClient {
        pub fn new(pipe_name: impl Into<String>) -> Result<Self, IpcError> {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            Ok(Self {
                pipe_name: pipe_name.into(),
                runtime,
            })
        }

        /// Fire-and-forget command. The response line is still read, so
        /// the one-line-in/one-line-out contract holds, then discarded.
        pub fn send_message(&self, message: &str) -> Result<(), IpcError> {
            self.round_trip(message).map(drop)
        }

        /// Send one command line and return the stripped response line.
        pub fn send_and_receive_message(&self, message: &str) -> Result<String, IpcError> {
            self.round_trip(message)
        }

        fn round_trip(&self, message: &str) -> Result<String, IpcError> {
            self.runtime.block_on(async {
                let mut stream = self.connect().await?;
                stream.write_all(message.as_bytes()).await?;
                stream.write_all(b"\n").await?;
                stream.flush().await?;

                let mut reader = BufReader::new(stream);
                let mut line = String::new();
                let bytes = reader.read_line(&mut line).await?;
                if bytes == 0 {
                    return Err(IpcError::MalformedResponse(
                        "connection closed before a response line".into(),
                    ));
                }
                let response = line.trim_end_matches(['\r', '\n']).to_string();
                debug!("[PIPE] Response: {:?}", response);
                Ok(response)
            })
        }

        /// The server runs one instance at a time and recreates it between
        /// connections, so both busy and not-yet-created pipes are retried.
        async fn connect(&self) -> Result<NamedPipeClient, IpcError> {
            for _ in 0..CONNECT_RETRY_LIMIT {
                match ClientOptions::new().open(&self.pipe_name) {
                    Ok(client) => return Ok(client),
                    Err(e)
                        if e.raw_os_error() == Some(ERROR_PIPE_BUSY.0 as i32)
                            || e.raw_os_error() == Some(ERROR_FILE_NOT_FOUND.0 as i32) =>
                    {
                        tokio::time::sleep(CONNECT_RETRY_DELAY).await;
                    }
                    Err(e) => return Err(IpcError::Io(e)),
                }
            }
            Err(IpcError::ConnectTimeout)
        }
    }

    /// Typed wrappers over the wire commands, used by the unprivileged
    /// process (settings/persona subsystem and core-count displays).
    pub struct CoreServiceClient {
        pipe: PipeClient,
    }

    impl CoreServiceClient {
        pub fn new(pipe_name: impl Into<String>) -> Result<Self, IpcError> {
            Ok(Self {
                pipe: PipeClient::new(pipe_name)?,
            })
        }

        pub fn move_all_apps_to_efficiency_cores(&self) -> Result<(), IpcError> {
            self.pipe.send_message("MoveAllAppsToEfficiencyCores")
        }

        pub fn move_all_apps_to_some_efficiency_cores(&self) -> Result<(), IpcError> {
            self.pipe.send_message("MoveAllAppsToSomeEfficiencyCores")
        }

        pub fn move_app_to_hybrid_cores(
            &self,
            target: &str,
            efficiency_cores: u32,
            performance_cores: u32,
        ) -> Result<bool, IpcError> {
            let command = format!(
                "MoveAppToHybridCores {} {} {}",
                target, efficiency_cores, performance_cores
            );
            let response = self.pipe.send_and_receive_message(&command)?;
            parse_bool_response(&response)
        }

        pub fn move_all_apps_to_hybrid_cores(
            &self,
            efficiency_cores: u32,
            performance_cores: u32,
        ) -> Result<(), IpcError> {
            let command = format!(
                "MoveAllAppsToHybridCores {} {}",
                efficiency_cores, performance_cores
            );
            self.pipe.send_message(&command)
        }

        pub fn reset_to_default_cores(&self) -> Result<(), IpcError> {
            self.pipe.send_message("ResetToDefaultCores")
        }

        pub fn detect_core_count(&self) -> Result<(), IpcError> {
            self.pipe.send_message("DetectCoreCount")
        }

        pub fn total_core_count(&self) -> Result<u32, IpcError> {
            self.count_query("TotalCoreCount")
        }

        pub fn efficiency_core_count(&self) -> Result<u32, IpcError> {
            self.count_query("EfficiencyCoreCount")
        }

        pub fn performance_core_count(&self) -> Result<u32, IpcError> {
            self.count_query("PerformanceCoreCount")
        }

        fn count_query(&self, command: &str) -> Result<u32, IpcError> {
            let response = self.pipe.send_and_receive_message(command)?;
            parse_count_response(&response)
        }
    }
}
