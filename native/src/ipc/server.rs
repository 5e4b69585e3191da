// Pipe server hosting the command channel inside the elevated worker.
//
// One connection is serviced at a time, synchronously, on a dedicated
// accept thread; a Tokio runtime owned by that thread drives the pipe I/O.

use log::debug;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use super::protocol::{HandlerChain, FAILED_RESPONSE};
use super::IpcError;

#[cfg(windows)]
pub use windows_server::PipeServer;

/// Service one accepted connection: read exactly one command line,
/// dispatch it, write exactly one response line, and close.
///
/// A `None` from the dispatch chain becomes the literal failure token,
/// never an empty line. An I/O failure here terminates only this
/// connection; the accept loop carries on.
pub(crate) async fn handle_connection<S>(
    stream: S,
    handlers: &mut HandlerChain,
) -> Result<(), IpcError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    let bytes = reader.read_line(&mut line).await?;
    if bytes == 0 {
        // Client connected and closed without sending a command.
        return Ok(());
    }

    let request = line.trim_end_matches(['\r', '\n']);
    debug!("[PIPE] Received command: {:?}", request);

    let response = handlers.dispatch(request);
    let payload = response.as_deref().unwrap_or(FAILED_RESPONSE);

    let mut stream = reader.into_inner();
    stream.write_all(payload.as_bytes()).await?;
    stream.write_all(b"\n").await?;
    stream.flush().await?;
    Ok(())
}

#[cfg(windows)]
mod windows_server {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use log::{error, info};
    use tokio::net::windows::named_pipe::ServerOptions;

    use super::super::protocol::{HandlerChain, MessageHandler};
    use super::super::IpcError;
    use super::handle_connection;

    /// How long one `connect` wait may block before `running` is re-checked.
    pub const DEFAULT_ACCEPT_POLL: Duration = Duration::from_millis(500);

    /// Named pipe server with a single-connection accept loop.
    ///
    /// `stop()` flips the running flag and joins the accept thread; the
    /// bounded connect wait guarantees the flag is observed within one
    /// poll interval. Mid-connection cancellation is deliberately not
    /// supported: commands are short and the loop re-checks only between
    /// connections.
    pub struct PipeServer {
        pipe_name: String,
        accept_poll: Duration,
        handlers: Option<HandlerChain>,
        running: Arc<AtomicBool>,
        accept_thread: Option<thread::JoinHandle<()>>,
    }

    impl PipeServer {
        pub fn new(pipe_name: impl Into<String>) -> Self {
            Self {
                pipe_name: pipe_name.into(),
                accept_poll: DEFAULT_ACCEPT_POLL,
                handlers: Some(HandlerChain::new()),
                running: Arc::new(AtomicBool::new(false)),
                accept_thread: None,
            }
        }

        pub fn set_accept_poll(&mut self, poll: Duration) {
            self.accept_poll = poll;
        }

        /// Register a command namespace. Handlers are tried in
        /// registration order, first match wins.
        pub fn add_message_handler(&mut self, handler: Box<dyn MessageHandler>) {
            if let Some(chain) = self.handlers.as_mut() {
                chain.add_handler(handler);
            }
        }

        /// Spawn the accept thread. Handlers registered so far move into it.
        pub fn start(&mut self) -> Result<(), IpcError> {
            let mut handlers = self.handlers.take().ok_or(IpcError::AlreadyStarted)?;
            self.running.store(true, Ordering::SeqCst);

            let pipe_name = self.pipe_name.clone();
            let accept_poll = self.accept_poll;
            let running = Arc::clone(&self.running);

            let handle = thread::Builder::new()
                .name("pipe-accept".into())
                .spawn(move || {
                    let runtime = match tokio::runtime::Builder::new_current_thread()
                        .enable_all()
                        .build()
                    {
                        Ok(runtime) => runtime,
                        Err(e) => {
                            error!("[PIPE] Failed to create runtime: {}", e);
                            return;
                        }
                    };
                    runtime.block_on(accept_loop(
                        &pipe_name,
                        accept_poll,
                        &running,
                        &mut handlers,
                    ));
                })
                .map_err(IpcError::Io)?;

            self.accept_thread = Some(handle);
            Ok(())
        }

        /// Request shutdown and join the accept thread.
        pub fn stop(&mut self) {
            self.running.store(false, Ordering::SeqCst);
            if let Some(handle) = self.accept_thread.take() {
                if handle.join().is_err() {
                    error!("[PIPE] Accept thread panicked");
                }
            }
        }

        pub fn is_running(&self) -> bool {
            self.running.load(Ordering::SeqCst) && self.accept_thread.is_some()
        }
    }

    impl Drop for PipeServer {
        fn drop(&mut self) {
            self.stop();
        }
    }

    /// Idle -> WaitingForConnection -> Connected -> Idle, forever while
    /// running. A new pipe instance is created per connection; connection
    /// failures are logged and never terminate the loop.
    async fn accept_loop(
        pipe_name: &str,
        accept_poll: Duration,
        running: &AtomicBool,
        handlers: &mut HandlerChain,
    ) {
        info!("[PIPE] Listening on {}", pipe_name);
        let mut first_instance = true;

        while running.load(Ordering::SeqCst) {
            let server = match ServerOptions::new()
                .first_pipe_instance(first_instance)
                .create(pipe_name)
            {
                Ok(server) => server,
                Err(e) => {
                    error!("[PIPE] Failed to create pipe instance: {}", e);
                    break;
                }
            };
            first_instance = false;

            // Bounded wait so stop() is observed between connections.
            match tokio::time::timeout(accept_poll, server.connect()).await {
                Err(_) => continue,
                Ok(Err(e)) => {
                    error!("[PIPE] Connection failed: {}", e);
                    continue;
                }
                Ok(Ok(())) => {
                    if let Err(e) = handle_connection(server, handlers).await {
                        error!("[PIPE] Connection error: {}", e);
                    }
                }
            }
        }
        info!("[PIPE] Listener stopped");
    }
}
