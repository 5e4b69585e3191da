// Line-oriented command protocol shared by the elevated worker and its clients.

use log::debug;

/// Wire token written when no handler produced a response.
pub const FAILED_RESPONSE: &str = "failed";

/// One parsed request line: whitespace-separated tokens, the first of
/// which selects the operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandMessage {
    name: String,
    args: Vec<String>,
}

impl CommandMessage {
    /// Split a request line on single spaces. The line is expected to be
    /// stripped of its trailing newline by the transport.
    pub fn parse(line: &str) -> Self {
        let mut tokens = line.split(' ');
        let name = tokens.next().unwrap_or_default().to_string();
        let args = tokens.map(str::to_string).collect();
        Self { name, args }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }

    /// Strict numeric parse of one positional argument. `None` for a
    /// missing or non-numeric token; the caller turns that into a
    /// whole-command failure.
    pub fn int_arg(&self, index: usize) -> Option<u32> {
        self.args.get(index)?.parse().ok()
    }
}

/// One command namespace multiplexed over the shared channel.
///
/// A handler inspects the command name and either produces a response
/// (empty string for fire-and-forget acknowledgements) or declines with
/// `None` so the next handler in the chain can try.
pub trait MessageHandler: Send {
    fn try_handle(&mut self, message: &CommandMessage) -> Option<String>;
}

/// Ordered list of handlers tried in registration order, first match wins.
#[derive(Default)]
pub struct HandlerChain {
    handlers: Vec<Box<dyn MessageHandler>>,
}

impl HandlerChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_handler(&mut self, handler: Box<dyn MessageHandler>) {
        self.handlers.push(handler);
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Dispatch one request line. `None` when every handler declined;
    /// the transport writes [`FAILED_RESPONSE`] for it.
    pub fn dispatch(&mut self, line: &str) -> Option<String> {
        let message = CommandMessage::parse(line);
        for handler in &mut self.handlers {
            if let Some(response) = handler.try_handle(&message) {
                return Some(response);
            }
        }
        debug!("[PROTOCOL] No handler for command {:?}", message.name());
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_splits_on_single_spaces() {
        let message = CommandMessage::parse("MoveAppToHybridCores notepad.exe 2 4");
        assert_eq!(message.name(), "MoveAppToHybridCores");
        assert_eq!(message.args(), &["notepad.exe", "2", "4"]);
    }

    #[test]
    fn test_parse_bare_command() {
        let message = CommandMessage::parse("TotalCoreCount");
        assert_eq!(message.name(), "TotalCoreCount");
        assert!(message.args().is_empty());
    }

    #[test]
    fn test_parse_empty_line() {
        let message = CommandMessage::parse("");
        assert_eq!(message.name(), "");
        assert!(message.args().is_empty());
    }

    #[test]
    fn test_int_arg_is_strict() {
        let message = CommandMessage::parse("Cmd 12 12x -3");
        assert_eq!(message.int_arg(0), Some(12));
        assert_eq!(message.int_arg(1), None);
        assert_eq!(message.int_arg(2), None);
        assert_eq!(message.int_arg(3), None);
    }

    struct EchoHandler {
        accepts: &'static str,
    }

    impl MessageHandler for EchoHandler {
        fn try_handle(&mut self, message: &CommandMessage) -> Option<String> {
            (message.name() == self.accepts).then(|| format!("echo:{}", self.accepts))
        }
    }

    #[test]
    fn test_dispatch_first_match_wins() {
        let mut chain = HandlerChain::new();
        chain.add_handler(Box::new(EchoHandler { accepts: "A" }));
        chain.add_handler(Box::new(EchoHandler { accepts: "B" }));

        assert_eq!(chain.dispatch("A"), Some("echo:A".to_string()));
        assert_eq!(chain.dispatch("B"), Some("echo:B".to_string()));
    }

    #[test]
    fn test_dispatch_unknown_command_declines() {
        let mut chain = HandlerChain::new();
        chain.add_handler(Box::new(EchoHandler { accepts: "A" }));
        assert_eq!(chain.dispatch("Frobnicate"), None);
    }

    #[test]
    fn test_dispatch_with_no_handlers() {
        let mut chain = HandlerChain::new();
        assert!(chain.is_empty());
        assert_eq!(chain.dispatch("A"), None);
    }
}
