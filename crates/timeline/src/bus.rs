use tokio::sync::broadcast;

const DEFAULT_BUS_CAPACITY: usize = 32;

/// UI-originated commands aimed at the timeline controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UiCommand {
    JumpToBottom { smooth: bool },
    MarkAsStale,
    ReloadStale,
}

/// Typed publish/subscribe channel decoupling UI actions from the controller.
#[derive(Debug, Clone)]
pub struct CommandBus {
    sender: broadcast::Sender<UiCommand>,
}

impl CommandBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUS_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes to every live subscriber and returns how many received it.
    pub fn publish(&self, command: UiCommand) -> usize {
        self.sender.send(command).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UiCommand> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for CommandBus {
    fn default() -> Self {
        Self::new()
    }
}
