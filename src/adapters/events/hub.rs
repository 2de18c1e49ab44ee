use crate::domain::events::MediaEvent;
use tokio::sync::broadcast;

#[derive(Debug)]
pub struct EventHub {
    sender: broadcast::Sender<MediaEvent>,
}

impl EventHub {
    pub fn new() -> Self {
        // Lifecycle events are small and sporadic; 100 buffered is plenty
        let (sender, _) = broadcast::channel(100);
        Self { sender }
    }

    pub fn publish(
        &self,
        event: MediaEvent,
    ) -> Result<usize, broadcast::error::SendError<MediaEvent>> {
        self.sender.send(event)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MediaEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}
