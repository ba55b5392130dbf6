use tokio::sync::watch;

pub type ShutdownSender = watch::Sender<bool>;
pub type ShutdownReceiver = watch::Receiver<bool>;

pub fn channel() -> (ShutdownSender, ShutdownReceiver) {
    watch::channel(false)
}

pub fn trigger(sender: &ShutdownSender) {
    let _ = sender.send(true);
}

/// Non-blocking check, for loops that must finish their current unit of work
/// before exiting.
pub fn is_triggered(receiver: &ShutdownReceiver) -> bool {
    *receiver.borrow()
}

pub async fn wait(mut receiver: ShutdownReceiver) {
    while !*receiver.borrow() {
        if receiver.changed().await.is_err() {
            break;
        }
    }
}
