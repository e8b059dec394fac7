use tokio::sync::mpsc;

/// Write side of the response stream of one command invocation.
///
/// The reading side (a control connection, the watcher, a test) sees the stream end once the sink is closed or dropped.
#[derive(Debug)]
pub struct ResponseSink {
    tx: Option<mpsc::UnboundedSender<String>>,
}

impl ResponseSink {
    /// Create a sink and the receiver that observes it.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// Append a chunk; a no-op once closed or when the reader went away.
    pub fn write(&mut self, chunk: impl Into<String>) {
        if let Some(tx) = &self.tx
            && tx.send(chunk.into()).is_err()
        {
            self.tx = None;
        }
    }

    /// Close the stream. Returns `true` only for the call that actually closed it.
    pub fn close(&mut self) -> bool {
        self.tx.take().is_some()
    }

    pub fn is_open(&self) -> bool {
        self.tx.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_happens_once() {
        let (mut sink, mut rx) = ResponseSink::channel();
        sink.write("a");
        assert!(sink.close());
        assert!(!sink.close());
        sink.write("ignored");

        assert_eq!(rx.try_recv().unwrap(), "a");
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn dropped_reader_closes_the_sink() {
        let (mut sink, rx) = ResponseSink::channel();
        drop(rx);
        sink.write("lost");
        assert!(!sink.is_open());
    }
}
