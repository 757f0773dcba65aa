//! Standard output of running user code.
//!
//! Workers write through a shared [`Output`]; whoever drives the evaluation
//! redirects it to a sink for the duration of a request.

use std::fmt;
use std::sync::{Arc, RwLock};

/// Receives text written by user code, in write order.
pub type OutputSink = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Default)]
pub struct Output {
    sink: RwLock<Option<OutputSink>>,
}

impl fmt::Debug for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Output")
            .field("redirected", &self.sink.read().unwrap().is_some())
            .finish()
    }
}

impl Output {
    /// Sends later writes to `sink`, returning the sink it replaces.
    pub fn redirect(&self, sink: OutputSink) -> Option<OutputSink> {
        self.sink.write().unwrap().replace(sink)
    }

    pub fn reset(&self) -> Option<OutputSink> {
        self.sink.write().unwrap().take()
    }

    /// Writes `text` to the current sink. Without one the text is discarded.
    pub fn write(&self, text: &str) {
        let sink = self.sink.read().unwrap().clone();
        match sink {
            Some(sink) => sink(text),
            None => tracing::trace!(len = text.len(), "discarding output with no sink"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[test]
    fn writes_follow_the_current_sink() {
        let output = Output::default();
        output.write("lost");

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = seen.clone();
        assert!(output.redirect(Arc::new(move |text: &str| sink_seen.lock().unwrap().push(text.to_string()))).is_none());
        output.write("a");
        output.write("b");
        assert!(output.reset().is_some());
        output.write("after");

        assert_eq!(*seen.lock().unwrap(), vec!["a".to_string(), "b".to_string()]);
    }
}
