//! Event-bus consumer for a replay run.
//!
//! A single task owns the receiver and folds console, network and navigation events into
//! [`Observations`]. The engine reads the observations between browser operations; `flush` is a
//! barrier that guarantees every event published before the call has been folded in.

use std::sync::Arc;

use cdp_adapter::RawEvent;
use goldpath_core_types::{Anomaly, ConsoleLine};
use parking_lot::Mutex;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::console::ConsoleBuffer;
use crate::har::{millis_to_datetime, HarRecorder, RequestEvent, ResponseEvent};
use crate::trace::{TraceEvent, TraceRecorder};

#[derive(Debug)]
pub struct Observations {
    pub console: ConsoleBuffer,
    pub anomalies: Vec<Anomaly>,
    pub har: HarRecorder,
    pub trace: TraceRecorder,
}

impl Observations {
    pub fn new(console_capacity: usize, trace: TraceRecorder) -> Self {
        Self {
            console: ConsoleBuffer::new(console_capacity),
            anomalies: Vec::new(),
            har: HarRecorder::new(),
            trace,
        }
    }

    pub fn observe(&mut self, event: RawEvent) {
        match event {
            RawEvent::Console {
                level, text, ts, ..
            } => {
                let timestamp = millis_to_datetime(ts);
                self.trace.push(TraceEvent::Console {
                    level: level.clone(),
                    text: text.clone(),
                    timestamp,
                });
                self.console.push(ConsoleLine {
                    level,
                    text,
                    timestamp,
                });
            }
            RawEvent::PageNavigated {
                url,
                same_document,
                ts,
                ..
            } => self.trace.push(TraceEvent::Navigation {
                url,
                same_document,
                timestamp: millis_to_datetime(ts),
            }),
            RawEvent::NetworkRequest {
                request_id,
                url,
                method,
                resource_type,
                headers,
                post_data,
                ts,
                ..
            } => self.har.on_request(RequestEvent {
                request_id: &request_id,
                url: &url,
                method: &method,
                resource_type: &resource_type,
                headers: &headers,
                post_data: post_data.as_deref(),
                ts,
            }),
            RawEvent::NetworkResponse {
                request_id,
                url,
                method,
                status,
                status_text,
                mime_type,
                resource_type,
                protocol,
                headers,
                ts,
                ..
            } => {
                self.har.on_response(ResponseEvent {
                    request_id: &request_id,
                    status,
                    status_text: &status_text,
                    mime_type: &mime_type,
                    protocol: protocol.as_deref(),
                    headers: &headers,
                    ts,
                });
                if status >= 400 {
                    debug!(target: "replay", status, %url, "http anomaly");
                    self.anomalies.push(Anomaly {
                        url,
                        method,
                        status,
                        status_text,
                        resource_type,
                        timestamp: millis_to_datetime(ts),
                    });
                }
            }
            RawEvent::NetworkFinished {
                request_id,
                encoded_data_length,
                ts,
                ..
            } => self.har.on_finished(&request_id, encoded_data_length, ts),
            RawEvent::NetworkFailed {
                request_id,
                error_text,
                ts,
                ..
            } => self.har.on_failed(&request_id, &error_text, ts),
            RawEvent::Disconnected { reason } => {
                warn!(target: "replay", %reason, "browser disconnected during replay");
            }
            _ => {}
        }
    }
}

enum Control {
    Flush(oneshot::Sender<()>),
    Stop(oneshot::Sender<()>),
}

pub struct Observer {
    state: Arc<Mutex<Observations>>,
    control: mpsc::Sender<Control>,
    task: Option<JoinHandle<()>>,
}

impl Observer {
    pub fn spawn(events: broadcast::Receiver<RawEvent>, observations: Observations) -> Self {
        let state = Arc::new(Mutex::new(observations));
        let (control, commands) = mpsc::channel(8);
        let task = tokio::spawn(pump(Arc::clone(&state), events, commands));
        Self {
            state,
            control,
            task: Some(task),
        }
    }

    /// Run `f` against the current observations. Never hold across an await.
    pub fn with<R>(&self, f: impl FnOnce(&mut Observations) -> R) -> R {
        f(&mut *self.state.lock())
    }

    /// Wait until every event published so far has been observed.
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.control.send(Control::Flush(ack)).await.is_ok() {
            let _ = done.await;
        }
    }

    /// Fold in remaining events and end the task. Observations stay readable.
    pub async fn stop(&mut self) {
        let (ack, done) = oneshot::channel();
        if self.control.send(Control::Stop(ack)).await.is_ok() {
            let _ = done.await;
        }
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                warn!(target: "replay", ?err, "observer task ended abnormally");
            }
        }
    }
}

async fn pump(
    state: Arc<Mutex<Observations>>,
    mut events: broadcast::Receiver<RawEvent>,
    mut commands: mpsc::Receiver<Control>,
) {
    let mut events_open = true;
    loop {
        tokio::select! {
            biased;
            command = commands.recv() => {
                drain(&state, &mut events);
                match command {
                    Some(Control::Flush(ack)) => {
                        let _ = ack.send(());
                    }
                    Some(Control::Stop(ack)) => {
                        let _ = ack.send(());
                        break;
                    }
                    None => break,
                }
            }
            received = events.recv(), if events_open => match received {
                Ok(event) => state.lock().observe(event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(target: "replay", skipped, "event bus lagged; observations incomplete");
                }
                Err(RecvError::Closed) => events_open = false,
            },
        }
    }
}

fn drain(state: &Mutex<Observations>, events: &mut broadcast::Receiver<RawEvent>) {
    loop {
        match events.try_recv() {
            Ok(event) => state.lock().observe(event),
            Err(TryRecvError::Lagged(skipped)) => {
                warn!(target: "replay", skipped, "event bus lagged; observations incomplete");
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
        }
    }
}
