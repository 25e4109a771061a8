//! Handle given to a running work function.

use serde_json::Value;
use tokio::sync::mpsc;

use crate::execution::envelope::Envelope;
use crate::jobs::JobId;

/// The execution side of a job's message channels.
///
/// `emit` reports progress through the default protocol. The custom channel
/// is only open when the job was created with a message handler.
#[derive(Debug)]
pub struct ExecutionContext {
    job_id: JobId,
    outbound: mpsc::UnboundedSender<Envelope>,
    inbound: Option<mpsc::UnboundedReceiver<Value>>,
}

impl ExecutionContext {
    pub(crate) fn new(
        job_id: JobId,
        outbound: mpsc::UnboundedSender<Envelope>,
        inbound: Option<mpsc::UnboundedReceiver<Value>>,
    ) -> Self {
        Self {
            job_id,
            outbound,
            inbound,
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Report progress. Returns false if the registry is no longer listening.
    pub fn emit(&self, data: Value) -> bool {
        self.outbound
            .send(Envelope::progress(self.job_id, data))
            .is_ok()
    }

    pub fn has_custom_channel(&self) -> bool {
        self.inbound.is_some()
    }

    /// Send a custom message to the job's handler. Returns false when the job
    /// has no custom channel.
    pub fn send_custom(&self, payload: Value) -> bool {
        if !self.has_custom_channel() {
            return false;
        }
        self.outbound
            .send(Envelope::custom(self.job_id, payload))
            .is_ok()
    }

    /// Wait for the next custom message posted to this job. `None` when the
    /// channel is absent or closed.
    pub async fn recv_custom(&mut self) -> Option<Value> {
        match self.inbound.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }
}
