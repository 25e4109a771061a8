//! Starts execution contexts and supervises them until they exit.
//!
//! Every context runs on its own OS thread with a current-thread tokio
//! runtime, so work that blocks or never yields cannot starve the registry,
//! the timers or the HTTP server. Envelopes and the final exit reason cross
//! back to the supervisor task over channels.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::{AbortHandle, Abortable};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use crate::error::JobError;
use crate::execution::context::ExecutionContext;
use crate::execution::envelope::{Envelope, Message};
use crate::jobs::{JobId, JobResult};
use crate::services::{JobFunction, MessageHandler};

/// How an execution context ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    /// The work function returned (successfully or not).
    Returned,
    /// The context was aborted by a cancel.
    Aborted,
    /// The work function panicked.
    Panicked(String),
    /// The context could not run the work function at all.
    Failed(String),
}

/// Receives default-protocol results and exits from supervised contexts.
#[async_trait]
pub trait ExecutionObserver: Send + Sync {
    async fn on_result(&self, job_id: JobId, result: JobResult);
    async fn on_exit(&self, job_id: JobId, reason: ExitReason);
}

/// Everything needed to start one execution context.
pub struct Launch {
    pub job_id: JobId,
    pub function: Arc<dyn JobFunction>,
    pub payload: Value,
    pub handler: Option<Arc<dyn MessageHandler>>,
}

/// Registry-side handle to a live execution context.
#[derive(Debug)]
pub struct Running {
    /// Stops the work function at its next await point. Work that is busy
    /// between awaits keeps its thread until it yields or returns.
    pub abort: AbortHandle,
    /// Sender for custom messages into the context, when it has a handler.
    pub inbound: Option<mpsc::UnboundedSender<Value>>,
}

/// Start the work function on a dedicated thread plus a supervisor task
/// that routes its envelopes and reports its exit.
///
/// Must be called from within a tokio runtime.
pub fn launch(launch: Launch, observer: Arc<dyn ExecutionObserver>) -> Running {
    let Launch {
        job_id,
        function,
        payload,
        handler,
    } = launch;

    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let (inbound, inbound_rx) = match handler {
        Some(_) => {
            let (tx, rx) = mpsc::unbounded_channel();
            (Some(tx), Some(rx))
        }
        None => (None, None),
    };
    let (abort, registration) = AbortHandle::new_pair();
    let (exit_tx, exit_rx) = oneshot::channel();

    let ctx = ExecutionContext::new(job_id, out_tx.clone(), inbound_rx);
    let unit = move || {
        let work = Abortable::new(
            async move {
                let envelope = match function.call(payload, ctx).await {
                    Ok(output) => Envelope::completed(job_id, output),
                    Err(e) => Envelope::failed(job_id, &JobError::execution_failed(e.to_string())),
                };
                // The supervisor waits for the exit signal, so the receiver is still open.
                let _ = out_tx.send(envelope);
            },
            registration,
        );
        let reason = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(rt) => match panic::catch_unwind(AssertUnwindSafe(|| rt.block_on(work))) {
                Ok(Ok(())) => ExitReason::Returned,
                Ok(Err(_aborted)) => ExitReason::Aborted,
                Err(payload) => ExitReason::Panicked(panic_message(payload.as_ref())),
            },
            Err(e) => ExitReason::Failed(format!("could not build runtime: {e}")),
        };
        let _ = exit_tx.send(reason);
    };

    if let Err(e) = std::thread::Builder::new()
        .name(format!("job-{job_id}"))
        .spawn(unit)
    {
        // The dropped closure closes the exit channel; the supervisor reports it.
        error!(job_id = %job_id, error = %e, "Failed to spawn execution thread");
    }

    tokio::spawn(supervise(job_id, exit_rx, out_rx, handler, observer));

    Running { abort, inbound }
}

async fn supervise(
    job_id: JobId,
    mut exit: oneshot::Receiver<ExitReason>,
    mut envelopes: mpsc::UnboundedReceiver<Envelope>,
    handler: Option<Arc<dyn MessageHandler>>,
    observer: Arc<dyn ExecutionObserver>,
) {
    let exited = loop {
        tokio::select! {
            biased;
            Some(envelope) = envelopes.recv() => {
                route(envelope, handler.as_deref(), observer.as_ref()).await;
            }
            exited = &mut exit => break exited,
        }
    };

    // Deliver anything sent just before the unit finished, in order.
    while let Ok(envelope) = envelopes.try_recv() {
        route(envelope, handler.as_deref(), observer.as_ref()).await;
    }

    let reason = exited
        .unwrap_or_else(|_| ExitReason::Failed("execution thread did not start".to_string()));
    match &reason {
        ExitReason::Panicked(detail) => {
            error!(job_id = %job_id, panic = %detail, "Execution context panicked");
        }
        ExitReason::Failed(detail) => {
            error!(job_id = %job_id, error = %detail, "Execution context failed");
        }
        _ => debug!(job_id = %job_id, reason = ?reason, "Execution context exited"),
    }
    observer.on_exit(job_id, reason).await;
}

async fn route(
    envelope: Envelope,
    handler: Option<&dyn MessageHandler>,
    observer: &dyn ExecutionObserver,
) {
    let job_id = envelope.job_id;
    match envelope.message {
        Message::Default(result) => observer.on_result(job_id, result).await,
        Message::Custom(payload) => match handler {
            Some(handler) => handler.on_message(job_id, payload),
            None => warn!(job_id = %job_id, "Dropping custom message: no handler registered"),
        },
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use tokio::sync::Mutex;

    use super::*;
    use crate::services::{JobOutput, job_fn};

    #[derive(Default)]
    struct Recorder {
        results: Mutex<Vec<JobResult>>,
        exits: Mutex<Vec<ExitReason>>,
    }

    #[async_trait]
    impl ExecutionObserver for Recorder {
        async fn on_result(&self, _job_id: JobId, result: JobResult) {
            self.results.lock().await.push(result);
        }

        async fn on_exit(&self, _job_id: JobId, reason: ExitReason) {
            self.exits.lock().await.push(reason);
        }
    }

    async fn wait_for_exit(recorder: &Recorder) -> ExitReason {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(reason) = recorder.exits.lock().await.first().cloned() {
                    return reason;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("context never exited")
    }

    fn start(function: Arc<dyn JobFunction>, recorder: Arc<Recorder>) -> Running {
        launch(
            Launch {
                job_id: JobId::new(),
                function,
                payload: json!({"n": 2}),
                handler: None,
            },
            recorder,
        )
    }

    #[tokio::test]
    async fn progress_precedes_final_result() {
        let recorder = Arc::new(Recorder::default());
        let function = job_fn(|payload, ctx| async move {
            ctx.emit(json!("halfway"));
            Ok(JobOutput::Json(payload))
        });
        start(function, recorder.clone());

        assert_eq!(wait_for_exit(&recorder).await, ExitReason::Returned);
        let results = recorder.results.lock().await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].status, 202);
        assert_eq!(results[1].status, 200);
    }

    #[tokio::test]
    async fn errors_become_failed_results() {
        let recorder = Arc::new(Recorder::default());
        let function = job_fn(|_, _| async { Err(anyhow::anyhow!("no such file")) });
        start(function, recorder.clone());

        wait_for_exit(&recorder).await;
        let results = recorder.results.lock().await;
        assert_eq!(results[0].status, 500);
        assert_eq!(results[0].message.as_deref(), Some("no such file"));
    }

    #[tokio::test]
    async fn abort_reports_aborted_exit() {
        let recorder = Arc::new(Recorder::default());
        let function = job_fn(|_, _| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(JobOutput::Empty)
        });
        let running = start(function, recorder.clone());
        running.abort.abort();

        assert_eq!(wait_for_exit(&recorder).await, ExitReason::Aborted);
        assert!(recorder.results.lock().await.is_empty());
    }

    #[tokio::test]
    async fn panics_are_reported_with_their_message() {
        let recorder = Arc::new(Recorder::default());
        let function = job_fn(|payload: Value, _| async move {
            assert!(payload["n"].as_u64() > Some(10), "kaboom");
            Ok(JobOutput::Empty)
        });
        start(function, recorder.clone());

        assert_eq!(
            wait_for_exit(&recorder).await,
            ExitReason::Panicked("kaboom".into())
        );
        assert!(recorder.results.lock().await.is_empty());
    }

    #[tokio::test]
    async fn blocking_work_does_not_stall_the_caller() {
        let recorder = Arc::new(Recorder::default());
        let function = job_fn(|_, _| async {
            std::thread::sleep(Duration::from_millis(300));
            Ok(JobOutput::Empty)
        });
        start(function, recorder.clone());

        // Runs on this test's single-threaded runtime while the body sleeps.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(recorder.exits.lock().await.is_empty());
        assert_eq!(wait_for_exit(&recorder).await, ExitReason::Returned);
    }

    #[tokio::test]
    async fn custom_messages_reach_the_handler() {
        let recorder = Arc::new(Recorder::default());
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        let handler: Arc<dyn MessageHandler> =
            Arc::new(move |_: JobId, payload: Value| {
                let _ = seen_tx.send(payload);
            });
        let function = job_fn(|_, mut ctx| async move {
            let question = ctx.recv_custom().await.unwrap_or_default();
            ctx.send_custom(json!({"echo": question}));
            Ok(JobOutput::Empty)
        });

        let running = launch(
            Launch {
                job_id: JobId::new(),
                function,
                payload: Value::Null,
                handler: Some(handler),
            },
            recorder.clone(),
        );
        running.inbound.as_ref().unwrap().send(json!("ping")).unwrap();

        let echoed = tokio::time::timeout(Duration::from_secs(5), seen_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(echoed, json!({"echo": "ping"}));
        assert_eq!(wait_for_exit(&recorder).await, ExitReason::Returned);
    }
}
