//! Log retrieval — one-shot snapshots and chunked streaming.

use bytes::Bytes;
use futures_util::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};

use super::Executor;
use crate::docker::daemon::LogChunkStream;
use crate::error::{ExecutorError, Result};
use crate::job::{Job, JobExecution, Task};

/// Finite stream of log chunks from one container. Connection faults on a
/// chunk surface in host-unavailable form; they do not feed the circuit,
/// which already vouched for the host when the stream was opened.
pub struct LogStream {
    host: String,
    port: u16,
    inner: LogChunkStream,
}

impl std::fmt::Debug for LogStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogStream")
            .field("host", &self.host)
            .field("port", &self.port)
            .finish()
    }
}

impl Stream for LogStream {
    type Item = Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => Poll::Ready(Some(Ok(chunk))),
            Poll::Ready(Some(Err(err))) if err.is_connection() => {
                Poll::Ready(Some(Err(ExecutorError::HostUnavailable {
                    host: this.host.clone(),
                    port: this.port,
                    message: err.to_string(),
                })))
            }
            Poll::Ready(Some(Err(err))) => Poll::Ready(Some(Err(err.into()))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Executor {
    /// Open a chunked log stream for the execution's container. Opening goes
    /// through the host circuit like any other call, so an unreachable host
    /// fails here with host-unavailable before any chunk is produced.
    pub async fn get_streaming_logs(
        &self,
        task: &Task,
        _job: &Job,
        execution: &mut JobExecution,
    ) -> Result<LogStream> {
        let container_id = execution.metadata.container_id.clone().ok_or_else(|| {
            ExecutorError::InvalidState(
                "Can't stream logs without container_id in execution metadata.".to_string(),
            )
        })?;

        let bound = self.acquire_client(task, execution, None).await?;
        let client = bound.client.clone();

        self.call_daemon(&bound, execution, client.inspect_container(&container_id))
            .await?;
        let inner = self
            .call_daemon(&bound, execution, client.stream_logs(&container_id))
            .await?;

        Ok(LogStream {
            host: bound.host.clone(),
            port: bound.port,
            inner,
        })
    }

    /// One-shot snapshot of the container's combined stdout and stderr.
    pub async fn get_current_logs(
        &self,
        task: &Task,
        _job: &Job,
        execution: &mut JobExecution,
    ) -> Result<String> {
        let container_id = execution.metadata.container_id.clone().ok_or_else(|| {
            ExecutorError::InvalidState(
                "Can't fetch logs without container_id in execution metadata.".to_string(),
            )
        })?;

        let bound = self.acquire_client(task, execution, None).await?;
        let client = bound.client.clone();

        let logs = self
            .call_daemon(
                &bound,
                execution,
                client.container_logs(&container_id, true, true),
            )
            .await?;
        Ok(logs.unwrap_or_default())
    }
}
