//! Shared test support: a scriptable converter and callback sinks.
#![allow(dead_code)]

use blockflow_pipeline::{
    BlockConverter, ConverterError, ConverterItem, ConverterStream, Executor, PipelineError,
};
use blockflow_types::BlockTransaction;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// One `rebase` call captured by the scripted converter.
pub struct RebaseCall {
    pub from: i64,
    pub to: i64,
    pub prefix: Vec<BlockTransaction>,
    records: mpsc::Sender<ConverterItem>,
}

impl RebaseCall {
    /// Send records into the session, awaiting channel capacity.
    pub async fn send_records(&self, records: Vec<BlockTransaction>) {
        for record in records {
            if self.records.send(Ok(record)).await.is_err() {
                return;
            }
        }
    }

    /// Deliver the session's terminal error.
    pub async fn send_error(&self, error: ConverterError) {
        let _ = self.records.send(Err(error)).await;
    }

    /// Clone the raw sending half of the session channel.
    pub fn sender(&self) -> mpsc::Sender<ConverterItem> {
        self.records.clone()
    }
}

/// Converter whose sessions are driven by the test body, in the mold of a
/// scripted upstream producer: every `rebase` call is surfaced on a channel
/// together with the sending half of its session.
pub struct ScriptedConverter {
    calls: mpsc::UnboundedSender<RebaseCall>,
}

impl BlockConverter for ScriptedConverter {
    fn rebase(
        &self,
        from: i64,
        to: i64,
        prefix: Vec<BlockTransaction>,
    ) -> Result<ConverterStream, ConverterError> {
        let (records, stream) = mpsc::channel(1);
        self.calls
            .send(RebaseCall {
                from,
                to,
                prefix,
                records,
            })
            .map_err(|_| ConverterError::Failed("scripted converter dropped".into()))?;
        Ok(stream)
    }
}

/// Build a scripted converter and the receiver surfacing its rebase calls.
pub fn scripted_converter() -> (Arc<ScriptedConverter>, mpsc::UnboundedReceiver<RebaseCall>) {
    let (calls, rx) = mpsc::unbounded_channel();
    (Arc::new(ScriptedConverter { calls }), rx)
}

/// Outcome of one `get_transactions` callback.
pub type GetResult = Result<Vec<BlockTransaction>, PipelineError>;

/// Build a callback plus the channel its single outcome arrives on.
pub fn result_sink() -> (
    impl FnOnce(GetResult) + Send + 'static,
    mpsc::UnboundedReceiver<GetResult>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        move |result| {
            let _ = tx.send(result);
        },
        rx,
    )
}

/// Await the next callback outcome, failing the test after five seconds.
pub async fn recv_result(rx: &mut mpsc::UnboundedReceiver<GetResult>) -> GetResult {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for callback")
        .expect("callback channel closed")
}

/// Assert that no callback fires within the given window.
pub async fn assert_no_result(rx: &mut mpsc::UnboundedReceiver<GetResult>, window: Duration) {
    if let Ok(result) = tokio::time::timeout(window, rx.recv()).await {
        panic!("unexpected callback: {result:?}");
    }
}

/// Poll until the executor's proposal equals `expected`.
pub async fn await_proposal(executor: &Executor, expected: &[BlockTransaction]) {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let proposal = executor.propose_transactions().await.expect("propose");
        if proposal == expected {
            return;
        }
        assert!(
            Instant::now() < deadline,
            "proposal never reached expected shape: {} records buffered",
            proposal.len()
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
