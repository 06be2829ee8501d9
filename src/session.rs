//! # WebSocket Streaming Session
//!
//! Streams decoded audio to the transcription service and reports the results
//! it sends back.
//!
//! ## Session Lifecycle:
//! 1. **Open**: `connect` performs the handshake, `on_open` starts the send routine
//! 2. **Streaming**: frames go out one by one with a pacing delay in between
//! 3. **Flush**: the literal `flush` text message tells the server no more audio is coming
//! 4. **Results**: every inbound message is classified and reported as it arrives
//! 5. **Close**: the session ends when the server closes the connection
//!
//! ## Concurrency:
//! The send routine runs on its own tokio task while `run` keeps reading
//! inbound messages, so results can arrive interleaved with outbound frames.
//! The only shared data is the immutable `Arc<[f32]>` sample buffer.
//! There is no retry, no reconnect and no timeout on waiting for results.

use crate::audio::{encode_frame, frame_count, frames};
use crate::config::StreamingConfig;
use crate::error::{ClientError, ClientResult};
use crate::protocol::{classify, ResultEnvelope, FLUSH_COMMAND};

use chrono::{DateTime, Utc};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, protocol::CloseFrame, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// The WebSocket connection type produced by [`connect`].
pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Open a WebSocket connection to the transcription service.
///
/// ## Error Handling:
/// A refused TCP connection becomes `ClientError::Unreachable`, whose message
/// asks whether the server is running. Every other failure is a `Transport` error.
pub async fn connect(url: &str) -> ClientResult<WsStream> {
    info!("Connecting to {}...", url);

    match connect_async(url).await {
        Ok((stream, response)) => {
            debug!("WebSocket handshake completed with status {}", response.status());
            info!("Connected!");
            Ok(stream)
        }
        Err(tungstenite::Error::Io(err)) if err.kind() == std::io::ErrorKind::ConnectionRefused => {
            Err(ClientError::Unreachable {
                url: url.to_string(),
                source: err,
            })
        }
        Err(err) => Err(err.into()),
    }
}

/// What the send routine managed to deliver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendReport {
    pub frames_sent: usize,
    pub samples_sent: usize,
    /// Whether the `flush` sentinel went out
    pub flushed: bool,
}

/// Send every frame, pacing between them, then the `flush` sentinel.
///
/// ## Ordering:
/// Frames are sent strictly in sequence from offset 0. The pacing delay sits
/// between consecutive frames only. `flush` is sent exactly once after the last
/// frame, and also when there are no samples at all.
///
/// ## Failure:
/// The first failed send aborts the routine. No further frames and no `flush`
/// are attempted.
///
/// ## Progress:
/// The running report is published to `progress` after every successful send,
/// so it is still readable when the routine is aborted or fails.
pub async fn send_all<S>(
    mut sink: S,
    samples: Arc<[f32]>,
    chunk_samples: NonZeroUsize,
    pacing: Duration,
    progress: &watch::Sender<SendReport>,
) -> ClientResult<SendReport>
where
    S: Sink<Message> + Unpin,
    S::Error: fmt::Display,
{
    let total = frame_count(samples.len(), chunk_samples);
    info!("Sending {} samples in {} chunks...", samples.len(), total);

    let mut report = SendReport::default();
    for (index, frame) in frames(&samples, chunk_samples).enumerate() {
        if index > 0 && !pacing.is_zero() {
            tokio::time::sleep(pacing).await;
        }

        sink.send(Message::Binary(encode_frame(frame)))
            .await
            .map_err(|e| {
                let context = format!("failed to send chunk {}/{}", index + 1, total);
                ClientError::Transport(format!("{}: {}", context, e))
            })?;

        report.frames_sent += 1;
        report.samples_sent += frame.len();
        progress.send_replace(report);
        info!("Sent chunk {}/{}", index + 1, total);
    }

    info!("Flushing...");
    sink.send(Message::Text(FLUSH_COMMAND.to_string()))
        .await
        .map_err(|e| ClientError::Transport(format!("failed to send flush: {}", e)))?;
    report.flushed = true;
    progress.send_replace(report);

    Ok(report)
}

/// Counts of the envelopes seen so far. Envelopes themselves are not kept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiveStats {
    pub transcriptions: u32,
    pub errors: u32,
    pub unrecognized: u32,
}

/// Summary returned when a session ends.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub sent: SendReport,
    pub received: ReceiveStats,
    pub elapsed_seconds: f64,
}

/// One streaming session over one connection.
///
/// ## Ownership:
/// The session is a plain value owned by the caller; there is no global state.
/// Samples are wrapped in `Arc<[f32]>` so the send task can read them while
/// the receive path keeps running.
pub struct StreamingSession {
    id: Uuid,
    samples: Arc<[f32]>,
    settings: StreamingConfig,
    started_at: DateTime<Utc>,
    stats: ReceiveStats,
}

impl StreamingSession {
    pub fn new(samples: impl Into<Arc<[f32]>>, settings: StreamingConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            samples: samples.into(),
            settings,
            started_at: Utc::now(),
            stats: ReceiveStats::default(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn stats(&self) -> ReceiveStats {
        self.stats
    }

    /// Connection is open: start the paced send routine on its own task.
    ///
    /// Returns the task handle and a receiver tracking what has been sent so far.
    pub fn on_open<S>(
        &self,
        sink: S,
    ) -> (JoinHandle<ClientResult<SendReport>>, watch::Receiver<SendReport>)
    where
        S: Sink<Message> + Unpin + Send + 'static,
        S::Error: fmt::Display + Send,
    {
        info!("Waiting for results...");
        let span = info_span!("send", session = %self.id);
        let (progress, watcher) = watch::channel(SendReport::default());
        let samples = Arc::clone(&self.samples);
        let chunk_samples = self.settings.chunk_samples;
        let pacing = self.settings.pacing();

        let handle = tokio::spawn(
            async move { send_all(sink, samples, chunk_samples, pacing, &progress).await }
                .instrument(span),
        );
        (handle, watcher)
    }

    /// Classify and report one inbound message.
    ///
    /// Text and binary payloads go through the classifier. Control frames
    /// (ping, pong, close) are not results and return `None`.
    pub fn on_message(&mut self, message: Message) -> Option<ResultEnvelope> {
        let envelope = match &message {
            Message::Text(text) => classify(text.as_bytes()),
            Message::Binary(data) => classify(data),
            _ => return None,
        };
        debug!("Classified inbound message as {}", envelope.kind());

        match &envelope {
            ResultEnvelope::Transcription(transcription) => {
                self.stats.transcriptions += 1;
                info!("\n{}", transcription);
            }
            ResultEnvelope::Error { message } => {
                self.stats.errors += 1;
                error!("Server error: {}", message);
            }
            ResultEnvelope::Unrecognized(raw) => {
                self.stats.unrecognized += 1;
                warn!("Unrecognized message: {}", raw);
            }
        }

        Some(envelope)
    }

    /// Terminal notification for transport failures.
    pub fn on_error(&self, err: &ClientError) {
        error!("{}", err);
    }

    /// Terminal notification for the connection closing.
    pub fn on_close(&self, frame: Option<&CloseFrame<'_>>) {
        match frame {
            Some(frame) => info!("Connection closed: {:?}", frame),
            None => info!("Connection closed"),
        }
    }

    /// Drive the session until the connection closes.
    ///
    /// ## Process:
    /// 1. Split the connection into its outbound and inbound halves
    /// 2. Start the send routine (`on_open`)
    /// 3. Until the connection closes, concurrently await the send task and
    ///    classify inbound messages (`on_message`)
    ///
    /// ## Returns:
    /// - **Ok(SessionReport)**: The server closed the connection
    /// - **Err(Transport)**: Sending failed, or reading from the connection failed
    pub async fn run<S>(mut self, connection: S) -> ClientResult<SessionReport>
    where
        S: Stream<Item = Result<Message, tungstenite::Error>>
            + Sink<Message, Error = tungstenite::Error>
            + Unpin
            + Send
            + 'static,
    {
        let span = info_span!("session", id = %self.id);
        let (sink, mut inbound) = connection.split();

        async move {
            let (mut send_task, progress) = self.on_open(sink);
            let mut sending = true;
            let mut sent = SendReport::default();

            let outcome: ClientResult<()> = loop {
                tokio::select! {
                    biased;

                    joined = &mut send_task, if sending => {
                        sending = false;
                        match joined {
                            Ok(Ok(report)) => sent = report,
                            Ok(Err(err)) => break Err(err),
                            Err(err) => {
                                let reason = format!("send task failed: {}", err);
                                break Err(ClientError::Transport(reason));
                            }
                        }
                    }
                    incoming = inbound.next() => match incoming {
                        Some(Ok(Message::Close(frame))) => {
                            self.on_close(frame.as_ref());
                            break Ok(());
                        }
                        Some(Ok(message)) => {
                            self.on_message(message);
                        }
                        Some(Err(err)) => break Err(err.into()),
                        None => {
                            self.on_close(None);
                            break Ok(());
                        }
                    }
                }
            };

            if sending {
                if !send_task.is_finished() {
                    warn!("Connection ended before all audio was sent");
                }
                send_task.abort();
                sent = *progress.borrow();
            }

            if let Err(err) = &outcome {
                self.on_error(err);
            }
            outcome?;

            Ok(self.finish(sent))
        }
        .instrument(span)
        .await
    }

    fn finish(&self, sent: SendReport) -> SessionReport {
        let elapsed = Utc::now().signed_duration_since(self.started_at);
        SessionReport {
            session_id: self.id,
            sent,
            received: self.stats,
            elapsed_seconds: elapsed.num_milliseconds() as f64 / 1000.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Segment;
    use futures_util::sink;
    use std::convert::Infallible;
    use std::pin::Pin;
    use std::sync::Mutex;
    use std::task::{Context, Poll};
    use tokio::net::TcpListener;

    type RecordingSink = Pin<Box<dyn Sink<Message, Error = Infallible> + Send>>;

    fn settings(chunk_samples: usize, pacing_ms: u64) -> StreamingConfig {
        StreamingConfig {
            chunk_samples: NonZeroUsize::new(chunk_samples).unwrap(),
            pacing_ms,
            ..StreamingConfig::default()
        }
    }

    fn chunk(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    fn decode_frame(data: &[u8]) -> Vec<f32> {
        data.chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect()
    }

    fn ramp(n: usize) -> Vec<f32> {
        (0..n).map(|i| i as f32 / 64.0 - 0.5).collect()
    }

    /// A sink that keeps every message it is given.
    fn recording_sink() -> (Arc<Mutex<Vec<Message>>>, RecordingSink) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink_log = Arc::clone(&log);
        let sink = sink::unfold((), move |(), message: Message| {
            let log = Arc::clone(&sink_log);
            async move {
                log.lock().unwrap().push(message);
                Ok::<_, Infallible>(())
            }
        });
        (log, Box::pin(sink))
    }

    /// A connection that never delivers anything and refuses every write.
    struct DeadConnection;

    impl Stream for DeadConnection {
        type Item = Result<Message, tungstenite::Error>;

        fn poll_next(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            Poll::Pending
        }
    }

    impl Sink<Message> for DeadConnection {
        type Error = tungstenite::Error;

        fn poll_ready(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Err(tungstenite::Error::AlreadyClosed))
        }

        fn start_send(self: Pin<&mut Self>, _item: Message) -> Result<(), Self::Error> {
            Err(tungstenite::Error::AlreadyClosed)
        }

        fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn poll_close(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_send_all_frames_then_flush() {
        let samples = ramp(35);
        let (log, sink) = recording_sink();
        let (progress, _) = watch::channel(SendReport::default());

        let report = send_all(
            sink,
            samples.clone().into(),
            chunk(10),
            Duration::ZERO,
            &progress,
        )
        .await
        .unwrap();

        let expected = SendReport {
            frames_sent: 4,
            samples_sent: 35,
            flushed: true,
        };
        assert_eq!(report, expected);
        assert_eq!(*progress.borrow(), expected);

        let sent = log.lock().unwrap();
        assert_eq!(sent.len(), 5);
        assert_eq!(sent.last(), Some(&Message::Text("flush".to_string())));

        let mut rebuilt = Vec::new();
        for message in &sent[..4] {
            match message {
                Message::Binary(data) => rebuilt.extend(decode_frame(data)),
                other => panic!("expected binary frame, got {:?}", other),
            }
        }
        assert_eq!(rebuilt, samples);
    }

    #[tokio::test]
    async fn test_empty_input_still_flushes() {
        let (log, sink) = recording_sink();
        let (progress, _) = watch::channel(SendReport::default());

        let report = send_all(
            sink,
            Vec::<f32>::new().into(),
            chunk(16000),
            Duration::ZERO,
            &progress,
        )
        .await
        .unwrap();

        assert_eq!(report.frames_sent, 0);
        assert!(report.flushed);
        assert_eq!(*log.lock().unwrap(), vec![Message::Text("flush".to_string())]);
    }

    #[tokio::test]
    async fn test_send_failure_stops_the_loop() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink_log = Arc::clone(&log);
        let failing = Box::pin(sink::unfold(0usize, move |count, message: Message| {
            let log = Arc::clone(&sink_log);
            async move {
                if count == 2 {
                    return Err("connection reset");
                }
                log.lock().unwrap().push(message);
                Ok(count + 1)
            }
        }));
        let (progress, _) = watch::channel(SendReport::default());

        let result = send_all(
            failing,
            ramp(50).into(),
            chunk(10),
            Duration::ZERO,
            &progress,
        )
        .await;

        match result {
            Err(ClientError::Transport(msg)) => assert!(msg.contains("chunk 3/5")),
            other => panic!("expected transport error, got {:?}", other),
        }
        let log = log.lock().unwrap();
        assert_eq!(log.len(), 2);
        assert!(log.iter().all(|m| matches!(m, Message::Binary(_))));

        // What did go out is still on record
        assert_eq!(
            *progress.borrow(),
            SendReport {
                frames_sent: 2,
                samples_sent: 20,
                flushed: false,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_pacing_between_frames() {
        let (log, sink) = recording_sink();
        let (progress, _) = watch::channel(SendReport::default());
        let start = tokio::time::Instant::now();

        send_all(
            sink,
            ramp(40).into(),
            chunk(10),
            Duration::from_millis(100),
            &progress,
        )
        .await
        .unwrap();

        // Four frames means three gaps
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(300), "elapsed {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(400), "elapsed {:?}", elapsed);
        assert_eq!(log.lock().unwrap().len(), 5);
    }

    #[test]
    fn test_on_message_classifies_and_counts() {
        let mut session = StreamingSession::new(Vec::<f32>::new(), settings(10, 0));

        let envelope = session.on_message(Message::Text(r#"{"error":"bad audio"}"#.to_string()));
        assert_eq!(
            envelope,
            Some(ResultEnvelope::Error {
                message: "bad audio".to_string()
            })
        );

        let envelope = session.on_message(Message::Binary(br#"{"transcription":""}"#.to_vec()));
        assert!(matches!(envelope, Some(ResultEnvelope::Transcription(_))));

        let envelope = session.on_message(Message::Text("not valid json".to_string()));
        assert!(matches!(envelope, Some(ResultEnvelope::Unrecognized(_))));

        assert_eq!(session.on_message(Message::Ping(vec![1, 2])), None);

        assert_eq!(
            session.stats(),
            ReceiveStats {
                transcriptions: 1,
                errors: 1,
                unrecognized: 1,
            }
        );
    }

    #[tokio::test]
    async fn test_connect_refused_is_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let url = format!("ws://{}", addr);
        match connect(&url).await {
            Err(ClientError::Unreachable { url: reported, .. }) => assert_eq!(reported, url),
            other => panic!("expected unreachable error, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_session_against_local_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

            let mut received = Vec::new();
            let mut frames = 0usize;
            while let Some(Ok(message)) = ws.next().await {
                match message {
                    Message::Binary(data) => {
                        frames += 1;
                        received.extend(decode_frame(&data));
                    }
                    Message::Text(text) if text == "flush" => break,
                    other => panic!("unexpected message {:?}", other),
                }
            }

            let result = serde_json::json!({
                "transcription": "hello",
                "duration": 1.5,
                "segments": [Segment {
                    start: 0.0,
                    end: 1.5,
                    text: "hello".to_string(),
                }],
            });
            ws.send(Message::Text(result.to_string())).await.unwrap();
            ws.send(Message::Text("garbage".to_string())).await.unwrap();
            ws.close(None).await.unwrap();

            (frames, received)
        });

        let samples = ramp(25);
        let connection = connect(&format!("ws://{}", addr)).await.unwrap();
        let session = StreamingSession::new(samples.clone(), settings(10, 5));
        let session_id = session.id();

        let report = session.run(connection).await.unwrap();
        let (frames, received) = server.await.unwrap();

        assert_eq!(frames, 3);
        assert_eq!(received, samples);
        assert_eq!(report.session_id, session_id);
        assert_eq!(
            report.sent,
            SendReport {
                frames_sent: 3,
                samples_sent: 25,
                flushed: true,
            }
        );
        assert_eq!(
            report.received,
            ReceiveStats {
                transcriptions: 1,
                errors: 0,
                unrecognized: 1,
            }
        );
    }

    #[tokio::test]
    async fn test_server_close_mid_stream_keeps_partial_progress() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

            let first = ws.next().await.unwrap().unwrap();
            assert!(matches!(first, Message::Binary(_)));

            let reply = serde_json::json!({ "error": "bad audio" });
            ws.send(Message::Text(reply.to_string())).await.unwrap();
            ws.close(None).await.unwrap();
            while let Some(Ok(_)) = ws.next().await {}
        });

        // Long pacing keeps the send task asleep after the first frame
        let connection = connect(&format!("ws://{}", addr)).await.unwrap();
        let session = StreamingSession::new(ramp(30), settings(10, 5_000));

        let report = session.run(connection).await.unwrap();
        server.await.unwrap();

        assert_eq!(
            report.sent,
            SendReport {
                frames_sent: 1,
                samples_sent: 10,
                flushed: false,
            }
        );
        assert_eq!(report.received.errors, 1);
        assert_eq!(report.received.transcriptions, 0);
    }

    #[tokio::test]
    async fn test_send_failure_ends_the_session_with_an_error() {
        let session = StreamingSession::new(ramp(30), settings(10, 0));

        match session.run(DeadConnection).await {
            Err(ClientError::Transport(msg)) => assert!(msg.contains("chunk 1/3"), "{}", msg),
            other => panic!("expected transport error, got {:?}", other.map(|r| r.sent)),
        }
    }

    #[tokio::test]
    async fn test_connection_reset_without_close_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let _ = ws.next().await;
            // Drop the socket without a close handshake
            drop(ws);
        });

        let connection = connect(&format!("ws://{}", addr)).await.unwrap();
        let session = StreamingSession::new(ramp(30), settings(10, 5_000));

        let result = session.run(connection).await;
        server.await.unwrap();

        assert!(
            matches!(result, Err(ClientError::Transport(_))),
            "expected transport error, got {:?}",
            result.map(|r| r.sent)
        );
    }
}
