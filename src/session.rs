//! One background thread per open document.
//!
//! The interactive side talks to a [`Session`] only through messages: it
//! sends [`Command`]s via a [`SessionHandle`] and reads [`SessionEvent`]s
//! from the returned receiver. Commands are handled one at a time, in
//! arrival order. While a compression is running the session keeps its inbox
//! moving at every suspension point: cancellation takes effect, previews are
//! served, a second compression request is dropped, and everything else waits
//! until the compression has finished.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};

use log::{debug, info, warn};

use crate::analyzer::{analyze, Analysis};
use crate::cancel::CancelToken;
use crate::document::DocumentHandle;
use crate::error::{CompressError, Result};
use crate::orchestrator::Orchestrator;
use crate::params::CompressionParams;
use crate::preview::{render_original, render_preview, Bitmap};
use crate::render::{EmbeddedImageRasterizer, PageRasterizer};
use crate::strategy::{Progress, StrategyExecutor};

pub type RequestId = u64;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Resolution of the "before" preview pane.
    pub original_preview_dpi: u32,
    /// Longest side, in pixels, of any rasterized page.
    pub max_raster_dimension: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            original_preview_dpi: 150,
            max_raster_dimension: 4000,
        }
    }
}

#[derive(Debug)]
pub enum Command {
    InitSession(Vec<u8>),
    AnalyzePdf,
    RenderPreview {
        page_number: usize,
        params: CompressionParams,
    },
    RenderOriginal {
        page_number: usize,
    },
    StartCompression(CompressionParams),
    Cancel,
    Ping,
    Close,
    /// A message whose type the session does not understand.
    Unknown(String),
}

impl Command {
    /// Maps a payload-free wire message type onto a command.
    pub fn from_name(name: &str) -> Command {
        match name {
            "ANALYZE_PDF" => Command::AnalyzePdf,
            "CANCEL" => Command::Cancel,
            "PING" => Command::Ping,
            "CLOSE" => Command::Close,
            other => Command::Unknown(other.to_string()),
        }
    }

    /// Commands a running compression answers itself instead of deferring.
    fn runs_during_compression(&self) -> bool {
        matches!(
            self,
            Command::Cancel
                | Command::StartCompression(_)
                | Command::Ping
                | Command::RenderPreview { .. }
                | Command::RenderOriginal { .. }
        )
    }

    fn is_same_preview_kind(&self, other: &Command) -> bool {
        matches!(
            (self, other),
            (Command::RenderPreview { .. }, Command::RenderPreview { .. })
                | (Command::RenderOriginal { .. }, Command::RenderOriginal { .. })
        )
    }
}

#[derive(Debug)]
pub struct Request {
    pub id: RequestId,
    pub command: Command,
}

#[derive(Debug)]
pub enum EventKind {
    SessionInitialized,
    AnalysisComplete(Analysis),
    PreviewReady(Bitmap),
    OriginalReady(Bitmap),
    /// A newer request of the same kind arrived before this one was rendered.
    PreviewSuperseded,
    ProgressUpdate {
        fraction: f64,
        status: String,
    },
    CompressionComplete {
        bytes: Vec<u8>,
        reduction_percent: f64,
        passes: u32,
    },
    Cancelled,
    Error {
        message: String,
        code: &'static str,
    },
    Pong,
}

#[derive(Debug)]
pub struct SessionEvent {
    /// Id of the command this event answers.
    pub request: RequestId,
    pub kind: EventKind,
}

fn emit(outbox: &Sender<SessionEvent>, request: RequestId, kind: EventKind) {
    if outbox.send(SessionEvent { request, kind }).is_err() {
        debug!("Event for request {} dropped: receiver gone", request);
    }
}

fn emit_result(outbox: &Sender<SessionEvent>, request: RequestId, result: Result<EventKind>) {
    let kind = match result {
        Ok(kind) => kind,
        Err(CompressError::Cancelled) => EventKind::Cancelled,
        Err(e) => {
            warn!("Request {} failed: {}", request, e);
            EventKind::Error {
                message: e.to_string(),
                code: e.code(),
            }
        }
    };
    emit(outbox, request, kind);
}

/// Renders a preview or original request. Reads the document only.
fn render_request(
    document: Option<&DocumentHandle>,
    rasterizer: &dyn PageRasterizer,
    config: &SessionConfig,
    command: &Command,
) -> Result<EventKind> {
    let document = document.ok_or(CompressError::NotInitialized)?;
    match command {
        Command::RenderPreview {
            page_number,
            params,
        } => {
            render_preview(document, rasterizer, *page_number, params).map(EventKind::PreviewReady)
        }
        Command::RenderOriginal { page_number } => render_original(
            document,
            rasterizer,
            *page_number,
            config.original_preview_dpi,
        )
        .map(EventKind::OriginalReady),
        other => Err(CompressError::UnknownCommand(format!("{:?}", other))),
    }
}

/// Sending side of a session. Dropping every handle closes the session.
pub struct SessionHandle {
    tx: Sender<Request>,
    next_id: AtomicU64,
    worker: Option<JoinHandle<()>>,
}

impl SessionHandle {
    /// Queues `command` and returns the id its events will carry.
    pub fn send(&self, command: Command) -> RequestId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if self.tx.send(Request { id, command }).is_err() {
            warn!("Session is closed; request {} not delivered", id);
        }
        id
    }

    pub fn init(&self, document: Vec<u8>) -> RequestId {
        self.send(Command::InitSession(document))
    }

    pub fn analyze(&self) -> RequestId {
        self.send(Command::AnalyzePdf)
    }

    pub fn render_preview(&self, page_number: usize, params: CompressionParams) -> RequestId {
        self.send(Command::RenderPreview {
            page_number,
            params,
        })
    }

    pub fn render_original(&self, page_number: usize) -> RequestId {
        self.send(Command::RenderOriginal { page_number })
    }

    pub fn start_compression(&self, params: CompressionParams) -> RequestId {
        self.send(Command::StartCompression(params))
    }

    pub fn cancel(&self) -> RequestId {
        self.send(Command::Cancel)
    }

    pub fn ping(&self) -> RequestId {
        self.send(Command::Ping)
    }

    /// Closes the session and waits for its thread to finish.
    pub fn shutdown(mut self) {
        self.send(Command::Close);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Session thread panicked");
            }
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if self.worker.is_some() {
            let _ = self.tx.send(Request {
                id: 0,
                command: Command::Close,
            });
        }
    }
}

/// Session state. Lives on, and is only touched by, the session thread.
pub struct Session {
    config: SessionConfig,
    rasterizer: Box<dyn PageRasterizer + Send>,
    inbox: Receiver<Request>,
    outbox: Sender<SessionEvent>,
    pending: VecDeque<Request>,
    document: Option<DocumentHandle>,
    analysis: Option<Analysis>,
    compressing: bool,
    cancel: Option<CancelToken>,
}

impl Session {
    pub fn spawn(config: SessionConfig) -> io::Result<(SessionHandle, Receiver<SessionEvent>)> {
        let rasterizer = EmbeddedImageRasterizer::new(config.max_raster_dimension);
        Self::spawn_with_rasterizer(config, Box::new(rasterizer))
    }

    pub fn spawn_with_rasterizer(
        config: SessionConfig,
        rasterizer: Box<dyn PageRasterizer + Send>,
    ) -> io::Result<(SessionHandle, Receiver<SessionEvent>)> {
        let (tx, inbox) = mpsc::channel();
        let (outbox, events) = mpsc::channel();
        let session = Session {
            config,
            rasterizer,
            inbox,
            outbox,
            pending: VecDeque::new(),
            document: None,
            analysis: None,
            compressing: false,
            cancel: None,
        };
        let worker = thread::Builder::new()
            .name("pdf-session".to_string())
            .spawn(move || session.run())?;
        Ok((
            SessionHandle {
                tx,
                next_id: AtomicU64::new(1),
                worker: Some(worker),
            },
            events,
        ))
    }

    fn run(mut self) {
        loop {
            let request = match self.pending.pop_front() {
                Some(request) => request,
                None => match self.inbox.recv() {
                    Ok(request) => request,
                    Err(_) => break,
                },
            };
            if !self.handle(request) {
                break;
            }
        }
        debug!("Session closed");
    }

    /// Returns `false` once the session should stop.
    fn handle(&mut self, request: Request) -> bool {
        let id = request.id;
        match request.command {
            Command::Close => return false,
            Command::Ping => emit(&self.outbox, id, EventKind::Pong),
            Command::InitSession(bytes) => {
                let result = self.init(bytes).map(|_| EventKind::SessionInitialized);
                emit_result(&self.outbox, id, result);
            }
            Command::AnalyzePdf => {
                let result = self.analyze().map(EventKind::AnalysisComplete);
                emit_result(&self.outbox, id, result);
            }
            command @ (Command::RenderPreview { .. } | Command::RenderOriginal { .. }) => {
                if self.superseded(&command) {
                    debug!("Preview request {} superseded", id);
                    emit(&self.outbox, id, EventKind::PreviewSuperseded);
                } else {
                    let result = render_request(
                        self.document.as_ref(),
                        self.rasterizer.as_ref(),
                        &self.config,
                        &command,
                    );
                    emit_result(&self.outbox, id, result);
                }
            }
            Command::StartCompression(params) => self.compress(id, params),
            Command::Cancel => match &self.cancel {
                Some(token) => token.cancel(),
                None => debug!("Cancel with nothing in flight"),
            },
            Command::Unknown(name) => warn!("{}", CompressError::UnknownCommand(name)),
        }
        true
    }

    fn init(&mut self, bytes: Vec<u8>) -> Result<()> {
        self.document = None;
        self.analysis = None;
        let document = DocumentHandle::load(bytes)?;
        info!(
            "Session initialized: {} pages, {} bytes",
            document.page_count(),
            document.size_bytes()
        );
        self.document = Some(document);
        Ok(())
    }

    fn analyze(&mut self) -> Result<Analysis> {
        let document = self.document.as_ref().ok_or(CompressError::NotInitialized)?;
        let analysis = self.analysis.get_or_insert_with(|| analyze(document));
        Ok(analysis.clone())
    }

    /// True if a newer request of the same preview kind is already queued.
    fn superseded(&mut self, command: &Command) -> bool {
        loop {
            match self.inbox.try_recv() {
                Ok(request) => self.pending.push_back(request),
                Err(_) => break,
            }
        }
        self.pending
            .iter()
            .any(|queued| queued.command.is_same_preview_kind(command))
    }

    fn compress(&mut self, id: RequestId, params: CompressionParams) {
        let Session {
            config,
            rasterizer,
            inbox,
            outbox,
            pending,
            document,
            compressing,
            cancel,
            ..
        } = self;

        if *compressing {
            debug!("Compression already in flight; request {} ignored", id);
            return;
        }
        let Some(document) = document.as_ref() else {
            emit_result(outbox, id, Err(CompressError::NotInitialized));
            return;
        };

        let token = CancelToken::new();
        *compressing = true;
        *cancel = Some(token.clone());

        let mut pump = Pump {
            request: id,
            inbox,
            outbox,
            deferred: pending,
            document,
            rasterizer: &**rasterizer,
            config,
            cancel: &token,
        };
        let mut orchestrator = Orchestrator::new(StrategyExecutor::new(&**rasterizer));
        let result = orchestrator.run(document.source(), &params, &mut pump, &token);
        debug!("Compression {} ended in {:?}", id, orchestrator.phase());

        *compressing = false;
        *cancel = None;

        let result = result.map(|outcome| {
            info!(
                "Compression {} finished: {} bytes, {:.1}% smaller in {} pass(es)",
                id,
                outcome.bytes.len(),
                outcome.reduction_percent,
                outcome.passes
            );
            EventKind::CompressionComplete {
                bytes: outcome.bytes,
                reduction_percent: outcome.reduction_percent,
                passes: outcome.passes,
            }
        });
        emit_result(outbox, id, result);
    }
}

/// Progress sink for an in-flight compression. Forwards progress as events
/// and services the inbox at every suspension point.
struct Pump<'a> {
    request: RequestId,
    inbox: &'a Receiver<Request>,
    outbox: &'a Sender<SessionEvent>,
    deferred: &'a mut VecDeque<Request>,
    document: &'a DocumentHandle,
    rasterizer: &'a dyn PageRasterizer,
    config: &'a SessionConfig,
    cancel: &'a CancelToken,
}

impl Progress for Pump<'_> {
    fn report(&mut self, fraction: f64, status: &str) {
        emit(
            self.outbox,
            self.request,
            EventKind::ProgressUpdate {
                fraction,
                status: status.to_string(),
            },
        );
    }

    fn suspend(&mut self) {
        // Requests queued before the compression started are served first.
        let mut incoming = Vec::new();
        let mut kept = VecDeque::with_capacity(self.deferred.len());
        for request in self.deferred.drain(..) {
            match request.command {
                Command::Close => {
                    self.cancel.cancel();
                    kept.push_back(request);
                }
                _ if request.command.runs_during_compression() => incoming.push(request),
                _ => kept.push_back(request),
            }
        }
        *self.deferred = kept;

        loop {
            match self.inbox.try_recv() {
                Ok(request) => incoming.push(request),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    info!("Session handle dropped; cancelling compression {}", self.request);
                    self.cancel.cancel();
                    break;
                }
            }
        }

        let mut previews: Vec<Request> = Vec::new();
        for request in incoming {
            match request.command {
                Command::Cancel => {
                    info!("Cancelling compression {}", self.request);
                    self.cancel.cancel();
                }
                Command::StartCompression(_) => {
                    debug!(
                        "Compression already in flight; request {} ignored",
                        request.id
                    );
                }
                Command::Ping => emit(self.outbox, request.id, EventKind::Pong),
                Command::RenderPreview { .. } | Command::RenderOriginal { .. } => {
                    previews.push(request)
                }
                Command::Close => {
                    self.cancel.cancel();
                    self.deferred.push_back(request);
                }
                _ => self.deferred.push_back(request),
            }
        }

        for (i, request) in previews.iter().enumerate() {
            let newer = previews[i + 1..]
                .iter()
                .any(|later| later.command.is_same_preview_kind(&request.command));
            if newer {
                emit(self.outbox, request.id, EventKind::PreviewSuperseded);
                continue;
            }
            let result = render_request(
                Some(self.document),
                self.rasterizer,
                self.config,
                &request.command,
            );
            emit_result(self.outbox, request.id, result);
        }
    }
}
