// LogWeave - app/viewer.rs
//
// Thread-safe front door to a workspace.
//
// `LogViewer` owns the dispatcher whose state is the `Workspace`. Each method
// runs one task on the dispatcher and waits for its result, so callers on any
// thread get plain `Result`s while all view state stays confined to the
// dispatcher. Reader status arrives on a progress channel drained with
// `poll_progress`.

use crate::app::dispatcher::{DispatchHandle, Dispatcher};
use crate::app::tail::{TailProgress, TailState};
use crate::app::tree::NodeId;
use crate::app::view::{ListenerId, ViewId, ViewListener};
use crate::app::workspace::{Navigate, ViewSummary, Workspace, WorkspaceOptions};
use crate::core::model::Line;
use crate::util::error::{LogWeaveError, Result, ViewError};
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

const DISPATCHER_THREAD_NAME: &str = "logweave-dispatch";

pub struct LogViewer {
    dispatcher: Dispatcher<Workspace>,
    progress_rx: mpsc::Receiver<TailProgress>,
}

impl LogViewer {
    pub fn new(options: WorkspaceOptions) -> Result<Self> {
        let (tx, progress_rx) = mpsc::channel();
        let dispatcher = Dispatcher::spawn(DISPATCHER_THREAD_NAME, move |handle| {
            Workspace::new(handle, options, tx)
        })
        .map_err(|source| LogWeaveError::Io {
            path: PathBuf::new(),
            operation: "spawn dispatcher thread",
            source,
        })?;
        Ok(Self {
            dispatcher,
            progress_rx,
        })
    }

    fn run<R: Send + 'static>(&self, f: impl FnOnce(&mut Workspace) -> R + Send + 'static) -> Result<R> {
        self.dispatcher
            .call(f)
            .ok_or_else(|| ViewError::DispatcherStopped.into())
    }

    /// Handle for submitting custom tasks to the workspace.
    pub fn handle(&self) -> DispatchHandle<Workspace> {
        self.dispatcher.handle()
    }

    pub fn root_view(&self) -> ViewId {
        ViewId(0)
    }

    // --- Files ----------------------------------------------------------

    pub fn open_file(&self, path: impl AsRef<Path>) -> Result<ViewId> {
        let path = path.as_ref().to_path_buf();
        self.run(move |ws| ws.open_file(&path))?
    }

    pub fn close_file(&self, view: ViewId) -> Result<()> {
        self.run(move |ws| ws.close_file(view))?
    }

    pub fn tail_states(&self) -> Result<Vec<(ViewId, PathBuf, TailState)>> {
        self.run(|ws| ws.tail_states())
    }

    /// Block until every open file has read its initial content, then
    /// publish everything pending. Returns `false` on timeout.
    pub fn wait_until_caught_up(&self, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.run(|ws| ws.all_caught_up())? {
                self.flush()?;
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    /// Drain all queued reader status messages without blocking.
    pub fn poll_progress(&self) -> Vec<TailProgress> {
        self.progress_rx.try_iter().collect()
    }

    // --- Derived views ----------------------------------------------------

    pub fn add_filter(&self, parent: NodeId, pattern: &str, inverted: bool) -> Result<NodeId> {
        let pattern = pattern.to_string();
        self.run(move |ws| ws.add_filter(parent, &pattern, inverted))?
    }

    pub fn set_filter(&self, node: NodeId, pattern: &str, inverted: bool) -> Result<()> {
        let pattern = pattern.to_string();
        self.run(move |ws| ws.set_filter(node, &pattern, inverted))?
    }

    pub fn add_merge(&self, nodes: &[NodeId]) -> Result<NodeId> {
        let nodes = nodes.to_vec();
        self.run(move |ws| ws.add_merge(&nodes))?
    }

    pub fn remove_node(&self, node: NodeId) -> Result<()> {
        self.run(move |ws| ws.remove_node(node))?
    }

    // --- Tree ------------------------------------------------------------

    pub fn root_node(&self) -> Result<NodeId> {
        self.run(|ws| ws.tree().root())
    }

    pub fn focused_node(&self) -> Result<NodeId> {
        self.run(|ws| ws.focused_node())
    }

    pub fn node_view(&self, node: NodeId) -> Result<ViewId> {
        self.run(move |ws| ws.tree().view(node))?.map_err(Into::into)
    }

    pub fn navigate(&self, nav: Navigate) -> Result<bool> {
        self.run(move |ws| ws.navigate(nav))
    }

    // --- Views -----------------------------------------------------------

    pub fn set_active(&self, view: ViewId, active: bool) -> Result<()> {
        self.run(move |ws| ws.set_active(view, active))?
    }

    pub fn lines(&self, view: ViewId) -> Result<Vec<Arc<Line>>> {
        self.run(move |ws| ws.lines(view))?
    }

    pub fn line_count(&self, view: ViewId) -> Result<usize> {
        self.run(move |ws| ws.line_count(view))?
    }

    pub fn summary(&self, view: ViewId) -> Result<ViewSummary> {
        self.run(move |ws| ws.summary(view))?
    }

    pub fn list_views(&self) -> Result<Vec<ViewSummary>> {
        self.run(|ws| ws.list_views())
    }

    pub fn subscribe(&self, view: ViewId, listener: Box<dyn ViewListener>) -> Result<ListenerId> {
        self.run(move |ws| ws.subscribe(view, listener))?
    }

    pub fn unsubscribe(&self, listener: ListenerId) -> Result<bool> {
        self.run(move |ws| ws.unsubscribe(listener))
    }

    /// Publish every pending rate-limited update now.
    pub fn flush(&self) -> Result<()> {
        self.run(|ws| ws.flush())
    }

    /// Stop all readers and the dispatcher.
    pub fn shutdown(self) {
        let _ = self.dispatcher.call(|ws| ws.shutdown());
        self.dispatcher.shutdown();
        tracing::info!("Viewer shut down");
    }
}
