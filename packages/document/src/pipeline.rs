//! Batching several engine commands into one round trip.
//!
//! A [`PipelineContext`] is an explicit transaction handle: callers own it,
//! queue commands into it, and commit it. Reentrancy is tracked on the
//! handle itself. [`PipelineContext::enter`] returns an [`Entry`] recording
//! whether that call opened the pipeline, and [`PipelineContext::exit`] only
//! commits for the entry that opened it. Because the bookkeeping lives in a
//! value the caller holds by `&mut`, concurrent callers each get their own.
//!
//! ```rust
//! use jsonipc_core::{Command, Connection};
//! use jsonipc_document::PipelineContext;
//! use jsonipc_memory::MemoryEngine;
//!
//! let mut ctx = PipelineContext::new(Connection::from_engine(MemoryEngine::new()));
//! let outer = ctx.enter();
//! let inner = ctx.enter();
//! ctx.queue(Command::Time);
//! assert!(ctx.exit(inner).unwrap().is_none()); // nested exit does nothing
//! assert_eq!(ctx.exit(outer).unwrap().map(|r| r.len()), Some(1));
//! ```

use jsonipc_core::{Command, Connection, EngineError, Reply};

/// Returned by [`PipelineContext::enter`]; hand it back to
/// [`PipelineContext::exit`].
#[must_use = "an entry must be passed to exit() for the outermost scope to commit"]
#[derive(Debug)]
pub struct Entry {
    opened: bool,
}

impl Entry {
    /// Whether this entry opened the pipeline (and so will commit it).
    pub fn is_outermost(&self) -> bool {
        self.opened
    }
}

/// Queued engine commands waiting for one batched execution.
pub struct PipelineContext {
    conn: Connection,
    queued: Vec<Command>,
    open: bool,
}

impl PipelineContext {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn,
            queued: Vec::new(),
            open: false,
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn len(&self) -> usize {
        self.queued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queued.is_empty()
    }

    /// Enter a batching scope. Opens the pipeline unless it already is.
    pub fn enter(&mut self) -> Entry {
        let opened = !self.open;
        self.open = true;
        Entry { opened }
    }

    /// Leave a batching scope.
    ///
    /// Commits and returns the replies if `entry` opened the pipeline;
    /// otherwise leaves everything queued and returns `None`.
    pub fn exit(&mut self, entry: Entry) -> Result<Option<Vec<Reply>>, EngineError> {
        if entry.opened {
            self.execute().map(Some)
        } else {
            Ok(None)
        }
    }

    /// Queue `command`, returning its position in the batch.
    pub fn queue(&mut self, command: Command) -> usize {
        log::debug!("queue #{}: {}", self.queued.len(), command);
        self.queued.push(command);
        self.queued.len() - 1
    }

    /// Run everything queued and close the pipeline.
    ///
    /// The pipeline is closed and emptied whether or not the batch succeeds.
    pub fn execute(&mut self) -> Result<Vec<Reply>, EngineError> {
        let commands = std::mem::take(&mut self.queued);
        self.open = false;
        if commands.is_empty() {
            return Ok(Vec::new());
        }
        log::debug!("commit {} queued command(s)", commands.len());
        self.conn.execute_batch(commands)
    }

    /// Like [`execute`](Self::execute) but return only the reply at `index`.
    pub fn execute_at(&mut self, index: usize) -> Result<Reply, EngineError> {
        let mut replies = self.execute()?;
        if index >= replies.len() {
            return Err(EngineError::Protocol {
                message: format!(
                    "no reply at index {} in a batch of {}",
                    index,
                    replies.len()
                ),
            });
        }
        Ok(replies.swap_remove(index))
    }

    /// Best-effort [`execute`](Self::execute): failures are logged and
    /// come back as `None`. Never use this for writes.
    pub fn try_execute(&mut self) -> Option<Vec<Reply>> {
        match self.execute() {
            Ok(replies) => Some(replies),
            Err(error) => {
                log::warn!("pipeline execution failed: {}", error);
                None
            }
        }
    }

    /// Best-effort [`execute_at`](Self::execute_at).
    pub fn try_execute_at(&mut self, index: usize) -> Option<Reply> {
        match self.execute_at(index) {
            Ok(reply) => Some(reply),
            Err(error) => {
                log::warn!("pipeline execution failed: {}", error);
                None
            }
        }
    }
}

impl Drop for PipelineContext {
    fn drop(&mut self) {
        if !self.queued.is_empty() {
            log::debug!(
                "discarding {} uncommitted command(s)",
                self.queued.len()
            );
        }
    }
}
