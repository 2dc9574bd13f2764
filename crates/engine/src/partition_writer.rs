//! Partition Writer
//!
//! Drives one partition's update: every delta operation the caller hands in
//! is turned into COW entries on that partition's snapshot sink.
//!
//! # Lifecycle
//!
//! ```text
//! new ──init──> ready ──apply_* / checkpoint──> ready ──finished_install_ops──> finished
//!                 │                                                               │
//!                 └──────────────────────────── close ────────────────────────────┘
//! ```
//!
//! # Resume
//!
//! `checkpoint(n)` appends label `n` to the COW log, which syncs it, and only
//! then persists `n` in the [`CheckpointStore`]. After a crash the caller
//! passes the stored index to `init`, which reopens the log at that label and
//! drops whatever the interrupted operation had appended after it.

use crate::convert::{write_all_cow_ops, CowPlan};
use crate::diff::PatchAlgorithm;
use crate::extent_writer::{sink_error, SnapshotExtentWriter};
use crate::plan::{PartitionContext, PartitionPlan, SourceDescriptor};
use crate::source::FileSource;
use crate::verified_reader::{ReaderState, VerifiedSourceReader};
use deltacow_core::{DeltaOperation, Error, OperationType, Result};
use deltacow_durability::{CheckpointStore, SinkProvider, SnapshotSink};
use tracing::{debug, info, warn};

/// Cumulative counters for one writer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterCounters {
    /// Operations applied successfully
    pub ops_applied: u64,
    /// Copy entries emitted
    pub copy_entries: u64,
    /// Replace entries emitted
    pub replace_entries: u64,
    /// Zero entries emitted
    pub zero_entries: u64,
    /// Identity moves dropped from source copies
    pub identity_skipped: u64,
    /// Bytes read from the source or its replica
    pub source_bytes_read: u64,
    /// Reads that switched to the replica (0 or 1)
    pub replica_fallbacks: u64,
    /// Labels written by `checkpoint`
    pub labels: u64,
}

struct Session {
    partition: String,
    target_blocks: u64,
    total_ops: usize,
    next_op_index: usize,
    sink: Box<dyn SnapshotSink>,
    reader: VerifiedSourceReader,
    finished: bool,
}

impl Session {
    /// Common checks before an operation touches the sink.
    fn check(&self, op: &DeltaOperation, accepted: &[OperationType]) -> Result<()> {
        if self.finished {
            return Err(Error::InvalidOperation(format!(
                "{} operation applied after install operations finished",
                op.op_type
            )));
        }
        if !accepted.contains(&op.op_type) {
            return Err(Error::InvalidOperation(format!(
                "{} operation passed to the {} handler",
                op.op_type, accepted[0]
            )));
        }
        op.validate_shape()?;
        for extent in &op.dst_extents {
            if extent.end_block().map_or(true, |end| end > self.target_blocks) {
                return Err(Error::InvalidOperation(format!(
                    "extent {} is outside the {}-block target",
                    extent, self.target_blocks
                )));
            }
        }
        if op.op_type.needs_source() {
            if !self.reader.has_source() {
                return Err(Error::InvalidOperation(format!(
                    "{} operation on partition {} which has no source",
                    op.op_type, self.partition
                )));
            }
            self.reader.check_source_extents(&op.src_extents)?;
        }
        Ok(())
    }
}

/// Applies delta operations for one partition.
pub struct PartitionWriter {
    ctx: PartitionContext,
    provider: Box<dyn SinkProvider>,
    checkpoints: Box<dyn CheckpointStore>,
    session: Option<Session>,
    closed: bool,
    counters: WriterCounters,
}

impl PartitionWriter {
    /// Writer for one partition.
    pub fn new(
        ctx: PartitionContext,
        provider: Box<dyn SinkProvider>,
        checkpoints: Box<dyn CheckpointStore>,
    ) -> Self {
        PartitionWriter {
            ctx,
            provider,
            checkpoints,
            session: None,
            closed: false,
            counters: WriterCounters::default(),
        }
    }

    /// Index to pass to [`init`](Self::init): the last persisted checkpoint,
    /// or 0 when there is none.
    pub fn load_checkpoint(&self) -> Result<usize> {
        self.checkpoints
            .load()
            .map(|index| index.unwrap_or(0))
            .map_err(|e| Error::Init(format!("failed to load checkpoint: {}", e)))
    }

    /// Open the sink and, when needed, the source.
    ///
    /// With `next_op_index > 0` the COW log is resumed at that label; the
    /// caller continues with operation `next_op_index`. The source is opened
    /// only if `source_may_exist` and some remaining operation reads it.
    ///
    /// Init consumes the context's source descriptors, so a writer whose init
    /// failed should be closed and replaced.
    pub fn init(
        &mut self,
        plan: &PartitionPlan,
        source_may_exist: bool,
        next_op_index: usize,
    ) -> Result<()> {
        if self.closed {
            return Err(Error::InvalidOperation("writer is closed".to_string()));
        }
        if self.session.is_some() {
            return Err(Error::InvalidOperation(
                "writer is already initialized".to_string(),
            ));
        }

        let block_size = self.ctx.block_size;
        plan.validate_geometry(block_size)?;
        let total_ops = plan.operations.len();
        if next_op_index > total_ops {
            return Err(Error::Init(format!(
                "resume index {} is past the end of the {}-operation plan",
                next_op_index, total_ops
            )));
        }

        let needs_source = source_may_exist
            && plan.operations[next_op_index..]
                .iter()
                .any(|op| op.op_type.needs_source());
        let reader = if needs_source {
            self.open_reader(&plan.partition_name)?
        } else {
            VerifiedSourceReader::new(block_size, None)
        };

        let resume_label = (next_op_index > 0).then_some(next_op_index as u64);
        let sink = self
            .provider
            .open_sink(&plan.partition_name, block_size, resume_label)
            .map_err(|e| {
                Error::Init(format!(
                    "failed to open snapshot sink for {}: {}",
                    plan.partition_name, e
                ))
            })?;

        info!(
            target: "deltacow::writer",
            partition = %plan.partition_name,
            block_size,
            total_ops,
            next_op_index,
            has_source = reader.has_source(),
            has_replica = reader.has_replica(),
            interactive = self.ctx.interactive,
            "Partition writer initialized"
        );

        self.session = Some(Session {
            partition: plan.partition_name.clone(),
            target_blocks: plan.target_blocks(block_size),
            total_ops,
            next_op_index,
            sink,
            reader,
            finished: false,
        });
        Ok(())
    }

    fn open_reader(&mut self, partition: &str) -> Result<VerifiedSourceReader> {
        let descriptor = self.ctx.source.take().ok_or_else(|| {
            Error::Init(format!(
                "partition {} reads its source but no source was given",
                partition
            ))
        })?;
        let primary = descriptor
            .open()
            .map_err(|e| Error::Init(format!("failed to open source of {}: {}", partition, e)))?;
        let reader = VerifiedSourceReader::new(self.ctx.block_size, Some(primary));

        let reader = match (self.ctx.source_ecc.take(), self.ctx.interactive) {
            (None, _) => reader,
            (Some(SourceDescriptor::Open(replica)), _) => reader.with_replica(replica),
            (Some(SourceDescriptor::Path(path)), true) => reader.with_lazy_replica(path),
            (Some(SourceDescriptor::Path(path)), false) => match FileSource::open(&path) {
                Ok(replica) => reader.with_replica(Box::new(replica)),
                Err(e) => {
                    warn!(
                        target: "deltacow::writer",
                        partition,
                        path = %path.display(),
                        error = %e,
                        "Error-correcting replica unavailable, continuing without it"
                    );
                    reader
                }
            },
        };
        Ok(reader)
    }

    /// Apply any operation, dispatching on its type.
    ///
    /// `data` is the operation's blob and must be empty for types that carry
    /// none.
    pub fn apply(&mut self, op: &DeltaOperation, data: &[u8]) -> Result<()> {
        let result = if !op.op_type.carries_data() && !data.is_empty() {
            Err(Error::InvalidOperation(format!(
                "{} operation given a {}-byte data blob",
                op.op_type,
                data.len()
            )))
        } else {
            match op.op_type {
                OperationType::Zero | OperationType::Discard => self.apply_zero_or_discard(op),
                OperationType::SourceCopy => self.apply_source_copy(op),
                OperationType::Replace => self.apply_replace(op, data),
                OperationType::SourceBsdiff => self.apply_source_bsdiff(op, data),
                OperationType::PuffDiff => self.apply_puffdiff(op, data),
            }
        };
        if let Err(e) = &result {
            warn!(
                target: "deltacow::writer",
                op = %op.op_type,
                code = ?e.code(),
                payload = e.is_payload_error(),
                error = %e,
                "Operation failed"
            );
        }
        result
    }

    /// Zero or Discard: one Zero entry per destination block.
    pub fn apply_zero_or_discard(&mut self, op: &DeltaOperation) -> Result<()> {
        let session = Self::active(&mut self.session)?;
        session.check(op, &[OperationType::Zero, OperationType::Discard])?;
        for extent in &op.dst_extents {
            session
                .sink
                .append_zero_blocks(extent.start_block, extent.num_blocks)
                .map_err(sink_error)?;
        }
        self.counters.zero_entries += op.dst_blocks();
        self.counters.ops_applied += 1;
        Ok(())
    }

    /// Replace: `data` is the exact destination content.
    pub fn apply_replace(&mut self, op: &DeltaOperation, data: &[u8]) -> Result<()> {
        let block_size = self.ctx.block_size;
        let session = Self::active(&mut self.session)?;
        session.check(op, &[OperationType::Replace])?;
        check_declared_length(op, data)?;
        let expected = op.dst_byte_len(block_size)?;
        if data.len() as u64 != expected {
            return Err(Error::length_mismatch(
                "replace data",
                expected,
                data.len() as u64,
            ));
        }

        let mut writer = SnapshotExtentWriter::new(session.sink.as_mut(), &op.dst_extents);
        writer.write_all(data)?;
        writer.finish()?;
        self.counters.replace_entries += op.dst_blocks();
        self.counters.ops_applied += 1;
        Ok(())
    }

    /// SourceCopy: Copy entries, with Replace entries wherever a block's
    /// source was overwritten earlier in the same operation.
    pub fn apply_source_copy(&mut self, op: &DeltaOperation) -> Result<()> {
        let interactive = self.ctx.interactive;
        let session = Self::active(&mut self.session)?;
        session.check(op, &[OperationType::SourceCopy])?;
        let plan = CowPlan::build(&op.src_extents, &op.dst_extents)?;

        let verify = op.src_sha256.is_some() && !interactive;
        let must_read = plan.needs_source_bytes()
            || verify
            || session.reader.state() == ReaderState::Fallback;
        let read = if must_read {
            Some(session.reader.read(&op.src_extents, op.src_sha256.as_ref())?)
        } else {
            None
        };
        // The primary can no longer back a Copy once it has failed verification
        let force_replace = session.reader.state() == ReaderState::Fallback;

        let stats = write_all_cow_ops(
            &plan,
            session.sink.as_mut(),
            read.as_ref().map(|r| r.data.as_slice()),
            force_replace,
        )?;

        if read.as_ref().map_or(false, |r| r.fell_back) {
            self.counters.replica_fallbacks += 1;
        }
        self.counters.copy_entries += stats.copies;
        self.counters.replace_entries += stats.replaces;
        self.counters.identity_skipped += stats.skipped;
        self.counters.ops_applied += 1;
        debug!(
            target: "deltacow::writer",
            copies = stats.copies,
            replaces = stats.replaces,
            skipped = stats.skipped,
            force_replace,
            "Applied source copy"
        );
        Ok(())
    }

    /// SourceBsdiff: patch the source extents with a bsdiff `data` blob.
    pub fn apply_source_bsdiff(&mut self, op: &DeltaOperation, data: &[u8]) -> Result<()> {
        self.apply_diff(op, data, OperationType::SourceBsdiff)
    }

    /// PuffDiff: patch the source extents with a puffdiff `data` blob.
    pub fn apply_puffdiff(&mut self, op: &DeltaOperation, data: &[u8]) -> Result<()> {
        self.apply_diff(op, data, OperationType::PuffDiff)
    }

    fn apply_diff(&mut self, op: &DeltaOperation, data: &[u8], kind: OperationType) -> Result<()> {
        let block_size = self.ctx.block_size;
        let session = Self::active(&mut self.session)?;
        session.check(op, &[kind])?;
        check_declared_length(op, data)?;
        let expected = op.dst_byte_len(block_size)?;
        let algorithm = PatchAlgorithm::for_operation(op.op_type).ok_or_else(|| {
            Error::InvalidOperation(format!("{} is not a diff operation", op.op_type))
        })?;

        let read = session
            .reader
            .read(&op.src_extents, op.src_sha256.as_ref())?;
        if read.fell_back {
            self.counters.replica_fallbacks += 1;
        }
        let output = algorithm.apply(&read.data, data, expected)?;

        let mut writer = SnapshotExtentWriter::new(session.sink.as_mut(), &op.dst_extents);
        writer.write_all(&output)?;
        writer.finish()?;
        self.counters.replace_entries += op.dst_blocks();
        self.counters.ops_applied += 1;
        Ok(())
    }

    /// Record that every operation before `next_op_index` is complete.
    ///
    /// The label is durable in the COW log before the index is persisted.
    pub fn checkpoint(&mut self, next_op_index: usize) -> Result<()> {
        let session = Self::active(&mut self.session)?;
        if session.finished {
            return Err(Error::InvalidOperation(
                "checkpoint after install operations finished".to_string(),
            ));
        }
        if next_op_index > session.total_ops {
            return Err(Error::InvalidOperation(format!(
                "checkpoint {} is past the end of the {}-operation plan",
                next_op_index, session.total_ops
            )));
        }
        if next_op_index < session.next_op_index {
            return Err(Error::InvalidOperation(format!(
                "checkpoint {} is behind checkpoint {}",
                next_op_index, session.next_op_index
            )));
        }

        session
            .sink
            .add_label(next_op_index as u64)
            .map_err(sink_error)?;
        self.checkpoints
            .persist(next_op_index)
            .map_err(|e| Error::Sink(format!("failed to persist checkpoint: {}", e)))?;
        session.next_op_index = next_op_index;
        self.counters.labels += 1;
        debug!(target: "deltacow::writer", next_op_index, "Checkpoint persisted");
        Ok(())
    }

    /// Finalize the COW log. Later `apply_*` calls fail.
    pub fn finished_install_ops(&mut self) -> Result<()> {
        let session = Self::active(&mut self.session)?;
        if session.finished {
            return Ok(());
        }
        session.sink.finalize().map_err(sink_error)?;
        session.finished = true;
        info!(
            target: "deltacow::writer",
            partition = %session.partition,
            ops_applied = self.counters.ops_applied,
            copies = self.counters.copy_entries,
            replaces = self.counters.replace_entries,
            zeros = self.counters.zero_entries,
            "Install operations finished"
        );
        Ok(())
    }

    /// Release the sink and source descriptors. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        self.closed = true;
        if let Some(mut session) = self.session.take() {
            self.counters.source_bytes_read = session.reader.bytes_read();
            session.reader.close();
            session.sink.close().map_err(sink_error)?;
            debug!(target: "deltacow::writer", partition = %session.partition, "Writer closed");
        }
        Ok(())
    }

    /// Counters so far.
    pub fn counters(&self) -> WriterCounters {
        let mut counters = self.counters;
        if let Some(session) = &self.session {
            counters.source_bytes_read = session.reader.bytes_read();
        }
        counters
    }

    /// Index of the last checkpoint in this session.
    pub fn next_op_index(&self) -> Option<usize> {
        self.session.as_ref().map(|s| s.next_op_index)
    }

    /// State of the source reader, if initialized.
    pub fn reader_state(&self) -> Option<ReaderState> {
        self.session.as_ref().map(|s| s.reader.state())
    }

    /// Whether `finished_install_ops` succeeded.
    pub fn is_finished(&self) -> bool {
        self.session.as_ref().map_or(false, |s| s.finished)
    }

    fn active(session: &mut Option<Session>) -> Result<&mut Session> {
        session
            .as_mut()
            .ok_or_else(|| Error::InvalidOperation("writer is not initialized".to_string()))
    }
}

impl Drop for PartitionWriter {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(target: "deltacow::writer", error = %e, "Failed to close writer on drop");
        }
    }
}

/// A non-zero `data_length` must match the blob actually supplied.
fn check_declared_length(op: &DeltaOperation, data: &[u8]) -> Result<()> {
    if op.data_length != 0 && op.data_length != data.len() as u64 {
        return Err(Error::length_mismatch(
            format!("{} data blob", op.op_type),
            op.data_length,
            data.len() as u64,
        ));
    }
    Ok(())
}
