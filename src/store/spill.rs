//! Disk-spilling store.
//!
//! Samples accumulate in a sorted in-memory buffer. Once the buffer reaches
//! the spill threshold it is written out as a sorted run file and cleared.
//! Iteration is a k-way merge over every run plus the live buffer.
//!
//! Runs are kept as bare paths, so an idle store holds no open files. Each
//! run has a merge level: whenever the newest `MERGE_FAN_IN` runs share a
//! level they are merged into a single run one level up. The run count then
//! grows with the logarithm of the sample count, and so does the number of
//! files any one merge opens.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard};
use tempfile::TempPath;
use tracing::debug;

use super::{check_timestamp, read_only_view, Samples, TimeMeasurement, TimeSeriesStore};
use crate::error::Result;
use crate::period::TimePeriod;

const RUN_PREFIX: &str = "rtstat-run-";

/// Runs merged in one compaction step.
const MERGE_FAN_IN: usize = 16;

#[derive(Debug, Clone)]
pub struct SpillStore {
    state: Arc<RwLock<SpillState>>,
    window: Option<(i64, i64)>,
}

#[derive(Debug)]
struct SpillState {
    /// Directory for run files; the system temp dir when unset.
    dir: Option<PathBuf>,
    threshold: usize,
    /// Oldest first. Earlier runs win timestamp ties, and merges only ever
    /// replace a contiguous tail, so this stays insertion order.
    runs: Vec<Run>,
    /// Sorted by timestamp, ties in insertion order.
    buffer: Vec<TimeMeasurement>,
}

/// One sorted run on disk. The file is removed when this is dropped.
#[derive(Debug)]
struct Run {
    path: TempPath,
    len: u64,
    first_timestamp: i64,
    last_timestamp: i64,
    level: u32,
}

impl Run {
    fn overlaps(&self, window: Option<(i64, i64)>) -> bool {
        match window {
            None => true,
            Some((start, end)) => self.last_timestamp >= start && self.first_timestamp < end,
        }
    }

    fn within(&self, (start, end): (i64, i64)) -> bool {
        self.first_timestamp >= start && self.last_timestamp < end
    }

    fn open(&self) -> Result<RunReader> {
        Ok(RunReader {
            reader: BufReader::new(File::open(&*self.path)?),
            remaining: self.len,
        })
    }

    /// Samples of this run inside `[start, end)`, read from disk.
    fn count_within(&self, start: i64, end: i64) -> Result<u64> {
        let mut reader = self.open()?;
        let mut count = 0;
        while let Some(sample) = reader.next()? {
            if sample.timestamp >= end {
                break;
            }
            if sample.timestamp >= start {
                count += 1;
            }
        }
        Ok(count)
    }
}

impl SpillStore {
    pub fn new(dir: Option<PathBuf>, threshold: usize) -> Self {
        let threshold = threshold.max(1);
        Self {
            state: Arc::new(RwLock::new(SpillState {
                dir,
                threshold,
                runs: Vec::new(),
                buffer: Vec::with_capacity(threshold.min(64 * 1024)),
            })),
            window: None,
        }
    }

    /// Number of run files currently on disk.
    pub fn run_count(&self) -> usize {
        self.state.read().runs.len()
    }
}

impl SpillState {
    fn spill(&mut self) -> Result<()> {
        let run = self.write_run(self.buffer.iter().copied().map(Ok), 0)?;
        debug!(
            run = self.runs.len(),
            samples = run.len,
            path = %run.path.display(),
            "spilled sample run to disk"
        );
        self.runs.push(run);
        self.buffer.clear();
        self.compact()
    }

    /// Merge full levels until every level holds fewer than
    /// `MERGE_FAN_IN` runs.
    fn compact(&mut self) -> Result<()> {
        while let Some(from) = self.mergeable_tail() {
            let level = self.runs[from].level + 1;
            let mut merge = RunMerge::open(&self.runs[from..])?;
            let run = self.write_run(std::iter::from_fn(|| merge.pop(&[])), level)?;
            merge.close();
            debug!(level, samples = run.len, "merged sample runs");
            self.runs.truncate(from);
            self.runs.push(run);
        }
        Ok(())
    }

    /// Start of the newest `MERGE_FAN_IN` runs when they share a level.
    fn mergeable_tail(&self) -> Option<usize> {
        let from = self.runs.len().checked_sub(MERGE_FAN_IN)?;
        let level = self.runs[from].level;
        self.runs[from..]
            .iter()
            .all(|run| run.level == level)
            .then_some(from)
    }

    /// Write an ascending sample stream to a fresh run file.
    fn write_run<I>(&self, samples: I, level: u32) -> Result<Run>
    where
        I: IntoIterator<Item = Result<TimeMeasurement>>,
    {
        let mut builder = tempfile::Builder::new();
        builder.prefix(RUN_PREFIX);
        let mut file = match &self.dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        let mut len = 0;
        let mut bounds = None;
        {
            let mut writer = BufWriter::new(file.as_file_mut());
            for sample in samples {
                let sample = sample?;
                bincode::serialize_into(&mut writer, &sample)?;
                bounds = match bounds {
                    None => Some((sample.timestamp, sample.timestamp)),
                    Some((first, _)) => Some((first, sample.timestamp)),
                };
                len += 1;
            }
            writer.flush()?;
        }
        let (first_timestamp, last_timestamp) = bounds.unwrap_or((0, -1));
        Ok(Run {
            // closes the handle, the file lives on until the path drops
            path: file.into_temp_path(),
            len,
            first_timestamp,
            last_timestamp,
            level,
        })
    }
}

impl TimeSeriesStore for SpillStore {
    fn add(&mut self, timestamp: i64, duration_millis: i32) -> Result<()> {
        check_timestamp(timestamp)?;
        if self.window.is_some() {
            return Err(read_only_view());
        }
        let mut state = self.state.write();
        let sample = TimeMeasurement::new(timestamp, duration_millis);
        let late = state
            .buffer
            .last()
            .is_some_and(|last| last.timestamp > timestamp);
        if late {
            let at = state.buffer.partition_point(|m| m.timestamp <= timestamp);
            state.buffer.insert(at, sample);
        } else {
            state.buffer.push(sample);
        }
        if state.buffer.len() >= state.threshold {
            state.spill()?;
        }
        Ok(())
    }

    fn samples(&self) -> Result<Samples<'_>> {
        Ok(Box::new(MergeIter::open(self.state.read(), self.window)?))
    }

    fn size(&self) -> Result<u64> {
        let state = self.state.read();
        let Some((start, end)) = self.window else {
            let on_disk: u64 = state.runs.iter().map(|r| r.len).sum();
            return Ok(on_disk + state.buffer.len() as u64);
        };
        let mut count = 0;
        for run in &state.runs {
            if run.within((start, end)) {
                count += run.len;
            } else if run.overlaps(self.window) {
                count += run.count_within(start, end)?;
            }
        }
        let lo = state.buffer.partition_point(|m| m.timestamp < start);
        let hi = state.buffer.partition_point(|m| m.timestamp < end);
        Ok(count + hi.saturating_sub(lo) as u64)
    }

    fn time_slice(&self, period: &TimePeriod) -> Result<Box<dyn TimeSeriesStore>> {
        let (mut start, mut end) = period.require_bounds("time slice")?;
        if let Some((outer_start, outer_end)) = self.window {
            start = start.max(outer_start);
            end = end.min(outer_end).max(start);
        }
        Ok(Box::new(SpillStore {
            state: Arc::clone(&self.state),
            window: Some((start, end)),
        }))
    }

    fn duplicate(&self) -> Box<dyn TimeSeriesStore> {
        Box::new(self.clone())
    }
}

// ─── Merge iteration ─────────────────────────────────────────────

struct RunReader {
    reader: BufReader<File>,
    remaining: u64,
}

impl RunReader {
    fn next(&mut self) -> Result<Option<TimeMeasurement>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;
        Ok(Some(bincode::deserialize_from(&mut self.reader)?))
    }
}

/// K-way merge over run readers followed by one in-memory source. On equal
/// timestamps the lower source index wins.
struct RunMerge {
    readers: Vec<RunReader>,
    buffer_pos: usize,
    /// Current head of every source. Index `readers.len()` is the buffer.
    heads: Vec<Option<TimeMeasurement>>,
    heap: BinaryHeap<Reverse<(i64, usize)>>,
    primed: bool,
}

impl RunMerge {
    fn open<'r>(runs: impl IntoIterator<Item = &'r Run>) -> Result<Self> {
        let readers = runs
            .into_iter()
            .map(Run::open)
            .collect::<Result<Vec<_>>>()?;
        let sources = readers.len() + 1;
        Ok(Self {
            readers,
            buffer_pos: 0,
            heads: vec![None; sources],
            heap: BinaryHeap::with_capacity(sources),
            primed: false,
        })
    }

    /// Pull the next sample of `source` into its head slot.
    fn advance(&mut self, source: usize, buffer: &[TimeMeasurement]) -> Result<()> {
        let next = if source == self.readers.len() {
            let sample = buffer.get(self.buffer_pos).copied();
            self.buffer_pos += 1;
            sample
        } else {
            self.readers[source].next()?
        };
        if let Some(sample) = next {
            self.heap.push(Reverse((sample.timestamp, source)));
        }
        self.heads[source] = next;
        Ok(())
    }

    fn pop(&mut self, buffer: &[TimeMeasurement]) -> Option<Result<TimeMeasurement>> {
        if !self.primed {
            self.primed = true;
            for source in 0..self.heads.len() {
                if let Err(e) = self.advance(source, buffer) {
                    return Some(Err(e));
                }
            }
        }
        let Reverse((_, source)) = self.heap.pop()?;
        let sample = self.heads[source].take()?;
        if let Err(e) = self.advance(source, buffer) {
            return Some(Err(e));
        }
        Some(Ok(sample))
    }

    /// Close every reader.
    fn close(&mut self) {
        self.heap.clear();
        self.readers.clear();
    }
}

/// Merge over the runs overlapping the window plus the buffer. The open
/// readers live no longer than this iterator; they are closed as soon as
/// the merge runs dry, hits an error, or the iterator is dropped.
struct MergeIter<'a> {
    state: RwLockReadGuard<'a, SpillState>,
    merge: RunMerge,
    window: Option<(i64, i64)>,
    done: bool,
}

impl<'a> MergeIter<'a> {
    fn open(state: RwLockReadGuard<'a, SpillState>, window: Option<(i64, i64)>) -> Result<Self> {
        let merge = RunMerge::open(state.runs.iter().filter(|run| run.overlaps(window)))?;
        Ok(MergeIter {
            state,
            merge,
            window,
            done: false,
        })
    }

    fn finish(&mut self) {
        self.done = true;
        self.merge.close();
    }
}

impl Iterator for MergeIter<'_> {
    type Item = Result<TimeMeasurement>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            match self.merge.pop(&self.state.buffer) {
                None => self.finish(),
                Some(Err(e)) => {
                    self.finish();
                    return Some(Err(e));
                }
                Some(Ok(sample)) => match self.window {
                    Some((start, _)) if sample.timestamp < start => continue,
                    Some((_, end)) if sample.timestamp >= end => self.finish(),
                    _ => return Some(Ok(sample)),
                },
            }
        }
        None
    }
}
