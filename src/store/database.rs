//! Redis-backed store.
//!
//! Each store owns one sorted set. The score is the sample timestamp and the
//! member is `"{seq:020}:{timestamp}:{duration}"`; redis orders equal scores
//! lexicographically, so the zero-padded insertion sequence keeps ties in
//! insertion order.
//!
//! Writes are buffered and sent as one pipelined batch of `ZADD`s, either
//! once the batch fills up or before the next read.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use super::{check_timestamp, read_only_view, Samples, TimeMeasurement, TimeSeriesStore};
use crate::error::{Error, Result};
use crate::period::TimePeriod;

/// Members fetched per `ZRANGEBYSCORE` round trip.
const PAGE_SIZE: usize = 10_000;

/// Pending writes sent per pipeline.
const WRITE_BATCH: usize = 1_000;

#[derive(Clone)]
pub struct RedisStore {
    shared: Arc<Shared>,
    window: Option<(i64, i64)>,
}

/// Connection and key shared by a store and all of its slices. The key is
/// deleted when the last handle goes away.
struct Shared {
    conn: Mutex<redis::Connection>,
    key: String,
    pending: Mutex<Pending>,
}

/// Samples added but not yet sent, with the sequence number of the next one.
#[derive(Default)]
struct Pending {
    next_seq: u64,
    members: Vec<(i64, String)>,
}

impl Shared {
    /// Send every pending write in one pipeline.
    fn flush(&self) -> Result<()> {
        let mut pending = self.pending.lock();
        if pending.members.is_empty() {
            return Ok(());
        }
        let mut pipe = redis::pipe();
        for (timestamp, member) in &pending.members {
            pipe.cmd("ZADD")
                .arg(&self.key)
                .arg(*timestamp)
                .arg(member)
                .ignore();
        }
        let _: () = pipe.query(&mut *self.conn.lock())?;
        pending.members.clear();
        Ok(())
    }
}

impl RedisStore {
    /// Open a connection and claim a fresh key under `prefix`.
    pub fn connect(client: &redis::Client, prefix: &str) -> Result<Self> {
        let conn = client.get_connection()?;
        let key = format!("{prefix}:samples:{}", uuid::Uuid::new_v4());
        info!(%key, "created redis sample store");
        Ok(Self {
            shared: Arc::new(Shared {
                conn: Mutex::new(conn),
                key,
                pending: Mutex::new(Pending::default()),
            }),
            window: None,
        })
    }

    pub fn key(&self) -> &str {
        &self.shared.key
    }

    /// Score range arguments: inclusive start, exclusive end.
    fn score_range(&self) -> (String, String) {
        match self.window {
            None => ("-inf".into(), "+inf".into()),
            Some((start, end)) => (start.to_string(), format!("({end}")),
        }
    }
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("key", &self.shared.key)
            .field("window", &self.window)
            .finish()
    }
}

impl Drop for Shared {
    // pending writes are discarded along with the key
    fn drop(&mut self) {
        let result: redis::RedisResult<()> =
            redis::cmd("DEL").arg(&self.key).query(self.conn.get_mut());
        if let Err(e) = result {
            warn!(key = %self.key, error = %e, "could not delete redis sample store");
        }
    }
}

fn encode_member(seq: u64, sample: &TimeMeasurement) -> String {
    format!("{seq:020}:{}:{}", sample.timestamp, sample.duration_millis)
}

fn decode_member(member: &str) -> Result<TimeMeasurement> {
    let mut parts = member.splitn(3, ':');
    let _seq = parts.next();
    let timestamp = parts.next().and_then(|t| t.parse().ok());
    let duration = parts.next().and_then(|d| d.parse().ok());
    match (timestamp, duration) {
        (Some(timestamp), Some(duration)) => Ok(TimeMeasurement::new(timestamp, duration)),
        _ => Err(Error::Redis(redis::RedisError::from((
            redis::ErrorKind::TypeError,
            "malformed sample member",
            member.to_string(),
        )))),
    }
}

impl TimeSeriesStore for RedisStore {
    fn add(&mut self, timestamp: i64, duration_millis: i32) -> Result<()> {
        check_timestamp(timestamp)?;
        if self.window.is_some() {
            return Err(read_only_view());
        }
        let full = {
            let mut pending = self.shared.pending.lock();
            let seq = pending.next_seq;
            let member = encode_member(seq, &TimeMeasurement::new(timestamp, duration_millis));
            pending.members.push((timestamp, member));
            pending.next_seq += 1;
            pending.members.len() >= WRITE_BATCH
        };
        if full {
            self.shared.flush()?;
        }
        Ok(())
    }

    fn samples(&self) -> Result<Samples<'_>> {
        self.shared.flush()?;
        let (min, max) = self.score_range();
        Ok(Box::new(PageIter {
            store: self,
            min,
            max,
            offset: 0,
            page: VecDeque::new(),
            exhausted: false,
        }))
    }

    fn size(&self) -> Result<u64> {
        self.shared.flush()?;
        let mut conn = self.shared.conn.lock();
        let count = match self.window {
            None => redis::cmd("ZCARD").arg(&self.shared.key).query(&mut *conn)?,
            Some(_) => {
                let (min, max) = self.score_range();
                redis::cmd("ZCOUNT")
                    .arg(&self.shared.key)
                    .arg(min)
                    .arg(max)
                    .query(&mut *conn)?
            }
        };
        Ok(count)
    }

    fn time_slice(&self, period: &TimePeriod) -> Result<Box<dyn TimeSeriesStore>> {
        let (mut start, mut end) = period.require_bounds("time slice")?;
        if let Some((outer_start, outer_end)) = self.window {
            start = start.max(outer_start);
            end = end.min(outer_end).max(start);
        }
        Ok(Box::new(RedisStore {
            shared: Arc::clone(&self.shared),
            window: Some((start, end)),
        }))
    }

    fn duplicate(&self) -> Box<dyn TimeSeriesStore> {
        Box::new(self.clone())
    }
}

/// Pages through the sorted set. The connection lock is only held for the
/// duration of each page fetch.
struct PageIter<'a> {
    store: &'a RedisStore,
    min: String,
    max: String,
    offset: usize,
    page: VecDeque<String>,
    exhausted: bool,
}

impl PageIter<'_> {
    fn fetch(&mut self) -> Result<()> {
        let members: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(&self.store.shared.key)
            .arg(&self.min)
            .arg(&self.max)
            .arg("LIMIT")
            .arg(self.offset)
            .arg(PAGE_SIZE)
            .query(&mut *self.store.shared.conn.lock())?;
        if members.len() < PAGE_SIZE {
            self.exhausted = true;
        }
        self.offset += members.len();
        self.page.extend(members);
        Ok(())
    }
}

impl Iterator for PageIter<'_> {
    type Item = Result<TimeMeasurement>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.page.is_empty() && !self.exhausted {
            if let Err(e) = self.fetch() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }
        self.page.pop_front().map(|member| decode_member(&member))
    }
}
