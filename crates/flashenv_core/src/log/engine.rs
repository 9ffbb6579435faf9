//! The environment log engine.

use std::collections::{BTreeMap, HashMap};

use flashenv_fal::Partition;
use tracing::{debug, info, warn};

use super::record::{Record, RecordCodec, RecordStatus};
use super::scan::ScanStop;
use super::sector::{Sector, SectorHeader, SectorState, SectorTag};
use crate::error::{EnvError, EnvResult, RecordError};
use crate::stats::{EnvUsage, StatsCounters};

/// Lifecycle of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Created but not mounted.
    Uninitialized,
    /// Reading sector headers and rebuilding the index.
    Scanning,
    /// Serving requests.
    Ready,
    /// Rotating live records into the standby sector.
    Compacting,
}

/// Location of the live record for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    /// Partition offset of the record.
    pub offset: u32,
    /// Encoded record length.
    pub len: u32,
}

/// What a successful `set` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOutcome {
    /// The record was appended to the active sector.
    Appended,
    /// The record was written as part of a compaction.
    Compacted,
    /// The value was already stored; nothing was written.
    Unchanged,
}

/// Summary of a mount.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountReport {
    /// Index of the sector chosen as active.
    pub active_sector: usize,
    /// No usable sector header was found and both sectors were formatted.
    pub formatted: bool,
    /// An interrupted compaction was completed by promoting its target.
    pub promoted: bool,
    /// The active sector ends in unreadable bytes.
    pub torn_tail: bool,
    /// The standby sector holds leftovers and will be erased before use.
    pub stale_standby: bool,
    /// Live keys found by the scan.
    pub live_keys: usize,
}

/// Appends records, keeps the key index and owns both log sectors.
///
/// The engine does no locking. Callers serialize access, see
/// [`crate::SharedEnvStore`].
pub(crate) struct LogEngine {
    pub(super) partition: Partition,
    pub(super) codec: RecordCodec,
    pub(super) header: SectorHeader,
    pub(super) sectors: [Sector; 2],
    pub(super) active: usize,
    pub(super) index: BTreeMap<String, IndexEntry>,
    /// Superseded records that still read WRITTEN because marking them
    /// failed. They must be marked before the key can be deleted.
    pub(super) shadowed: HashMap<String, Vec<u32>>,
    pub(super) live_bytes: u32,
    pub(super) state: EngineState,
    pub(super) stats: StatsCounters,
}

impl LogEngine {
    /// Lays out two sectors at the start of `partition`.
    ///
    /// With no explicit `sector_size` each sector takes half the partition,
    /// rounded down to the erase size.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the sectors do not fit the partition, are not
    /// erase-aligned or cannot hold a single record.
    pub(crate) fn new(
        partition: Partition,
        sector_size: Option<u32>,
        max_key_len: usize,
    ) -> EnvResult<Self> {
        let erase_size = partition.erase_size();
        let write_size = partition.write_size();
        let sector_size =
            sector_size.unwrap_or_else(|| partition.len() / 2 / erase_size * erase_size);

        if sector_size == 0 || sector_size % erase_size != 0 {
            return Err(EnvError::config(format!(
                "sector size {sector_size:#x} must be a non-zero multiple of erase size {erase_size:#x}"
            )));
        }
        if u64::from(sector_size) * 2 > u64::from(partition.len()) {
            return Err(EnvError::config(format!(
                "partition {:?} ({:#x} bytes) cannot hold two {:#x}-byte sectors",
                partition.name(),
                partition.len(),
                sector_size
            )));
        }

        let codec = RecordCodec::new(write_size, max_key_len);
        let header = SectorHeader::new(write_size);
        if header.size() + codec.min_record_len() > sector_size as usize {
            return Err(EnvError::config(format!(
                "sector size {sector_size:#x} cannot hold a header and one record"
            )));
        }

        Ok(Self {
            partition,
            codec,
            header,
            sectors: [
                Sector::new(0, sector_size, SectorTag::Active),
                Sector::new(sector_size, sector_size, SectorTag::Empty),
            ],
            active: 0,
            index: BTreeMap::new(),
            shadowed: HashMap::new(),
            live_bytes: 0,
            state: EngineState::Uninitialized,
            stats: StatsCounters::default(),
        })
    }

    /// Picks the active sector and rebuilds the index from flash.
    ///
    /// Flash content problems never fail a mount: torn tails are cut off,
    /// interrupted compactions are completed and unformatted flash is
    /// formatted. Only device errors are returned.
    pub(crate) fn mount(&mut self) -> EnvResult<MountReport> {
        self.state = EngineState::Scanning;
        self.index.clear();
        self.shadowed.clear();
        self.live_bytes = 0;

        let result = self.mount_sectors();
        self.state = if result.is_ok() {
            EngineState::Ready
        } else {
            EngineState::Uninitialized
        };
        result
    }

    fn mount_sectors(&mut self) -> EnvResult<MountReport> {
        use SectorState::{Active, Receiving, Retired};

        let states = [self.read_state(0)?, self.read_state(1)?];
        debug!(?states, "read sector headers");

        let mut report = MountReport::default();
        let active = match states {
            [Some(Active), Some(Active)] => {
                warn!("both sectors are marked active, using sector 0");
                0
            }
            [Some(Active), _] => 0,
            [_, Some(Active)] => 1,
            [Some(Receiving), Some(Retired) | None] => {
                self.promote(0)?;
                report.promoted = true;
                0
            }
            [Some(Retired) | None, Some(Receiving)] => {
                self.promote(1)?;
                report.promoted = true;
                1
            }
            _ => {
                self.format()?;
                report.formatted = true;
                return Ok(report);
            }
        };

        self.active = active;
        let header_size = self.header.size() as u32;
        let sector = &mut self.sectors[active];
        sector.tag = SectorTag::Active;
        sector.cursor = header_size;
        self.rebuild_index(&mut report)?;

        let standby = self.sectors[1 - active];
        let blank = self.partition.is_erased(standby.offset, standby.size)?;
        self.sectors[1 - active].cursor = 0;
        self.sectors[1 - active].tag = if blank {
            SectorTag::Empty
        } else {
            report.stale_standby = true;
            debug!(sector = 1 - active, "standby sector holds leftovers");
            SectorTag::Stale
        };

        report.active_sector = active;
        report.live_keys = self.index.len();
        info!(
            active,
            live_keys = report.live_keys,
            cursor = self.sectors[active].cursor,
            "mounted environment"
        );
        Ok(report)
    }

    pub(super) fn read_state(&self, sector: usize) -> EnvResult<Option<SectorState>> {
        let bytes = self
            .partition
            .read_vec(self.sectors[sector].offset, self.header.size())?;
        Ok(self.header.decode(&bytes))
    }

    /// Finishes a compaction that committed but never marked its target.
    fn promote(&mut self, sector: usize) -> EnvResult<()> {
        info!(sector, "completing interrupted compaction");
        self.partition.write(
            self.sectors[sector].offset,
            &self.header.state_slot(SectorState::Active),
        )?;
        Ok(())
    }

    /// Erases both sectors and makes sector 0 the empty active sector.
    fn format(&mut self) -> EnvResult<()> {
        info!(partition = self.partition.name(), "formatting environment sectors");
        for sector in [1, 0] {
            let Sector { offset, size, .. } = self.sectors[sector];
            if !self.partition.is_erased(offset, size)? {
                self.partition.erase(offset, size)?;
            }
        }

        let header = self.header.encode(SectorState::Active);
        self.partition.write(self.sectors[0].offset, &header)?;
        self.stats.record_programmed(header.len());

        self.active = 0;
        self.sectors[0].cursor = header.len() as u32;
        self.sectors[0].tag = SectorTag::Active;
        self.sectors[1].cursor = 0;
        self.sectors[1].tag = SectorTag::Empty;
        Ok(())
    }

    fn rebuild_index(&mut self, report: &mut MountReport) -> EnvResult<()> {
        let scan = self.scan_sector(self.active)?;

        for info in scan.records {
            if info.status != RecordStatus::Written {
                continue;
            }
            let entry = IndexEntry {
                offset: info.offset,
                len: info.len,
            };
            self.live_bytes += entry.len;
            if let Some(old) = self.index.insert(info.key.clone(), entry) {
                self.live_bytes -= old.len;
                self.shadowed.entry(info.key).or_default().push(old.offset);
            }
        }

        let sector = &mut self.sectors[self.active];
        match scan.stop {
            ScanStop::Corrupt { offset, reason } => {
                warn!(
                    sector = self.active,
                    offset,
                    reason = %reason,
                    "unreadable sector tail, next write compacts"
                );
                sector.cursor = sector.size;
                sector.tag = SectorTag::FullPendingGc;
                report.torn_tail = true;
                self.stats.record_torn_tail();
            }
            ScanStop::Erased { offset } => sector.cursor = offset,
            ScanStop::SectorEnd { offset } => sector.cursor = offset,
        }
        Ok(())
    }

    pub(crate) fn ensure_ready(&self) -> EnvResult<()> {
        if self.state == EngineState::Ready {
            Ok(())
        } else {
            Err(EnvError::NotReady)
        }
    }

    /// Reads the live value for `key`, or `None` if the key is absent.
    ///
    /// # Errors
    ///
    /// Returns `Integrity` if the indexed record no longer decodes.
    pub(crate) fn get(&self, key: &str) -> EnvResult<Option<Vec<u8>>> {
        self.ensure_ready()?;
        match self.index.get(key) {
            Some(entry) => Ok(Some(self.read_record(entry)?.value)),
            None => Ok(None),
        }
    }

    pub(super) fn read_record(&self, entry: &IndexEntry) -> EnvResult<Record> {
        let bytes = self.partition.read_vec(entry.offset, entry.len as usize)?;
        let record = self.codec.decode(&bytes)?;
        if record.status != RecordStatus::Written {
            return Err(RecordError::InvalidStatus(record.status.as_byte()).into());
        }
        Ok(record)
    }

    /// Stores `value` under `key`.
    ///
    /// The record is appended with two writes: the PRE-WRITE image, then the
    /// WRITTEN status. The superseded record is marked OBSOLETE afterwards on
    /// a best-effort basis. If the active sector lacks room, live records and
    /// the new value are rotated into the standby sector instead.
    ///
    /// # Errors
    ///
    /// Returns `StoreFull` if the record cannot fit even after compaction,
    /// in which case nothing is written.
    pub(crate) fn set(&mut self, key: &str, value: &[u8]) -> EnvResult<SetOutcome> {
        self.ensure_ready()?;
        let image = self
            .codec
            .encode(key, value)
            .map_err(|err| EnvError::invalid_key(key, err.to_string()))?;

        let needed = image.len();
        let capacity = self.capacity();
        if needed > capacity {
            return Err(EnvError::StoreFull {
                needed,
                available: capacity,
            });
        }

        let previous = self.index.get(key).copied();
        if let Some(entry) = &previous {
            if matches!(self.read_record(entry), Ok(record) if record.value == value) {
                debug!(key, "value unchanged, skipping write");
                return Ok(SetOutcome::Unchanged);
            }
        }

        let sector = self.sectors[self.active];
        if sector.tag == SectorTag::FullPendingGc || (sector.free() as usize) < needed {
            let retained = (self.live_bytes - previous.map_or(0, |e| e.len)) as usize;
            if retained + needed > capacity {
                return Err(EnvError::StoreFull {
                    needed,
                    available: capacity - retained,
                });
            }
            let mut entries = self.live_entries(Some(key))?;
            entries.push((key.to_string(), value.to_vec()));
            self.rotate(entries)?;
            return Ok(SetOutcome::Compacted);
        }

        let entry = self.append(&image)?;
        if let Some(old) = previous {
            self.retire(key, old);
            self.live_bytes -= old.len;
        }
        self.live_bytes += entry.len;
        self.index.insert(key.to_string(), entry);
        debug!(key, offset = entry.offset, len = entry.len, "appended record");
        Ok(SetOutcome::Appended)
    }

    /// Programs `image` at the cursor and commits it.
    fn append(&mut self, image: &[u8]) -> EnvResult<IndexEntry> {
        let sector = self.sectors[self.active];
        let entry = IndexEntry {
            offset: sector.cursor_addr(),
            len: image.len() as u32,
        };

        let written = self.partition.write(entry.offset, image).and_then(|()| {
            self.partition.write(
                entry.offset,
                &self.codec.status_slot(RecordStatus::Written),
            )
        });

        match written {
            Ok(()) => {
                self.sectors[self.active].cursor += entry.len;
                self.stats.record_programmed(image.len());
                Ok(entry)
            }
            Err(err) => {
                // Bytes past the cursor may be partly programmed now; never
                // program over them.
                warn!(offset = entry.offset, %err, "append failed, next write compacts");
                let sector = &mut self.sectors[self.active];
                sector.cursor = sector.size;
                sector.tag = SectorTag::FullPendingGc;
                Err(err.into())
            }
        }
    }

    /// Marks a superseded record OBSOLETE, remembering it if that fails.
    fn retire(&mut self, key: &str, old: IndexEntry) {
        if let Err(err) = self.mark_obsolete(old.offset) {
            warn!(key, offset = old.offset, %err, "failed to mark superseded record obsolete");
            self.stats.record_failed_obsolete_mark();
            self.shadowed
                .entry(key.to_string())
                .or_default()
                .push(old.offset);
        }
    }

    fn mark_obsolete(&self, offset: u32) -> EnvResult<()> {
        self.partition
            .write(offset, &self.codec.status_slot(RecordStatus::Obsolete))?;
        Ok(())
    }

    /// Removes `key`.
    ///
    /// # Errors
    ///
    /// Returns `KeyNotFound` if the key is absent. If marking fails the
    /// key stays live and the flash error is returned.
    pub(crate) fn delete(&mut self, key: &str) -> EnvResult<()> {
        self.ensure_ready()?;
        let entry = *self
            .index
            .get(key)
            .ok_or_else(|| EnvError::key_not_found(key))?;

        // Older copies go first so a failure never resurrects a stale value.
        if let Some(offsets) = self.shadowed.get(key) {
            for &offset in offsets {
                self.mark_obsolete(offset)?;
            }
            self.shadowed.remove(key);
        }
        self.mark_obsolete(entry.offset)?;

        self.index.remove(key);
        self.live_bytes -= entry.len;
        debug!(key, offset = entry.offset, "deleted record");
        Ok(())
    }

    /// Reads every live record, skipping `except`.
    ///
    /// Records that no longer decode are dropped with a warning.
    pub(super) fn live_entries(&self, except: Option<&str>) -> EnvResult<Vec<(String, Vec<u8>)>> {
        let mut entries = Vec::with_capacity(self.index.len());
        for (key, entry) in &self.index {
            if except == Some(key.as_str()) {
                continue;
            }
            match self.read_record(entry) {
                Ok(record) => entries.push((key.clone(), record.value)),
                Err(EnvError::Integrity(err)) => {
                    warn!(key = %key, offset = entry.offset, %err, "dropping unreadable record");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(entries)
    }

    /// Bytes available for records in an empty sector.
    pub(crate) fn capacity(&self) -> usize {
        self.sectors[0].size as usize - self.header.size()
    }

    pub(crate) fn state(&self) -> EngineState {
        self.state
    }

    pub(crate) fn index(&self) -> &BTreeMap<String, IndexEntry> {
        &self.index
    }

    pub(crate) fn stats(&self) -> &StatsCounters {
        &self.stats
    }

    pub(crate) fn codec(&self) -> &RecordCodec {
        &self.codec
    }

    pub(crate) fn partition(&self) -> &Partition {
        &self.partition
    }

    pub(crate) fn usage(&self) -> EnvUsage {
        let sector = self.sectors[self.active];
        EnvUsage {
            sector_size: sector.size,
            header_size: self.header.size() as u32,
            active_sector: self.active,
            used_bytes: sector.cursor,
            free_bytes: sector.free(),
            live_bytes: self.live_bytes,
            live_keys: self.index.len(),
        }
    }

    #[cfg(test)]
    pub(crate) fn sector(&self, index: usize) -> Sector {
        self.sectors[index]
    }
}

impl std::fmt::Debug for LogEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogEngine")
            .field("partition", &self.partition.name())
            .field("state", &self.state)
            .field("active", &self.active)
            .field("sectors", &self.sectors)
            .field("live_keys", &self.index.len())
            .finish_non_exhaustive()
    }
}
