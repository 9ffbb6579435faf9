//! Sector-rotating compaction.
//!
//! Compaction copies the live records into the standby sector and then
//! swaps the roles of the two sectors.
//!
//! ## Protocol
//!
//! 1. Erase the standby sector unless it is known blank
//! 2. Write the standby header as RECEIVING
//! 3. Copy each record: PRE-WRITE image, then WRITTEN status
//! 4. Narrow the old header to RETIRED (commit point)
//! 5. Narrow the standby header to ACTIVE
//! 6. Erase the old sector
//!
//! ## Invariants
//!
//! - Compaction **MUST NOT** change logical state
//! - Before step 4 the old sector stays authoritative
//! - After step 4 a mount promotes the RECEIVING sector
//! - A failed commit write is re-read; the engine follows the flash

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use super::engine::{EngineState, IndexEntry, LogEngine};
use super::record::RecordStatus;
use super::sector::{Sector, SectorState, SectorTag};
use crate::error::{EnvError, EnvResult};

/// Result of a compaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionReport {
    /// Sector that was retired.
    pub from: usize,
    /// Sector that is now active.
    pub to: usize,
    /// Records copied.
    pub records: usize,
    /// Record bytes in the old sector, live or not.
    pub bytes_before: u32,
    /// Record bytes in the new sector.
    pub bytes_after: u32,
}

impl CompactionReport {
    /// Bytes reclaimed.
    #[must_use]
    pub const fn bytes_saved(&self) -> u32 {
        self.bytes_before.saturating_sub(self.bytes_after)
    }
}

impl LogEngine {
    /// Rotates the live records into the standby sector.
    pub(crate) fn compact(&mut self) -> EnvResult<CompactionReport> {
        self.ensure_ready()?;
        let entries = self.live_entries(None)?;
        self.rotate(entries)
    }

    /// Replaces the whole environment with `entries` in one rotation.
    ///
    /// Later duplicates of a key win.
    ///
    /// # Errors
    ///
    /// Returns `StoreFull` if the entries do not fit one sector; nothing is
    /// written in that case.
    pub(crate) fn compact_with(
        &mut self,
        entries: Vec<(String, Vec<u8>)>,
    ) -> EnvResult<CompactionReport> {
        self.ensure_ready()?;
        self.rotate(entries)
    }

    pub(super) fn rotate(
        &mut self,
        entries: Vec<(String, Vec<u8>)>,
    ) -> EnvResult<CompactionReport> {
        let entries: BTreeMap<String, Vec<u8>> = entries.into_iter().collect();

        let mut images = Vec::with_capacity(entries.len());
        let mut total = 0usize;
        for (key, value) in &entries {
            let image = self
                .codec
                .encode(key, value)
                .map_err(|err| EnvError::invalid_key(key.as_str(), err.to_string()))?;
            total += image.len();
            images.push((key.clone(), image));
        }

        let capacity = self.capacity();
        if total > capacity {
            return Err(EnvError::StoreFull {
                needed: total,
                available: capacity,
            });
        }

        self.state = EngineState::Compacting;
        let result = self.rotate_images(images);
        if self.state == EngineState::Compacting {
            self.state = EngineState::Ready;
        }
        result
    }

    fn rotate_images(&mut self, images: Vec<(String, Vec<u8>)>) -> EnvResult<CompactionReport> {
        let from = self.active;
        let to = 1 - from;
        let src = self.sectors[from];
        let dst = self.sectors[to];
        let header_size = self.header.size() as u32;
        info!(from, to, records = images.len(), "compacting environment");

        let (index, cursor) = match self.fill_standby(dst, images) {
            Ok(filled) => filled,
            Err(err) => {
                self.sectors[to].tag = SectorTag::Stale;
                return Err(err);
            }
        };

        if let Err(err) = self
            .partition
            .write(src.offset, &self.header.state_slot(SectorState::Retired))
        {
            // The write may have landed anyway. Follow whatever a mount
            // would decide from the header now in flash.
            match self.read_state(from) {
                Ok(Some(SectorState::Active)) => {
                    self.sectors[to].tag = SectorTag::Stale;
                    return Err(err.into());
                }
                Ok(state) => {
                    warn!(sector = from, ?state, %err, "commit reported failure but reached flash");
                }
                Err(read_err) => {
                    warn!(sector = from, %err, %read_err, "commit outcome unknown, remount required");
                    self.state = EngineState::Uninitialized;
                    return Err(err.into());
                }
            }
        }

        // Committed: the standby sector is authoritative from here on.
        let records = index.len();
        self.active = to;
        self.sectors[to] = Sector {
            cursor,
            tag: SectorTag::Active,
            ..dst
        };
        self.sectors[from] = Sector {
            cursor: 0,
            tag: SectorTag::Stale,
            ..src
        };
        self.index = index;
        self.shadowed.clear();
        self.live_bytes = cursor - header_size;

        if let Err(err) = self
            .partition
            .write(dst.offset, &self.header.state_slot(SectorState::Active))
        {
            warn!(sector = to, %err, "failed to mark compacted sector active, mount will finish it");
        }

        match self.partition.erase(src.offset, src.size) {
            Ok(()) => self.sectors[from].tag = SectorTag::Empty,
            Err(err) => warn!(sector = from, %err, "failed to erase retired sector"),
        }

        self.stats.record_compaction();
        let report = CompactionReport {
            from,
            to,
            records,
            bytes_before: src.cursor.saturating_sub(header_size),
            bytes_after: self.live_bytes,
        };
        info!(
            to,
            records,
            bytes_saved = report.bytes_saved(),
            "compaction complete"
        );
        Ok(report)
    }

    /// Steps 1 to 3: prepares `dst` and copies every image into it.
    fn fill_standby(
        &self,
        dst: Sector,
        images: Vec<(String, Vec<u8>)>,
    ) -> EnvResult<(BTreeMap<String, IndexEntry>, u32)> {
        if dst.tag != SectorTag::Empty && !self.partition.is_erased(dst.offset, dst.size)? {
            debug!(offset = dst.offset, "erasing stale standby sector");
            self.partition.erase(dst.offset, dst.size)?;
            self.stats.record_stale_erase();
        }

        let header = self.header.encode(SectorState::Receiving);
        self.partition.write(dst.offset, &header)?;
        self.stats.record_programmed(header.len());

        let commit = self.codec.status_slot(RecordStatus::Written);
        let mut index = BTreeMap::new();
        let mut cursor = header.len() as u32;
        for (key, image) in images {
            let offset = dst.offset + cursor;
            self.partition.write(offset, &image)?;
            self.partition.write(offset, &commit)?;
            self.stats.record_programmed(image.len());

            let len = image.len() as u32;
            index.insert(key, IndexEntry { offset, len });
            cursor += len;
        }
        Ok((index, cursor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::engine::tests::{mounted, partition_over, FailingFlash};
    use crate::log::engine::SetOutcome;
    use crate::log::record::RecordCodec;
    use crate::log::sector::SectorHeader;
    use flashenv_fal::{FlashDevice, FlashGeometry, InMemoryFlash};

    fn flash() -> InMemoryFlash {
        InMemoryFlash::new(FlashGeometry::new(8192, 4096, 64).unwrap())
    }

    #[test]
    fn compact_preserves_live_entries() {
        let flash = flash();
        let (mut engine, _) = mounted(&flash);
        for i in 0..10 {
            engine.set("counter", i.to_string().as_bytes()).unwrap();
        }
        engine.set("name", b"board").unwrap();
        engine.set("gone", b"x").unwrap();
        engine.delete("gone").unwrap();

        let report = engine.compact().unwrap();
        assert_eq!(report.from, 0);
        assert_eq!(report.to, 1);
        assert_eq!(report.records, 2);
        assert_eq!(report.bytes_after, 256);
        assert!(report.bytes_saved() > 0);

        assert_eq!(engine.get("counter").unwrap(), Some(b"9".to_vec()));
        assert_eq!(engine.get("name").unwrap(), Some(b"board".to_vec()));
        assert_eq!(engine.get("gone").unwrap(), None);

        let image = flash.snapshot();
        assert!(image[..4096].iter().all(|&b| b == 0xFF));
        assert_eq!(image[4096], SectorState::Active.as_byte());
    }

    #[test]
    fn compacted_store_survives_remount() {
        let flash = flash();
        {
            let (mut engine, _) = mounted(&flash);
            engine.set("a", b"1").unwrap();
            engine.set("b", b"2").unwrap();
            engine.compact().unwrap();
            engine.set("c", b"3").unwrap();
        }

        let (engine, report) = mounted(&flash);
        assert_eq!(report.active_sector, 1);
        assert!(!report.stale_standby);
        assert_eq!(engine.index().len(), 3);
        assert_eq!(engine.get("c").unwrap(), Some(b"3".to_vec()));
    }

    #[test]
    fn full_sector_triggers_compaction() {
        let flash = flash();
        let (mut engine, _) = mounted(&flash);

        // Each record is 128 bytes; 31 fit after the header.
        let mut outcomes = Vec::new();
        for i in 0..40 {
            outcomes.push(engine.set("k", format!("{i:02}").as_bytes()).unwrap());
        }
        assert!(outcomes.contains(&SetOutcome::Compacted));
        assert_eq!(engine.stats().snapshot().compactions, 1);
        assert_eq!(engine.get("k").unwrap(), Some(b"39".to_vec()));
    }

    #[test]
    fn compact_with_replaces_contents() {
        let flash = flash();
        let (mut engine, _) = mounted(&flash);
        engine.set("old", b"1").unwrap();

        engine
            .compact_with(vec![
                ("x".to_string(), b"1".to_vec()),
                ("y".to_string(), b"2".to_vec()),
                ("x".to_string(), b"3".to_vec()),
            ])
            .unwrap();

        assert_eq!(engine.get("old").unwrap(), None);
        assert_eq!(engine.get("x").unwrap(), Some(b"3".to_vec()));
        assert_eq!(engine.get("y").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn compact_with_too_much_data_is_store_full() {
        let flash = flash();
        let (mut engine, _) = mounted(&flash);
        engine.set("keep", b"1").unwrap();
        let before = flash.snapshot();

        let entries = (0..40)
            .map(|i| (format!("k{i}"), vec![0u8; 64]))
            .collect();
        assert!(matches!(
            engine.compact_with(entries),
            Err(EnvError::StoreFull { .. })
        ));
        assert_eq!(flash.snapshot(), before);
        assert_eq!(engine.get("keep").unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn failed_copy_keeps_old_sector() {
        let flash = flash();
        let failing = FailingFlash::new(flash.clone());
        let mut engine =
            LogEngine::new(partition_over(Box::new(failing.clone())), None, 64).unwrap();
        engine.mount().unwrap();
        engine.set("a", b"1").unwrap();
        engine.set("b", b"2").unwrap();

        // Fail the second record copy.
        *failing.fail_at.lock() = Some(4096 + 128 + 128);
        assert!(engine.compact().is_err());
        assert_eq!(engine.state(), EngineState::Ready);
        assert_eq!(engine.sector(1).tag, SectorTag::Stale);
        assert_eq!(engine.usage().active_sector, 0);
        assert_eq!(engine.get("b").unwrap(), Some(b"2".to_vec()));

        // The half-filled standby is ignored on mount and reused later.
        let (mut remounted, report) = mounted(&flash);
        assert_eq!(report.active_sector, 0);
        assert!(report.stale_standby);

        *failing.fail_at.lock() = None;
        remounted.compact().unwrap();
        assert_eq!(remounted.stats().snapshot().stale_sectors_erased, 1);
        assert_eq!(remounted.get("a").unwrap(), Some(b"1".to_vec()));
    }

    fn failing_engine(flash: &InMemoryFlash) -> (LogEngine, FailingFlash) {
        let failing = FailingFlash::new(flash.clone());
        let mut engine =
            LogEngine::new(partition_over(Box::new(failing.clone())), None, 64).unwrap();
        engine.mount().unwrap();
        (engine, failing)
    }

    #[test]
    fn rejected_commit_keeps_old_sector() {
        let flash = flash();
        let (mut engine, failing) = failing_engine(&flash);
        engine.set("a", b"1").unwrap();

        *failing.fail_at.lock() = Some(0);
        assert!(engine.compact().is_err());
        assert_eq!(engine.state(), EngineState::Ready);
        assert_eq!(engine.usage().active_sector, 0);
        assert_eq!(engine.sector(1).tag, SectorTag::Stale);

        *failing.fail_at.lock() = None;
        engine.set("b", b"2").unwrap();
        let (remounted, report) = mounted(&flash);
        assert_eq!(report.active_sector, 0);
        assert_eq!(remounted.get("a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(remounted.get("b").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn commit_that_lands_despite_error_is_kept() {
        let flash = flash();
        let (mut engine, failing) = failing_engine(&flash);
        engine.set("a", b"1").unwrap();

        *failing.apply_first.lock() = true;
        *failing.fail_at.lock() = Some(0);
        let report = engine.compact().unwrap();
        assert_eq!(report.to, 1);
        assert_eq!(engine.usage().active_sector, 1);

        *failing.fail_at.lock() = None;
        assert_eq!(engine.set("b", b"2").unwrap(), SetOutcome::Appended);

        let (remounted, report) = mounted(&flash);
        assert_eq!(report.active_sector, 1);
        assert_eq!(remounted.get("a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(remounted.get("b").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn unreadable_commit_requires_remount() {
        let flash = flash();
        let (mut engine, failing) = failing_engine(&flash);
        engine.set("a", b"1").unwrap();

        *failing.fail_at.lock() = Some(0);
        *failing.fail_read_at.lock() = Some(0);
        assert!(engine.compact().is_err());
        assert_eq!(engine.state(), EngineState::Uninitialized);
        assert!(matches!(engine.set("b", b"2"), Err(EnvError::NotReady)));

        *failing.fail_at.lock() = None;
        *failing.fail_read_at.lock() = None;
        engine.mount().unwrap();
        assert_eq!(engine.usage().active_sector, 0);
        assert_eq!(engine.get("a").unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn committed_compaction_is_promoted_on_mount() {
        let flash = flash();
        {
            let (mut engine, _) = mounted(&flash);
            engine.set("a", b"1").unwrap();
        }

        // Power lost right after the commit point: sector 1 is still
        // RECEIVING and sector 0 is already RETIRED.
        let header = SectorHeader::new(64);
        let codec = RecordCodec::new(64, 64);
        let mut image = codec.encode("a", b"2").unwrap();
        image[0] = RecordStatus::Written.as_byte();

        let mut device = flash.clone();
        device.program(4096, &header.encode(SectorState::Receiving)).unwrap();
        device.program(4096 + 128, &image).unwrap();
        device.program(0, &header.state_slot(SectorState::Retired)).unwrap();

        let (engine, report) = mounted(&flash);
        assert!(report.promoted);
        assert_eq!(report.active_sector, 1);
        assert!(report.stale_standby);
        assert_eq!(engine.get("a").unwrap(), Some(b"2".to_vec()));
        assert_eq!(flash.snapshot()[4096], SectorState::Active.as_byte());
    }
}
