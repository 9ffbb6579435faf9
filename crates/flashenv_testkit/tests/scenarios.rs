//! End-to-end environment scenarios.

use flashenv_core::{EnvConfig, EnvError, EnvStore, VersionAction};
use flashenv_fal::{Fal, FlashGeometry, InMemoryFlash, PartitionEntry, PartitionTable};
use flashenv_testkit::{tiny_geometry, FileEnv, TestEnv};

#[test]
fn boot_counter_survives_two_hundred_reboots() {
    let mut env = FileEnv::new(EnvConfig::new().default_env("boot_times", "0"));
    assert!(env.report.formatted);

    for expected in 0..200u32 {
        let boots: u32 = env.get_string("boot_times").unwrap().parse().unwrap();
        assert_eq!(boots, expected);
        env.set("boot_times", (boots + 1).to_string()).unwrap();
        env = env.reopen();
        assert_eq!(env.report.action, VersionAction::Keep);
    }

    assert_eq!(env.get("boot_times").unwrap(), b"200");
    let [first, second] = env.verify().unwrap();
    assert!(first.stop.is_clean() && second.stop.is_clean());
}

#[test]
fn reboot_rebuilds_the_same_index() {
    let mut env = TestEnv::new(EnvConfig::new().default_env("bootdelay", "3"));
    for i in 0..40 {
        env.set(&format!("var{}", i % 7), format!("value-{i}")).unwrap();
        if i % 5 == 0 {
            env.delete(&format!("var{}", i % 7)).unwrap();
        }
    }
    env.delete("bootdelay").unwrap();

    let before: Vec<_> = env.iter().map(Result::unwrap).collect();
    let usage = env.usage();

    let rebooted = env.reopen();
    let after: Vec<_> = rebooted.iter().map(Result::unwrap).collect();
    assert_eq!(before, after);
    assert_eq!(rebooted.usage().active_sector, usage.active_sector);
    assert_eq!(rebooted.usage().used_bytes, usage.used_bytes);
    assert_eq!(rebooted.usage().live_keys, usage.live_keys);
    assert!(!rebooted.report.torn_tail);
}

#[test]
fn oversized_value_is_rejected_without_writing() {
    let mut env = TestEnv::tiny(EnvConfig::new());
    // 1008 bytes of capacity, minus an 8-byte status slot, a 16-byte header
    // and a one-byte key.
    assert_eq!(env.max_value_len(1), 983);

    let image = env.snapshot();
    let err = env.set("k", vec![0x42; 984]).unwrap_err();
    assert!(matches!(err, EnvError::StoreFull { .. }), "{err}");
    assert_eq!(env.snapshot(), image);
    assert!(!env.contains("k"));
}

#[test]
fn largest_value_next_to_version_record_fits() {
    let mut env = TestEnv::tiny(EnvConfig::new());
    // The version record takes 40 of the 1008 bytes; 8 + align8(16 + 1 + 943)
    // fills the rest exactly.
    env.set("k", vec![0x07; 943]).unwrap();
    assert_eq!(env.usage().free_bytes, 0);

    // Replacing it needs a compaction that frees the old copy first.
    let compactions = env.stats().compactions;
    env.set("k", vec![0x08; 943]).unwrap();
    assert_eq!(env.stats().compactions, compactions + 1);
    assert_eq!(env.get("k").unwrap(), vec![0x08; 943]);

    let image = env.snapshot();
    let err = env.set("k", vec![0x09; 944]).unwrap_err();
    assert!(matches!(err, EnvError::StoreFull { .. }), "{err}");
    assert_eq!(env.snapshot(), image);
    assert_eq!(env.reopen().get("k").unwrap(), vec![0x08; 943]);
}

#[test]
fn compaction_leaves_old_sector_erased() {
    let mut env = TestEnv::tiny(EnvConfig::new());
    for i in 0..10 {
        env.set("counter", i.to_string()).unwrap();
    }
    let from = env.usage().active_sector;

    let report = env.compact().unwrap();
    assert_eq!(report.from, from);
    assert_eq!(report.to, 1 - from);
    assert!(report.bytes_saved() > 0);

    let image = env.snapshot();
    let sector = tiny_geometry().erase_size as usize;
    let old = &image[from * sector..(from + 1) * sector];
    assert!(old.iter().all(|&b| b == 0xFF));
    assert_eq!(env.get("counter").unwrap(), b"9");
}

#[test]
fn setting_the_same_value_writes_nothing() {
    let mut env = TestEnv::new(EnvConfig::new());
    env.set("ethaddr", "02:00:00:00:00:01").unwrap();
    let image = env.snapshot();

    env.set("ethaddr", "02:00:00:00:00:01").unwrap();
    assert_eq!(env.snapshot(), image);
    let stats = env.stats();
    assert_eq!(stats.sets, 1);
    assert_eq!(stats.noop_sets, 1);
}

#[test]
fn torn_tail_is_healed_by_next_write() {
    let mut env = TestEnv::new(EnvConfig::new());
    env.set("a", "1").unwrap();
    let cursor = env.usage().used_bytes;
    let base = env.usage().active_sector as u32 * 4096;
    env.flash().corrupt(base + cursor, &[0x00, 0x12, 0x34, 0x56]);

    let mut rebooted = env.reopen();
    assert!(rebooted.report.torn_tail);
    assert_eq!(rebooted.usage().free_bytes, 0);
    assert_eq!(rebooted.get("a").unwrap(), b"1");

    rebooted.set("b", "2").unwrap();
    assert_eq!(rebooted.stats().compactions, 1);

    let healed = rebooted.reopen();
    assert!(!healed.report.torn_tail);
    assert_eq!(healed.keys(), vec!["a", "b"]);
}

#[test]
fn version_change_without_auto_update_resets() {
    let config = EnvConfig::new().version(1).default_env("bootcmd", "boot");
    let mut env = TestEnv::new(config);
    env.set("bootcmd", "custom").unwrap();
    env.set("extra", "x").unwrap();

    let env = env.reopen_with(EnvConfig::new().version(2).default_env("bootcmd", "boot"));
    assert_eq!(env.report.action, VersionAction::Reset);
    assert_eq!(env.report.stored_version, Some(1));
    assert_eq!(env.keys(), vec!["bootcmd"]);
    assert_eq!(env.get("bootcmd").unwrap(), b"boot");
}

#[test]
fn reserved_version_key_is_hidden() {
    let mut env = TestEnv::new(EnvConfig::new().version(7));
    assert!(env.is_empty());
    assert!(!env.contains("__ver_num__"));
    assert!(matches!(
        env.set("__ver_num__", [0u8; 4]),
        Err(EnvError::InvalidKey { .. })
    ));
    assert_eq!(env.usage().live_keys, 1);
}

#[test]
fn partition_table_is_discovered_in_flash() {
    let geometry = FlashGeometry::new(16 * 1024, 4096, 64).unwrap();
    let table = PartitionTable::new(
        geometry,
        vec![
            PartitionEntry::new("table", 0, 4096),
            PartitionEntry::new("env", 4096, 8192),
            PartitionEntry::new("app", 12288, 4096),
        ],
    )
    .unwrap();

    let mut flash = InMemoryFlash::new(geometry);
    table.store_to(&mut flash, 0).unwrap();

    let found = PartitionTable::discover(&flash, 0, 4096).unwrap();
    assert_eq!(found.entries(), table.entries());

    let fal = Fal::new(Box::new(flash.clone()), found).unwrap();
    let mut env = EnvStore::open(&fal, EnvConfig::new()).unwrap();
    env.init().unwrap();
    env.set("ipaddr", "10.0.0.1").unwrap();

    // The table and the neighbouring partition are untouched.
    let image = flash.snapshot();
    assert_eq!(&image[..table.to_bytes().len()], table.to_bytes().as_slice());
    assert!(image[12288..].iter().all(|&b| b == 0xFF));
}

#[test]
fn missing_partition_is_a_config_error() {
    let geometry = tiny_geometry();
    let table = PartitionTable::new(geometry, vec![PartitionEntry::new("boot", 0, 2048)]).unwrap();
    let fal = Fal::new(Box::new(InMemoryFlash::new(geometry)), table).unwrap();
    let err = EnvStore::open(&fal, EnvConfig::new()).unwrap_err();
    assert!(matches!(err, EnvError::Config(_)), "{err}");
}

#[test]
fn calls_before_init_are_not_ready() {
    let geometry = tiny_geometry();
    let table = PartitionTable::new(geometry, vec![PartitionEntry::new("env", 0, 2048)]).unwrap();
    let fal = Fal::new(Box::new(InMemoryFlash::new(geometry)), table).unwrap();
    let mut env = EnvStore::open(&fal, EnvConfig::new()).unwrap();
    assert!(matches!(env.set("a", "1"), Err(EnvError::NotReady)));
    assert!(matches!(env.flush(), Err(EnvError::NotReady)));
}
