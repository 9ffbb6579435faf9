//! Power-loss recovery tests.
//!
//! Each test cuts the power at every write unit of one operation, reboots
//! on the image left behind and checks that the environment holds either
//! the state before the operation or the state after it.

use flashenv_core::{EnvConfig, EnvError, EnvStore};
use flashenv_testkit::{tiny_geometry, CrashHarness};

fn harness(config: EnvConfig) -> CrashHarness {
    CrashHarness::new(tiny_geometry(), config)
}

fn value(env: &EnvStore, key: &str) -> Option<Vec<u8>> {
    match env.get(key) {
        Ok(value) => Some(value),
        Err(EnvError::KeyNotFound { .. }) => None,
        Err(err) => panic!("reading {key}: {err}"),
    }
}

#[test]
fn interrupted_append_keeps_old_or_new_value() {
    let harness = harness(EnvConfig::new());
    let image = harness.prepare(|env| env.set("ipaddr", "10.0.0.1")).unwrap();

    let points = harness
        .crash_everywhere(
            &image,
            false,
            |env| env.set("ipaddr", "192.168.100.200"),
            |units, env| {
                let got = value(env, "ipaddr");
                assert!(
                    got.as_deref() == Some(b"10.0.0.1".as_slice())
                        || got.as_deref() == Some(b"192.168.100.200".as_slice()),
                    "crash at unit {units} left {got:?}"
                );
            },
        )
        .unwrap();
    assert!(points > 0);
}

#[test]
fn interrupted_first_write_of_a_key_is_invisible_or_complete() {
    let harness = harness(EnvConfig::new());
    let image = harness.prepare(|_| Ok(())).unwrap();

    harness
        .crash_everywhere(
            &image,
            false,
            |env| env.set("serverip", "10.0.0.2"),
            |units, env| {
                let got = value(env, "serverip");
                assert!(
                    got.is_none() || got.as_deref() == Some(b"10.0.0.2".as_slice()),
                    "crash at unit {units} left {got:?}"
                );
                assert!(env.len() <= 1);
            },
        )
        .unwrap();
}

/// Fills the active sector of the tiny geometry until the next 16-byte
/// write must compact.
fn nearly_full(env: &mut EnvStore) -> flashenv_core::EnvResult<()> {
    env.set("other", "kept")?;
    for i in 0..19 {
        env.set("k", format!("{i:016}"))?;
    }
    Ok(())
}

#[test]
fn interrupted_compacting_set_keeps_old_or_new_value() {
    let harness = harness(EnvConfig::new());
    let image = harness.prepare(nearly_full).unwrap();

    // The next set does not fit the free space.
    let probe = harness.reopen(&image).unwrap();
    assert!(probe.usage().free_bytes < 48);

    let old = format!("{:016}", 18);
    harness
        .crash_everywhere(
            &image,
            false,
            |env| env.set("k", "new-value-000000"),
            |units, env| {
                let got = value(env, "k");
                assert!(
                    got.as_deref() == Some(old.as_bytes())
                        || got.as_deref() == Some(b"new-value-000000".as_slice()),
                    "crash at unit {units} left {got:?}"
                );
                assert_eq!(value(env, "other").as_deref(), Some(b"kept".as_slice()));
            },
        )
        .unwrap();
}

#[test]
fn interrupted_compaction_preserves_every_key() {
    let harness = harness(EnvConfig::new());
    let image = harness
        .prepare(|env| {
            for round in 0..4 {
                for key in ["a", "b", "c"] {
                    env.set(key, format!("{key}{round}"))?;
                }
            }
            env.delete("b")
        })
        .unwrap();

    harness
        .crash_everywhere(
            &image,
            false,
            |env| env.compact().map(|_| ()),
            |units, env| {
                assert_eq!(env.keys(), vec!["a", "c"], "crash at unit {units}");
                assert_eq!(env.get("a").unwrap(), b"a3");
                assert_eq!(env.get("c").unwrap(), b"c3");
            },
        )
        .unwrap();
}

#[test]
fn interrupted_delete_is_atomic() {
    let harness = harness(EnvConfig::new());
    let image = harness
        .prepare(|env| {
            env.set("bootdelay", "3")?;
            env.set("bootdelay", "5")
        })
        .unwrap();

    harness
        .crash_everywhere(
            &image,
            false,
            |env| env.delete("bootdelay"),
            |units, env| {
                let got = value(env, "bootdelay");
                // The older value must never come back.
                assert!(
                    got.is_none() || got.as_deref() == Some(b"5".as_slice()),
                    "crash at unit {units} left {got:?}"
                );
            },
        )
        .unwrap();
}

#[test]
fn interrupted_first_init_ends_with_defaults() {
    let config = EnvConfig::new()
        .version(3)
        .default_env("boot_times", "0")
        .default_env("bootcmd", "run distro_bootcmd");
    let harness = harness(config);
    let blank = vec![0xFF; tiny_geometry().size as usize];

    let points = harness
        .crash_everywhere(&blank, true, |_| Ok(()), |units, env| {
            assert_eq!(env.version(), Some(3), "crash at unit {units}");
            assert_eq!(env.get("boot_times").unwrap(), b"0");
            assert_eq!(env.get("bootcmd").unwrap(), b"run distro_bootcmd");
            assert_eq!(env.len(), 2);
        })
        .unwrap();
    assert!(points > 0);
}

#[test]
fn interrupted_reset_is_all_or_nothing() {
    let harness = harness(EnvConfig::new().default_env("boot_times", "0"));
    let image = harness
        .prepare(|env| {
            env.set("boot_times", "5")?;
            env.set("extra", "x")
        })
        .unwrap();

    harness
        .crash_everywhere(
            &image,
            false,
            |env| env.reset_to_defaults(),
            |units, env| {
                let before = env.keys() == vec!["boot_times", "extra"]
                    && env.get("boot_times").unwrap() == b"5";
                let after =
                    env.keys() == vec!["boot_times"] && env.get("boot_times").unwrap() == b"0";
                assert!(before || after, "crash at unit {units} left {:?}", env.keys());
            },
        )
        .unwrap();
}

#[test]
fn interrupted_migration_completes_on_next_boot() {
    let v1 = EnvConfig::new().version(1).default_env("a", "1");
    let image = harness(v1).prepare(|env| env.set("a", "user")).unwrap();

    let v2 = EnvConfig::new()
        .version(2)
        .auto_update(true)
        .default_env("a", "1")
        .default_env("b", "2");
    harness(v2)
        .crash_everywhere(&image, true, |_| Ok(()), |units, env| {
            assert_eq!(env.version(), Some(2), "crash at unit {units}");
            assert_eq!(env.get("a").unwrap(), b"user");
            assert_eq!(env.get("b").unwrap(), b"2");
        })
        .unwrap();
}
