//! Fuzz testing harnesses for flashenv.
//!
//! This module provides fuzz targets that can be used with cargo-fuzz
//! or other fuzzing frameworks. Each target must return normally for every
//! input; a panic is a finding.

use flashenv_core::{EnvConfig, EnvStore, RecordCodec};
use flashenv_fal::{FlashGeometry, InMemoryFlash};

use crate::fixtures::{fal_over, whole_device_table};

/// Fuzz target for record decoding.
///
/// Arbitrary bytes must either decode or return a proper error.
pub fn fuzz_record_decode(data: &[u8]) {
    for write_size in [1, 8, 64] {
        let codec = RecordCodec::new(write_size, 64);
        let _ = codec.decode_header(data);
        let Ok(record) = codec.decode(data) else {
            continue;
        };
        // Keys longer than the codec limit decode but do not re-encode.
        if let Ok(encoded) = codec.encode(&record.key, &record.value) {
            let again = codec.decode(&encoded).expect("encoded record decodes");
            assert_eq!(again.key, record.key);
            assert_eq!(again.value, record.value);
        }
    }
}

/// Fuzz target for mounting arbitrary flash contents.
///
/// `data` is laid over a blank device of `geometry`. Init must succeed on
/// any image, and the store must accept writes afterwards.
pub fn fuzz_mount_image(geometry: FlashGeometry, data: &[u8]) {
    let mut image = vec![0xFF; geometry.size as usize];
    let n = data.len().min(image.len());
    image[..n].copy_from_slice(&data[..n]);

    let config = EnvConfig::new().default_env("boot_times", "0");
    let flash = InMemoryFlash::from_image(geometry, &image);
    let fal = fal_over(
        Box::new(flash),
        whole_device_table(geometry, &config.partition),
    );
    let mut env = EnvStore::open(&fal, config).expect("open environment");
    env.init().expect("init never fails on flash contents");

    // Records that stop decoding after mount surface as errors, never as
    // panics.
    let readable = env.iter().filter(Result::is_ok).count();
    assert!(readable <= env.len());
    env.set("fuzz", data.get(..16).unwrap_or(data))
        .expect("store accepts writes after init");
    assert_eq!(
        env.get("fuzz").expect("read back"),
        data.get(..16).unwrap_or(data)
    );
}

/// Fuzz target for operation sequences.
///
/// Each chunk of input drives one operation. Operations may fail but must
/// not panic, and the store must keep its contents across a reboot.
pub fn fuzz_operations(geometry: FlashGeometry, data: &[u8]) {
    let config = EnvConfig::new();
    let flash = InMemoryFlash::new(geometry);
    let open = |flash: InMemoryFlash| {
        let fal = fal_over(
            Box::new(flash),
            whole_device_table(geometry, &config.partition),
        );
        let mut env = EnvStore::open(&fal, config.clone()).expect("open environment");
        env.init().expect("init environment");
        env
    };
    let mut env = open(flash.clone());

    for chunk in data.chunks(4) {
        let key = format!("k{}", chunk[0] % 8);
        match chunk.first().map(|b| b >> 6) {
            Some(0) | Some(1) => {
                let _ = env.set(&key, &chunk[1..]);
            }
            Some(2) => {
                let _ = env.delete(&key);
            }
            _ => {
                let _ = env.compact();
            }
        }
    }

    let before: Vec<_> = env.iter().filter_map(Result::ok).collect();
    drop(env);
    let env = open(InMemoryFlash::from_image(geometry, &flash.snapshot()));
    let after: Vec<_> = env.iter().filter_map(Result::ok).collect();
    assert_eq!(before, after, "reboot changed the environment");
}
