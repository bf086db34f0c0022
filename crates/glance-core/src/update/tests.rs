use alloc::{string::String, vec, vec::Vec};

use sha2::{Digest, Sha256};

use super::*;
use crate::testing::{FakeHttp, FakeSlot, Route, block_on};

const VERSION_URL: &str = "http://server/version";
const FIRMWARE_URL: &str = "http://server/firmware";

const ENDPOINTS: Endpoints = Endpoints {
    metadata: "http://server/metadata",
    image: "http://server/image",
    version: VERSION_URL,
    firmware: FIRMWARE_URL,
    status: "http://server/status",
};

fn limits() -> UpdateLimits {
    UpdateLimits {
        min_firmware_bytes: 16,
        max_firmware_bytes: 4096,
        max_descriptor_bytes: 256,
    }
}

fn local(version: &'static str, build_date: Option<u32>) -> FirmwareIdentity {
    FirmwareIdentity {
        version,
        build_date,
    }
}

fn server(version: &str, build_date: u32) -> OtaVersionInfo {
    OtaVersionInfo {
        version: String::from(version),
        build_date,
        size: 1024,
        sha256: String::new(),
        min_battery: 3.8,
        force_update: false,
    }
}

fn hex(bytes: &[u8]) -> String {
    use core::fmt::Write;
    let mut out = String::new();
    for byte in bytes {
        let _ = write!(out, "{:02x}", byte);
    }
    out
}

fn firmware_image(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 251) as u8).collect()
}

#[test]
fn equal_strings_never_update() {
    let decision = decide_update(&local("1.2.3", Some(5)), &server("1.2.3", 9));
    assert_eq!(decision, UpdateDecision::UpToDate);

    let decision = decide_update(&local("a1b2c3", None), &server("a1b2c3", 9));
    assert_eq!(decision, UpdateDecision::UpToDate);
}

#[test]
fn numeric_versions_compare_field_by_field() {
    assert_eq!(
        decide_update(&local("1.2.3", None), &server("1.2.4", 0)),
        UpdateDecision::Newer
    );
    assert_eq!(
        decide_update(&local("1.10.0", None), &server("1.9.9", 0)),
        UpdateDecision::UpToDate
    );
    assert_eq!(
        decide_update(&local("2.0.0", None), &server("10.0.0", 0)),
        UpdateDecision::Newer
    );
}

#[test]
fn non_numeric_ids_fall_back_to_build_dates() {
    assert_eq!(
        decide_update(&local("abc123", Some(100)), &server("def456", 200)),
        UpdateDecision::Newer
    );
    assert_eq!(
        decide_update(&local("abc123", Some(200)), &server("def456", 100)),
        UpdateDecision::Refused
    );
    assert_eq!(
        decide_update(&local("abc123", None), &server("def456", 100)),
        UpdateDecision::Newer
    );
    assert_eq!(
        decide_update(&local("abc123", Some(100)), &server("def456", 0)),
        UpdateDecision::Refused
    );
    assert_eq!(
        decide_update(&local("abc123", None), &server("def456", 0)),
        UpdateDecision::Refused
    );
}

#[test]
fn partial_numeric_versions_are_not_numeric() {
    assert!(numeric_version("1.2").is_none());
    assert!(numeric_version("1.2.3.4").is_none());
    assert!(numeric_version("1.2.x").is_none());
    assert!(numeric_version("1..3").is_none());
    assert_eq!(numeric_version("0.10.2"), Some((0, 10, 2)));
}

#[test]
fn force_update_overrides_everything() {
    let mut info = server("1.2.3", 0);
    info.force_update = true;
    assert_eq!(
        decide_update(&local("1.2.3", None), &info),
        UpdateDecision::Forced
    );

    let mut info = server("0.0.1", 0);
    info.force_update = true;
    assert!(decide_update(&local("9.9.9", None), &info).should_update());
}

#[test]
fn descriptor_defaults_fill_optional_fields() {
    let info = OtaVersionInfo::from_json(br#"{"version":"1.0.1","size":2048}"#, 3.8).unwrap();

    assert_eq!(info.version, "1.0.1");
    assert_eq!(info.build_date, 0);
    assert_eq!(info.size, 2048);
    assert!(info.sha256.is_empty());
    assert_eq!(info.min_battery, 3.8);
    assert!(!info.force_update);
}

#[test]
fn descriptor_reads_camel_case_fields() {
    let json = br#"{"version":"x","buildDate":1700000000,"size":9,"sha256":"ab","minBattery":3.9,"forceUpdate":true}"#;
    let info = OtaVersionInfo::from_json(json, 3.8).unwrap();

    assert_eq!(info.build_date, 1_700_000_000);
    assert_eq!(info.min_battery, 3.9);
    assert!(info.force_update);
}

#[test]
fn descriptor_without_size_is_malformed() {
    assert_eq!(
        OtaVersionInfo::from_json(br#"{"version":"1.0.1"}"#, 3.8),
        Err(UpdateError::Descriptor)
    );
}

#[test]
fn check_version_reports_available_update() {
    let pipeline = UpdatePipeline::new(&ENDPOINTS, limits(), local("1.0.0", None), 3.8);
    let mut http = FakeHttp::new(vec![Route::ok(
        VERSION_URL,
        br#"{"version":"1.0.1","size":1024}"#,
    )]);

    let info = block_on(pipeline.check_version(&mut http)).unwrap();
    assert_eq!(info.map(|info| info.version), Some(String::from("1.0.1")));
}

#[test]
fn check_version_returns_none_when_current() {
    let pipeline = UpdatePipeline::new(&ENDPOINTS, limits(), local("1.0.1", None), 3.8);
    let mut http = FakeHttp::new(vec![Route::ok(
        VERSION_URL,
        br#"{"version":"1.0.1","size":1024}"#,
    )]);

    assert_eq!(block_on(pipeline.check_version(&mut http)), Ok(None));
}

#[test]
fn oversized_descriptor_is_rejected() {
    let pipeline = UpdatePipeline::new(&ENDPOINTS, limits(), local("1.0.0", None), 3.8);
    let body = vec![b' '; 300];
    let mut http = FakeHttp::new(vec![Route::ok(VERSION_URL, &body).declared_length(None)]);

    assert_eq!(
        block_on(pipeline.check_version(&mut http)),
        Err(UpdateError::DescriptorTooLarge(256))
    );
}

#[test]
fn apply_update_streams_verifies_and_activates() {
    let image = firmware_image(1000);
    let mut info = server("1.0.1", 0);
    info.size = image.len() as u32;
    info.sha256 = hex(&Sha256::digest(&image));

    let pipeline = UpdatePipeline::new(&ENDPOINTS, limits(), local("1.0.0", None), 3.8);
    let mut http = FakeHttp::new(vec![Route::ok(FIRMWARE_URL, &image)]).with_chunk_size(97);
    let mut slot = FakeSlot::default();

    block_on(pipeline.apply_update(&mut http, &mut slot, &info)).unwrap();

    assert_eq!(slot.begun, Some(1000));
    assert_eq!(slot.image, image);
    assert!(slot.activated);
}

#[test]
fn size_bounds_are_checked_before_flash() {
    let pipeline = UpdatePipeline::new(&ENDPOINTS, limits(), local("1.0.0", None), 3.8);
    let mut http = FakeHttp::new(vec![]);
    let mut slot = FakeSlot::default();

    let mut info = server("1.0.1", 0);
    info.size = 8;
    assert_eq!(
        block_on(pipeline.apply_update(&mut http, &mut slot, &info)),
        Err(UpdateError::SizeOutOfBounds(8))
    );

    info.size = 5000;
    assert_eq!(
        block_on(pipeline.apply_update(&mut http, &mut slot, &info)),
        Err(UpdateError::SizeOutOfBounds(5000))
    );

    assert!(slot.begun.is_none());
    assert!(http.requests.is_empty());
}

#[test]
fn missing_or_small_partition_fails_before_download() {
    let pipeline = UpdatePipeline::new(&ENDPOINTS, limits(), local("1.0.0", None), 3.8);
    let mut http = FakeHttp::new(vec![]);
    let info = server("1.0.1", 0);

    let mut slot = FakeSlot {
        capacity: None,
        ..FakeSlot::default()
    };
    assert_eq!(
        block_on(pipeline.apply_update(&mut http, &mut slot, &info)),
        Err(UpdateError::PartitionUnavailable)
    );

    let mut slot = FakeSlot {
        capacity: Some(512),
        ..FakeSlot::default()
    };
    assert_eq!(
        block_on(pipeline.apply_update(&mut http, &mut slot, &info)),
        Err(UpdateError::PartitionTooSmall {
            size: 1024,
            capacity: 512
        })
    );
    assert!(http.requests.is_empty());
}

#[test]
fn short_download_never_activates() {
    let image = firmware_image(900);
    let mut info = server("1.0.1", 0);
    info.size = 1000;

    let pipeline = UpdatePipeline::new(&ENDPOINTS, limits(), local("1.0.0", None), 3.8);
    let mut http =
        FakeHttp::new(vec![Route::ok(FIRMWARE_URL, &image).declared_length(None)]);
    let mut slot = FakeSlot::default();

    assert_eq!(
        block_on(pipeline.apply_update(&mut http, &mut slot, &info)),
        Err(UpdateError::SizeMismatch {
            expected: 1000,
            received: 900
        })
    );
    assert!(!slot.activated);
}

#[test]
fn mismatched_content_length_aborts_before_writing() {
    let image = firmware_image(1200);
    let mut info = server("1.0.1", 0);
    info.size = 1000;

    let pipeline = UpdatePipeline::new(&ENDPOINTS, limits(), local("1.0.0", None), 3.8);
    let mut http = FakeHttp::new(vec![Route::ok(FIRMWARE_URL, &image)]);
    let mut slot = FakeSlot::default();

    assert_eq!(
        block_on(pipeline.apply_update(&mut http, &mut slot, &info)),
        Err(UpdateError::SizeMismatch {
            expected: 1000,
            received: 1200
        })
    );
    assert!(slot.image.is_empty());
    assert!(!slot.activated);
}

#[test]
fn digest_mismatch_never_activates() {
    let image = firmware_image(1000);
    let mut info = server("1.0.1", 0);
    info.size = 1000;
    info.sha256 = hex(&Sha256::digest(b"something else"));

    let pipeline = UpdatePipeline::new(&ENDPOINTS, limits(), local("1.0.0", None), 3.8);
    let mut http = FakeHttp::new(vec![Route::ok(FIRMWARE_URL, &image)]);
    let mut slot = FakeSlot::default();

    assert_eq!(
        block_on(pipeline.apply_update(&mut http, &mut slot, &info)),
        Err(UpdateError::DigestMismatch)
    );
    assert!(!slot.activated);
}

#[test]
fn malformed_digest_is_rejected_up_front() {
    let mut info = server("1.0.1", 0);
    info.sha256 = String::from("not-hex");

    let pipeline = UpdatePipeline::new(&ENDPOINTS, limits(), local("1.0.0", None), 3.8);
    let mut http = FakeHttp::new(vec![]);
    let mut slot = FakeSlot::default();

    assert_eq!(
        block_on(pipeline.apply_update(&mut http, &mut slot, &info)),
        Err(UpdateError::BadDigest)
    );
    assert!(slot.begun.is_none());
}

#[test]
fn flash_failure_stops_the_stream() {
    let image = firmware_image(1000);
    let mut info = server("1.0.1", 0);
    info.size = 1000;

    let pipeline = UpdatePipeline::new(&ENDPOINTS, limits(), local("1.0.0", None), 3.8);
    let mut http = FakeHttp::new(vec![Route::ok(FIRMWARE_URL, &image)]).with_chunk_size(100);
    let mut slot = FakeSlot {
        fail_write_at: Some(450),
        ..FakeSlot::default()
    };

    assert_eq!(
        block_on(pipeline.apply_update(&mut http, &mut slot, &info)),
        Err(UpdateError::Flash)
    );
    assert_eq!(slot.image.len(), 400);
    assert!(!slot.activated);
}

#[test]
fn pending_image_is_confirmed_once() {
    let mut slot = FakeSlot {
        state: ImageState::PendingVerify,
        ..FakeSlot::default()
    };

    assert_eq!(mark_firmware_valid(&mut slot), Ok(true));
    assert!(slot.confirmed);
    assert_eq!(mark_firmware_valid(&mut slot), Ok(false));
}

#[test]
fn valid_image_is_left_alone() {
    let mut slot = FakeSlot::default();

    assert_eq!(mark_firmware_valid(&mut slot), Ok(false));
    assert!(!slot.confirmed);
}

#[test]
fn new_image_without_rollback_support_is_confirmed_too() {
    let mut slot = FakeSlot {
        state: ImageState::New,
        ..FakeSlot::default()
    };

    assert_eq!(mark_firmware_valid(&mut slot), Ok(true));
    assert_eq!(slot.state, ImageState::Valid);
}
