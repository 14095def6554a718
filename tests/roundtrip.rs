/*++

Licensed under the Apache-2.0 license.

--*/
use chrono::{TimeZone, Utc};
use pldm_fw_pkg::{
    ComponentEntry, Descriptor, DeviceRecord, PackageError, PackageHeaderInformation,
    PackageManifest, StringType, PACKAGE_HEADER_FORMAT_REVISION, PACKAGE_HEADER_IDENTIFIER,
};
use std::io::Cursor;
use tempfile::NamedTempFile;

fn manifest_with(components: usize, applicable: Vec<u8>) -> PackageManifest {
    PackageManifest {
        package_header_information: PackageHeaderInformation {
            package_header_identifier: PACKAGE_HEADER_IDENTIFIER,
            package_header_format_revision: PACKAGE_HEADER_FORMAT_REVISION,
            package_header_size: 0,
            package_release_date_time: Utc.with_ymd_and_hms(2024, 6, 1, 12, 30, 0).unwrap(),
            component_bitmap_bit_length: 0,
            package_version_string_type: StringType::Ascii,
            package_version_string: "v1".into(),
        },
        firmware_device_identification_area: vec![DeviceRecord {
            record_length: 0,
            device_update_option_flags: 0,
            component_image_set_version_string_type: StringType::Ascii,
            component_image_set_version_string: "dev-v1".into(),
            applicable_components: applicable,
            initial_descriptor: Descriptor {
                descriptor_type: 0x0002,
                descriptor_data: hex::decode("00112233445566778899AABBCCDDEEFF").unwrap(),
            },
            additional_descriptors: vec![],
        }],
        component_image_information_area: (0..components)
            .map(|i| ComponentEntry {
                classification: 0x000A,
                identifier: i as u16,
                comparison_stamp: 0xFFFF_FFFF,
                options: 0,
                requested_activation_method: 1,
                location_offset: 0,
                size: 0,
                version_string_type: StringType::Ascii,
                version_string: format!("comp-v{i}"),
            })
            .collect(),
    }
}

#[test]
fn minimal_package_from_scenario_one() {
    let manifest = manifest_with(1, vec![0]);
    let images = vec![vec![0xDE, 0xAD, 0xBE, 0xEF]];

    let mut file = NamedTempFile::new().unwrap();
    manifest.write(&images, &mut file).unwrap();

    let decoded =
        PackageManifest::read_verified(&mut std::fs::File::open(file.path()).unwrap()).unwrap();
    let component = &decoded.component_image_information_area[0];
    assert_eq!(component.size, 4);
    assert_eq!(
        component.location_offset,
        decoded.package_header_information.package_header_size
    );
}

#[test]
fn offset_chain_for_three_components() {
    let manifest = manifest_with(3, vec![0, 1, 2]);
    let images = vec![vec![0u8; 100], vec![0u8; 200], vec![0u8; 50]];

    let mut buf = Vec::new();
    manifest.write(&images, &mut buf).unwrap();

    let decoded = PackageManifest::read(&mut Cursor::new(&buf)).unwrap();
    let h = decoded.package_header_information.package_header_size;
    let offsets: Vec<u32> = decoded
        .component_image_information_area
        .iter()
        .map(|c| c.location_offset)
        .collect();
    assert_eq!(offsets, vec![h, h + 100, h + 300]);

    for (component, image) in decoded.component_image_information_area.iter().zip(&images) {
        let start = component.location_offset as usize;
        let end = start + component.size as usize;
        assert_eq!(&buf[start..end], image.as_slice());
    }
}

#[test]
fn read_after_write_round_trips_to_identical_bytes() {
    let manifest = manifest_with(2, vec![0, 1]);
    let images = vec![vec![1, 2, 3], vec![4, 5, 6, 7]];

    let mut first = Vec::new();
    manifest.write(&images, &mut first).unwrap();

    let decoded = PackageManifest::read(&mut Cursor::new(&first)).unwrap();
    let mut second = Vec::new();
    decoded.write(&images, &mut second).unwrap();

    assert_eq!(first, second);
}

#[test]
fn truncating_before_header_size_field_is_malformed() {
    let manifest = manifest_with(1, vec![0]);
    let images = vec![vec![1u8, 2, 3, 4]];
    let mut buf = Vec::new();
    manifest.write(&images, &mut buf).unwrap();

    let truncated = &buf[..10];
    let err = PackageManifest::read(&mut Cursor::new(truncated)).unwrap_err();
    assert!(matches!(err, PackageError::Malformed(_)));
}

#[test]
fn truncating_image_bytes_is_caught_by_offset_law() {
    let manifest = manifest_with(1, vec![0]);
    let images = vec![vec![1u8; 16]];
    let mut buf = Vec::new();
    manifest.write(&images, &mut buf).unwrap();

    // Drop the last byte of the appended image; header and records still parse.
    let truncated = &buf[..buf.len() - 1];
    let decoded = PackageManifest::read(&mut Cursor::new(truncated)).unwrap();
    let component = &decoded.component_image_information_area[0];
    let start = component.location_offset as usize;
    let end = start + component.size as usize;
    assert!(end > truncated.len());
}

#[test]
fn tampered_header_byte_fails_checksum_verification() {
    let manifest = manifest_with(1, vec![0]);
    let images = vec![vec![9u8; 4]];
    let mut buf = Vec::new();
    manifest.write(&images, &mut buf).unwrap();

    buf[40] ^= 0xFF;

    let mut cursor = Cursor::new(buf);
    let err = PackageManifest::verify_checksum(&mut cursor).unwrap_err();
    assert!(matches!(err, PackageError::ChecksumMismatch { .. }));
}

#[test]
fn more_than_thirty_two_components_is_rejected() {
    let manifest = manifest_with(33, (0..32).collect());
    let images: Vec<Vec<u8>> = (0..33).map(|_| vec![0u8]).collect();
    let mut buf = Vec::new();
    let err = manifest.write(&images, &mut buf).unwrap_err();
    assert!(matches!(err, PackageError::Validation(_)));
}

#[test]
fn mismatched_image_count_is_rejected() {
    let manifest = manifest_with(2, vec![0, 1]);
    let images = vec![vec![1u8]];
    let mut buf = Vec::new();
    let err = manifest.write(&images, &mut buf).unwrap_err();
    assert!(matches!(err, PackageError::Validation(_)));
}

#[test]
fn unsupported_format_revision_is_rejected() {
    let mut manifest = manifest_with(1, vec![0]);
    manifest.package_header_information.package_header_format_revision = 1;
    let images = vec![vec![1u8]];
    let mut buf = Vec::new();
    let err = manifest.write(&images, &mut buf).unwrap_err();
    assert!(matches!(err, PackageError::Validation(_)));
}
