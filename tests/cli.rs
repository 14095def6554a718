/*++

Licensed under the Apache-2.0 license.

--*/
use pldm_fw_pkg::PackageManifest;
use std::process::Command;
use tempfile::tempdir;

fn sample_metadata_json() -> String {
    serde_json::json!({
        "package_header_information": {
            "package_header_identifier": hex::encode(pldm_fw_pkg::PACKAGE_HEADER_IDENTIFIER),
            "package_header_format_revision": pldm_fw_pkg::PACKAGE_HEADER_FORMAT_REVISION,
            "package_release_date_time": "2024-06-01T12:30:00Z",
            "package_version_string_type": "ASCII",
            "package_version_string": "v1"
        },
        "firmware_device_identification_area": [{
            "device_update_option_flags": 0,
            "component_image_set_version_string_type": "ASCII",
            "component_image_set_version_string": "dev-v1",
            "applicable_components": [0],
            "initial_descriptor": {
                "descriptor_type": 2,
                "descriptor_data": "00112233445566778899aabbccddeeff"
            }
        }],
        "component_image_information_area": [{
            "classification": 10,
            "identifier": 0,
            "options": 0,
            "requested_activation_method": 1,
            "version_string_type": "ASCII",
            "version_string": "comp-v0"
        }]
    })
    .to_string()
}

#[test]
fn pack_then_unpack_round_trips_through_the_cli() {
    let dir = tempdir().unwrap();
    let metadata_path = dir.path().join("metadata.json");
    let image_path = dir.path().join("component.bin");
    std::fs::write(&metadata_path, sample_metadata_json()).unwrap();
    std::fs::write(&image_path, [0xDE, 0xAD, 0xBE, 0xEF]).unwrap();

    let pack_status = Command::new(env!("CARGO_BIN_EXE_pldm-fw-pkg"))
        .current_dir(dir.path())
        .args(["pack", "metadata.json", "component.bin"])
        .status()
        .unwrap();
    assert!(pack_status.success());

    let package_path = dir.path().join("pldm-fwup-pkg.bin");
    assert!(package_path.exists());

    let out_json_path = dir.path().join("out.json");
    let unpack_status = Command::new(env!("CARGO_BIN_EXE_pldm-fw-pkg"))
        .args([
            "unpack",
            package_path.to_str().unwrap(),
            out_json_path.to_str().unwrap(),
        ])
        .status()
        .unwrap();
    assert!(unpack_status.success());

    let decoded: PackageManifest =
        serde_json::from_reader(std::fs::File::open(&out_json_path).unwrap()).unwrap();
    assert_eq!(decoded.component_image_information_area[0].size, 4);
    assert_eq!(
        decoded.component_image_information_area[0]
            .version_string,
        "comp-v0"
    );
}

#[test]
fn unpack_rejects_a_tampered_package() {
    let dir = tempdir().unwrap();
    let metadata_path = dir.path().join("metadata.json");
    let image_path = dir.path().join("component.bin");
    std::fs::write(&metadata_path, sample_metadata_json()).unwrap();
    std::fs::write(&image_path, [1, 2, 3, 4]).unwrap();

    let pack_status = Command::new(env!("CARGO_BIN_EXE_pldm-fw-pkg"))
        .current_dir(dir.path())
        .args(["pack", "metadata.json", "component.bin"])
        .status()
        .unwrap();
    assert!(pack_status.success());

    let package_path = dir.path().join("pldm-fwup-pkg.bin");
    let mut bytes = std::fs::read(&package_path).unwrap();
    // Byte 25 sits inside the release-date-time field, clear of the
    // PackageHeaderSize patch at bytes 17..21 (src/manifest.rs), so this
    // flips a CRC-covered byte without corrupting the declared header size.
    bytes[25] ^= 0xFF;
    std::fs::write(&package_path, bytes).unwrap();

    let out_json_path = dir.path().join("out.json");
    let unpack_status = Command::new(env!("CARGO_BIN_EXE_pldm-fw-pkg"))
        .args([
            "unpack",
            package_path.to_str().unwrap(),
            out_json_path.to_str().unwrap(),
        ])
        .status()
        .unwrap();
    assert!(!unpack_status.success());
    assert_eq!(unpack_status.code(), Some(4));
}
