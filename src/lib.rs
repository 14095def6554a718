/*++

Licensed under the Apache-2.0 license.

--*/
//! Packager and parser for PLDM Firmware Update Package (DSP0267 revision 2)
//! binaries: a CRC-protected header, a device identification area, a
//! component image area, and appended component image payloads.

pub mod bitmap;
pub mod error;
pub mod manifest;

pub use error::{PackageError, Result};
pub use manifest::{
    descriptor_type_name, ComponentEntry, Descriptor, DeviceRecord, PackageHeaderInformation,
    PackageManifest, StringType, MAX_COMPONENTS, MAX_DEVICE_RECORDS, MAX_STRING_LEN,
    PACKAGE_HEADER_FORMAT_REVISION, PACKAGE_HEADER_IDENTIFIER,
};
