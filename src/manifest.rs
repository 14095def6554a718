/*++

Licensed under the Apache-2.0 license.

--*/
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc};
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::{FromPrimitive, ToPrimitive};
use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{de, Deserialize, Serialize};
use std::fmt;
use std::io::{Read, Write};
use std::str::FromStr;

use crc::{Crc, CRC_32_ISO_HDLC};

use crate::bitmap;
use crate::error::{malformed_on_eof, PackageError, Result};

/// Fixed DSP0267 revision-2 header identifier this crate reads and writes.
/// Stored as raw bytes; not byte-swapped on either side of the wire.
pub const PACKAGE_HEADER_IDENTIFIER: [u8; 16] = [
    0x12, 0x44, 0xD2, 0x64, 0x8D, 0x7D, 0x47, 0x18, 0xA0, 0x30, 0xFC, 0x8A, 0x56, 0x58, 0x7D, 0x5A,
];

pub const PACKAGE_HEADER_FORMAT_REVISION: u8 = 2;

pub const MAX_COMPONENTS: usize = 32;
pub const MAX_DEVICE_RECORDS: usize = 255;
pub const MAX_STRING_LEN: usize = 255;

const UUID_DESCRIPTOR_TYPE: u16 = 0x0002;
const UUID_DESCRIPTOR_LENGTH: u16 = 16;

/// Defined device-update-option-flag bits (§3); only bit 0 is assigned.
const DEVICE_UPDATE_OPTION_FLAGS_MASK: u32 = 0x0000_0001;
/// Defined component-option bits; only bit 0 is assigned.
const COMPONENT_OPTIONS_MASK: u16 = 0x0001;
/// Defined activation-method bits 0..=5.
const ACTIVATION_METHOD_MASK: u16 = 0x003F;

const HEADER_SIZE_FIELD_OFFSET: usize = 17;

fn default_comparison_stamp() -> u32 {
    0xFFFF_FFFF
}

fn crc32(bytes: &[u8]) -> u32 {
    Crc::<u32>::new(&CRC_32_ISO_HDLC).checksum(bytes)
}

/// The logical description of a DSP0267 package, independent of where its
/// bytes live on disk. Constructed in memory (typically deserialized from
/// JSON), consumed once by [`PackageManifest::write`], and never mutated
/// after writing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageManifest {
    pub package_header_information: PackageHeaderInformation,
    pub firmware_device_identification_area: Vec<DeviceRecord>,
    pub component_image_information_area: Vec<ComponentEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageHeaderInformation {
    #[serde(with = "hex_bytes16")]
    pub package_header_identifier: [u8; 16],
    pub package_header_format_revision: u8,
    /// Total header length including the trailing CRC32. Ignored on write
    /// (recomputed from the assembled header); populated by the reader.
    #[serde(default)]
    pub package_header_size: u32,
    pub package_release_date_time: DateTime<Utc>,
    /// Present for inspection; always recomputed from component count on write.
    #[serde(default)]
    pub component_bitmap_bit_length: u16,
    pub package_version_string_type: StringType,
    pub package_version_string: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// On-wire byte length of the whole record; recomputed on write.
    #[serde(default)]
    pub record_length: u16,
    pub device_update_option_flags: u32,
    pub component_image_set_version_string_type: StringType,
    pub component_image_set_version_string: String,
    /// Sorted component indices this device applies to.
    pub applicable_components: Vec<u8>,
    pub initial_descriptor: Descriptor,
    /// Populated by the reader when a package carries more than one
    /// descriptor; the writer refuses to emit a non-empty list (§1 Non-goals).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_descriptors: Vec<Descriptor>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    pub descriptor_type: u16,
    #[serde(with = "hex_bytes")]
    pub descriptor_data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentEntry {
    pub classification: u16,
    pub identifier: u16,
    /// Written as the fixed sentinel `0xFFFFFFFF` regardless of this value
    /// (§3: "writer emits `0xFFFFFFFF`"); populated from the wire on read.
    #[serde(default = "default_comparison_stamp")]
    pub comparison_stamp: u32,
    pub options: u16,
    pub requested_activation_method: u16,
    /// Absolute file offset of the component image; computed on write.
    #[serde(default)]
    pub location_offset: u32,
    /// Image byte length; computed on write from the supplied image.
    #[serde(default)]
    pub size: u32,
    pub version_string_type: StringType,
    pub version_string: String,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive, ToPrimitive, Default)]
pub enum StringType {
    #[default]
    Unknown = 0,
    Ascii = 1,
    Utf8 = 2,
    Utf16 = 3,
    Utf16Le = 4,
    Utf16Be = 5,
}

impl StringType {
    fn as_str(self) -> &'static str {
        match self {
            StringType::Unknown => "UNKNOWN",
            StringType::Ascii => "ASCII",
            StringType::Utf8 => "UTF8",
            StringType::Utf16 => "UTF16",
            StringType::Utf16Le => "UTF16LE",
            StringType::Utf16Be => "UTF16BE",
        }
    }
}

impl fmt::Display for StringType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for StringType {
    type Err = String;

    fn from_str(input: &str) -> std::result::Result<StringType, Self::Err> {
        match input.to_uppercase().as_str() {
            "UNKNOWN" => Ok(StringType::Unknown),
            "ASCII" => Ok(StringType::Ascii),
            "UTF8" => Ok(StringType::Utf8),
            "UTF16" => Ok(StringType::Utf16),
            "UTF16LE" => Ok(StringType::Utf16Le),
            "UTF16BE" => Ok(StringType::Utf16Be),
            _ => Err(format!("invalid string type: {input}")),
        }
    }
}

impl Serialize for StringType {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for StringType {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        StringType::from_str(&s).map_err(de::Error::custom)
    }
}

/// Descriptor type table (§4.3), for presentation only — the reader accepts
/// any `u16` type code, known or not.
pub fn descriptor_type_name(descriptor_type: u16) -> Option<&'static str> {
    Some(match descriptor_type {
        0x0000 => "PCI Vendor ID",
        0x0001 => "IANA Enterprise ID",
        0x0002 => "UUID",
        0x0003 => "PnP Vendor ID",
        0x0004 => "ACPI Vendor ID",
        0x0100 => "PCI Device ID",
        0x0101 => "PCI Subsystem Vendor ID",
        0x0102 => "PCI Subsystem ID",
        0x0103 => "PCI Revision ID",
        0x0104 => "PnP Product Identifier",
        0x0105 => "ACPI Product Identifier",
        _ => return None,
    })
}

/// The 13-byte `PackageReleaseDateTime` layout (§6).
struct Timestamp104 {
    data: [u8; 13],
}

impl Timestamp104 {
    fn from_datetime(dt: DateTime<Utc>) -> Self {
        let mut data = [0u8; 13];
        let micros = dt.timestamp_subsec_micros();
        data[2] = (micros & 0xFF) as u8;
        data[3] = ((micros >> 8) & 0xFF) as u8;
        data[4] = ((micros >> 16) & 0xFF) as u8;
        data[5] = dt.second() as u8;
        data[6] = dt.minute() as u8;
        data[7] = dt.hour() as u8;
        data[8] = dt.day() as u8;
        data[9] = dt.month() as u8;
        let year = dt.year() as u16;
        data[10] = (year & 0xFF) as u8;
        data[11] = (year >> 8) as u8;
        Timestamp104 { data }
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.data);
    }

    fn decode(reader: &mut impl Read) -> Result<Self> {
        let mut data = [0u8; 13];
        reader
            .read_exact(&mut data)
            .map_err(|e| malformed_on_eof(e, "package_release_date_time"))?;
        Ok(Timestamp104 { data })
    }

    fn to_datetime(&self) -> Result<DateTime<Utc>> {
        let year = u16::from_le_bytes([self.data[10], self.data[11]]) as i32;
        let month = self.data[9] as u32;
        let day = self.data[8] as u32;
        let hour = self.data[7] as u32;
        let minute = self.data[6] as u32;
        let second = self.data[5] as u32;
        let micros = u32::from_le_bytes([self.data[2], self.data[3], self.data[4], 0]);

        let date = NaiveDate::from_ymd_opt(year, month, day)
            .ok_or_else(|| PackageError::Malformed("invalid release date".into()))?;
        let time = NaiveTime::from_hms_micro_opt(hour, minute, second, micros)
            .ok_or_else(|| PackageError::Malformed("invalid release time".into()))?;
        Ok(DateTime::from_naive_utc_and_offset(
            NaiveDateTime::new(date, time),
            Utc,
        ))
    }
}

fn read_u8(reader: &mut impl Read, field: &str) -> Result<u8> {
    let mut buf = [0u8; 1];
    reader
        .read_exact(&mut buf)
        .map_err(|e| malformed_on_eof(e, field))?;
    Ok(buf[0])
}

fn read_u16(reader: &mut impl Read, field: &str) -> Result<u16> {
    let mut buf = [0u8; 2];
    reader
        .read_exact(&mut buf)
        .map_err(|e| malformed_on_eof(e, field))?;
    Ok(u16::from_le_bytes(buf))
}

fn read_u32(reader: &mut impl Read, field: &str) -> Result<u32> {
    let mut buf = [0u8; 4];
    reader
        .read_exact(&mut buf)
        .map_err(|e| malformed_on_eof(e, field))?;
    Ok(u32::from_le_bytes(buf))
}

fn read_bytes(reader: &mut impl Read, len: usize, field: &str) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    reader
        .read_exact(&mut buf)
        .map_err(|e| malformed_on_eof(e, field))?;
    Ok(buf)
}

fn read_string_type(reader: &mut impl Read, field: &str) -> Result<StringType> {
    let raw = read_u8(reader, field)?;
    StringType::from_u8(raw)
        .ok_or_else(|| PackageError::Malformed(format!("unknown {field} code {raw}")))
}

fn read_ascii_string(reader: &mut impl Read, len: u8, field: &str) -> Result<String> {
    let bytes = read_bytes(reader, len as usize, field)?;
    String::from_utf8(bytes)
        .map_err(|_| PackageError::Malformed(format!("{field} is not valid UTF-8")))
}

impl Descriptor {
    fn total_bytes(&self) -> usize {
        2 + 2 + self.descriptor_data.len()
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.descriptor_type.to_le_bytes());
        out.extend_from_slice(&(self.descriptor_data.len() as u16).to_le_bytes());
        out.extend_from_slice(&self.descriptor_data);
    }

    fn decode(reader: &mut impl Read) -> Result<Self> {
        let descriptor_type = read_u16(reader, "descriptor_type")?;
        let length = read_u16(reader, "descriptor_length")?;
        let descriptor_data = read_bytes(reader, length as usize, "descriptor_data")?;
        Ok(Descriptor {
            descriptor_type,
            descriptor_data,
        })
    }
}

impl DeviceRecord {
    fn fixed_tail_len(&self, bitmap_byte_len: usize) -> usize {
        // descriptor_count(1) + device_update_option_flags(4)
        // + component_image_set_version_string_type(1) + length(1)
        // + firmware_device_package_data_length(2) + applicable_components bitmap
        1 + 4 + 1 + 1 + 2 + bitmap_byte_len
    }

    fn computed_record_length(&self, component_bitmap_bit_length: u16) -> u16 {
        let bitmap_len = bitmap::byte_length(component_bitmap_bit_length);
        let mut len = 2; // record_length itself
        len += self.fixed_tail_len(bitmap_len);
        len += self.component_image_set_version_string.len();
        len += self.initial_descriptor.total_bytes();
        len as u16
    }

    fn validate(&self, component_count: usize) -> Result<()> {
        if self.component_image_set_version_string.len() > MAX_STRING_LEN {
            return Err(PackageError::Validation(format!(
                "component_image_set_version_string exceeds {MAX_STRING_LEN} bytes"
            )));
        }
        if self.device_update_option_flags & !DEVICE_UPDATE_OPTION_FLAGS_MASK != 0 {
            return Err(PackageError::Validation(format!(
                "device_update_option_flags {:#010x} sets bits outside the defined mask",
                self.device_update_option_flags
            )));
        }
        if self.initial_descriptor.descriptor_type != UUID_DESCRIPTOR_TYPE
            || self.initial_descriptor.descriptor_data.len() != UUID_DESCRIPTOR_LENGTH as usize
        {
            return Err(PackageError::Validation(
                "initial_descriptor must be a 16-byte UUID descriptor (type 0x0002)".into(),
            ));
        }
        if !self.additional_descriptors.is_empty() {
            return Err(PackageError::Validation(
                "writing additional descriptors beyond the initial one is not supported".into(),
            ));
        }
        for &index in &self.applicable_components {
            if index as usize >= component_count {
                return Err(PackageError::Validation(format!(
                    "applicable_components references component {index}, but only {component_count} exist"
                )));
            }
        }
        Ok(())
    }

    fn encode(&self, out: &mut Vec<u8>, component_bitmap_bit_length: u16) {
        let record_length = self.computed_record_length(component_bitmap_bit_length);
        out.extend_from_slice(&record_length.to_le_bytes());
        out.push(1u8); // descriptor_count: writer always emits the one initial descriptor
        out.extend_from_slice(&self.device_update_option_flags.to_le_bytes());
        out.push(
            self.component_image_set_version_string_type
                .to_u8()
                .unwrap_or(0),
        );
        out.push(self.component_image_set_version_string.len() as u8);
        out.extend_from_slice(&0u16.to_le_bytes()); // firmware_device_package_data_length
        let bitmap = bitmap::encode(&self.applicable_components, component_bitmap_bit_length);
        out.extend_from_slice(&bitmap);
        out.extend_from_slice(self.component_image_set_version_string.as_bytes());
        self.initial_descriptor.encode(out);
    }

    fn decode(reader: &mut impl Read, component_bitmap_bit_length: u16) -> Result<Self> {
        let record_length = read_u16(reader, "record_length")?;
        let descriptor_count = read_u8(reader, "descriptor_count")?;
        if descriptor_count == 0 {
            return Err(PackageError::Malformed(
                "descriptor_count must be at least 1".into(),
            ));
        }
        let device_update_option_flags = read_u32(reader, "device_update_option_flags")?;
        let component_image_set_version_string_type =
            read_string_type(reader, "component_image_set_version_string_type")?;
        let version_string_length = read_u8(reader, "component_image_set_version_string_length")?;
        let _firmware_device_package_data_length =
            read_u16(reader, "firmware_device_package_data_length")?;
        let bitmap_bytes = read_bytes(
            reader,
            bitmap::byte_length(component_bitmap_bit_length),
            "applicable_components",
        )?;
        let applicable_components = bitmap::decode(&bitmap_bytes);
        let component_image_set_version_string = read_ascii_string(
            reader,
            version_string_length,
            "component_image_set_version_string",
        )?;
        let initial_descriptor = Descriptor::decode(reader)?;
        let mut additional_descriptors = Vec::with_capacity((descriptor_count - 1) as usize);
        for _ in 1..descriptor_count {
            additional_descriptors.push(Descriptor::decode(reader)?);
        }

        Ok(DeviceRecord {
            record_length,
            device_update_option_flags,
            component_image_set_version_string_type,
            component_image_set_version_string,
            applicable_components,
            initial_descriptor,
            additional_descriptors,
        })
    }
}

impl ComponentEntry {
    fn validate(&self) -> Result<()> {
        if self.version_string.len() > MAX_STRING_LEN {
            return Err(PackageError::Validation(format!(
                "component version_string exceeds {MAX_STRING_LEN} bytes"
            )));
        }
        if self.options & !COMPONENT_OPTIONS_MASK != 0 {
            return Err(PackageError::Validation(format!(
                "options {:#06x} sets bits outside the defined mask",
                self.options
            )));
        }
        if self.requested_activation_method & !ACTIVATION_METHOD_MASK != 0 {
            return Err(PackageError::Validation(format!(
                "requested_activation_method {:#06x} sets bits outside the defined mask",
                self.requested_activation_method
            )));
        }
        Ok(())
    }

    /// Encodes the record with `location_offset` and `size` left as zero
    /// placeholders, returning the byte offset (within `out`) of the
    /// `location_offset` field so the caller can patch it in later.
    fn encode_placeholder(&self, out: &mut Vec<u8>) -> usize {
        out.extend_from_slice(&self.classification.to_le_bytes());
        out.extend_from_slice(&self.identifier.to_le_bytes());
        out.extend_from_slice(&default_comparison_stamp().to_le_bytes());
        out.extend_from_slice(&self.options.to_le_bytes());
        out.extend_from_slice(&self.requested_activation_method.to_le_bytes());
        let location_offset_field = out.len();
        out.extend_from_slice(&0u32.to_le_bytes()); // location_offset placeholder
        out.extend_from_slice(&0u32.to_le_bytes()); // size placeholder
        out.push(self.version_string_type.to_u8().unwrap_or(0));
        out.push(self.version_string.len() as u8);
        out.extend_from_slice(self.version_string.as_bytes());
        location_offset_field
    }

    fn decode(reader: &mut impl Read) -> Result<Self> {
        let classification = read_u16(reader, "classification")?;
        let identifier = read_u16(reader, "identifier")?;
        let comparison_stamp = read_u32(reader, "comparison_stamp")?;
        let options = read_u16(reader, "options")?;
        let requested_activation_method = read_u16(reader, "requested_activation_method")?;
        let location_offset = read_u32(reader, "location_offset")?;
        let size = read_u32(reader, "size")?;
        let version_string_type = read_string_type(reader, "version_string_type")?;
        let version_string_length = read_u8(reader, "version_string_length")?;
        let version_string = read_ascii_string(reader, version_string_length, "version_string")?;

        Ok(ComponentEntry {
            classification,
            identifier,
            comparison_stamp,
            options,
            requested_activation_method,
            location_offset,
            size,
            version_string_type,
            version_string,
        })
    }
}

impl PackageHeaderInformation {
    fn validate(&self) -> Result<()> {
        if self.package_header_identifier != PACKAGE_HEADER_IDENTIFIER {
            return Err(PackageError::Validation(
                "package_header_identifier does not match the supported DSP0267 revision 2 UUID"
                    .into(),
            ));
        }
        if self.package_header_format_revision != PACKAGE_HEADER_FORMAT_REVISION {
            return Err(PackageError::Validation(format!(
                "unsupported package_header_format_revision {}",
                self.package_header_format_revision
            )));
        }
        if self.package_version_string.len() > MAX_STRING_LEN {
            return Err(PackageError::Validation(format!(
                "package_version_string exceeds {MAX_STRING_LEN} bytes"
            )));
        }
        Ok(())
    }
}

impl PackageManifest {
    fn validate(&self, image_count: usize) -> Result<()> {
        self.package_header_information.validate()?;

        if self.component_image_information_area.len() > MAX_COMPONENTS {
            return Err(PackageError::Validation(format!(
                "at most {MAX_COMPONENTS} components are supported, got {}",
                self.component_image_information_area.len()
            )));
        }
        if self.firmware_device_identification_area.len() > MAX_DEVICE_RECORDS {
            return Err(PackageError::Validation(format!(
                "at most {MAX_DEVICE_RECORDS} device records are supported, got {}",
                self.firmware_device_identification_area.len()
            )));
        }
        if image_count != self.component_image_information_area.len() {
            return Err(PackageError::Validation(format!(
                "{} images supplied but {} components declared",
                image_count,
                self.component_image_information_area.len()
            )));
        }

        let component_count = self.component_image_information_area.len();
        for device in &self.firmware_device_identification_area {
            device.validate(component_count)?;
        }
        for component in &self.component_image_information_area {
            component.validate()?;
        }
        Ok(())
    }

    /// Serializes this manifest and the given component images into a DSP0267
    /// revision-2 package, writing it to `sink`.
    ///
    /// `images[i]` must be the byte content of `component_image_information_area[i]`.
    /// Validates the whole manifest before writing a single byte.
    pub fn write(&self, images: &[impl AsRef<[u8]>], sink: &mut impl Write) -> Result<()> {
        self.validate(images.len())?;

        let mut header = Vec::new();
        header.extend_from_slice(&PACKAGE_HEADER_IDENTIFIER);
        header.push(PACKAGE_HEADER_FORMAT_REVISION);
        header.extend_from_slice(&0u16.to_le_bytes()); // header_size placeholder

        let timestamp = Timestamp104::from_datetime(
            self.package_header_information.package_release_date_time,
        );
        timestamp.encode(&mut header);

        let component_bitmap_bit_length =
            bitmap::component_bitmap_bit_length(self.component_image_information_area.len());
        header.extend_from_slice(&component_bitmap_bit_length.to_le_bytes());

        header.push(
            self.package_header_information
                .package_version_string_type
                .to_u8()
                .unwrap_or(0),
        );
        let version_bytes = self
            .package_header_information
            .package_version_string
            .as_bytes();
        header.push(version_bytes.len() as u8);
        header.extend_from_slice(version_bytes);

        header.push(self.firmware_device_identification_area.len() as u8);
        for device in &self.firmware_device_identification_area {
            device.encode(&mut header, component_bitmap_bit_length);
        }

        header
            .extend_from_slice(&(self.component_image_information_area.len() as u16).to_le_bytes());
        let mut location_offset_fields =
            Vec::with_capacity(self.component_image_information_area.len());
        for component in &self.component_image_information_area {
            location_offset_fields.push(component.encode_placeholder(&mut header));
        }

        // header.len() is the position right after the component area,
        // immediately before the (not-yet-written) CRC32 word.
        let header_size = header.len() as u32 + 4;

        let mut offset_cursor = header_size;
        for (field_offset, image) in location_offset_fields.iter().zip(images) {
            let size = image.as_ref().len() as u32;
            header[*field_offset..*field_offset + 4].copy_from_slice(&offset_cursor.to_le_bytes());
            header[*field_offset + 4..*field_offset + 8].copy_from_slice(&size.to_le_bytes());
            offset_cursor += size;
        }

        // Overwrites the 2-byte placeholder at offset 17 with a 4-byte value,
        // clobbering the timestamp's first two (reserved) bytes. See §9.
        header[HEADER_SIZE_FIELD_OFFSET..HEADER_SIZE_FIELD_OFFSET + 4]
            .copy_from_slice(&header_size.to_le_bytes());

        let checksum = crc32(&header);

        sink.write_all(&header)?;
        sink.write_all(&checksum.to_le_bytes())?;
        for image in images {
            sink.write_all(image.as_ref())?;
        }
        log::info!(
            "wrote PLDM package: {} components, header_size={}, checksum={:#010x}",
            self.component_image_information_area.len(),
            header_size,
            checksum
        );

        Ok(())
    }

    /// Parses a package from `source`. Does not verify the trailing CRC32;
    /// use [`PackageManifest::read_verified`] for that.
    pub fn read(source: &mut impl Read) -> Result<Self> {
        let package_header_identifier: [u8; 16] =
            read_bytes(source, 16, "package_header_identifier")?
                .try_into()
                .unwrap();
        let package_header_format_revision = read_u8(source, "package_header_format_revision")?;
        let package_header_size = read_u16(source, "package_header_size")? as u32;
        let package_release_date_time = Timestamp104::decode(source)?.to_datetime()?;
        let component_bitmap_bit_length = read_u16(source, "component_bitmap_bit_length")?;
        let package_version_string_type = read_string_type(source, "package_version_string_type")?;
        let package_version_string_length =
            read_u8(source, "package_version_string_length")?;
        let package_version_string = read_ascii_string(
            source,
            package_version_string_length,
            "package_version_string",
        )?;

        let device_record_count = read_u8(source, "device_id_record_count")?;
        let mut firmware_device_identification_area =
            Vec::with_capacity(device_record_count as usize);
        for _ in 0..device_record_count {
            firmware_device_identification_area
                .push(DeviceRecord::decode(source, component_bitmap_bit_length)?);
        }

        let component_count = read_u16(source, "component_image_count")?;
        let mut component_image_information_area = Vec::with_capacity(component_count as usize);
        for _ in 0..component_count {
            component_image_information_area.push(ComponentEntry::decode(source)?);
        }

        let _package_header_checksum = read_u32(source, "package_header_checksum")?;

        Ok(PackageManifest {
            package_header_information: PackageHeaderInformation {
                package_header_identifier,
                package_header_format_revision,
                package_header_size,
                package_release_date_time,
                component_bitmap_bit_length,
                package_version_string_type,
                package_version_string,
            },
            firmware_device_identification_area,
            component_image_information_area,
        })
    }

    /// Recomputes the header CRC32 over `source` and compares it against the
    /// trailing checksum word, without fully decoding the package.
    pub fn verify_checksum(source: &mut (impl Read + std::io::Seek)) -> Result<()> {
        use std::io::SeekFrom;

        source.seek(SeekFrom::Start(HEADER_SIZE_FIELD_OFFSET as u64))?;
        let header_size = read_u32(source, "package_header_size")?;
        if header_size < 4 {
            return Err(PackageError::Malformed(
                "package_header_size is too small to contain a checksum".into(),
            ));
        }

        // A corrupt or hostile package can claim an enormous header_size;
        // bound it against the real source length before allocating for it.
        let source_len = source.seek(SeekFrom::End(0))?;
        if header_size as u64 > source_len {
            return Err(PackageError::Malformed(format!(
                "package_header_size {header_size} exceeds package length {source_len}"
            )));
        }

        source.seek(SeekFrom::Start(0))?;
        let header_bytes = read_bytes(source, (header_size - 4) as usize, "header")?;
        let computed = crc32(&header_bytes);

        let expected = read_u32(source, "package_header_checksum")?;
        if computed != expected {
            return Err(PackageError::ChecksumMismatch { expected, computed });
        }
        Ok(())
    }

    /// Verifies the header checksum, then decodes the package from the start.
    pub fn read_verified(source: &mut (impl Read + std::io::Seek)) -> Result<Self> {
        use std::io::SeekFrom;

        Self::verify_checksum(source)?;
        source.seek(SeekFrom::Start(0))?;
        Self::read(source)
    }
}

mod hex_bytes16 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 16], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 16], D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("expected a 16-byte hex string"))
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s).map_err(serde::de::Error::custom)
    }
}
