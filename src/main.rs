/*++

Licensed under the Apache-2.0 license.

--*/
//! Command-line packager/parser for PLDM Firmware Update Package (DSP0267
//! revision 2) binaries.
//!
//! `pack <metadata.json> <image1> <image2> …` writes `pldm-fwup-pkg.bin` to
//! the current directory. `unpack <package.bin> <out.json>` writes the
//! decoded manifest as JSON.

use clap::{Arg, ArgAction, Command};
use pldm_fw_pkg::PackageManifest;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;
use std::process::ExitCode;

const OUTPUT_PACKAGE_NAME: &str = "pldm-fwup-pkg.bin";

fn main() -> ExitCode {
    let _ = simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .init();

    let matches = Command::new("pldm-fw-pkg")
        .version(clap::crate_version!())
        .about("Packages and parses PLDM Firmware Update Package (DSP0267 rev. 2) binaries")
        .subcommand_required(true)
        .subcommand(
            Command::new("pack")
                .about("Assembles a JSON metadata description and component images into a package")
                .arg(
                    Arg::new("metadata")
                        .value_name("METADATA.JSON")
                        .required(true),
                )
                .arg(
                    Arg::new("images")
                        .value_name("IMAGE")
                        .required(true)
                        .action(ArgAction::Append)
                        .num_args(1..),
                ),
        )
        .subcommand(
            Command::new("unpack")
                .about("Decodes a package into its JSON metadata description")
                .arg(
                    Arg::new("package")
                        .value_name("PACKAGE.BIN")
                        .required(true),
                )
                .arg(Arg::new("out").value_name("OUT.JSON").required(true)),
        )
        .get_matches();

    let result = match matches.subcommand() {
        Some(("pack", sub_matches)) => {
            let metadata_path: &String = sub_matches.get_one("metadata").unwrap();
            let images: Vec<&String> = sub_matches.get_many("images").unwrap().collect();
            pack(metadata_path, &images)
        }
        Some(("unpack", sub_matches)) => {
            let package_path: &String = sub_matches.get_one("package").unwrap();
            let out_path: &String = sub_matches.get_one("out").unwrap();
            unpack(package_path, out_path)
        }
        _ => unreachable!("subcommand_required enforces one of the above"),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err}");
            match err {
                pldm_fw_pkg::PackageError::Validation(_) => ExitCode::from(2),
                pldm_fw_pkg::PackageError::Malformed(_) => ExitCode::from(3),
                pldm_fw_pkg::PackageError::ChecksumMismatch { .. } => ExitCode::from(4),
                pldm_fw_pkg::PackageError::Io(_) => ExitCode::from(1),
            }
        }
    }
}

fn pack(metadata_path: &str, image_paths: &[&String]) -> pldm_fw_pkg::Result<()> {
    let metadata_file = File::open(metadata_path)?;
    let manifest: PackageManifest = serde_json::from_reader(BufReader::new(metadata_file))
        .map_err(|e| pldm_fw_pkg::PackageError::Validation(format!("invalid metadata JSON: {e}")))?;

    let images: Vec<Vec<u8>> = image_paths
        .iter()
        .map(|path| std::fs::read(path).map_err(pldm_fw_pkg::PackageError::from))
        .collect::<pldm_fw_pkg::Result<_>>()?;

    let output_path = PathBuf::from(OUTPUT_PACKAGE_NAME);
    let mut sink = BufWriter::new(File::create(&output_path)?);
    manifest.write(&images, &mut sink)?;

    log::info!("wrote package to {}", output_path.display());
    Ok(())
}

fn unpack(package_path: &str, out_path: &str) -> pldm_fw_pkg::Result<()> {
    let mut source = File::open(package_path)?;
    let manifest = PackageManifest::read_verified(&mut source)?;

    let out_file = File::create(out_path)?;
    serde_json::to_writer_pretty(BufWriter::new(out_file), &manifest)
        .map_err(|e| pldm_fw_pkg::PackageError::Malformed(format!("failed to write JSON: {e}")))?;

    log::info!("wrote metadata to {out_path}");
    Ok(())
}
