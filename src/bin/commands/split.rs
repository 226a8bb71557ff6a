use crate::commands::command::Command;
use anyhow::{anyhow, Context, Result};
use cellsplit_lib::barcode_set::BarcodeSet;
use cellsplit_lib::demux::DemuxEngine;
use cellsplit_lib::registry::OutputRegistry;
use clap::Parser;
use log::info;
use noodles::bam;
use std::fs::{self, File};
use std::path::PathBuf;

/// Splits a pooled single-cell BAM into one BAM per cell barcode.
///
/// Each record's cell barcode is read from its ``CB`` tag and compared against the
/// barcodes listed in the ``--barcodes`` file (one barcode per line; blank lines and
/// duplicates are ignored). Records without a ``CB`` tag, and records whose barcode is
/// not listed, are dropped. Every remaining record is written to
/// ``<output>/<barcode>.bam``, in input order, with its ``RG`` tag rewritten to the
/// fixed read group ``RG1``.
///
/// Each output BAM's header is copied from the input, except that the read group list
/// is replaced with a single read group whose sample name is the barcode. Output files
/// are created lazily, so the output directory ends up containing one BAM per listed
/// barcode actually observed in the input; a run in which nothing matches succeeds and
/// produces no files.
///
/// The input may be coordinate-sorted or unsorted; the produced BAMs are neither
/// re-sorted nor indexed.
///
/// ## Example Command Line
///
/// ```
/// cellsplit split \
///     --input pooled.bam \
///     --barcodes cell_barcodes.txt \
///     --output per_cell/
/// ```
///
#[derive(Parser, Debug)]
#[command(version)]
pub(crate) struct Split {
    /// The input BAM file with per-record cell barcode (``CB``) tags.
    #[clap(long, short = 'i', required = true)]
    input: PathBuf,

    /// A text file with one cell barcode of interest per line.
    #[clap(long, short = 'b', required = true)]
    barcodes: PathBuf,

    /// The output directory into which to write per-barcode BAMs.
    #[clap(long, short = 'o', required = true)]
    output: PathBuf,
}

impl Split {
    /// Checks that the inputs to split are valid.
    /// Checks:
    ///     - That the input BAM and barcode files exist
    ///     - That the output directory exists (creating it if absent) and is not
    ///       read-only
    fn validate_inputs(&self) -> Result<()> {
        let mut constraint_errors = vec![];

        for (name, path) in [("input BAM", &self.input), ("barcode file", &self.barcodes)] {
            if !path.exists() {
                constraint_errors.push(format!("Provided {} {:#?} doesn't exist", name, path));
            }
        }

        if !self.output.exists() {
            info!("Output directory {:#?} didn't exist, creating it.", self.output);
            fs::create_dir_all(&self.output)?;
        }

        if self.output.metadata()?.permissions().readonly() {
            constraint_errors
                .push(format!("Output directory {:#?} cannot be read-only", self.output));
        }

        if constraint_errors.is_empty() {
            Ok(())
        } else {
            let mut details = "Inputs failed validation!\n".to_owned();
            for error_reason in constraint_errors {
                details.push_str(&format!("    - {}\n", error_reason));
            }
            Err(anyhow!("The following errors with the input(s) were detected:\n{}", details))
        }
    }
}

impl Command for Split {
    /// Executes the split command
    fn execute(&self) -> Result<()> {
        self.validate_inputs()?;

        let barcodes = BarcodeSet::from_file(&self.barcodes)
            .with_context(|| format!("Failed to read barcode file {:#?}", self.barcodes))?;
        info!("Read {} barcodes of interest from {:#?}.", barcodes.len(), self.barcodes);

        let file = File::open(&self.input)
            .with_context(|| format!("Failed to open input BAM {:#?}", self.input))?;
        let mut reader = bam::io::Reader::new(file);
        let header = reader
            .read_header()
            .with_context(|| format!("Failed to read header from {:#?}", self.input))?;

        let mut registry = OutputRegistry::new(self.output.clone(), header.clone());
        let stats = DemuxEngine::new(&barcodes).run(&mut reader, &header, &mut registry)?;

        info!(
            "Wrote {} of {} records ({} without a cell barcode, {} not in the barcode list).",
            stats.records_written,
            stats.records_read,
            stats.records_missing_barcode,
            stats.records_unmatched,
        );
        Ok(())
    }
}
