use crate::barcode_set::BarcodeSet;
use crate::read_group::{cell_barcode, set_read_group};
use crate::registry::OutputRegistry;
use anyhow::{Context, Result};
use log::error;
use noodles::bam;
use noodles::sam::Header;
use proglog::{CountFormatterKind, ProgLogBuilder};
use std::io::Read;

/// Counts accumulated over one demultiplexing pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DemuxStats {
    /// Total records read from the input.
    pub records_read: u64,
    /// Records routed to a per-barcode output.
    pub records_written: u64,
    /// Records skipped because they carry no cell barcode tag.
    pub records_missing_barcode: u64,
    /// Records skipped because their barcode is not in the whitelist.
    pub records_unmatched: u64,
}

/// Drives the single ordered pass over the input: for each record, extract the cell
/// barcode, filter it against the whitelist, rewrite the read group tag, and append the
/// record to its barcode's output. Records without a barcode and records with an
/// unlisted barcode are skipped silently (counted, not logged per record).
pub struct DemuxEngine<'a> {
    barcodes: &'a BarcodeSet,
}

impl<'a> DemuxEngine<'a> {
    #[must_use]
    pub fn new(barcodes: &'a BarcodeSet) -> Self {
        Self { barcodes }
    }

    /// Runs the pass to exhaustion of `reader` and then finalizes every output stream.
    /// The registry's `close_all` runs on every exit path: when reading, routing, or
    /// writing a record fails, all previously-opened outputs are still finalized before
    /// the error propagates, and a failure during that cleanup never masks the original
    /// error.
    ///
    /// # Errors
    ///   - Will error if a record cannot be read from the input.
    ///   - Will error if an output stream cannot be opened or written.
    ///   - Will error if any output stream cannot be finalized.
    pub fn run<R: Read>(
        &self,
        reader: &mut bam::io::Reader<R>,
        header: &Header,
        registry: &mut OutputRegistry,
    ) -> Result<DemuxStats> {
        let result = self.route_records(reader, header, registry);
        let close_result = registry.close_all();

        let stats = match result {
            Ok(stats) => stats,
            Err(e) => {
                if let Err(close_err) = close_result {
                    error!("cleanup after a failed pass also failed: {close_err}");
                }
                return Err(e);
            }
        };
        close_result?;
        Ok(stats)
    }

    /// The record loop proper: one record fully read, routed, and written before the
    /// next is requested, so that append order within each output equals input
    /// encounter order.
    fn route_records<R: Read>(
        &self,
        reader: &mut bam::io::Reader<R>,
        header: &Header,
        registry: &mut OutputRegistry,
    ) -> Result<DemuxStats> {
        let progress = ProgLogBuilder::new()
            .name("cellsplit")
            .noun("records")
            .verb("read")
            .unit(1_000_000)
            .count_formatter(CountFormatterKind::Comma)
            .level(log::Level::Info)
            .build();

        let mut stats = DemuxStats::default();
        for result in reader.record_bufs(header) {
            let mut record = result.context("failed to read alignment record")?;
            stats.records_read += 1;
            progress.record();

            let Some(barcode) = cell_barcode(&record).map(str::to_owned) else {
                stats.records_missing_barcode += 1;
                continue;
            };
            if !self.barcodes.contains(&barcode) {
                stats.records_unmatched += 1;
                continue;
            }

            let output = registry.get_or_create(&barcode)?;
            set_read_group(&mut record);
            output.write(&record)?;
            stats.records_written += 1;
        }

        Ok(stats)
    }
}
