use crate::barcode_is_filename_safe;
use crate::read_group::derive_header;
use ahash::HashMap as AHashMap;
use ahash::HashMapExt;
use itertools::Itertools;
use noodles::bam;
use noodles::bgzf;
use noodles::sam::alignment::io::Write as AlignmentWrite;
use noodles::sam::alignment::RecordBuf;
use noodles::sam::header::record::value::map::builder::BuildError;
use noodles::sam::Header;
use std::collections::hash_map::Entry;
use std::fs::File;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while opening, writing, or finalizing per-barcode output BAMs.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("barcode {barcode:?} cannot be used as an output file name")]
    UnsafeBarcode { barcode: String },

    #[error("failed to build the output header for barcode {barcode:?}")]
    Header { barcode: String, source: BuildError },

    #[error("failed to create output BAM {path:?}")]
    Create { path: PathBuf, source: io::Error },

    #[error("failed to write to output BAM {path:?}")]
    Write { path: PathBuf, source: io::Error },

    #[error("failed to finalize output BAM {path:?}")]
    Close { path: PathBuf, source: io::Error },
}

/// One open per-barcode output stream: the BAM writer plus the derived header the
/// writer was opened with, which is needed to encode each record written to it.
pub struct OutputBam {
    path: PathBuf,
    header: Header,
    writer: bam::io::Writer<bgzf::io::Writer<File>>,
}

impl OutputBam {
    /// Appends one record to this output.
    ///
    /// # Errors
    ///   - Will error if the record cannot be encoded or written.
    pub fn write(&mut self, record: &RecordBuf) -> Result<(), RegistryError> {
        self.writer.write_alignment_record(&self.header, record).map_err(|source| {
            RegistryError::Write { path: self.path.clone(), source }
        })
    }

    /// Finalizes this output, flushing the BGZF stream and writing its EOF block.
    fn close(self) -> Result<(), RegistryError> {
        let path = self.path;
        self.writer.into_inner().finish().map_err(|source| RegistryError::Close { path, source })?;
        Ok(())
    }
}

/// The owner of every per-barcode output stream. Streams are opened lazily on first
/// sight of a barcode, with a header derived for that barcode, and are reused for
/// every subsequent record routed to the same barcode. `close_all` finalizes every
/// stream exactly once and must run on every exit path of the pass.
pub struct OutputRegistry {
    output_dir: PathBuf,
    base_header: Header,
    writers: AHashMap<String, OutputBam>,
}

impl OutputRegistry {
    /// Builds a registry that will create its outputs under `output_dir`, deriving each
    /// output's header from `base_header`.
    #[must_use]
    pub fn new(output_dir: PathBuf, base_header: Header) -> Self {
        Self { output_dir, base_header, writers: AHashMap::new() }
    }

    /// Returns the output stream for `barcode`, opening it on first sight: the
    /// per-barcode header is derived, `<output_dir>/<barcode>.bam` is created, and the
    /// header is written, exactly once per barcode for the lifetime of the registry.
    ///
    /// # Errors
    ///   - Will error if the barcode cannot be used as a file name.
    ///   - Will error if the output file cannot be created or its header written.
    pub fn get_or_create(&mut self, barcode: &str) -> Result<&mut OutputBam, RegistryError> {
        match self.writers.entry(barcode.to_owned()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                if !barcode_is_filename_safe(barcode) {
                    return Err(RegistryError::UnsafeBarcode { barcode: barcode.to_owned() });
                }

                let header = derive_header(&self.base_header, barcode)
                    .map_err(|source| RegistryError::Header {
                        barcode: barcode.to_owned(),
                        source,
                    })?;

                let path = self.output_dir.join(format!("{barcode}.bam"));
                let file = File::create(&path)
                    .map_err(|source| RegistryError::Create { path: path.clone(), source })?;
                let mut writer = bam::io::Writer::new(file);
                writer
                    .write_header(&header)
                    .map_err(|source| RegistryError::Write { path: path.clone(), source })?;

                Ok(entry.insert(OutputBam { path, header, writer }))
            }
        }
    }

    /// Finalizes every tracked output stream exactly once, in no particular order.
    /// Every stream is closed even when an earlier close fails; the first failure is
    /// returned. Idempotent: a second call finds no tracked streams and is a no-op.
    ///
    /// # Errors
    ///   - Will error if any output stream cannot be flushed and finalized.
    pub fn close_all(&mut self) -> Result<(), RegistryError> {
        let outputs = self.writers.drain().collect_vec();
        let mut first_error = None;
        for (_barcode, output) in outputs {
            if let Err(e) = output.close() {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }

    /// The number of output streams currently tracked.
    #[must_use]
    pub fn len(&self) -> usize {
        self.writers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.writers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::read_group::READ_GROUP_ID;
    use bstr::BString;
    use noodles::sam::header::record::value::map::{ReadGroup, ReferenceSequence};
    use noodles::sam::header::record::value::Map;
    use rstest::rstest;
    use std::num::NonZeroUsize;
    use tempfile::TempDir;

    fn base_header() -> Header {
        Header::builder()
            .set_header(Default::default())
            .add_reference_sequence(
                "chr1",
                Map::<ReferenceSequence>::new(NonZeroUsize::new(1_000).unwrap()),
            )
            .add_read_group("pooled", Map::<ReadGroup>::default())
            .build()
    }

    fn read_back_header(path: &std::path::Path) -> Header {
        let mut reader = bam::io::Reader::new(File::open(path).unwrap());
        reader.read_header().unwrap()
    }

    // ############################################################################################
    // Test [`OutputRegistry::get_or_create`]
    // ############################################################################################
    #[test]
    fn test_get_or_create_opens_one_stream_per_barcode() {
        let tmpdir = TempDir::new().unwrap();
        let mut registry = OutputRegistry::new(tmpdir.path().to_path_buf(), base_header());

        registry.get_or_create("AAAA").unwrap();
        registry.get_or_create("AAAA").unwrap();
        registry.get_or_create("CCCC").unwrap();
        assert_eq!(registry.len(), 2);

        registry.close_all().unwrap();
        assert!(tmpdir.path().join("AAAA.bam").exists());
        assert!(tmpdir.path().join("CCCC.bam").exists());
    }

    #[test]
    fn test_get_or_create_writes_the_derived_header_once() {
        let tmpdir = TempDir::new().unwrap();
        let mut registry = OutputRegistry::new(tmpdir.path().to_path_buf(), base_header());

        for _ in 0..100 {
            registry.get_or_create("AAAA").unwrap();
        }
        registry.close_all().unwrap();

        let header = read_back_header(&tmpdir.path().join("AAAA.bam"));
        assert_eq!(header.read_groups().len(), 1);
        let (id, _) = header.read_groups().first().unwrap();
        assert_eq!(id, &BString::from(READ_GROUP_ID));
        assert_eq!(header.reference_sequences().len(), 1);
    }

    #[test]
    fn test_get_or_create_fails_for_unwritable_output_dir() {
        let tmpdir = TempDir::new().unwrap();
        let missing = tmpdir.path().join("does").join("not").join("exist");
        let mut registry = OutputRegistry::new(missing, base_header());

        let result = registry.get_or_create("AAAA");
        assert!(matches!(result, Err(RegistryError::Create { .. })));
    }

    #[rstest]
    #[case("../escape")]
    #[case("bad/barcode")]
    #[case("AC GT")]
    #[case("")]
    fn test_get_or_create_rejects_path_unsafe_barcodes(#[case] barcode: &str) {
        let tmpdir = TempDir::new().unwrap();
        let mut registry = OutputRegistry::new(tmpdir.path().to_path_buf(), base_header());

        let result = registry.get_or_create(barcode);
        assert!(matches!(result, Err(RegistryError::UnsafeBarcode { .. })));
        assert!(registry.is_empty());
    }

    // ############################################################################################
    // Test [`OutputRegistry::close_all`]
    // ############################################################################################
    #[test]
    fn test_close_all_finalizes_streams_and_is_idempotent() {
        let tmpdir = TempDir::new().unwrap();
        let mut registry = OutputRegistry::new(tmpdir.path().to_path_buf(), base_header());

        registry.get_or_create("AAAA").unwrap();
        registry.close_all().unwrap();
        assert!(registry.is_empty());

        // Second call must be a no-op.
        registry.close_all().unwrap();

        // The finalized file must be readable as a BAM, EOF block included.
        let header = read_back_header(&tmpdir.path().join("AAAA.bam"));
        assert_eq!(header.read_groups().len(), 1);
    }

    #[test]
    fn test_close_all_on_empty_registry_is_a_no_op() {
        let tmpdir = TempDir::new().unwrap();
        let mut registry = OutputRegistry::new(tmpdir.path().to_path_buf(), base_header());
        registry.close_all().unwrap();
        assert!(registry.is_empty());
    }
}
