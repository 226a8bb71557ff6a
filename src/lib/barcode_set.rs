use ahash::HashSet as AHashSet;
use ahash::HashSetExt;
use fgoxide::io::Io;
use std::path::Path;

/// An immutable set of cell barcodes of interest, loaded once at startup and used to
/// decide which records are routed to an output and which are dropped.
#[derive(Clone, Debug)]
pub struct BarcodeSet {
    barcodes: AHashSet<String>,
}

impl BarcodeSet {
    /// Builds a [`Self`] from an iterator of barcode strings. Surrounding whitespace is
    /// trimmed, blank entries are discarded, and duplicates are counted once.
    pub fn from_barcodes<I, S>(barcodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = AHashSet::new();
        for barcode in barcodes {
            let barcode = barcode.as_ref().trim();
            if !barcode.is_empty() {
                set.insert(barcode.to_owned());
            }
        }
        Self { barcodes: set }
    }

    /// Attempts to load a [`Self`] from a plain-text file with one barcode per line.
    ///
    /// # Errors
    ///   - Will error if the file cannot be opened or read.
    pub fn from_file<P: AsRef<Path>>(path: &P) -> Result<Self, fgoxide::FgError> {
        let io = Io::default();
        let lines = io.read_lines(path)?;
        Ok(Self::from_barcodes(lines))
    }

    /// Returns true if `barcode` is a member of the set.
    #[must_use]
    pub fn contains(&self, barcode: &str) -> bool {
        self.barcodes.contains(barcode)
    }

    /// The number of distinct barcodes in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.barcodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.barcodes.is_empty()
    }
}
