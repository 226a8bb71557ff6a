use bstr::BString;
use noodles::sam::alignment::record::data::field::Tag;
use noodles::sam::alignment::record_buf::data::field::Value;
use noodles::sam::alignment::RecordBuf;
use noodles::sam::header::record::value::map::builder::BuildError;
use noodles::sam::header::record::value::map::read_group::tag as rg_tag;
use noodles::sam::header::record::value::map::ReadGroup;
use noodles::sam::header::record::value::Map;
use noodles::sam::Header;

/// The read group ID written to every output header and every routed record.
pub const READ_GROUP_ID: &str = "RG1";
/// Fixed `PL` attribute of the synthesized read group.
pub const PLATFORM: &str = "ILLUMINA";
/// Fixed `LB` attribute of the synthesized read group.
pub const LIBRARY: &str = "Library";
/// Fixed `PU` attribute of the synthesized read group.
pub const PLATFORM_UNIT: &str = "Unit";

/// Builds the header for one barcode's output BAM: a deep copy of `base` whose read
/// group list is replaced by a single synthesized read group with the barcode as the
/// sample name. All other header records (`@HD`, `@SQ`, `@PG`, `@CO`) are carried
/// through unchanged, and `base` itself is not modified.
///
/// # Errors
///   - Will error if the synthesized read group fails to build.
pub fn derive_header(base: &Header, barcode: &str) -> Result<Header, BuildError> {
    let read_group = Map::<ReadGroup>::builder()
        .insert(rg_tag::SAMPLE, barcode.to_owned())
        .insert(rg_tag::PLATFORM, PLATFORM.to_owned())
        .insert(rg_tag::LIBRARY, LIBRARY.to_owned())
        .insert(rg_tag::PLATFORM_UNIT, PLATFORM_UNIT.to_owned())
        .build()?;

    let mut header = base.clone();
    let read_groups = header.read_groups_mut();
    read_groups.clear();
    read_groups.insert(BString::from(READ_GROUP_ID), read_group);
    Ok(header)
}

/// Returns the record's cell barcode, i.e. the value of its `CB` tag, when the tag is
/// present, string-typed, and valid UTF-8.
#[must_use]
pub fn cell_barcode(record: &RecordBuf) -> Option<&str> {
    match record.data().get(&Tag::CELL_BARCODE_ID) {
        Some(Value::String(barcode)) => std::str::from_utf8(barcode).ok(),
        _ => None,
    }
}

/// Overwrites (or sets) the record's `RG` tag with the fixed read group ID, linking the
/// record to the single read group present in every derived output header.
pub fn set_read_group(record: &mut RecordBuf) {
    record.data_mut().insert(Tag::READ_GROUP, Value::String(READ_GROUP_ID.into()));
}
