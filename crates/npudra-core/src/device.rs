//! Driver naming and slice identifiers.
//!
//! The whole card with logical index `N` is advertised as `npu-N-0`; slices
//! carved from it are `npu-N-K` with `K` counting up from 1.

/// Default driver name, also the attribute domain in device selectors.
pub const DRIVER_NAME: &str = "npu.example.com";

/// Device type attribute for whole cards.
pub const TYPE_NPU: &str = "NPU";
/// Device type attribute for partition slices.
pub const TYPE_VNPU: &str = "vNPU";

/// Identifier of the whole card with the given logical index.
pub fn whole_card_id(logical_index: u32) -> String {
    slice_id(logical_index, 0)
}

/// Identifier of slice `counter` on the card with the given logical index.
pub fn slice_id(logical_index: u32, counter: u32) -> String {
    format!("npu-{logical_index}-{counter}")
}

/// Split a slice identifier into (logical index, counter).
pub fn parse_slice_id(id: &str) -> Option<(u32, u32)> {
    let (index, counter) = id.strip_prefix("npu-")?.split_once('-')?;
    Some((parse_digits(index)?, parse_digits(counter)?))
}

/// Whether `id` follows the slice naming pattern.
pub fn is_slice_id(id: &str) -> bool {
    parse_slice_id(id).is_some()
}

/// Parse a non-empty run of ASCII digits; rejects signs.
fn parse_digits(s: &str) -> Option<u32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// The part of a device id after the `npu-` prefix, used in env var names.
pub fn env_suffix(id: &str) -> &str {
    id.strip_prefix("npu-").unwrap_or(id)
}
