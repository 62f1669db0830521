//! Region extraction from a customer's legal address.
//!
//! The portal does not always return a structured region, so the address is
//! scanned for known oblast/city name fragments. First hit wins; unknown
//! addresses map to a catch-all label the matcher will simply not match.

const REGION_FRAGMENTS: &[(&str, &str)] = &[
    ("алматинская", "Алматинская область"),
    ("алматы", "г. Алматы"),
    ("астана", "г. Астана"),
    ("нур-султан", "г. Астана"),
    ("акмолинская", "Акмолинская область"),
    ("туркестанская", "Туркестанская область"),
    ("шымкент", "г. Шымкент"),
    ("актюбинская", "Актюбинская область"),
    ("атырауская", "Атырауская область"),
    ("восточно-казахстанская", "Восточно-Казахстанская область"),
    ("жамбылская", "Жамбылская область"),
    ("западно-казахстанская", "Западно-Казахстанская область"),
    ("карагандинская", "Карагандинская область"),
    ("костанайская", "Костанайская область"),
    ("кызылординская", "Кызылординская область"),
    ("мангистауская", "Мангистауская область"),
    ("павлодарская", "Павлодарская область"),
    ("северо-казахстанская", "Северо-Казахстанская область"),
    ("абайская", "Абайская область"),
    ("жетісуская", "Жетісуская область"),
    ("улытауская", "Улытауская область"),
];

pub const REGION_UNKNOWN: &str = "Другой регион";
pub const REGION_MISSING: &str = "Не указан";

pub fn extract_region(legal_address: &str) -> &'static str {
    if legal_address.trim().is_empty() {
        return REGION_MISSING;
    }
    let address = legal_address.to_lowercase();
    REGION_FRAGMENTS
        .iter()
        .find(|(fragment, _)| address.contains(fragment))
        .map(|(_, region)| *region)
        .unwrap_or(REGION_UNKNOWN)
}
