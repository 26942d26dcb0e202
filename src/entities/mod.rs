// Entity Models
// One typed record per source dataset, plus the reference code map
//
// Each entity has:
// - A declared primary key (see db::StoreRecord)
// - Optional fields where the source may not provide a value
// - No country identity of its own until harmonization assigns iso2

pub mod country;
pub mod weather;
pub mod gdp;
pub mod code_map;

pub use country::CountryRecord;
pub use weather::WeatherRecord;
pub use gdp::{GdpRecord, GDP_MAX_YEAR, GDP_MIN_YEAR};
pub use code_map::{CountryCode, CountryCodeMap};
