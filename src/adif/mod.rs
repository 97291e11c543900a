// ADIF (Amateur Data Interchange Format) parsing for log imports
// Reference: https://adif.org/

pub mod bands;
pub mod modes;
pub mod parser;

pub use bands::{freq_to_band, normalize_band};
pub use modes::normalize_mode;
pub use parser::{parse_log, ParseWarning, ParsedLog};
