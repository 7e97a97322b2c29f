//! Human-readable document numbers: `INV-20260315-7K2QXD`

use chrono::NaiveDate;
use rand::Rng;

const ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const SUFFIX_LEN: usize = 6;

pub const INVOICE_PREFIX: &str = "INV";
pub const SERVICE_REQUEST_PREFIX: &str = "SR";

/// `{prefix}-{YYYYMMDD}-{6 random characters}`
pub fn reference_number(prefix: &str, date: NaiveDate) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..SUFFIX_LEN)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();

    format!("{}-{}-{}", prefix, date.format("%Y%m%d"), suffix)
}
