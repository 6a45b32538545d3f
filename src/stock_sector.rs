/// Static symbol -> sector label table feeding the Sector Ranker's gate.
///
/// Values are "sector / index group" strings, not strict NSE index
/// membership; the Sector Ranker just needs a stable bucket per symbol.
use crate::normalize::normalize_symbol;
use std::collections::HashMap;
use std::sync::OnceLock;

fn sector_map() -> &'static HashMap<&'static str, &'static str> {
    static MAP: OnceLock<HashMap<&'static str, &'static str>> = OnceLock::new();
    MAP.get_or_init(|| {
        HashMap::from([
            // NIFTY AUTO
            ("TVSMOTOR", "NIFTY AUTO"),
            ("MARUTI", "NIFTY AUTO"),
            ("M&M", "NIFTY AUTO"),
            ("TATAMOTORS", "NIFTY AUTO"),
            ("BAJAJ-AUTO", "NIFTY AUTO"),
            ("EICHERMOT", "NIFTY AUTO"),
            ("HEROMOTOCO", "NIFTY AUTO"),
            // NIFTY BANK
            ("HDFCBANK", "NIFTY BANK"),
            ("ICICIBANK", "NIFTY BANK"),
            ("KOTAKBANK", "NIFTY BANK"),
            ("SBIN", "NIFTY BANK"),
            ("AXISBANK", "NIFTY BANK"),
            ("INDUSINDBK", "NIFTY BANK"),
            // NIFTY FINANCIAL SERVICES / NBFC / INSURANCE
            ("HDFCLIFE", "NIFTY FIN SERVICE"),
            ("SBILIFE", "NIFTY FIN SERVICE"),
            ("BAJFINANCE", "NIFTY FIN SERVICE"),
            ("BAJAJFINSV", "NIFTY FIN SERVICE"),
            ("HDFC", "NIFTY FIN SERVICE"),
            ("LICI", "NIFTY FIN SERVICE"),
            // NIFTY FMCG / CONSUMER
            ("ITC", "NIFTY FMCG"),
            ("HINDUNILVR", "NIFTY FMCG"),
            ("NESTLEIND", "NIFTY FMCG"),
            ("BRITANNIA", "NIFTY FMCG"),
            ("TATACONSUM", "NIFTY FMCG"),
            // NIFTY IT
            ("TCS", "NIFTY IT"),
            ("INFY", "NIFTY IT"),
            ("HCLTECH", "NIFTY IT"),
            ("WIPRO", "NIFTY IT"),
            ("TECHM", "NIFTY IT"),
            // NIFTY PHARMA / HEALTHCARE
            ("SUNPHARMA", "NIFTY PHARMA"),
            ("DRREDDY", "NIFTY PHARMA"),
            ("CIPLA", "NIFTY PHARMA"),
            ("DIVISLAB", "NIFTY PHARMA"),
            ("APOLLOHOSP", "NIFTY PHARMA"),
            // NIFTY METAL
            ("TATASTEEL", "NIFTY METAL"),
            ("HINDALCO", "NIFTY METAL"),
            ("JSWSTEEL", "NIFTY METAL"),
            // NIFTY OIL & GAS / ENERGY
            ("RELIANCE", "NIFTY OIL & GAS"),
            ("ONGC", "NIFTY OIL & GAS"),
            // NIFTY POWER / UTILITIES
            ("NTPC", "NIFTY POWER"),
            ("POWERGRID", "NIFTY POWER"),
            // NIFTY CONSUMER DURABLES
            ("TITAN", "NIFTY CONSUMER"),
            ("ASIANPAINT", "NIFTY CONSUMER"),
            // NIFTY REALTY / CEMENT / INFRA
            ("ULTRACEMCO", "NIFTY INFRA"),
            ("GRASIM", "NIFTY INFRA"),
            ("LT", "NIFTY INFRA"),
            // NIFTY TELECOM / MEDIA
            ("BHARTIARTL", "NIFTY TELECOM"),
            // NIFTY PSU / DEFENCE / CAPITAL GOODS (bucketed)
            ("ADANIPORTS", "NIFTY INFRA"),
        ])
    })
}

/// Returns the sector bucket for a symbol, or `None` if unmapped.
pub fn get_sector(symbol: &str) -> Option<&'static str> {
    let key = normalize_symbol(symbol);
    sector_map().get(key.as_str()).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_symbols_resolve_to_expected_sectors() {
        assert_eq!(get_sector("TVSMOTOR"), Some("NIFTY AUTO"));
        assert_eq!(get_sector("HDFCBANK"), Some("NIFTY BANK"));
        assert_eq!(get_sector("HDFCLIFE"), Some("NIFTY FIN SERVICE"));
    }

    #[test]
    fn lookup_normalizes_prefix_and_case() {
        assert_eq!(get_sector("nse:sbin"), Some("NIFTY BANK"));
    }

    #[test]
    fn unmapped_symbol_returns_none() {
        assert_eq!(get_sector("ZZZZZZ"), None);
    }
}
