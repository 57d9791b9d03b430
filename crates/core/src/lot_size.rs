use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// Multiplier used when a base symbol has no table entry.
pub const DEFAULT_LOT_SIZE: u32 = 100;

/// Exchange contract multipliers keyed by base symbol.
///
/// Built once at startup and shared read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotSizeTable {
    entries: HashMap<String, u32>,
    default_lot_size: u32,
}

impl Default for LotSizeTable {
    fn default() -> Self {
        Self::new(DEFAULT_LOT_SIZE)
    }
}

impl LotSizeTable {
    pub fn new(default_lot_size: u32) -> Self {
        Self {
            entries: HashMap::new(),
            default_lot_size,
        }
    }

    /// NSE F&O lot sizes for the index and stock futures the dashboard tracks.
    pub fn nse_defaults() -> Self {
        let mut table = Self::default();
        table.extend(
            NSE_LOT_SIZES
                .iter()
                .map(|(symbol, lot)| (symbol.to_string(), *lot)),
        );
        table
    }

    pub fn insert(&mut self, base_symbol: impl Into<String>, lot_size: u32) {
        self.entries.insert(base_symbol.into(), lot_size);
    }

    pub fn extend<I: IntoIterator<Item = (String, u32)>>(&mut self, entries: I) {
        self.entries.extend(entries);
    }

    pub fn with_default(mut self, default_lot_size: u32) -> Self {
        self.default_lot_size = default_lot_size;
        self
    }

    /// Exact-match lookup without the fallback.
    pub fn get(&self, base_symbol: &str) -> Option<u32> {
        self.entries.get(base_symbol).copied()
    }

    /// Exact-match lookup falling back to the configured default.
    pub fn lookup(&self, base_symbol: &str) -> u32 {
        match self.get(base_symbol) {
            Some(lot) => lot,
            None => {
                debug!(
                    symbol = %base_symbol,
                    default = self.default_lot_size,
                    "No lot size mapping, using default"
                );
                self.default_lot_size
            }
        }
    }

    pub fn default_lot_size(&self) -> u32 {
        self.default_lot_size
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries sorted by symbol.
    pub fn sorted_entries(&self) -> Vec<(&str, u32)> {
        let mut entries: Vec<_> = self
            .entries
            .iter()
            .map(|(s, lot)| (s.as_str(), *lot))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries
    }
}

const NSE_LOT_SIZES: &[(&str, u32)] = &[
    // Index futures
    ("BANKNIFTY", 35),
    ("NIFTY", 75),
    ("FINNIFTY", 65),
    ("MIDCPNIFTY", 140),
    ("NIFTYNXT50", 25),
    // Stock futures
    ("360ONE", 500),
    ("ABB", 125),
    ("ABCAPITAL", 3100),
    ("ADANIENSOL", 675),
    ("ADANIENT", 300),
    ("ADANIGREEN", 600),
    ("ADANIPORTS", 475),
    ("ALKEM", 125),
    ("AMBER", 100),
    ("AMBUJACEM", 1050),
    ("ANGELONE", 250),
    ("APLAPOLLO", 350),
    ("APOLLOHOSP", 125),
    ("ASHOKLEY", 5000),
    ("ASIANPAINT", 250),
    ("ASTRAL", 425),
    ("AUBANK", 1000),
    ("AUROPHARMA", 550),
    ("AXISBANK", 625),
    ("BAJAJ-AUTO", 75),
    ("BAJAJFINSV", 250),
    ("BAJFINANCE", 750),
    ("BANDHANBNK", 3600),
    ("BANKBARODA", 2925),
    ("BANKINDIA", 5200),
    ("BDL", 325),
    ("BEL", 1425),
    ("BHARATFORG", 500),
    ("BHARTIARTL", 475),
    ("BHEL", 2625),
    ("BIOCON", 2500),
    ("BLUESTARCO", 325),
    ("BOSCHLTD", 25),
    ("BPCL", 1975),
    ("BRITANNIA", 125),
    ("BSE", 375),
    ("CAMS", 150),
    ("CANBK", 6750),
    ("CDSL", 475),
    ("CGPOWER", 850),
    ("CHOLAFIN", 625),
    ("CIPLA", 375),
    ("COALINDIA", 1350),
    ("COFORGE", 375),
    ("COLPAL", 225),
    ("CONCOR", 1250),
    ("CROMPTON", 1800),
    ("CUMMINSIND", 200),
    ("CYIENT", 425),
    ("DABUR", 1250),
    ("DALBHARAT", 325),
    ("DELHIVERY", 2075),
    ("DIVISLAB", 100),
    ("DIXON", 50),
    ("DLF", 825),
    ("DMART", 150),
    ("DRREDDY", 625),
    ("EICHERMOT", 175),
    ("ETERNAL", 2425),
    ("EXIDEIND", 1800),
    ("FEDERALBNK", 5000),
    ("FORTIS", 775),
    ("GAIL", 3150),
    ("GLENMARK", 375),
    ("GMRAIRPORT", 6975),
    ("GODREJCP", 500),
    ("GODREJPROP", 275),
    ("GRASIM", 250),
    ("HAL", 150),
    ("HAVELLS", 500),
    ("HCLTECH", 350),
    ("HDFCAMC", 150),
    ("HDFCBANK", 550),
    ("HDFCLIFE", 1100),
    ("HEROMOTOCO", 150),
    ("HFCL", 6450),
    ("HINDALCO", 700),
    ("HINDPETRO", 2025),
    ("HINDUNILVR", 300),
    ("HINDZINC", 1225),
    ("HUDCO", 2775),
    ("ICICIBANK", 700),
    ("ICICIGI", 325),
    ("ICICIPRULI", 925),
    ("IDEA", 71475),
    ("IDFCFIRSTB", 9275),
    ("IEX", 3750),
    ("IIFL", 1650),
    ("INDHOTEL", 1000),
    ("INDIANB", 1000),
    ("INDIGO", 150),
    ("INDUSINDBK", 700),
    ("INDUSTOWER", 1700),
    ("INFY", 400),
    ("INOXWIND", 3272),
    ("IOC", 4875),
    ("IRCTC", 875),
    ("IREDA", 3450),
    ("IRFC", 4250),
    ("ITC", 1600),
    ("JINDALSTEL", 625),
    ("JIOFIN", 2350),
    ("JSWENERGY", 1000),
    ("JSWSTEEL", 675),
    ("JUBLFOOD", 1250),
    ("KALYANKJIL", 1175),
    ("KAYNES", 100),
    ("KEI", 175),
    ("KFINTECH", 450),
    ("KOTAKBANK", 400),
    ("KPITTECH", 400),
    ("LAURUSLABS", 850),
    ("LICHSGFIN", 1000),
    ("LICI", 700),
    ("LODHA", 450),
    ("LT", 175),
    ("LTF", 4462),
    ("LTIM", 150),
    ("LUPIN", 425),
    ("M&M", 200),
    ("MANAPPURAM", 3000),
    ("MANKIND", 225),
    ("MARICO", 1200),
    ("MARUTI", 50),
    ("MAXHEALTH", 525),
    ("MAZDOCK", 175),
    ("MCX", 125),
    ("MFSL", 400),
    ("MOTHERSON", 6150),
    ("MPHASIS", 275),
    ("MUTHOOTFIN", 275),
    ("NATIONALUM", 3750),
    ("NAUKRI", 375),
    ("NBCC", 6500),
    ("NCC", 2700),
    ("NESTLEIND", 500),
    ("NHPC", 6400),
    ("NMDC", 6750),
    ("NTPC", 1500),
    ("NUVAMA", 75),
    ("NYKAA", 3125),
    ("OBEROIRLTY", 350),
    ("OFSS", 75),
    ("OIL", 1400),
    ("ONGC", 2250),
    ("PAGEIND", 15),
    ("PATANJALI", 900),
    ("PAYTM", 725),
    ("PERSISTENT", 100),
    ("PETRONET", 1800),
    ("PFC", 1300),
    ("PGEL", 700),
    ("PHOENIXLTD", 350),
    ("PIDILITIND", 500),
    ("PIIND", 175),
    ("PNB", 8000),
    ("PNBHOUSING", 650),
    ("POLICYBZR", 350),
    ("POLYCAB", 125),
    ("POWERGRID", 1900),
    ("POWERINDIA", 50),
    ("PPLPHARMA", 2500),
    ("PRESTIGE", 450),
    ("RBLBANK", 3175),
    ("RECLTD", 1275),
    ("RELIANCE", 500),
    ("RVNL", 1375),
    ("SAIL", 4700),
    ("SAMMAANCAP", 4300),
    ("SBICARD", 800),
    ("SBILIFE", 375),
    ("SBIN", 750),
    ("SHREECEM", 25),
    ("SHRIRAMFIN", 825),
    ("SIEMENS", 125),
    ("SOLARINDS", 75),
    ("SONACOMS", 1050),
    ("SRF", 200),
    ("SUNPHARMA", 350),
    ("SUPREMEIND", 175),
    ("SUZLON", 8000),
    ("SYNGENE", 1000),
    ("TATACONSUM", 550),
    ("TATAELXSI", 100),
    ("TATAPOWER", 1450),
    ("TATASTEEL", 5500),
    ("TATATECH", 800),
    ("TCS", 175),
    ("TECHM", 600),
    ("TIINDIA", 200),
    ("TITAGARH", 725),
    ("TITAN", 175),
    ("TMPV", 800),
    ("TORNTPHARM", 250),
    ("TORNTPOWER", 375),
    ("TRENT", 100),
    ("TVSMOTOR", 175),
    ("ULTRACEMCO", 50),
    ("UNIONBANK", 4425),
    ("UNITDSPR", 400),
    ("UNOMINDA", 550),
    ("UPL", 1355),
    ("VBL", 1025),
    ("VEDL", 1150),
    ("VOLTAS", 375),
    ("WIPRO", 3000),
    ("YESBANK", 31100),
    ("ZYDUSLIFE", 900),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_symbol_lookup() {
        let table = LotSizeTable::nse_defaults();
        assert_eq!(table.lookup("RELIANCE"), 500);
        assert_eq!(table.lookup("BAJAJ-AUTO"), 75);
    }

    #[test]
    fn test_full_stock_futures_table() {
        let table = LotSizeTable::nse_defaults();
        assert_eq!(table.len(), 213);
        assert_eq!(table.get("ABCAPITAL"), Some(3100));
        assert_eq!(table.get("AUBANK"), Some(1000));
        assert_eq!(table.get("BANDHANBNK"), Some(3600));
        assert_eq!(table.get("BOSCHLTD"), Some(25));
        assert_eq!(table.get("ZYDUSLIFE"), Some(900));
        assert_eq!(table.get("VOLTAS"), Some(375));
        assert_eq!(table.get("IDEA"), Some(71475));
    }

    #[test]
    fn test_unknown_symbol_falls_back_to_default() {
        let table = LotSizeTable::nse_defaults();
        assert_eq!(table.get("NOSUCHSTOCK"), None);
        assert_eq!(table.lookup("NOSUCHSTOCK"), DEFAULT_LOT_SIZE);
    }

    #[test]
    fn test_lookup_is_exact_match() {
        let table = LotSizeTable::nse_defaults();
        assert_eq!(table.lookup("reliance"), DEFAULT_LOT_SIZE);
        assert_eq!(table.lookup("RELIANCE25NOVFUT"), DEFAULT_LOT_SIZE);
    }

    #[test]
    fn test_configured_default() {
        let mut table = LotSizeTable::new(1);
        table.insert("ABC", 250);
        assert_eq!(table.lookup("ABC"), 250);
        assert_eq!(table.lookup("XYZ"), 1);
        assert_eq!(table.with_default(50).lookup("XYZ"), 50);
    }
}
