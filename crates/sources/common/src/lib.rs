pub mod simulated;

pub use simulated::SimulatedQuoteSource;
