pub mod analyser;
pub mod band;
pub mod biquad;
pub mod chain;
pub mod response;

pub use analyser::{Analyser, SpectrumView};
pub use band::{Band, BandDefaults, BandSettings, BandView, FilterType, DEFAULT_BANDS};
pub use biquad::{Biquad, BiquadCoefficients};
pub use chain::{ChainLifecycle, ChainShared, ChainSnapshot, FilterChain, ProcessSpec};
pub use response::{AnalysisGrid, ChangeListeners, ListenerId, ResponseAggregator};
