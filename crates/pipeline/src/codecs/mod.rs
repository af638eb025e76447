mod gpcc;
mod pcgc;

pub use gpcc::{Gpcc, GpccRate, GpccSettings};
pub use pcgc::{PcgcRate, PcgcSettings, Pcgcv1};
